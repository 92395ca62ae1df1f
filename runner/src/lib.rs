// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Run SMT engines in separate worker processes.
//!
//! Requests reference [`ast`] nodes. The [`codec`] moves those nodes across
//! the process boundary through a per-channel [`registry::Registry`], so a
//! subterm shared by many assertions crosses the pipe once and is afterwards
//! named by a small integer. A [`channel::Channel`] owns one worker process
//! and enforces deadlines by killing it; a [`session::Session`] turns solver
//! operations into ordered requests and hands out lazily evaluated
//! [`model::RemoteModel`]s that can be detached into plain
//! [`model::ModelSnapshot`]s.
//!
//! The worker side of the protocol is [`worker::serve`], which drives any
//! [`engine::Engine`].

// configure clippy
#![allow(clippy::needless_return)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::type_complexity)]
#![deny(clippy::uninlined_format_args)]
// documentation-related lints (only checked when running rustdoc)
#![warn(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod channel;
pub mod codec;
pub mod conf;
pub mod engine;
mod error;
pub mod frame;
mod journal;
pub mod model;
pub mod path;
pub mod protocol;
pub mod registry;
pub mod session;
mod tee;
pub mod worker;

pub use error::{Error, Result};
