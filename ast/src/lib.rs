// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The unified AST shared by every solver backend.
//!
//! Sorts, declarations and expressions are immutable and hash-consed inside a
//! [`Context`]: building the same value twice in one context returns the same
//! node, so value equality is pointer equality and heavily shared graphs stay
//! compact. Nodes remember which context built them, which lets serializers
//! reject foreign nodes before touching any state.

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

mod context;
mod printer;
pub mod syntax;

pub use context::Context;
pub use syntax::{Ast, AstError, Decl, DeclKind, Expr, ExprKind, Op, Sort, SortKind};
