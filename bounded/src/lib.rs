// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! A bounded reference engine for the worker protocol.
//!
//! The engine decides satisfiability by enumerating every interpretation of
//! the declarations mentioned in the assertions, with integers restricted to
//! a configurable range and uninterpreted sorts to a configurable universe.
//! Its `unsat` answers are therefore only relative to those bounds. It exists
//! to exercise the runner end to end without an external solver.

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

use ast::AstError;
use runner::engine::EngineError;
use thiserror::Error;

mod engine;
mod eval;
mod indices;
mod model;
pub mod options;
mod search;

pub use engine::BoundedEngine;
pub use model::BoundedModel;
pub use options::BoundedOptions;

/// Errors raised by the bounded engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoundedError {
    /// An unknown parameter, or a known one with a value of the wrong type
    #[error("no parameter {name} of type {kind}")]
    UnsupportedParameter {
        /// Parameter name
        name: String,
        /// Type of the rejected value
        kind: &'static str,
    },
    /// A known parameter with a value outside its range
    #[error("invalid value {value} for parameter {name}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// The rejected value
        value: String,
    },
    /// `int_min` is larger than `int_max`
    #[error("empty integer range [{0}, {1}]")]
    EmptyRange(i64, i64),
    /// An assertion or assumption that is not a boolean
    #[error("expected a boolean formula, got {0}")]
    NotBoolean(String),
    /// Arithmetic left the range of 64-bit integers
    #[error("integer overflow in ({0} ...)")]
    Overflow(&'static str),
    /// An operator applied to values of the wrong kind
    #[error("ill-sorted application of {0}")]
    IllSorted(String),
    /// A declaration outside the enumerated signature
    #[error("no interpretation for {0}")]
    Uninterpreted(String),
    /// Popping more scopes than were pushed
    #[error("cannot pop {requested} scopes, only {open} open")]
    Pop {
        /// Scopes requested
        requested: u32,
        /// Scopes open
        open: usize,
    },
    /// A query that needs a different result of the last check
    #[error("{0}")]
    NotAvailable(&'static str),
    /// The enumeration would be larger than `max_candidates`
    #[error("search space too large")]
    TooLarge,
    /// Building a result node failed
    #[error("{0}")]
    Ast(#[from] AstError),
}

impl From<BoundedError> for EngineError {
    fn from(err: BoundedError) -> Self {
        match err {
            BoundedError::UnsupportedParameter { .. } | BoundedError::InvalidParameter { .. } => {
                EngineError::UnsupportedParameter(err.to_string())
            }
            _ => EngineError::Failed(err.to_string()),
        }
    }
}
