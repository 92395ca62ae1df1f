// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The interface a solver backend implements to be hosted by a worker.

use std::sync::atomic::AtomicBool;

use ast::{Decl, Expr, Sort};
use thiserror::Error;

use crate::{conf::ParamValue, model::FuncInterp, protocol::SatStatus};

/// An error reported by an engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine does not know the parameter, or not with this value type
    #[error("{0}")]
    UnsupportedParameter(String),
    /// Anything else the engine refuses to do
    #[error("{0}")]
    Failed(String),
}

/// A solver backend.
///
/// A worker calls these methods strictly one at a time, in the order the
/// requests arrived.
pub trait Engine {
    /// Models captured by this engine.
    type Model: EngineModel;

    /// Name reported in the handshake.
    fn name(&self) -> &str;

    /// Set a parameter.
    fn set_parameter(&mut self, name: &str, value: &ParamValue) -> Result<(), EngineError>;

    /// Add an assertion to the current scope.
    fn assert(&mut self, expr: &Expr) -> Result<(), EngineError>;

    /// Add an assertion that may appear in unsat cores.
    fn assert_and_track(&mut self, expr: &Expr) -> Result<(), EngineError>;

    /// Open a scope.
    fn push(&mut self) -> Result<(), EngineError>;

    /// Close `levels` scopes, dropping their assertions.
    fn pop(&mut self, levels: u32) -> Result<(), EngineError>;

    /// Check satisfiability of the assertions together with `assumptions`.
    ///
    /// Long checks should poll `interrupted` and give up with
    /// [`SatStatus::Unknown`] once it is set.
    fn check_sat(
        &mut self,
        assumptions: &[Expr],
        interrupted: &AtomicBool,
    ) -> Result<SatStatus, EngineError>;

    /// Capture the model of the last check, which must have been `sat`.
    fn model(&mut self) -> Result<Self::Model, EngineError>;

    /// Tracked assertions and assumptions responsible for the last `unsat`.
    fn unsat_core(&mut self) -> Result<Vec<Expr>, EngineError>;

    /// Why the last check returned `unknown`.
    fn reason_unknown(&mut self) -> Result<String, EngineError>;
}

/// A model captured from an engine. It stays valid after later checks.
pub trait EngineModel {
    /// Declarations that have an interpretation.
    fn declarations(&self) -> Vec<Decl>;

    /// Uninterpreted sorts that have a universe.
    fn uninterpreted_sorts(&self) -> Vec<Sort>;

    /// Evaluate `expr`. With `complete`, declarations without an
    /// interpretation get a default value instead of staying symbolic.
    fn eval(&self, expr: &Expr, complete: bool) -> Result<Expr, EngineError>;

    /// The interpretation of `decl`, or `None` if the model has none.
    fn interpretation(&self, decl: &Decl) -> Result<Option<FuncInterp>, EngineError>;

    /// The values of an uninterpreted sort, or `None` if the model has none.
    fn universe(&self, sort: &Sort) -> Result<Option<Vec<Expr>>, EngineError>;
}
