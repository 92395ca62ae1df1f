// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The bounded engine: scoped assertions on top of the enumeration.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use ast::{Context, Expr};
use runner::{
    conf::ParamValue,
    engine::{Engine, EngineError},
    protocol::SatStatus,
};

use crate::{
    indices::Indices,
    model::BoundedModel,
    options::BoundedOptions,
    search::{minimize, search, Outcome},
    BoundedError,
};

const SLEEP_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct Assertion {
    expr: Expr,
    tracked: bool,
}

/// What the last check found.
#[derive(Debug)]
enum Last {
    Sat(BoundedModel),
    Unsat(Vec<Expr>),
    Unknown(String),
}

/// An [`Engine`] that decides formulas by bounded enumeration.
pub struct BoundedEngine {
    ctx: Context,
    options: BoundedOptions,
    /// Assertions per scope; the first frame is the base level
    frames: Vec<Vec<Assertion>>,
    last: Option<Last>,
}

impl BoundedEngine {
    /// An engine building its answers in `ctx`.
    pub fn new(ctx: &Context) -> Self {
        Self::with_options(ctx, BoundedOptions::default())
    }

    /// An engine with non-default options.
    pub fn with_options(ctx: &Context, options: BoundedOptions) -> Self {
        Self {
            ctx: ctx.clone(),
            options,
            frames: vec![vec![]],
            last: None,
        }
    }

    /// The current options.
    pub fn options(&self) -> &BoundedOptions {
        &self.options
    }

    /// Number of open scopes.
    pub fn scopes(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    fn add(&mut self, expr: &Expr, tracked: bool) -> Result<(), BoundedError> {
        if !expr.sort().is_bool() {
            return Err(BoundedError::NotBoolean(expr.to_string()));
        }
        self.last = None;
        let assertion = Assertion {
            expr: expr.clone(),
            tracked,
        };
        match self.frames.last_mut() {
            Some(frame) => frame.push(assertion),
            None => self.frames.push(vec![assertion]),
        }
        Ok(())
    }

    /// Sleep for `sleep_ms`, returning early (and true) if interrupted.
    fn pause(&self, interrupted: &AtomicBool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(self.options.sleep_ms);
        loop {
            if interrupted.load(Ordering::Relaxed) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    fn decide(&self, assumptions: &[Expr], interrupted: &AtomicBool) -> Result<Last, BoundedError> {
        if self.pause(interrupted) {
            return Ok(Last::Unknown("interrupted".to_string()));
        }
        self.options.int_range()?;

        let (fixed, tracked): (Vec<&Assertion>, Vec<&Assertion>) =
            self.frames.iter().flatten().partition(|a| !a.tracked);
        let fixed = fixed.into_iter().map(|a| a.expr.clone()).collect::<Vec<_>>();
        let candidates = tracked
            .into_iter()
            .map(|a| a.expr.clone())
            .chain(assumptions.iter().cloned())
            .collect::<Vec<_>>();
        let all = fixed.iter().chain(&candidates).cloned().collect::<Vec<_>>();

        let indices = match Indices::new(&all, &self.options) {
            Err(BoundedError::TooLarge) => {
                return Ok(Last::Unknown(BoundedError::TooLarge.to_string()))
            }
            indices => indices?,
        };
        log::debug!(
            "checking {} formulas over {} slots",
            all.len(),
            indices.slots().len()
        );
        Ok(match search(&indices, &all, &self.options, interrupted)? {
            Outcome::Sat(candidate) => Last::Sat(BoundedModel::new(&self.ctx, &indices, &candidate)),
            Outcome::Unsat if self.options.minimize_cores => Last::Unsat(minimize(
                &indices,
                &fixed,
                candidates,
                &self.options,
                interrupted,
            )?),
            Outcome::Unsat => Last::Unsat(candidates),
            Outcome::Unknown(reason) => Last::Unknown(reason),
        })
    }
}

impl Engine for BoundedEngine {
    type Model = BoundedModel;

    fn name(&self) -> &str {
        "bounded"
    }

    fn set_parameter(&mut self, name: &str, value: &ParamValue) -> Result<(), EngineError> {
        self.options.set(name, value)?;
        log::debug!("set {name} to {value}");
        Ok(())
    }

    fn assert(&mut self, expr: &Expr) -> Result<(), EngineError> {
        Ok(self.add(expr, false)?)
    }

    fn assert_and_track(&mut self, expr: &Expr) -> Result<(), EngineError> {
        Ok(self.add(expr, true)?)
    }

    fn push(&mut self) -> Result<(), EngineError> {
        self.last = None;
        self.frames.push(vec![]);
        Ok(())
    }

    fn pop(&mut self, levels: u32) -> Result<(), EngineError> {
        let open = self.scopes();
        if levels as usize > open {
            return Err(BoundedError::Pop {
                requested: levels,
                open,
            }
            .into());
        }
        self.last = None;
        self.frames.truncate(self.frames.len() - levels as usize);
        Ok(())
    }

    fn check_sat(
        &mut self,
        assumptions: &[Expr],
        interrupted: &AtomicBool,
    ) -> Result<SatStatus, EngineError> {
        self.last = None;
        if let Some(a) = assumptions.iter().find(|a| !a.sort().is_bool()) {
            return Err(BoundedError::NotBoolean(a.to_string()).into());
        }
        let last = self.decide(assumptions, interrupted)?;
        let status = match &last {
            Last::Sat(_) => SatStatus::Sat,
            Last::Unsat(_) => SatStatus::Unsat,
            Last::Unknown(reason) => {
                log::info!("check-sat returned unknown: {reason}");
                SatStatus::Unknown
            }
        };
        self.last = Some(last);
        Ok(status)
    }

    fn model(&mut self) -> Result<BoundedModel, EngineError> {
        match &self.last {
            Some(Last::Sat(model)) => Ok(model.clone()),
            _ => Err(BoundedError::NotAvailable("no model: the last check was not sat").into()),
        }
    }

    fn unsat_core(&mut self) -> Result<Vec<Expr>, EngineError> {
        match &self.last {
            Some(Last::Unsat(core)) => Ok(core.clone()),
            _ => Err(
                BoundedError::NotAvailable("no unsat core: the last check was not unsat").into(),
            ),
        }
    }

    fn reason_unknown(&mut self) -> Result<String, EngineError> {
        match &self.last {
            Some(Last::Unknown(reason)) => Ok(reason.clone()),
            _ => Err(BoundedError::NotAvailable("the last check was not unknown").into()),
        }
    }
}
