// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Exhaustive search over candidate interpretations.

use std::sync::atomic::{AtomicBool, Ordering};

use ast::Expr;

use crate::{
    eval::{eval, Value},
    indices::Indices,
    options::BoundedOptions,
    BoundedError,
};

/// How often to look at the interrupt flag, in candidates.
const POLL_INTERVAL: u64 = 1024;

/// The result of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A candidate satisfying every formula, one digit per slot
    Sat(Vec<usize>),
    Unsat,
    Unknown(String),
}

fn satisfies(
    indices: &Indices,
    formulas: &[Expr],
    candidate: &[usize],
) -> Result<bool, BoundedError> {
    let mut app = |decl: &_, args: &[Value]| indices.lookup(decl, args, candidate);
    for formula in formulas {
        if eval(formula, &mut app)? != Value::Bool(true) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Move to the next candidate, returning false after the last one.
fn advance(candidate: &mut [usize], radices: &[usize]) -> bool {
    for (digit, radix) in candidate.iter_mut().zip(radices).rev() {
        *digit += 1;
        if *digit < *radix {
            return true;
        }
        *digit = 0;
    }
    false
}

/// Look for a candidate satisfying all of `formulas`.
pub fn search(
    indices: &Indices,
    formulas: &[Expr],
    options: &BoundedOptions,
    interrupted: &AtomicBool,
) -> Result<Outcome, BoundedError> {
    let space = indices.space();
    if space > options.max_candidates {
        log::debug!("{space} candidates exceed the limit of {}", options.max_candidates);
        return Ok(Outcome::Unknown(BoundedError::TooLarge.to_string()));
    }

    let radices = (0..indices.slots().len())
        .map(|slot| indices.radix(slot))
        .collect::<Vec<_>>();
    let mut candidate = vec![0; radices.len()];
    let mut tried: u64 = 0;
    loop {
        if tried % POLL_INTERVAL == 0 && interrupted.load(Ordering::Relaxed) {
            log::info!("search interrupted after {tried} candidates");
            return Ok(Outcome::Unknown("interrupted".to_string()));
        }
        tried += 1;
        if satisfies(indices, formulas, &candidate)? {
            log::debug!("found a model after {tried} of {space} candidates");
            return Ok(Outcome::Sat(candidate));
        }
        if !advance(&mut candidate, &radices) {
            log::debug!("exhausted {space} candidates");
            return Ok(Outcome::Unsat);
        }
    }
}

/// Shrink `core` so that `fixed` together with `core` stays unsatisfiable,
/// trying to drop each element in turn. Stops early, keeping what it has,
/// if a search cannot decide.
pub fn minimize(
    indices: &Indices,
    fixed: &[Expr],
    mut core: Vec<Expr>,
    options: &BoundedOptions,
    interrupted: &AtomicBool,
) -> Result<Vec<Expr>, BoundedError> {
    let mut i = 0;
    while i < core.len() {
        let trial = fixed
            .iter()
            .chain(&core[..i])
            .chain(&core[i + 1..])
            .cloned()
            .collect::<Vec<_>>();
        match search(indices, &trial, options, interrupted)? {
            Outcome::Unsat => {
                core.remove(i);
            }
            Outcome::Sat(_) => i += 1,
            Outcome::Unknown(reason) => {
                log::debug!("stopped minimizing the core: {reason}");
                break;
            }
        }
    }
    Ok(core)
}
