// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! A structure that maps (declaration, argument values) pairs to the slots of
//! a candidate interpretation.

use std::collections::{btree_map::Entry, BTreeMap, BTreeSet, HashMap, HashSet};

use ast::{Decl, Expr, ExprKind, Sort, SortKind};
use itertools::Itertools;

use crate::{eval::Value, options::BoundedOptions, BoundedError};

/// The owner of a slot: a declaration applied to specific arguments, or the
/// catch-all entry of a declaration taking integers (`args == None`), used
/// for arguments outside the enumerated range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub decl: Decl,
    pub args: Option<Vec<Value>>,
}

/// Holds the finite domain of every sort used by some declaration, and a map
/// from every application of every declaration to a slot number. A candidate
/// interpretation assigns each slot an index into the domain of its
/// declaration's result sort.
pub struct Indices {
    domains: BTreeMap<Sort, Vec<Value>>,
    indices: HashMap<Decl, HashMap<Vec<Value>, usize>>,
    defaults: HashMap<Decl, usize>,
    slots: Vec<Slot>,
}

/// The declarations, integer literals and largest universe elements
/// mentioned in some formulas.
#[derive(Default)]
struct Mentions {
    decls: BTreeSet<Decl>,
    ints: BTreeSet<i64>,
    elements: HashMap<Sort, u32>,
}

impl Mentions {
    fn collect(formulas: &[Expr]) -> Self {
        let mut mentions = Mentions::default();
        let mut seen = HashSet::new();
        let mut stack = formulas.to_vec();
        while let Some(expr) = stack.pop() {
            if !seen.insert(expr.clone()) {
                continue;
            }
            match expr.kind() {
                ExprKind::Int(i) => {
                    mentions.ints.insert(*i);
                }
                ExprKind::UninterpretedValue(id) => {
                    let n = mentions.elements.entry(expr.sort().clone()).or_default();
                    *n = (*n).max(id.saturating_add(1));
                }
                ExprKind::App(decl, _) => {
                    mentions.decls.insert(decl.clone());
                }
                ExprKind::Bool(_) | ExprKind::Op(..) => (),
            }
            stack.extend(expr.args().iter().cloned());
        }
        mentions
    }
}

fn too_large(n: u64, options: &BoundedOptions) -> Result<(), BoundedError> {
    if n > options.max_candidates {
        return Err(BoundedError::TooLarge);
    }
    Ok(())
}

fn domain(
    sort: &Sort,
    mentions: &Mentions,
    options: &BoundedOptions,
) -> Result<Vec<Value>, BoundedError> {
    match sort.kind() {
        SortKind::Bool => Ok(vec![Value::Bool(false), Value::Bool(true)]),
        SortKind::Int => {
            let (min, max) = options.int_range()?;
            let width = u64::try_from(i128::from(max) - i128::from(min) + 1).unwrap_or(u64::MAX);
            too_large(width, options)?;
            Ok((min..=max)
                .chain(mentions.ints.iter().copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                // small magnitudes first: 0, 1, -1, 2, -2, ...
                .sorted_by_key(|i| (i.unsigned_abs(), *i < 0))
                .map(Value::Int)
                .collect())
        }
        SortKind::Uninterpreted(_) => {
            let mentioned = mentions.elements.get(sort).copied().unwrap_or(0);
            let size = options.universe_size.max(mentioned);
            too_large(u64::from(size), options)?;
            Ok((0..size).map(Value::Elem).collect())
        }
    }
}

impl Indices {
    /// Create the slots for every declaration applied in `formulas`.
    pub fn new(formulas: &[Expr], options: &BoundedOptions) -> Result<Self, BoundedError> {
        let mentions = Mentions::collect(formulas);

        let mut domains = BTreeMap::new();
        for decl in &mentions.decls {
            for sort in decl.args().iter().chain([decl.sort()]) {
                if let Entry::Vacant(entry) = domains.entry(sort.clone()) {
                    entry.insert(domain(sort, &mentions, options)?);
                }
            }
        }

        let mut indices: HashMap<Decl, HashMap<Vec<Value>, usize>> = HashMap::new();
        let mut defaults = HashMap::new();
        let mut slots = vec![];
        for decl in &mentions.decls {
            let count = decl
                .args()
                .iter()
                .map(|sort| domains[sort].len() as u64)
                .fold(1u64, u64::saturating_mul);
            too_large((slots.len() as u64).saturating_add(count), options)?;

            let tuples: Vec<Vec<Value>> = if decl.args().is_empty() {
                vec![vec![]]
            } else {
                decl.args()
                    .iter()
                    .map(|sort| domains[sort].clone())
                    .multi_cartesian_product()
                    .collect()
            };
            let table = indices.entry(decl.clone()).or_default();
            for args in tuples {
                table.insert(args.clone(), slots.len());
                slots.push(Slot {
                    decl: decl.clone(),
                    args: Some(args),
                });
            }
            if decl.args().iter().any(Sort::is_int) {
                defaults.insert(decl.clone(), slots.len());
                slots.push(Slot {
                    decl: decl.clone(),
                    args: None,
                });
            }
        }

        Ok(Indices {
            domains,
            indices,
            defaults,
            slots,
        })
    }

    /// The slot holding the value of `decl` applied to `args`.
    pub fn get(&self, decl: &Decl, args: &[Value]) -> Option<usize> {
        self.indices
            .get(decl)
            .and_then(|table| table.get(args))
            .or_else(|| self.defaults.get(decl))
            .copied()
    }

    /// All slots, in enumeration order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// The enumerated values of `sort`, if some declaration uses it.
    pub fn domain(&self, sort: &Sort) -> Option<&[Value]> {
        self.domains.get(sort).map(Vec::as_slice)
    }

    /// Uninterpreted sorts with their universe sizes.
    pub fn universes(&self) -> impl Iterator<Item = (&Sort, usize)> {
        self.domains
            .iter()
            .filter(|(sort, _)| sort.is_uninterpreted())
            .map(|(sort, values)| (sort, values.len()))
    }

    fn slot_domain(&self, slot: usize) -> &[Value] {
        self.domain(self.slots[slot].decl.sort())
            .unwrap_or_default()
    }

    /// Number of values slot `slot` ranges over.
    pub fn radix(&self, slot: usize) -> usize {
        self.slot_domain(slot).len()
    }

    /// The value of `slot` when it holds the `digit`-th value of its domain.
    pub fn value(&self, slot: usize, digit: usize) -> Value {
        self.slot_domain(slot)[digit]
    }

    /// Number of candidate interpretations.
    pub fn space(&self) -> u64 {
        (0..self.slots.len())
            .map(|slot| self.radix(slot) as u64)
            .fold(1u64, u64::saturating_mul)
    }

    /// The value of `decl` applied to `args` in `candidate`.
    pub fn lookup(
        &self,
        decl: &Decl,
        args: &[Value],
        candidate: &[usize],
    ) -> Result<Value, BoundedError> {
        let slot = self
            .get(decl, args)
            .ok_or_else(|| BoundedError::Uninterpreted(decl.name().to_string()))?;
        Ok(self.value(slot, candidate[slot]))
    }
}
