// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Models found by the bounded engine.

use std::collections::BTreeMap;

use ast::{Context, Decl, DeclKind, Expr, ExprKind, Op, Sort};
use runner::{
    engine::{EngineError, EngineModel},
    model::{FuncEntry, FuncInterp},
};

use crate::{
    eval::{apply_op, Value},
    indices::Indices,
    BoundedError,
};

/// A finite function table. Arguments without an entry map to `default`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Table {
    entries: Vec<(Vec<Value>, Value)>,
    default: Value,
}

impl Table {
    fn apply(&self, args: &[Value]) -> Value {
        self.entries
            .iter()
            .find(|(a, _)| a == args)
            .map_or(self.default, |(_, v)| *v)
    }
}

/// The interpretation the search settled on, with every declaration it
/// enumerated and every uninterpreted sort it used.
#[derive(Debug, Clone)]
pub struct BoundedModel {
    ctx: Context,
    tables: BTreeMap<Decl, Table>,
    universes: BTreeMap<Sort, u32>,
}

impl BoundedModel {
    /// Read off the model from a satisfying candidate.
    pub(crate) fn new(ctx: &Context, indices: &Indices, candidate: &[usize]) -> Self {
        let mut rows: BTreeMap<Decl, (Vec<(Vec<Value>, Value)>, Option<Value>)> = BTreeMap::new();
        for (slot, owner) in indices.slots().iter().enumerate() {
            let value = indices.value(slot, candidate[slot]);
            let (entries, default) = rows.entry(owner.decl.clone()).or_default();
            match &owner.args {
                Some(args) => entries.push((args.clone(), value)),
                None => *default = Some(value),
            }
        }
        let tables = rows
            .into_iter()
            .filter_map(|(decl, (mut entries, default))| {
                // without a catch-all, the last row becomes the default
                let default = match default {
                    Some(v) => v,
                    None => entries.pop()?.1,
                };
                entries.retain(|(_, v)| *v != default);
                Some((decl, Table { entries, default }))
            })
            .collect();
        let universes = indices
            .universes()
            .map(|(sort, size)| (sort.clone(), size as u32))
            .collect();
        BoundedModel {
            ctx: ctx.clone(),
            tables,
            universes,
        }
    }

    fn literal(&self, value: Value, sort: &Sort) -> Result<Expr, BoundedError> {
        value.to_expr(&self.ctx, sort)
    }

    /// Evaluate `expr` as far as the model allows. With `complete`,
    /// declarations the model does not interpret take the default value of
    /// their sort, so the result is always a literal.
    pub fn reduce(&self, expr: &Expr, complete: bool) -> Result<Expr, BoundedError> {
        let args = expr
            .args()
            .iter()
            .map(|a| self.reduce(a, complete))
            .collect::<Result<Vec<_>, _>>()?;
        let values = args.iter().map(Value::of_literal).collect::<Option<Vec<_>>>();
        match expr.kind() {
            ExprKind::Bool(_) | ExprKind::Int(_) | ExprKind::UninterpretedValue(_) => {
                Ok(expr.clone())
            }
            ExprKind::App(decl, _) => match (self.tables.get(decl), values) {
                (Some(table), Some(values)) => self.literal(table.apply(&values), decl.sort()),
                (None, _) if complete => self.literal(Value::default_of(decl.sort()), decl.sort()),
                _ => Ok(self.ctx.mk_app(decl, args)?),
            },
            ExprKind::Op(op, _) => match values {
                Some(values) => self.literal(apply_op(*op, &values)?, expr.sort()),
                None => self.reduce_partial(*op, args),
            },
        }
    }

    fn reduce_partial(&self, op: Op, args: Vec<Expr>) -> Result<Expr, BoundedError> {
        let literal = |e: &Expr| e.as_bool();
        match op {
            Op::And if args.iter().any(|a| literal(a) == Some(false)) => Ok(self.ctx.mk_bool(false)),
            Op::Or if args.iter().any(|a| literal(a) == Some(true)) => Ok(self.ctx.mk_bool(true)),
            Op::Implies if literal(&args[0]) == Some(false) || literal(&args[1]) == Some(true) => {
                Ok(self.ctx.mk_bool(true))
            }
            Op::Ite => match literal(&args[0]) {
                Some(true) => Ok(args[1].clone()),
                Some(false) => Ok(args[2].clone()),
                None => Ok(self.ctx.mk_op(op, args)?),
            },
            _ => Ok(self.ctx.mk_op(op, args)?),
        }
    }
}

impl EngineModel for BoundedModel {
    fn declarations(&self) -> Vec<Decl> {
        self.tables.keys().cloned().collect()
    }

    fn uninterpreted_sorts(&self) -> Vec<Sort> {
        self.universes.keys().cloned().collect()
    }

    fn eval(&self, expr: &Expr, complete: bool) -> Result<Expr, EngineError> {
        Ok(self.reduce(expr, complete)?)
    }

    fn interpretation(&self, decl: &Decl) -> Result<Option<FuncInterp>, EngineError> {
        let Some(table) = self.tables.get(decl) else {
            return Ok(None);
        };
        let default = self.literal(table.default, decl.sort())?;
        match decl.kind() {
            DeclKind::Const => return Ok(Some(FuncInterp::constant(decl.clone(), default))),
            DeclKind::Func => {}
        }
        let vars = decl
            .args()
            .iter()
            .enumerate()
            .map(|(i, sort)| self.ctx.mk_decl(&format!("x!{i}"), [], sort))
            .collect::<Result<Vec<_>, _>>()
            .map_err(BoundedError::from)?;
        let entries = table
            .entries
            .iter()
            .map(|(args, value)| {
                Ok(FuncEntry {
                    args: args
                        .iter()
                        .zip(decl.args())
                        .map(|(a, sort)| self.literal(*a, sort))
                        .collect::<Result<_, BoundedError>>()?,
                    value: self.literal(*value, decl.sort())?,
                })
            })
            .collect::<Result<Vec<_>, BoundedError>>()?;
        Ok(Some(FuncInterp {
            decl: decl.clone(),
            vars,
            entries,
            default: Some(default),
        }))
    }

    fn universe(&self, sort: &Sort) -> Result<Option<Vec<Expr>>, EngineError> {
        let Some(size) = self.universes.get(sort) else {
            return Ok(None);
        };
        let elements = (0..*size)
            .map(|id| self.literal(Value::Elem(id), sort))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(elements))
    }
}
