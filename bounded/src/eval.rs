// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Concrete values and expression evaluation.

use ast::{Context, Decl, Expr, ExprKind, Op, Sort, SortKind};

use crate::BoundedError;

/// A value of some sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Bool(bool),
    Int(i64),
    /// Element of an uninterpreted sort
    Elem(u32),
}

impl Value {
    /// The value of a literal expression.
    pub fn of_literal(expr: &Expr) -> Option<Value> {
        match expr.kind() {
            ExprKind::Bool(b) => Some(Value::Bool(*b)),
            ExprKind::Int(i) => Some(Value::Int(*i)),
            ExprKind::UninterpretedValue(id) => Some(Value::Elem(*id)),
            _ => None,
        }
    }

    /// The default value of `sort`.
    pub fn default_of(sort: &Sort) -> Value {
        match sort.kind() {
            SortKind::Bool => Value::Bool(false),
            SortKind::Int => Value::Int(0),
            SortKind::Uninterpreted(_) => Value::Elem(0),
        }
    }

    /// Build the literal for this value.
    pub fn to_expr(self, ctx: &Context, sort: &Sort) -> Result<Expr, BoundedError> {
        Ok(match self {
            Value::Bool(b) => ctx.mk_bool(b),
            Value::Int(i) => ctx.mk_int(i),
            Value::Elem(id) => ctx.mk_uninterpreted_value(sort, id)?,
        })
    }

    fn bool(self, op: Op) -> Result<bool, BoundedError> {
        match self {
            Value::Bool(b) => Ok(b),
            _ => Err(BoundedError::IllSorted(op.symbol().to_string())),
        }
    }

    fn int(self, op: Op) -> Result<i64, BoundedError> {
        match self {
            Value::Int(i) => Ok(i),
            _ => Err(BoundedError::IllSorted(op.symbol().to_string())),
        }
    }
}

/// Apply `op` to fully evaluated arguments.
pub fn apply_op(op: Op, args: &[Value]) -> Result<Value, BoundedError> {
    let overflow = || BoundedError::Overflow(op.symbol());
    let ints = || args.iter().map(|v| v.int(op)).collect::<Result<Vec<_>, _>>();
    let compare = |f: fn(&i64, &i64) -> bool| -> Result<Value, BoundedError> {
        match ints()?[..] {
            [a, b] => Ok(Value::Bool(f(&a, &b))),
            _ => Err(BoundedError::IllSorted(op.symbol().to_string())),
        }
    };
    match op {
        Op::Not => match args {
            [a] => Ok(Value::Bool(!a.bool(op)?)),
            _ => Err(BoundedError::IllSorted(op.symbol().to_string())),
        },
        Op::And => {
            for a in args {
                if !a.bool(op)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Op::Or => {
            for a in args {
                if a.bool(op)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Op::Implies => match args {
            [a, b] => Ok(Value::Bool(!a.bool(op)? || b.bool(op)?)),
            _ => Err(BoundedError::IllSorted(op.symbol().to_string())),
        },
        Op::Eq => Ok(Value::Bool(args.windows(2).all(|w| w[0] == w[1]))),
        Op::Distinct => Ok(Value::Bool(
            args.iter()
                .enumerate()
                .all(|(i, a)| args[i + 1..].iter().all(|b| a != b)),
        )),
        Op::Ite => match args {
            [c, t, e] => Ok(if c.bool(op)? { *t } else { *e }),
            _ => Err(BoundedError::IllSorted(op.symbol().to_string())),
        },
        Op::Add => ints()?
            .into_iter()
            .try_fold(0i64, |acc, x| acc.checked_add(x))
            .map(Value::Int)
            .ok_or_else(overflow),
        Op::Mul => ints()?
            .into_iter()
            .try_fold(1i64, |acc, x| acc.checked_mul(x))
            .map(Value::Int)
            .ok_or_else(overflow),
        Op::Sub => {
            let ints = ints()?;
            let (first, rest) = ints
                .split_first()
                .ok_or_else(|| BoundedError::IllSorted(op.symbol().to_string()))?;
            rest.iter()
                .try_fold(*first, |acc, x| acc.checked_sub(*x))
                .map(Value::Int)
                .ok_or_else(overflow)
        }
        Op::Neg => match ints()?[..] {
            [a] => a.checked_neg().map(Value::Int).ok_or_else(overflow),
            _ => Err(BoundedError::IllSorted(op.symbol().to_string())),
        },
        Op::Le => compare(i64::le),
        Op::Lt => compare(i64::lt),
        Op::Ge => compare(i64::ge),
        Op::Gt => compare(i64::gt),
    }
}

/// Evaluate `expr`, asking `app` for the value of declared symbols.
///
/// `and`, `or`, `=>` and `ite` only evaluate the arguments they need.
pub fn eval<F>(expr: &Expr, app: &mut F) -> Result<Value, BoundedError>
where
    F: FnMut(&Decl, &[Value]) -> Result<Value, BoundedError>,
{
    match expr.kind() {
        ExprKind::Bool(b) => Ok(Value::Bool(*b)),
        ExprKind::Int(i) => Ok(Value::Int(*i)),
        ExprKind::UninterpretedValue(id) => Ok(Value::Elem(*id)),
        ExprKind::App(decl, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, app))
                .collect::<Result<Vec<_>, _>>()?;
            app(decl, &args)
        }
        ExprKind::Op(op @ (Op::And | Op::Or), args) => {
            let stop = *op == Op::Or;
            for a in args {
                if eval(a, app)?.bool(*op)? == stop {
                    return Ok(Value::Bool(stop));
                }
            }
            Ok(Value::Bool(!stop))
        }
        ExprKind::Op(Op::Implies, args) if args.len() == 2 => {
            if !eval(&args[0], app)?.bool(Op::Implies)? {
                return Ok(Value::Bool(true));
            }
            eval(&args[1], app)
        }
        ExprKind::Op(Op::Ite, args) if args.len() == 3 => {
            if eval(&args[0], app)?.bool(Op::Ite)? {
                eval(&args[1], app)
            } else {
                eval(&args[2], app)
            }
        }
        ExprKind::Op(op, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, app))
                .collect::<Result<Vec<_>, _>>()?;
            apply_op(*op, &args)
        }
    }
}
