// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! SMT-LIB style printing of AST nodes.

use std::fmt;

use itertools::Itertools;

use crate::syntax::{Ast, Decl, Expr, ExprKind, Sort, SortKind};

/// Write a symbol, quoting it if it would not parse as a plain SMT-LIB symbol.
fn symbol(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    if s.is_empty() || s.contains([' ', '(', ')', '"', '\'', ';']) {
        write!(f, "|{s}|")
    } else {
        write!(f, "{s}")
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            SortKind::Bool => write!(f, "Bool"),
            SortKind::Int => write!(f, "Int"),
            SortKind::Uninterpreted(name) => symbol(f, name),
        }
    }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        symbol(f, self.name())
    }
}

impl Decl {
    /// The `declare-fun` command introducing this symbol.
    pub fn declaration(&self) -> String {
        format!(
            "(declare-fun {self} ({}) {})",
            self.args().iter().join(" "),
            self.sort()
        )
    }
}

fn leaf(f: &mut fmt::Formatter<'_>, e: &Expr) -> fmt::Result {
    match e.kind() {
        ExprKind::Bool(b) => write!(f, "{b}"),
        ExprKind::Int(i) if *i < 0 => write!(f, "(- {})", i.unsigned_abs()),
        ExprKind::Int(i) => write!(f, "{i}"),
        ExprKind::UninterpretedValue(id) => write!(f, "{}!val!{id}", e.sort()),
        ExprKind::App(decl, _) => write!(f, "{decl}"),
        ExprKind::Op(op, _) => write!(f, "{}", op.symbol()),
    }
}

enum Step<'a> {
    Expr(&'a Expr),
    Space,
    Close,
}

// Printed with an explicit stack, so deep terms cannot overflow.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![Step::Expr(self)];
        while let Some(step) = stack.pop() {
            let e = match step {
                Step::Space => {
                    f.write_str(" ")?;
                    continue;
                }
                Step::Close => {
                    f.write_str(")")?;
                    continue;
                }
                Step::Expr(e) => e,
            };
            let nested = match e.kind() {
                ExprKind::App(_, args) => !args.is_empty(),
                ExprKind::Op(..) => true,
                _ => false,
            };
            if !nested {
                leaf(f, e)?;
                continue;
            }
            f.write_str("(")?;
            leaf(f, e)?;
            stack.push(Step::Close);
            for arg in e.args().iter().rev() {
                stack.push(Step::Expr(arg));
                stack.push(Step::Space);
            }
        }
        Ok(())
    }
}

impl fmt::Display for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ast::Sort(s) => write!(f, "{s}"),
            Ast::Decl(d) => write!(f, "{d}"),
            Ast::Expr(e) => write!(f, "{e}"),
        }
    }
}

macro_rules! debug_as_display {
    ($t:ty) => {
        impl fmt::Debug for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{self}")
            }
        }
    };
}

debug_as_display!(Sort);
debug_as_display!(Decl);
debug_as_display!(Expr);
