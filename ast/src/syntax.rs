// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Sorts, declarations and expressions of the unified AST.
//!
//! Every node type is a cheap handle around an interned node. Handles compare
//! and hash by identity, which coincides with value equality because a
//! [`Context`](crate::Context) never builds two equal nodes.

use std::{
    cmp::Ordering,
    hash::{Hash, Hasher},
    sync::Arc,
};

use thiserror::Error;

/// An error from building a node out of ill-formed parts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AstError {
    /// A node from one context was combined with a node from another.
    #[error("node belongs to context {found}, expected context {expected}")]
    ContextMismatch {
        /// Id of the context doing the building
        expected: u64,
        /// Id of the context that owns the offending node
        found: u64,
    },
    /// Wrong number of arguments.
    #[error("{head} expects {expected} arguments, got {got}")]
    Arity {
        /// The operator or declaration being applied
        head: String,
        /// Human readable description of the accepted arities
        expected: String,
        /// Number of arguments supplied
        got: usize,
    },
    /// An argument of the wrong sort.
    #[error("{head} expects an argument of sort {expected}, got {got}")]
    SortMismatch {
        /// The operator or declaration being applied
        head: String,
        /// Expected sort
        expected: String,
        /// Sort of the supplied argument
        got: String,
    },
}

// ==================
// Sorts
// ==================

/// The shape of a sort.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SortKind {
    /// Booleans
    Bool,
    /// Mathematical integers
    Int,
    /// An uninterpreted sort with the given name
    Uninterpreted(String),
}

#[derive(PartialEq, Eq, Hash)]
pub(crate) struct SortNode {
    pub(crate) ctx: u64,
    pub(crate) kind: SortKind,
}

/// A sort, interned in some context.
#[derive(Clone)]
pub struct Sort(pub(crate) Arc<SortNode>);

impl Sort {
    /// The shape of this sort.
    pub fn kind(&self) -> &SortKind {
        &self.0.kind
    }

    /// The id of the context that built this sort.
    pub fn context_id(&self) -> u64 {
        self.0.ctx
    }

    /// Is this the boolean sort?
    pub fn is_bool(&self) -> bool {
        self.0.kind == SortKind::Bool
    }

    /// Is this the integer sort?
    pub fn is_int(&self) -> bool {
        self.0.kind == SortKind::Int
    }

    /// Is this an uninterpreted sort?
    pub fn is_uninterpreted(&self) -> bool {
        matches!(self.0.kind, SortKind::Uninterpreted(_))
    }
}

// ==================
// Declarations
// ==================

/// The closed set of declaration shapes. Builtin operators are [`Op`]s and
/// never declarations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeclKind {
    /// A nullary symbol
    Const,
    /// A symbol taking at least one argument
    Func,
}

#[derive(PartialEq, Eq, Hash)]
pub(crate) struct DeclNode {
    pub(crate) ctx: u64,
    pub(crate) name: String,
    pub(crate) args: Vec<Sort>,
    pub(crate) sort: Sort,
}

/// A declared (uninterpreted) constant or function symbol.
#[derive(Clone)]
pub struct Decl(pub(crate) Arc<DeclNode>);

impl Decl {
    /// Symbol name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Argument sorts (empty for constants).
    pub fn args(&self) -> &[Sort] {
        &self.0.args
    }

    /// Result sort.
    pub fn sort(&self) -> &Sort {
        &self.0.sort
    }

    /// Constant or function.
    pub fn kind(&self) -> DeclKind {
        if self.0.args.is_empty() {
            DeclKind::Const
        } else {
            DeclKind::Func
        }
    }

    /// The id of the context that built this declaration.
    pub fn context_id(&self) -> u64 {
        self.0.ctx
    }
}

// ==================
// Expressions
// ==================

/// Builtin operators.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Op {
    Not,
    And,
    Or,
    Implies,
    Eq,
    Distinct,
    Ite,
    Add,
    Sub,
    Mul,
    Neg,
    Le,
    Lt,
    Ge,
    Gt,
}

impl Op {
    /// Every operator, in code order.
    pub const ALL: [Op; 15] = [
        Op::Not,
        Op::And,
        Op::Or,
        Op::Implies,
        Op::Eq,
        Op::Distinct,
        Op::Ite,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Neg,
        Op::Le,
        Op::Lt,
        Op::Ge,
        Op::Gt,
    ];

    /// Stable numeric code, used on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Inverse of [`Op::code`].
    pub fn from_code(code: u8) -> Option<Op> {
        Self::ALL.get(code as usize).copied()
    }

    /// SMT-LIB spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Not => "not",
            Op::And => "and",
            Op::Or => "or",
            Op::Implies => "=>",
            Op::Eq => "=",
            Op::Distinct => "distinct",
            Op::Ite => "ite",
            Op::Add => "+",
            Op::Sub | Op::Neg => "-",
            Op::Mul => "*",
            Op::Le => "<=",
            Op::Lt => "<",
            Op::Ge => ">=",
            Op::Gt => ">",
        }
    }
}

/// The shape of an expression.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    /// Boolean literal
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// The `n`-th element of an uninterpreted sort's universe (the sort is
    /// the expression's sort)
    UninterpretedValue(u32),
    /// Application of a declared symbol (constants have no arguments)
    App(Decl, Vec<Expr>),
    /// Application of a builtin operator
    Op(Op, Vec<Expr>),
}

#[derive(PartialEq, Eq, Hash)]
pub(crate) struct ExprNode {
    pub(crate) ctx: u64,
    pub(crate) kind: ExprKind,
    pub(crate) sort: Sort,
}

impl Drop for ExprNode {
    // Releasing a long chain of nodes must not recurse once per level.
    fn drop(&mut self) {
        let mut pending = match &mut self.kind {
            ExprKind::App(_, args) | ExprKind::Op(_, args) => std::mem::take(args),
            _ => return,
        };
        while let Some(Expr(node)) = pending.pop() {
            if let Ok(mut node) = Arc::try_unwrap(node) {
                if let ExprKind::App(_, args) | ExprKind::Op(_, args) = &mut node.kind {
                    pending.append(args);
                }
            }
        }
    }
}

/// An expression, interned in some context.
#[derive(Clone)]
pub struct Expr(pub(crate) Arc<ExprNode>);

impl Expr {
    /// The shape of this expression.
    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// The sort of this expression.
    pub fn sort(&self) -> &Sort {
        &self.0.sort
    }

    /// The id of the context that built this expression.
    pub fn context_id(&self) -> u64 {
        self.0.ctx
    }

    /// Immediate subexpressions.
    pub fn args(&self) -> &[Expr] {
        match &self.0.kind {
            ExprKind::App(_, args) | ExprKind::Op(_, args) => args,
            _ => &[],
        }
    }

    /// If this is a boolean literal, its value.
    pub fn as_bool(&self) -> Option<bool> {
        match self.0.kind {
            ExprKind::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// If this is an integer literal, its value.
    pub fn as_int(&self) -> Option<i64> {
        match self.0.kind {
            ExprKind::Int(i) => Some(i),
            _ => None,
        }
    }

    /// If this is an application of a declaration with no arguments, the
    /// declaration.
    pub fn as_const(&self) -> Option<&Decl> {
        match &self.0.kind {
            ExprKind::App(decl, args) if args.is_empty() => Some(decl),
            _ => None,
        }
    }

    /// Is this a literal value (boolean, integer or universe element)?
    pub fn is_value(&self) -> bool {
        matches!(
            self.0.kind,
            ExprKind::Bool(_) | ExprKind::Int(_) | ExprKind::UninterpretedValue(_)
        )
    }
}

// ==================
// Identity-based equality
// ==================

macro_rules! identity_eq {
    ($t:ty) => {
        impl PartialEq for $t {
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl Eq for $t {}

        impl Hash for $t {
            fn hash<H: Hasher>(&self, state: &mut H) {
                std::ptr::hash(Arc::as_ptr(&self.0), state)
            }
        }
    };
}

identity_eq!(Sort);
identity_eq!(Decl);
identity_eq!(Expr);

// The orderings are structural (so printed snapshots are deterministic) and
// fall back to the context id, which keeps them consistent with equality.

impl Ord for Sort {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        self.0
            .kind
            .cmp(&other.0.kind)
            .then(self.0.ctx.cmp(&other.0.ctx))
    }
}

impl PartialOrd for Sort {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decl {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        self.0
            .name
            .cmp(&other.0.name)
            .then_with(|| self.0.args.cmp(&other.0.args))
            .then_with(|| self.0.sort.cmp(&other.0.sort))
            .then(self.0.ctx.cmp(&other.0.ctx))
    }
}

impl PartialOrd for Decl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ExprKind {
    fn rank(&self) -> u8 {
        match self {
            ExprKind::Bool(_) => 0,
            ExprKind::Int(_) => 1,
            ExprKind::UninterpretedValue(_) => 2,
            ExprKind::App(..) => 3,
            ExprKind::Op(..) => 4,
        }
    }
}

impl Ord for Expr {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        let structural = match (&self.0.kind, &other.0.kind) {
            (ExprKind::Bool(a), ExprKind::Bool(b)) => a.cmp(b),
            (ExprKind::Int(a), ExprKind::Int(b)) => a.cmp(b),
            (ExprKind::UninterpretedValue(a), ExprKind::UninterpretedValue(b)) => {
                self.0.sort.cmp(&other.0.sort).then(a.cmp(b))
            }
            (ExprKind::App(f, xs), ExprKind::App(g, ys)) => f.cmp(g).then_with(|| xs.cmp(ys)),
            (ExprKind::Op(f, xs), ExprKind::Op(g, ys)) => f.cmp(g).then_with(|| xs.cmp(ys)),
            (a, b) => a.rank().cmp(&b.rank()),
        };
        structural.then(self.0.ctx.cmp(&other.0.ctx))
    }
}

impl PartialOrd for Expr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ==================
// Any node
// ==================

/// Any AST node: the unit of serialization.
#[allow(missing_docs)]
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Ast {
    Sort(Sort),
    Decl(Decl),
    Expr(Expr),
}

impl Ast {
    /// The id of the context that built this node.
    pub fn context_id(&self) -> u64 {
        match self {
            Ast::Sort(s) => s.context_id(),
            Ast::Decl(d) => d.context_id(),
            Ast::Expr(e) => e.context_id(),
        }
    }

    /// The nodes this node is built from, in a fixed order that
    /// [`Context`](crate::Context) builders can consume again.
    ///
    /// - a declaration lists its argument sorts and then its result sort;
    /// - a universe element lists its sort;
    /// - an application lists its declaration and then its arguments;
    /// - an operator lists its arguments.
    pub fn constituents(&self) -> Vec<Ast> {
        match self {
            Ast::Sort(_) => vec![],
            Ast::Decl(d) => d
                .args()
                .iter()
                .chain([d.sort()])
                .cloned()
                .map(Ast::Sort)
                .collect(),
            Ast::Expr(e) => match e.kind() {
                ExprKind::Bool(_) | ExprKind::Int(_) => vec![],
                ExprKind::UninterpretedValue(_) => vec![Ast::Sort(e.sort().clone())],
                ExprKind::App(decl, args) => [Ast::Decl(decl.clone())]
                    .into_iter()
                    .chain(args.iter().cloned().map(Ast::Expr))
                    .collect(),
                ExprKind::Op(_, args) => args.iter().cloned().map(Ast::Expr).collect(),
            },
        }
    }

    /// The node as a sort, if it is one.
    pub fn as_sort(&self) -> Option<&Sort> {
        match self {
            Ast::Sort(s) => Some(s),
            _ => None,
        }
    }

    /// The node as a declaration, if it is one.
    pub fn as_decl(&self) -> Option<&Decl> {
        match self {
            Ast::Decl(d) => Some(d),
            _ => None,
        }
    }

    /// The node as an expression, if it is one.
    pub fn as_expr(&self) -> Option<&Expr> {
        match self {
            Ast::Expr(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Sort> for Ast {
    fn from(value: Sort) -> Self {
        Ast::Sort(value)
    }
}

impl From<Decl> for Ast {
    fn from(value: Decl) -> Self {
        Ast::Decl(value)
    }
}

impl From<Expr> for Ast {
    fn from(value: Expr) -> Self {
        Ast::Expr(value)
    }
}

impl From<&Sort> for Ast {
    fn from(value: &Sort) -> Self {
        Ast::Sort(value.clone())
    }
}

impl From<&Decl> for Ast {
    fn from(value: &Decl) -> Self {
        Ast::Decl(value.clone())
    }
}

impl From<&Expr> for Ast {
    fn from(value: &Expr) -> Self {
        Ast::Expr(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Ast, Context, DeclKind, Op};

    #[test]
    fn test_hash_consing() {
        let ctx = Context::new();
        let x = ctx.mk_const("x", &ctx.int_sort()).unwrap();
        let y = ctx.mk_const("x", &ctx.int_sort()).unwrap();
        assert_eq!(x, y);
        let a = ctx
            .mk_op(Op::Add, [x.clone(), ctx.mk_int(1)])
            .unwrap();
        let b = ctx.mk_op(Op::Add, [y, ctx.mk_int(1)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.node_count(), 5, "Int, x decl, x, 1, x+1");
    }

    #[test]
    fn test_contexts_are_disjoint() {
        let c1 = Context::new();
        let c2 = Context::new();
        assert_ne!(c1.int_sort(), c2.int_sort());
        let x = c1.mk_const("x", &c1.int_sort()).unwrap();
        assert!(c2.mk_op(Op::Neg, [x]).is_err());
    }

    #[test]
    fn test_constituents() {
        let ctx = Context::new();
        let a = ctx.uninterpreted_sort("A");
        let f = ctx
            .mk_decl("f", [a.clone(), ctx.int_sort()], &ctx.bool_sort())
            .unwrap();
        assert_eq!(f.kind(), DeclKind::Func);
        assert_eq!(
            Ast::from(&f).constituents(),
            vec![
                Ast::from(&a),
                Ast::from(ctx.int_sort()),
                Ast::from(ctx.bool_sort())
            ]
        );
        let v = ctx.mk_uninterpreted_value(&a, 0).unwrap();
        let app = ctx.mk_app(&f, [v.clone(), ctx.mk_int(3)]).unwrap();
        assert_eq!(
            Ast::from(&app).constituents(),
            vec![Ast::from(&f), Ast::from(v), Ast::from(ctx.mk_int(3))]
        );
    }

    #[test]
    fn test_ill_sorted() {
        let ctx = Context::new();
        let x = ctx.mk_const("x", &ctx.int_sort()).unwrap();
        let err = ctx.mk_op(Op::And, [x.clone()]).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"and expects an argument of sort Bool, got Int");
        let err = ctx.mk_op(Op::Implies, [ctx.mk_bool(true)]).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"=> expects 2 arguments, got 1");
    }

    #[test]
    fn test_ordering_is_structural() {
        let ctx = Context::new();
        let mut decls = ["z", "b", "a"]
            .into_iter()
            .map(|n| ctx.mk_decl(n, [], &ctx.int_sort()).unwrap())
            .collect::<Vec<_>>();
        decls.sort();
        let names = decls.iter().map(|d| d.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "z"]);
    }
}
