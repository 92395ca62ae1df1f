// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The hash-consing context that owns every node.

use std::{
    collections::HashSet,
    fmt,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use crate::syntax::{
    AstError, Decl, DeclNode, Expr, ExprKind, ExprNode, Op, Sort, SortKind, SortNode,
};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Interns values of one node type.
struct Interner<T>(Mutex<HashSet<Arc<T>>>);

impl<T: Hash + Eq> Interner<T> {
    fn new() -> Self {
        Self(Mutex::new(HashSet::new()))
    }

    fn intern(&self, node: T) -> Arc<T> {
        let mut set = self.0.lock().unwrap();
        if let Some(existing) = set.get(&node) {
            return existing.clone();
        }
        let node = Arc::new(node);
        set.insert(node.clone());
        node
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

struct ContextInner {
    id: u64,
    sorts: Interner<SortNode>,
    decls: Interner<DeclNode>,
    exprs: Interner<ExprNode>,
}

/// A deduplicating factory for AST nodes.
///
/// Cloning a `Context` gives another handle to the same context. Contexts are
/// `Send + Sync`; building nodes from several threads is allowed.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({})", self.inner.id)
    }
}

impl Context {
    /// Create a fresh, empty context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                sorts: Interner::new(),
                decls: Interner::new(),
                exprs: Interner::new(),
            }),
        }
    }

    /// Unique id of this context within the process.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Number of distinct nodes built so far.
    pub fn node_count(&self) -> usize {
        self.inner.sorts.len() + self.inner.decls.len() + self.inner.exprs.len()
    }

    /// Check that a node with context id `found` belongs here.
    pub fn ensure_context_match(&self, found: u64) -> Result<(), AstError> {
        if found != self.inner.id {
            return Err(AstError::ContextMismatch {
                expected: self.inner.id,
                found,
            });
        }
        Ok(())
    }

    // ==================
    // Sorts
    // ==================

    /// Build a sort of the given shape.
    pub fn mk_sort(&self, kind: SortKind) -> Sort {
        Sort(self.inner.sorts.intern(SortNode {
            ctx: self.inner.id,
            kind,
        }))
    }

    /// The boolean sort.
    pub fn bool_sort(&self) -> Sort {
        self.mk_sort(SortKind::Bool)
    }

    /// The integer sort.
    pub fn int_sort(&self) -> Sort {
        self.mk_sort(SortKind::Int)
    }

    /// An uninterpreted sort.
    pub fn uninterpreted_sort(&self, name: &str) -> Sort {
        self.mk_sort(SortKind::Uninterpreted(name.to_string()))
    }

    // ==================
    // Declarations
    // ==================

    /// Declare a symbol with argument sorts `args` and result sort `sort`.
    pub fn mk_decl<I>(&self, name: &str, args: I, sort: &Sort) -> Result<Decl, AstError>
    where
        I: IntoIterator<Item = Sort>,
    {
        let args = args.into_iter().collect::<Vec<_>>();
        for s in args.iter().chain([sort]) {
            self.ensure_context_match(s.context_id())?;
        }
        Ok(Decl(self.inner.decls.intern(DeclNode {
            ctx: self.inner.id,
            name: name.to_string(),
            args,
            sort: sort.clone(),
        })))
    }

    // ==================
    // Expressions
    // ==================

    fn intern_expr(&self, kind: ExprKind, sort: Sort) -> Expr {
        Expr(self.inner.exprs.intern(ExprNode {
            ctx: self.inner.id,
            kind,
            sort,
        }))
    }

    /// A boolean literal.
    pub fn mk_bool(&self, value: bool) -> Expr {
        self.intern_expr(ExprKind::Bool(value), self.bool_sort())
    }

    /// An integer literal.
    pub fn mk_int(&self, value: i64) -> Expr {
        self.intern_expr(ExprKind::Int(value), self.int_sort())
    }

    /// The `id`-th element of an uninterpreted sort's universe.
    pub fn mk_uninterpreted_value(&self, sort: &Sort, id: u32) -> Result<Expr, AstError> {
        self.ensure_context_match(sort.context_id())?;
        if !sort.is_uninterpreted() {
            return Err(AstError::SortMismatch {
                head: "universe element".to_string(),
                expected: "an uninterpreted sort".to_string(),
                got: sort.to_string(),
            });
        }
        Ok(self.intern_expr(ExprKind::UninterpretedValue(id), sort.clone()))
    }

    /// Apply a declared symbol.
    pub fn mk_app<I>(&self, decl: &Decl, args: I) -> Result<Expr, AstError>
    where
        I: IntoIterator<Item = Expr>,
    {
        self.ensure_context_match(decl.context_id())?;
        let args = args.into_iter().collect::<Vec<_>>();
        if args.len() != decl.args().len() {
            return Err(AstError::Arity {
                head: decl.name().to_string(),
                expected: decl.args().len().to_string(),
                got: args.len(),
            });
        }
        for (arg, sort) in args.iter().zip(decl.args()) {
            self.ensure_context_match(arg.context_id())?;
            expect_sort(decl.name(), sort, arg)?;
        }
        Ok(self.intern_expr(ExprKind::App(decl.clone(), args), decl.sort().clone()))
    }

    /// Declare a constant and return its application.
    pub fn mk_const(&self, name: &str, sort: &Sort) -> Result<Expr, AstError> {
        let decl = self.mk_decl(name, [], sort)?;
        self.mk_app(&decl, [])
    }

    /// Apply a builtin operator, checking arities and sorts.
    pub fn mk_op<I>(&self, op: Op, args: I) -> Result<Expr, AstError>
    where
        I: IntoIterator<Item = Expr>,
    {
        let args = args.into_iter().collect::<Vec<_>>();
        for arg in &args {
            self.ensure_context_match(arg.context_id())?;
        }
        let arity = |min: usize, max: Option<usize>| -> Result<(), AstError> {
            let ok = args.len() >= min && max.map_or(true, |max| args.len() <= max);
            if ok {
                return Ok(());
            }
            let expected = match max {
                Some(max) if max == min => format!("{min}"),
                Some(max) => format!("{min} to {max}"),
                None => format!("at least {min}"),
            };
            Err(AstError::Arity {
                head: op.symbol().to_string(),
                expected,
                got: args.len(),
            })
        };
        let all = |sort: &Sort| -> Result<(), AstError> {
            args.iter().try_for_each(|arg| expect_sort(op.symbol(), sort, arg))
        };
        let sort = match op {
            Op::Not => {
                arity(1, Some(1))?;
                all(&self.bool_sort())?;
                self.bool_sort()
            }
            Op::Implies => {
                arity(2, Some(2))?;
                all(&self.bool_sort())?;
                self.bool_sort()
            }
            Op::And | Op::Or => {
                all(&self.bool_sort())?;
                self.bool_sort()
            }
            Op::Eq | Op::Distinct => {
                arity(2, None)?;
                all(args[0].sort())?;
                self.bool_sort()
            }
            Op::Ite => {
                arity(3, Some(3))?;
                expect_sort(op.symbol(), &self.bool_sort(), &args[0])?;
                expect_sort(op.symbol(), args[1].sort(), &args[2])?;
                args[1].sort().clone()
            }
            Op::Neg => {
                arity(1, Some(1))?;
                all(&self.int_sort())?;
                self.int_sort()
            }
            Op::Sub => {
                arity(2, None)?;
                all(&self.int_sort())?;
                self.int_sort()
            }
            Op::Add | Op::Mul => {
                all(&self.int_sort())?;
                self.int_sort()
            }
            Op::Le | Op::Lt | Op::Ge | Op::Gt => {
                arity(2, Some(2))?;
                all(&self.int_sort())?;
                self.bool_sort()
            }
        };
        Ok(self.intern_expr(ExprKind::Op(op, args), sort))
    }

    /// `(not e)`
    pub fn mk_not(&self, e: &Expr) -> Result<Expr, AstError> {
        self.mk_op(Op::Not, [e.clone()])
    }

    /// `(= a b)`
    pub fn mk_eq(&self, a: &Expr, b: &Expr) -> Result<Expr, AstError> {
        self.mk_op(Op::Eq, [a.clone(), b.clone()])
    }

    /// `(and args...)`
    pub fn mk_and<I: IntoIterator<Item = Expr>>(&self, args: I) -> Result<Expr, AstError> {
        self.mk_op(Op::And, args)
    }

    /// `(or args...)`
    pub fn mk_or<I: IntoIterator<Item = Expr>>(&self, args: I) -> Result<Expr, AstError> {
        self.mk_op(Op::Or, args)
    }
}

fn expect_sort(head: &str, expected: &Sort, arg: &Expr) -> Result<(), AstError> {
    if arg.sort() != expected {
        return Err(AstError::SortMismatch {
            head: head.to_string(),
            expected: expected.to_string(),
            got: arg.sort().to_string(),
        });
    }
    Ok(())
}
