// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Models of satisfiable checks.
//!
//! A [`RemoteModel`] stays in the worker and is queried lazily, one round
//! trip per new question. [`RemoteModel::detach`] resolves everything and
//! returns a [`ModelSnapshot`], which is plain data and outlives the session.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use ast::{Ast, Decl, DeclKind, Expr, Sort};
use itertools::Itertools;

use crate::{
    channel::{Channel, ChannelState},
    codec::{as_decl, as_expr},
    protocol::{Interp, ModelId, Request},
    Error, Result,
};

/// One row of a function table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncEntry {
    /// Argument values
    pub args: Vec<Expr>,
    /// Result for those arguments
    pub value: Expr,
}

/// The interpretation of a declaration: a table of entries plus a default.
/// Constants have no variables and no entries, only a default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncInterp {
    /// The interpreted declaration
    pub decl: Decl,
    /// One variable per argument, used when printing
    pub vars: Vec<Decl>,
    /// Explicit rows
    pub entries: Vec<FuncEntry>,
    /// Value for arguments not covered by `entries`
    pub default: Option<Expr>,
}

impl FuncInterp {
    /// The interpretation of a constant.
    pub fn constant(decl: Decl, value: Expr) -> Self {
        Self {
            decl,
            vars: vec![],
            entries: vec![],
            default: Some(value),
        }
    }

    /// The value for `args`, from the table or the default.
    pub fn apply(&self, args: &[Expr]) -> Option<&Expr> {
        self.entries
            .iter()
            .find(|e| e.args == args)
            .map(|e| &e.value)
            .or(self.default.as_ref())
    }

    /// The wire form, referring to nodes.
    pub fn to_wire(&self) -> Interp<Ast> {
        Interp {
            decl: Ast::from(&self.decl),
            vars: self.vars.iter().map(Ast::from).collect(),
            entries: self
                .entries
                .iter()
                .map(|e| (e.args.iter().map(Ast::from).collect(), Ast::from(&e.value)))
                .collect(),
            default: self.default.as_ref().map(Ast::from),
        }
    }

    /// Rebuild from the wire form, checking node kinds.
    pub fn from_wire(interp: &Interp<Ast>) -> Result<Self> {
        Ok(Self {
            decl: as_decl(&interp.decl)?,
            vars: interp.vars.iter().map(as_decl).collect::<Result<_>>()?,
            entries: interp
                .entries
                .iter()
                .map(|(args, value)| {
                    Ok(FuncEntry {
                        args: args.iter().map(as_expr).collect::<Result<_>>()?,
                        value: as_expr(value)?,
                    })
                })
                .collect::<Result<_>>()?,
            default: interp.default.as_ref().map(as_expr).transpose()?,
        })
    }
}

impl fmt::Display for FuncInterp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .vars
            .iter()
            .map(|v| format!("({v} {})", v.sort()))
            .join(" ");
        let mut body = match &self.default {
            Some(e) => e.to_string(),
            None => "_".to_string(),
        };
        for entry in self.entries.iter().rev() {
            let conds = self
                .vars
                .iter()
                .zip(&entry.args)
                .map(|(v, a)| format!("(= {v} {a})"))
                .collect::<Vec<_>>();
            let cond = if conds.len() == 1 {
                conds[0].clone()
            } else {
                format!("(and {})", conds.join(" "))
            };
            body = format!("(ite {cond} {} {body})", entry.value);
        }
        write!(
            f,
            "(define-fun {} ({params}) {} {body})",
            self.decl,
            self.decl.sort()
        )
    }
}

/// A fully resolved model, independent of any session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ModelSnapshot {
    interpretations: BTreeMap<Decl, FuncInterp>,
    universes: BTreeMap<Sort, BTreeSet<Expr>>,
}

impl ModelSnapshot {
    /// Build a snapshot from its parts.
    pub fn new(
        interpretations: BTreeMap<Decl, FuncInterp>,
        universes: BTreeMap<Sort, BTreeSet<Expr>>,
    ) -> Self {
        Self {
            interpretations,
            universes,
        }
    }

    /// Interpreted declarations, in order.
    pub fn declarations(&self) -> impl Iterator<Item = &Decl> {
        self.interpretations.keys()
    }

    /// Uninterpreted sorts with a universe, in order.
    pub fn uninterpreted_sorts(&self) -> impl Iterator<Item = &Sort> {
        self.universes.keys()
    }

    /// The interpretation of `decl`.
    pub fn interpretation(&self, decl: &Decl) -> Option<&FuncInterp> {
        self.interpretations.get(decl)
    }

    /// The universe of `sort`.
    pub fn uninterpreted_sort_universe(&self, sort: &Sort) -> Option<&BTreeSet<Expr>> {
        self.universes.get(sort)
    }

    /// The value of a constant.
    pub fn constant(&self, decl: &Decl) -> Option<&Expr> {
        match decl.kind() {
            DeclKind::Const => self.interpretation(decl)?.default.as_ref(),
            DeclKind::Func => None,
        }
    }
}

impl fmt::Display for ModelSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = vec![];
        for (sort, values) in &self.universes {
            lines.push(format!(";; universe for {sort}: {}", values.iter().join(" ")));
        }
        for interp in self.interpretations.values() {
            lines.push(interp.to_string());
        }
        write!(f, "{}", lines.join("\n"))
    }
}

/// A model living in the worker, queried on demand.
///
/// Every answer is cached. Once the session is stopped or crashed, every
/// query fails with [`Error::SessionClosed`].
#[derive(Debug)]
pub struct RemoteModel {
    channel: Arc<Mutex<Channel>>,
    id: ModelId,
    declarations: Vec<Decl>,
    sorts: Vec<Sort>,
    evaluated: HashMap<(Expr, bool), Expr>,
    interpretations: HashMap<Decl, Option<FuncInterp>>,
    universes: HashMap<Sort, Option<BTreeSet<Expr>>>,
    released: bool,
    detached: Option<ModelSnapshot>,
    orphans: Arc<Mutex<Vec<ModelId>>>,
}

fn live(channel: &Mutex<Channel>) -> Result<MutexGuard<'_, Channel>> {
    let channel = channel.lock().unwrap();
    match channel.state() {
        ChannelState::Ready => Ok(channel),
        _ => Err(Error::SessionClosed),
    }
}

impl RemoteModel {
    pub(crate) fn new(
        channel: Arc<Mutex<Channel>>,
        id: ModelId,
        declarations: Vec<Decl>,
        sorts: Vec<Sort>,
        orphans: Arc<Mutex<Vec<ModelId>>>,
    ) -> Self {
        Self {
            channel,
            id,
            declarations,
            sorts,
            evaluated: HashMap::new(),
            interpretations: HashMap::new(),
            universes: HashMap::new(),
            released: false,
            detached: None,
            orphans,
        }
    }

    /// The worker-side id of this model.
    pub fn id(&self) -> ModelId {
        self.id
    }

    /// Declarations the model interprets.
    pub fn declarations(&self) -> &[Decl] {
        &self.declarations
    }

    /// Uninterpreted sorts the model has universes for.
    pub fn uninterpreted_sorts(&self) -> &[Sort] {
        &self.sorts
    }

    /// Has [`RemoteModel::detach`] been called?
    pub fn is_detached(&self) -> bool {
        self.detached.is_some()
    }

    /// Evaluate `expr` in the model. With `complete`, symbols the model does
    /// not interpret get default values.
    pub fn eval(&mut self, expr: &Expr, complete: bool) -> Result<Expr> {
        let mut channel = live(&self.channel)?;
        let key = (expr.clone(), complete);
        if let Some(value) = self.evaluated.get(&key) {
            return Ok(value.clone());
        }
        if self.released {
            return Err(Error::Remote(format!("model {} was released", self.id)));
        }
        let deadline = channel.conf().request_timeout;
        let value = channel
            .call(
                &Request::ModelEval {
                    model: self.id,
                    expr: Ast::from(expr),
                    complete,
                },
                deadline,
            )?
            .into_expr()?;
        self.evaluated.insert(key, value.clone());
        Ok(value)
    }

    /// The interpretation of `decl`, or `None` if the model has none.
    pub fn interpretation(&mut self, decl: &Decl) -> Result<Option<FuncInterp>> {
        let mut channel = live(&self.channel)?;
        if let Some(interp) = self.interpretations.get(decl) {
            return Ok(interp.clone());
        }
        if self.released {
            return Ok(None);
        }
        let deadline = channel.conf().request_timeout;
        let interp = channel
            .call(
                &Request::ModelInterpretation {
                    model: self.id,
                    decl: Ast::from(decl),
                },
                deadline,
            )?
            .into_interpretation()?
            .map(|i| FuncInterp::from_wire(&i))
            .transpose()?;
        self.interpretations.insert(decl.clone(), interp.clone());
        Ok(interp)
    }

    /// The values of `sort`, or `None` if the model has no universe for it
    /// (as opposed to an empty one).
    pub fn uninterpreted_sort_universe(&mut self, sort: &Sort) -> Result<Option<BTreeSet<Expr>>> {
        let mut channel = live(&self.channel)?;
        if let Some(universe) = self.universes.get(sort) {
            return Ok(universe.clone());
        }
        if self.released {
            return Ok(None);
        }
        let deadline = channel.conf().request_timeout;
        let universe = channel
            .call(
                &Request::ModelUniverse {
                    model: self.id,
                    sort: Ast::from(sort),
                },
                deadline,
            )?
            .into_universe()?
            .map(|values| values.into_iter().collect::<BTreeSet<_>>());
        self.universes.insert(sort.clone(), universe.clone());
        Ok(universe)
    }

    /// Resolve every declaration and sort, release the worker's copy and
    /// return the result. Later calls return the same snapshot without
    /// contacting the worker.
    pub fn detach(&mut self) -> Result<ModelSnapshot> {
        if let Some(snapshot) = &self.detached {
            return Ok(snapshot.clone());
        }
        let mut interpretations = BTreeMap::new();
        for decl in self.declarations.clone() {
            if let Some(interp) = self.interpretation(&decl)? {
                interpretations.insert(decl, interp);
            }
        }
        let mut universes = BTreeMap::new();
        for sort in self.sorts.clone() {
            if let Some(values) = self.uninterpreted_sort_universe(&sort)? {
                universes.insert(sort, values);
            }
        }
        let snapshot = ModelSnapshot::new(interpretations, universes);
        self.release(true);
        self.detached = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Free the worker's copy, best effort. With `wait`, queue behind other
    /// users of the session; otherwise, if the session is busy, leave the
    /// release to the session's next request.
    fn release(&mut self, wait: bool) {
        if self.released {
            return;
        }
        self.released = true;
        let channel = if wait {
            self.channel.lock().ok()
        } else {
            self.channel.try_lock().ok()
        };
        let Some(mut channel) = channel else {
            log::debug!("session busy, releasing model {} later", self.id);
            self.orphans.lock().unwrap().push(self.id);
            return;
        };
        if channel.state() != ChannelState::Ready {
            return;
        }
        let deadline = channel.conf().request_timeout;
        if let Err(err) = channel.call(&Request::ReleaseModel(self.id), deadline) {
            log::debug!("could not release model {}: {err}", self.id);
        }
    }
}

impl Drop for RemoteModel {
    fn drop(&mut self) {
        self.release(false);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use ast::{Ast, Context};

    use super::{FuncEntry, FuncInterp, ModelSnapshot};
    use crate::Error;

    fn table(ctx: &Context) -> FuncInterp {
        let a = ctx.uninterpreted_sort("A");
        let f = ctx.mk_decl("f", [a.clone()], &ctx.int_sort()).unwrap();
        let v = |id| ctx.mk_uninterpreted_value(&a, id).unwrap();
        FuncInterp {
            decl: f,
            vars: vec![ctx.mk_decl("x!0", [], &a).unwrap()],
            entries: vec![
                FuncEntry {
                    args: vec![v(0)],
                    value: ctx.mk_int(1),
                },
                FuncEntry {
                    args: vec![v(1)],
                    value: ctx.mk_int(-2),
                },
            ],
            default: Some(ctx.mk_int(0)),
        }
    }

    #[test]
    fn test_print_interpretations() {
        let ctx = Context::new();
        let x = ctx.mk_decl("x", [], &ctx.int_sort()).unwrap();
        insta::assert_display_snapshot!(FuncInterp::constant(x, ctx.mk_int(5)), @"(define-fun x () Int 5)");
        insta::assert_display_snapshot!(table(&ctx), @"(define-fun f ((x!0 A)) Int (ite (= x!0 A!val!0) 1 (ite (= x!0 A!val!1) (- 2) 0)))");
    }

    #[test]
    fn test_apply() {
        let ctx = Context::new();
        let f = table(&ctx);
        let a = ctx.uninterpreted_sort("A");
        let v = |id| ctx.mk_uninterpreted_value(&a, id).unwrap();
        assert_eq!(f.apply(&[v(1)]), Some(&ctx.mk_int(-2)));
        assert_eq!(f.apply(&[v(7)]), Some(&ctx.mk_int(0)));
    }

    #[test]
    fn test_wire_form_checks_kinds() {
        let ctx = Context::new();
        let f = table(&ctx);
        assert_eq!(FuncInterp::from_wire(&f.to_wire()).unwrap(), f);
        let mut wire = f.to_wire();
        wire.decl = Ast::from(ctx.int_sort());
        assert!(matches!(
            FuncInterp::from_wire(&wire),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_snapshot_is_plain_data() {
        let ctx = Context::new();
        let a = ctx.uninterpreted_sort("A");
        let x = ctx.mk_decl("x", [], &ctx.int_sort()).unwrap();
        let build = || {
            let mut interps = BTreeMap::new();
            interps.insert(x.clone(), FuncInterp::constant(x.clone(), ctx.mk_int(5)));
            let f = table(&ctx);
            interps.insert(f.decl.clone(), f);
            let mut universes = BTreeMap::new();
            universes.insert(
                a.clone(),
                (0..2)
                    .map(|i| ctx.mk_uninterpreted_value(&a, i).unwrap())
                    .collect::<BTreeSet<_>>(),
            );
            ModelSnapshot::new(interps, universes)
        };
        let snapshot = build();
        assert_eq!(snapshot, build());
        assert_eq!(snapshot.constant(&x), Some(&ctx.mk_int(5)));
        assert_eq!(snapshot.declarations().count(), 2);
        insta::assert_display_snapshot!(snapshot, @r###"
        ;; universe for A: A!val!0 A!val!1
        (define-fun f ((x!0 A)) Int (ite (= x!0 A!val!0) 1 (ite (= x!0 A!val!1) (- 2) 0)))
        (define-fun x () Int 5)
        "###);
    }
}
