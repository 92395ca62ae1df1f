// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The identity registry: a two-way map between AST nodes and the small
//! integers that name them on the wire.
//!
//! One registry lives as long as one channel, so a node sent in an early
//! request is referred to by its index in every later request and response.
//! The encoding side uses the strict [`Registry::assign_new_index`] (a second
//! index for the same node is an encoder bug) while the decoding side uses the
//! lenient [`Registry::record_index`] (seeing the same node again is fine as
//! long as the indices do not conflict).

use std::collections::HashMap;

use ast::{Ast, Context};

use crate::{Error, Result};

/// Index of a node on the wire. Valid indices are positive.
pub type AstIndex = i32;

/// Marks the end of the AST section of a message.
pub const END_OF_STREAM: AstIndex = -1;

/// Marks the end of one top-level entry; followed by the entry's root index.
pub const END_OF_ENTRY: AstIndex = -2;

/// Node/index maps for one serialization session.
#[derive(Debug)]
pub struct Registry {
    context: Option<Context>,
    by_node: HashMap<Ast, AstIndex>,
    by_index: HashMap<AstIndex, Ast>,
    next_index: AstIndex,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An unbound, empty registry.
    pub fn new() -> Self {
        Self {
            context: None,
            by_node: HashMap::new(),
            by_index: HashMap::new(),
            next_index: 1,
        }
    }

    /// Bind to the context nodes are encoded from and decoded into.
    pub fn bind(&mut self, ctx: &Context) -> Result<()> {
        if self.context.is_some() {
            return Err(Error::AlreadyBound);
        }
        self.context = Some(ctx.clone());
        Ok(())
    }

    /// Drop all state, including the binding. Safe to call repeatedly.
    pub fn unbind(&mut self) {
        self.by_node.clear();
        self.by_index.clear();
        self.next_index = 1;
        self.context = None;
    }

    /// Is the registry bound to a context?
    pub fn is_bound(&self) -> bool {
        self.context.is_some()
    }

    /// The bound context.
    pub fn context(&self) -> Result<&Context> {
        self.context.as_ref().ok_or(Error::Unbound)
    }

    /// Check that `ast` was built by the bound context.
    pub fn ensure_context_match(&self, ast: &Ast) -> Result<()> {
        let ctx = self.context()?;
        if ast.context_id() != ctx.id() {
            return Err(Error::ContextMismatch {
                expected: ctx.id(),
                found: ast.context_id(),
            });
        }
        Ok(())
    }

    /// Give `ast` the next free index.
    pub fn assign_new_index(&mut self, ast: &Ast) -> Result<AstIndex> {
        self.ensure_context_match(ast)?;
        if self.by_node.contains_key(ast) {
            return Err(Error::DuplicateAst(format!("{ast:?}")));
        }
        let index = self.next_index;
        self.next_index = index
            .checked_add(1)
            .ok_or_else(|| Error::corrupt("index space exhausted"))?;
        self.by_index.insert(index, ast.clone());
        self.by_node.insert(ast.clone(), index);
        Ok(index)
    }

    /// Record that `index` names `ast`, as announced by the other side.
    ///
    /// Recording the same pair twice is a no-op; recording a different node
    /// under a known index is a corrupted stream. If `ast` already has an
    /// index, that earlier index stays the node's canonical one.
    pub fn record_index(&mut self, index: AstIndex, ast: Ast) -> Result<()> {
        if index <= 0 {
            return Err(Error::corrupt(format!("invalid ast index {index}")));
        }
        if let Some(current) = self.by_index.get(&index) {
            if *current != ast {
                return Err(Error::corrupt(format!(
                    "different ast with same index {index}"
                )));
            }
            return Ok(());
        }
        if let Some(&existing) = self.by_node.get(&ast) {
            if self.by_index.get(&existing) != Some(&ast) {
                return Err(Error::corrupt("registry cache mismatch"));
            }
        } else {
            self.by_node.insert(ast.clone(), index);
        }
        self.by_index.insert(index, ast);
        self.next_index = self.next_index.max(
            index
                .checked_add(1)
                .ok_or_else(|| Error::corrupt("index space exhausted"))?,
        );
        Ok(())
    }

    /// The index of `ast`, if it has one.
    pub fn index_of(&self, ast: &Ast) -> Option<AstIndex> {
        self.by_node.get(ast).copied()
    }

    /// The node named by `index`.
    pub fn node_at(&self, index: AstIndex) -> Result<&Ast> {
        self.by_index
            .get(&index)
            .ok_or_else(|| Error::corrupt(format!("{index} is not properly deserialized")))
    }

    /// The index the next [`Registry::assign_new_index`] will return.
    pub fn next_index(&self) -> AstIndex {
        self.next_index
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    /// Whether no node is indexed.
    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}
