// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Sharing-preserving encoding of AST graphs.
//!
//! A node already known to the [`Registry`] is written as a bare
//! back-reference to its index. A new node gets an index first, then its
//! constituents are encoded, then its own record is written, so every record
//! only refers to indices that appear earlier in the stream:
//!
//! ```text
//! stream  := entry* END_OF_STREAM
//! entry   := record* END_OF_ENTRY root:i32
//! record  := index:i32 tag:u8 payload count:u32 constituent:i32*
//! ```
//!
//! All integers are little endian. Payloads depend on the tag: a string is
//! `len:u32` followed by UTF-8 bytes, an integer literal is an `i64`, a
//! universe element carries its `u32` id and an operator its `u8` code.

use ast::{Ast, Context, Decl, Expr, ExprKind, Op, Sort, SortKind};

use crate::{
    registry::{AstIndex, Registry, END_OF_ENTRY, END_OF_STREAM},
    Error, Result,
};

const TAG_SORT_BOOL: u8 = 1;
const TAG_SORT_INT: u8 = 2;
const TAG_SORT_UNINTERPRETED: u8 = 3;
const TAG_DECL: u8 = 4;
const TAG_TRUE: u8 = 5;
const TAG_FALSE: u8 = 6;
const TAG_INT: u8 = 7;
const TAG_UNINTERPRETED_VALUE: u8 = 8;
const TAG_APP: u8 = 9;
const TAG_OP: u8 = 10;

/// Counters kept by an [`Encoder`] or [`Decoder`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CodecStats {
    /// Top-level entries written or read
    pub entries: usize,
    /// Node records written or read
    pub records: usize,
    /// Times the encoder referred to an already indexed node instead of
    /// writing it again
    pub back_references: usize,
}

// =============================
// Primitive reading and writing
// =============================

pub(crate) fn put_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub(crate) fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_i64(out: &mut Vec<u8>, v: i64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_str(out: &mut Vec<u8>, s: &str) {
    put_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

/// A cursor over a received byte block.
pub(crate) struct ByteReader<'b> {
    input: &'b [u8],
    pos: usize,
}

impl<'b> ByteReader<'b> {
    pub(crate) fn new(input: &'b [u8]) -> Self {
        Self { input, pos: 0 }
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'b [u8]> {
        if self.input.len() - self.pos < n {
            return Err(Error::corrupt("unexpected end of stream"));
        }
        let bytes = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub(crate) fn str(&mut self) -> Result<&'b str> {
        let len = self.u32()? as usize;
        std::str::from_utf8(self.take(len)?).map_err(|_| Error::corrupt("invalid utf-8 string"))
    }

    pub(crate) fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    pub(crate) fn rest(&mut self) -> &'b [u8] {
        let rest = &self.input[self.pos..];
        self.pos = self.input.len();
        rest
    }
}

// =============================
// Encoding
// =============================

/// Writes the AST section of one message.
pub struct Encoder<'r> {
    registry: &'r mut Registry,
    out: Vec<u8>,
    stats: CodecStats,
}

impl<'r> Encoder<'r> {
    /// Start a new AST section using the session's registry.
    pub fn new(registry: &'r mut Registry) -> Self {
        Self {
            registry,
            out: vec![],
            stats: CodecStats::default(),
        }
    }

    /// Encode `root` as one entry and return its index.
    ///
    /// Nodes are visited with an explicit stack, so arbitrarily deep terms
    /// are fine.
    pub fn encode(&mut self, root: &Ast) -> Result<AstIndex> {
        // nodes share their context with all of their constituents, so the
        // root check covers the whole graph
        self.registry.ensure_context_match(root)?;
        let mut stack = vec![(root.clone(), false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                self.write_record(&node)?;
                continue;
            }
            if self.registry.index_of(&node).is_some() {
                self.stats.back_references += 1;
                continue;
            }
            self.registry.assign_new_index(&node)?;
            let constituents = node.constituents();
            stack.push((node, true));
            stack.extend(constituents.into_iter().rev().map(|c| (c, false)));
        }
        let index = self.index(root)?;
        put_i32(&mut self.out, END_OF_ENTRY);
        put_i32(&mut self.out, index);
        self.stats.entries += 1;
        Ok(index)
    }

    fn index(&self, node: &Ast) -> Result<AstIndex> {
        self.registry
            .index_of(node)
            .ok_or_else(|| Error::corrupt(format!("{node:?} was not indexed before use")))
    }

    fn write_record(&mut self, node: &Ast) -> Result<()> {
        let index = self.index(node)?;
        put_i32(&mut self.out, index);
        match node {
            Ast::Sort(s) => match s.kind() {
                SortKind::Bool => put_u8(&mut self.out, TAG_SORT_BOOL),
                SortKind::Int => put_u8(&mut self.out, TAG_SORT_INT),
                SortKind::Uninterpreted(name) => {
                    put_u8(&mut self.out, TAG_SORT_UNINTERPRETED);
                    put_str(&mut self.out, name);
                }
            },
            Ast::Decl(d) => {
                put_u8(&mut self.out, TAG_DECL);
                put_str(&mut self.out, d.name());
            }
            Ast::Expr(e) => match e.kind() {
                ExprKind::Bool(true) => put_u8(&mut self.out, TAG_TRUE),
                ExprKind::Bool(false) => put_u8(&mut self.out, TAG_FALSE),
                ExprKind::Int(i) => {
                    put_u8(&mut self.out, TAG_INT);
                    put_i64(&mut self.out, *i);
                }
                ExprKind::UninterpretedValue(id) => {
                    put_u8(&mut self.out, TAG_UNINTERPRETED_VALUE);
                    put_u32(&mut self.out, *id);
                }
                ExprKind::App(..) => put_u8(&mut self.out, TAG_APP),
                ExprKind::Op(op, _) => {
                    put_u8(&mut self.out, TAG_OP);
                    put_u8(&mut self.out, op.code());
                }
            },
        }
        let constituents = node
            .constituents()
            .iter()
            .map(|c| self.index(c))
            .collect::<Result<Vec<_>>>()?;
        put_u32(&mut self.out, constituents.len() as u32);
        for c in constituents {
            put_i32(&mut self.out, c);
        }
        self.stats.records += 1;
        Ok(())
    }

    /// Terminate the section and return its bytes.
    pub fn finish(mut self) -> (Vec<u8>, CodecStats) {
        put_i32(&mut self.out, END_OF_STREAM);
        (self.out, self.stats)
    }
}

// =============================
// Decoding
// =============================

/// Reads the AST section of one message.
pub struct Decoder<'r> {
    registry: &'r mut Registry,
    ctx: Context,
    stats: CodecStats,
}

impl<'r> Decoder<'r> {
    /// Start decoding into the registry's bound context.
    pub fn new(registry: &'r mut Registry) -> Result<Self> {
        let ctx = registry.context()?.clone();
        Ok(Self {
            registry,
            ctx,
            stats: CodecStats::default(),
        })
    }

    /// Decode a complete section from the start of `input`, returning the
    /// entry roots and the number of bytes consumed.
    pub fn decode(&mut self, input: &[u8]) -> Result<(Vec<Ast>, usize)> {
        let mut reader = ByteReader::new(input);
        let roots = self.decode_from(&mut reader)?;
        Ok((roots, input.len() - reader.remaining()))
    }

    pub(crate) fn decode_from(&mut self, reader: &mut ByteReader<'_>) -> Result<Vec<Ast>> {
        let mut roots = vec![];
        let mut open_entry = false;
        loop {
            match reader.i32()? {
                END_OF_STREAM => {
                    if open_entry {
                        return Err(Error::corrupt("unterminated entry"));
                    }
                    return Ok(roots);
                }
                END_OF_ENTRY => {
                    let root = reader.i32()?;
                    roots.push(self.registry.node_at(root)?.clone());
                    self.stats.entries += 1;
                    open_entry = false;
                }
                index if index > 0 => {
                    let node = self.read_record(reader)?;
                    self.registry.record_index(index, node)?;
                    self.stats.records += 1;
                    open_entry = true;
                }
                other => return Err(Error::corrupt(format!("invalid ast index {other}"))),
            }
        }
    }

    fn read_record(&mut self, reader: &mut ByteReader<'_>) -> Result<Ast> {
        let tag = reader.u8()?;
        let name = match tag {
            TAG_SORT_UNINTERPRETED | TAG_DECL => Some(reader.str()?.to_string()),
            _ => None,
        };
        let int = match tag {
            TAG_INT => Some(reader.i64()?),
            _ => None,
        };
        let small = match tag {
            TAG_UNINTERPRETED_VALUE => Some(reader.u32()?),
            TAG_OP => Some(reader.u8()? as u32),
            _ => None,
        };
        let count = reader.u32()? as usize;
        if count > reader.remaining() / 4 {
            return Err(Error::corrupt(format!("constituent count {count} too large")));
        }
        let constituents = (0..count)
            .map(|_| {
                let index = reader.i32()?;
                self.registry.node_at(index).cloned()
            })
            .collect::<Result<Vec<_>>>()?;
        let ctx = &self.ctx;
        let ast_err = |e: ast::AstError| Error::corrupt(format!("ill-formed node: {e}"));
        let node = match tag {
            TAG_SORT_BOOL | TAG_SORT_INT | TAG_SORT_UNINTERPRETED => {
                no_constituents(&constituents)?;
                Ast::Sort(match (tag, name) {
                    (TAG_SORT_BOOL, _) => ctx.bool_sort(),
                    (TAG_SORT_INT, _) => ctx.int_sort(),
                    (_, Some(name)) => ctx.uninterpreted_sort(&name),
                    _ => unreachable!("name is read for uninterpreted sorts"),
                })
            }
            TAG_DECL => {
                let (sort, args) = constituents
                    .split_last()
                    .ok_or_else(|| Error::corrupt("declaration without a sort"))?;
                let args = args.iter().map(as_sort).collect::<Result<Vec<_>>>()?;
                let name = name.unwrap_or_default();
                Ast::Decl(ctx.mk_decl(&name, args, &as_sort(sort)?).map_err(ast_err)?)
            }
            TAG_TRUE | TAG_FALSE => {
                no_constituents(&constituents)?;
                Ast::Expr(ctx.mk_bool(tag == TAG_TRUE))
            }
            TAG_INT => {
                no_constituents(&constituents)?;
                Ast::Expr(ctx.mk_int(int.unwrap_or_default()))
            }
            TAG_UNINTERPRETED_VALUE => {
                let [sort] = constituents.as_slice() else {
                    return Err(Error::corrupt("universe element needs exactly its sort"));
                };
                let id = small.unwrap_or_default();
                Ast::Expr(
                    ctx.mk_uninterpreted_value(&as_sort(sort)?, id)
                        .map_err(ast_err)?,
                )
            }
            TAG_APP => {
                let (decl, args) = constituents
                    .split_first()
                    .ok_or_else(|| Error::corrupt("application without a declaration"))?;
                let args = args.iter().map(as_expr).collect::<Result<Vec<_>>>()?;
                Ast::Expr(ctx.mk_app(&as_decl(decl)?, args).map_err(ast_err)?)
            }
            TAG_OP => {
                let code = small.unwrap_or_default() as u8;
                let op = Op::from_code(code)
                    .ok_or_else(|| Error::corrupt(format!("unknown operator code {code}")))?;
                let args = constituents
                    .iter()
                    .map(as_expr)
                    .collect::<Result<Vec<_>>>()?;
                Ast::Expr(ctx.mk_op(op, args).map_err(ast_err)?)
            }
            _ => return Err(Error::corrupt(format!("unknown record tag {tag}"))),
        };
        Ok(node)
    }

    /// Counters for everything decoded so far.
    pub fn stats(&self) -> CodecStats {
        self.stats
    }
}

fn no_constituents(constituents: &[Ast]) -> Result<()> {
    if !constituents.is_empty() {
        return Err(Error::corrupt("leaf record with constituents"));
    }
    Ok(())
}

pub(crate) fn as_sort(ast: &Ast) -> Result<Sort> {
    ast.as_sort()
        .cloned()
        .ok_or_else(|| Error::corrupt(format!("expected a sort, found {ast:?}")))
}

pub(crate) fn as_decl(ast: &Ast) -> Result<Decl> {
    ast.as_decl()
        .cloned()
        .ok_or_else(|| Error::corrupt(format!("expected a declaration, found {ast:?}")))
}

pub(crate) fn as_expr(ast: &Ast) -> Result<Expr> {
    ast.as_expr()
        .cloned()
        .ok_or_else(|| Error::corrupt(format!("expected an expression, found {ast:?}")))
}

#[cfg(test)]
mod tests {
    use ast::{Ast, Context, Expr, Op};

    use super::{put_i32, put_u32, put_u8, CodecStats, Decoder, Encoder, TAG_APP};
    use crate::{
        registry::{Registry, END_OF_ENTRY, END_OF_STREAM},
        Error,
    };

    fn registry(ctx: &Context) -> Registry {
        let mut registry = Registry::new();
        registry.bind(ctx).unwrap();
        registry
    }

    /// Three terms that all use the same subterm `(+ x 1)`.
    fn shared_terms(ctx: &Context) -> Vec<Expr> {
        let x = ctx.mk_const("x", &ctx.int_sort()).unwrap();
        let s = ctx.mk_op(Op::Add, [x, ctx.mk_int(1)]).unwrap();
        vec![
            ctx.mk_op(Op::Lt, [s.clone(), ctx.mk_int(2)]).unwrap(),
            ctx.mk_op(Op::Gt, [s.clone(), ctx.mk_int(0)]).unwrap(),
            ctx.mk_eq(&s, &ctx.mk_int(5)).unwrap(),
        ]
    }

    #[test]
    fn test_round_trip_preserves_sharing() {
        let (local, remote) = (Context::new(), Context::new());
        let (mut out_reg, mut in_reg) = (registry(&local), registry(&remote));
        let terms = shared_terms(&local);

        let mut encoder = Encoder::new(&mut out_reg);
        for t in &terms {
            encoder.encode(&Ast::from(t)).unwrap();
        }
        let (bytes, stats) = encoder.finish();
        assert_eq!(
            stats,
            CodecStats {
                entries: 3,
                records: 11,
                back_references: 2,
            }
        );

        let mut decoder = Decoder::new(&mut in_reg).unwrap();
        let (roots, used) = decoder.decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoder.stats().records, 11);
        let printed = roots.iter().map(|r| format!("{r:?}")).collect::<Vec<_>>();
        insta::assert_snapshot!(printed.join("\n"), @r###"
        Expr((< (+ x 1) 2))
        Expr((> (+ x 1) 0))
        Expr((= (+ x 1) 5))
        "###);
        // the shared subterm is a single node on the receiving side
        let shared = |r: &Ast| r.as_expr().unwrap().args()[0].clone();
        assert_eq!(shared(&roots[0]), shared(&roots[2]));
        // plus the Bool sort the receiver builds for the comparisons
        assert_eq!(remote.node_count(), 12);
    }

    #[test]
    fn test_indices_persist_across_messages() {
        let (local, remote) = (Context::new(), Context::new());
        let (mut out_reg, mut in_reg) = (registry(&local), registry(&remote));
        let terms = shared_terms(&local);

        let mut encoder = Encoder::new(&mut out_reg);
        let first = encoder.encode(&Ast::from(&terms[0])).unwrap();
        let (bytes, _) = encoder.finish();
        let (roots1, _) = Decoder::new(&mut in_reg).unwrap().decode(&bytes).unwrap();

        // a second message that only mentions known nodes carries no records
        let mut encoder = Encoder::new(&mut out_reg);
        assert_eq!(encoder.encode(&Ast::from(&terms[0])).unwrap(), first);
        let (bytes, stats) = encoder.finish();
        assert_eq!(stats.records, 0);
        assert_eq!(stats.back_references, 1);
        let (roots2, _) = Decoder::new(&mut in_reg).unwrap().decode(&bytes).unwrap();
        assert_eq!(roots1, roots2);
    }

    #[test]
    fn test_reply_uses_fresh_indices() {
        let (local, remote) = (Context::new(), Context::new());
        let (mut out_reg, mut in_reg) = (registry(&local), registry(&remote));
        let x = local.mk_const("x", &local.int_sort()).unwrap();

        let mut encoder = Encoder::new(&mut out_reg);
        encoder.encode(&Ast::from(&x)).unwrap();
        let (bytes, _) = encoder.finish();
        let (roots, _) = Decoder::new(&mut in_reg).unwrap().decode(&bytes).unwrap();

        // the receiver answers with a new node built on top of x
        let remote_x = roots[0].as_expr().unwrap().clone();
        let answer = remote.mk_eq(&remote_x, &remote.mk_int(5)).unwrap();
        let mut encoder = Encoder::new(&mut in_reg);
        encoder.encode(&Ast::from(&answer)).unwrap();
        let (bytes, stats) = encoder.finish();
        assert_eq!(stats.back_references, 1, "x is referenced, not resent");

        let (roots, _) = Decoder::new(&mut out_reg).unwrap().decode(&bytes).unwrap();
        let expected = local.mk_eq(&x, &local.mk_int(5)).unwrap();
        assert_eq!(roots, vec![Ast::from(expected)]);
        assert_eq!(out_reg.next_index(), in_reg.next_index());
    }

    #[test]
    fn test_empty_section() {
        let ctx = Context::new();
        let mut reg = registry(&ctx);
        let (bytes, stats) = Encoder::new(&mut reg).finish();
        assert_eq!(bytes, END_OF_STREAM.to_le_bytes());
        assert_eq!(stats, CodecStats::default());
        let (roots, _) = Decoder::new(&mut reg).unwrap().decode(&bytes).unwrap();
        assert!(roots.is_empty());
    }

    #[test]
    fn test_foreign_node_rejected_before_allocation() {
        let (ctx, other) = (Context::new(), Context::new());
        let mut reg = registry(&ctx);
        let mut encoder = Encoder::new(&mut reg);
        let foreign = Ast::from(other.mk_int(3));
        assert!(matches!(
            encoder.encode(&foreign),
            Err(Error::ContextMismatch { .. })
        ));
        drop(encoder);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_forward_reference_is_corrupt() {
        let ctx = Context::new();
        let mut reg = registry(&ctx);
        let mut bytes = vec![];
        put_i32(&mut bytes, 1);
        put_u8(&mut bytes, TAG_APP);
        put_u32(&mut bytes, 1);
        put_i32(&mut bytes, 2);
        put_i32(&mut bytes, END_OF_ENTRY);
        put_i32(&mut bytes, 1);
        put_i32(&mut bytes, END_OF_STREAM);
        let err = Decoder::new(&mut reg).unwrap().decode(&bytes).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"corrupted stream: 2 is not properly deserialized");
    }

    #[test]
    fn test_unterminated_entry_is_corrupt() {
        let (local, remote) = (Context::new(), Context::new());
        let (mut out_reg, mut in_reg) = (registry(&local), registry(&remote));
        let mut encoder = Encoder::new(&mut out_reg);
        encoder.encode(&Ast::from(local.mk_int(7))).unwrap();
        let (bytes, _) = encoder.finish();
        // drop END_OF_ENTRY, the root index and END_OF_STREAM, then terminate
        let mut truncated = bytes[..bytes.len() - 12].to_vec();
        put_i32(&mut truncated, END_OF_STREAM);
        let err = Decoder::new(&mut in_reg)
            .unwrap()
            .decode(&truncated)
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"corrupted stream: unterminated entry");

        let err = Decoder::new(&mut in_reg)
            .unwrap()
            .decode(&bytes[..5])
            .unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_deep_term() {
        let (local, remote) = (Context::new(), Context::new());
        let (mut out_reg, mut in_reg) = (registry(&local), registry(&remote));
        let mut t = local.mk_const("p", &local.bool_sort()).unwrap();
        for _ in 0..2000 {
            t = local.mk_not(&t).unwrap();
        }
        let mut encoder = Encoder::new(&mut out_reg);
        encoder.encode(&Ast::from(&t)).unwrap();
        let (bytes, stats) = encoder.finish();
        assert_eq!(stats.records, 2003);
        let (roots, _) = Decoder::new(&mut in_reg).unwrap().decode(&bytes).unwrap();
        let mut depth = 0;
        let mut e = roots[0].as_expr().unwrap().clone();
        while let Some(arg) = e.args().first().cloned() {
            depth += 1;
            e = arg;
        }
        assert_eq!(depth, 2000);
    }
}
