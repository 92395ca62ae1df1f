// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Requests and responses exchanged with a worker.
//!
//! Messages are generic over how they refer to AST nodes. In memory they hold
//! [`Ast`] values; on the wire they hold [`AstIndex`]es into the channel's
//! registry. A message frame is the AST section produced by the
//! [`codec`](crate::codec) for every node the message mentions, followed by
//! the bincode encoding of the index-based message.

use std::fmt;

use ast::{Ast, Decl, Expr, Sort};
use itertools::Itertools;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    codec::{as_decl, as_expr, as_sort, ByteReader, Decoder, Encoder},
    conf::ParamValue,
    registry::{AstIndex, Registry},
    Error, Result,
};

/// Identifies a model kept alive in the worker.
pub type ModelId = u32;

/// Outcome of a satisfiability check.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SatStatus {
    Sat,
    Unsat,
    Unknown,
}

impl fmt::Display for SatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SatStatus::Sat => "sat",
            SatStatus::Unsat => "unsat",
            SatStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A request to the worker.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request<A> {
    Configure {
        name: String,
        value: ParamValue,
    },
    Assert(A),
    /// Assert under a fresh tracking literal so the assertion can show up
    /// in unsat cores
    AssertAndTrack(A),
    Push,
    Pop(u32),
    CheckSat {
        assumptions: Vec<A>,
        timeout_ms: Option<u64>,
    },
    /// Capture the model of the last satisfiable check
    Model,
    ModelEval {
        model: ModelId,
        expr: A,
        complete: bool,
    },
    ModelInterpretation {
        model: ModelId,
        decl: A,
    },
    ModelUniverse {
        model: ModelId,
        sort: A,
    },
    ReleaseModel(ModelId),
    UnsatCore,
    ReasonUnknown,
    /// Run requests in order, stopping at the first failure
    Batch(Vec<Request<A>>),
    Shutdown,
}

/// The interpretation of a declaration in a model, with node references of
/// type `A`. See [`FuncInterp`](crate::model::FuncInterp) for the typed form.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interp<A> {
    pub decl: A,
    pub vars: Vec<A>,
    pub entries: Vec<(Vec<A>, A)>,
    pub default: Option<A>,
}

/// Why the worker could not execute a request.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    UnsupportedParameter,
    Engine,
    /// The request was well-formed on the wire but made no sense (for
    /// example a sort where an expression belongs)
    Protocol,
}

/// A failed request.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    /// The caller-side error for this failure.
    pub fn into_error(self) -> Error {
        match self.kind {
            FailureKind::UnsupportedParameter => Error::UnsupportedParameter(self.message),
            FailureKind::Engine => Error::Remote(self.message),
            FailureKind::Protocol => Error::Remote(format!("malformed request: {}", self.message)),
        }
    }
}

/// A response from the worker.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response<A> {
    Done,
    Status(SatStatus),
    Model {
        id: ModelId,
        declarations: Vec<A>,
        sorts: Vec<A>,
    },
    Expr(A),
    Interpretation(Option<Interp<A>>),
    Universe(Option<Vec<A>>),
    Exprs(Vec<A>),
    Reason(String),
    Failure(Failure),
}

fn map_all<A, B, F>(xs: &[A], f: &mut F) -> Result<Vec<B>>
where
    F: FnMut(&A) -> Result<B>,
{
    xs.iter().map(f).collect()
}

impl<A> Request<A> {
    /// Convert every node reference with `f`.
    pub fn try_map<B, F>(&self, f: &mut F) -> Result<Request<B>>
    where
        F: FnMut(&A) -> Result<B>,
    {
        Ok(match self {
            Request::Configure { name, value } => Request::Configure {
                name: name.clone(),
                value: value.clone(),
            },
            Request::Assert(a) => Request::Assert(f(a)?),
            Request::AssertAndTrack(a) => Request::AssertAndTrack(f(a)?),
            Request::Push => Request::Push,
            Request::Pop(n) => Request::Pop(*n),
            Request::CheckSat {
                assumptions,
                timeout_ms,
            } => Request::CheckSat {
                assumptions: map_all(assumptions, f)?,
                timeout_ms: *timeout_ms,
            },
            Request::Model => Request::Model,
            Request::ModelEval {
                model,
                expr,
                complete,
            } => Request::ModelEval {
                model: *model,
                expr: f(expr)?,
                complete: *complete,
            },
            Request::ModelInterpretation { model, decl } => Request::ModelInterpretation {
                model: *model,
                decl: f(decl)?,
            },
            Request::ModelUniverse { model, sort } => Request::ModelUniverse {
                model: *model,
                sort: f(sort)?,
            },
            Request::ReleaseModel(id) => Request::ReleaseModel(*id),
            Request::UnsatCore => Request::UnsatCore,
            Request::ReasonUnknown => Request::ReasonUnknown,
            Request::Batch(requests) => Request::Batch(
                requests
                    .iter()
                    .map(|r| r.try_map(f))
                    .collect::<Result<_>>()?,
            ),
            Request::Shutdown => Request::Shutdown,
        })
    }

    /// Does a successful execution change solver state that a fork has to
    /// reproduce?
    pub fn is_stateful(&self) -> bool {
        match self {
            Request::Configure { .. }
            | Request::Assert(_)
            | Request::AssertAndTrack(_)
            | Request::Push
            | Request::Pop(_) => true,
            Request::Batch(requests) => requests.iter().any(|r| r.is_stateful()),
            _ => false,
        }
    }
}

impl<A> Interp<A> {
    /// Convert every node reference with `f`.
    pub fn try_map<B, F>(&self, f: &mut F) -> Result<Interp<B>>
    where
        F: FnMut(&A) -> Result<B>,
    {
        Ok(Interp {
            decl: f(&self.decl)?,
            vars: map_all(&self.vars, f)?,
            entries: self
                .entries
                .iter()
                .map(|(args, value)| Ok((map_all(args, f)?, f(value)?)))
                .collect::<Result<_>>()?,
            default: self.default.as_ref().map(|d| f(d)).transpose()?,
        })
    }
}

impl<A> Response<A> {
    /// Convert every node reference with `f`.
    pub fn try_map<B, F>(&self, f: &mut F) -> Result<Response<B>>
    where
        F: FnMut(&A) -> Result<B>,
    {
        Ok(match self {
            Response::Done => Response::Done,
            Response::Status(s) => Response::Status(*s),
            Response::Model {
                id,
                declarations,
                sorts,
            } => Response::Model {
                id: *id,
                declarations: map_all(declarations, f)?,
                sorts: map_all(sorts, f)?,
            },
            Response::Expr(a) => Response::Expr(f(a)?),
            Response::Interpretation(interp) => Response::Interpretation(
                interp.as_ref().map(|i| i.try_map(f)).transpose()?,
            ),
            Response::Universe(values) => Response::Universe(
                values.as_ref().map(|v| map_all(v, f)).transpose()?,
            ),
            Response::Exprs(exprs) => Response::Exprs(map_all(exprs, f)?),
            Response::Reason(r) => Response::Reason(r.clone()),
            Response::Failure(failure) => Response::Failure(failure.clone()),
        })
    }

    /// A failure with the given kind and message.
    pub fn failure<S: Into<String>>(kind: FailureKind, message: S) -> Self {
        Response::Failure(Failure {
            kind,
            message: message.into(),
        })
    }
}

/// Any response other than the one expected is a protocol violation.
fn unexpected<A: fmt::Debug>(what: &str, response: &Response<A>) -> Error {
    Error::corrupt(format!("expected {what}, got {response:?}"))
}

impl Response<Ast> {
    /// Expect [`Response::Done`].
    pub fn into_done(self) -> Result<()> {
        match self {
            Response::Done => Ok(()),
            other => Err(unexpected("an acknowledgement", &other)),
        }
    }

    /// Expect a satisfiability status.
    pub fn into_status(self) -> Result<SatStatus> {
        match self {
            Response::Status(s) => Ok(s),
            other => Err(unexpected("a status", &other)),
        }
    }

    /// Expect a single expression.
    pub fn into_expr(self) -> Result<Expr> {
        match self {
            Response::Expr(e) => as_expr(&e),
            other => Err(unexpected("an expression", &other)),
        }
    }

    /// Expect a list of expressions.
    pub fn into_exprs(self) -> Result<Vec<Expr>> {
        match self {
            Response::Exprs(es) => es.iter().map(as_expr).collect(),
            other => Err(unexpected("a list of expressions", &other)),
        }
    }

    /// Expect a reason string.
    pub fn into_reason(self) -> Result<String> {
        match self {
            Response::Reason(r) => Ok(r),
            other => Err(unexpected("a reason", &other)),
        }
    }

    /// Expect model metadata.
    pub fn into_model(self) -> Result<(ModelId, Vec<Decl>, Vec<Sort>)> {
        match self {
            Response::Model {
                id,
                declarations,
                sorts,
            } => Ok((
                id,
                declarations.iter().map(as_decl).collect::<Result<_>>()?,
                sorts.iter().map(as_sort).collect::<Result<_>>()?,
            )),
            other => Err(unexpected("a model", &other)),
        }
    }

    /// Expect an optional interpretation.
    pub fn into_interpretation(self) -> Result<Option<Interp<Ast>>> {
        match self {
            Response::Interpretation(i) => Ok(i),
            other => Err(unexpected("an interpretation", &other)),
        }
    }

    /// Expect an optional universe.
    pub fn into_universe(self) -> Result<Option<Vec<Expr>>> {
        match self {
            Response::Universe(values) => values
                .map(|v| v.iter().map(as_expr).collect())
                .transpose(),
            other => Err(unexpected("a universe", &other)),
        }
    }
}

// =============================
// Framing of messages
// =============================

fn encode_with<W, F>(registry: &mut Registry, build: F) -> Result<Vec<u8>>
where
    W: Serialize,
    F: FnOnce(&mut Encoder<'_>) -> Result<W>,
{
    let mut encoder = Encoder::new(registry);
    let wire = build(&mut encoder)?;
    let (mut out, _) = encoder.finish();
    bincode::serialize_into(&mut out, &wire)
        .map_err(|err| Error::corrupt(format!("could not serialize message: {err}")))?;
    Ok(out)
}

fn decode_with<W>(registry: &mut Registry, bytes: &[u8]) -> Result<W>
where
    W: DeserializeOwned,
{
    let mut reader = ByteReader::new(bytes);
    Decoder::new(registry)?.decode_from(&mut reader)?;
    bincode::deserialize(reader.rest())
        .map_err(|err| Error::corrupt(format!("could not deserialize message: {err}")))
}

fn resolve(registry: &Registry) -> impl FnMut(&AstIndex) -> Result<Ast> + '_ {
    |index: &AstIndex| registry.node_at(*index).cloned()
}

/// Encode a request, indexing any nodes not yet known to the worker.
pub fn encode_request(registry: &mut Registry, request: &Request<Ast>) -> Result<Vec<u8>> {
    encode_with(registry, |encoder| {
        request.try_map(&mut |ast| encoder.encode(ast))
    })
}

/// Decode a request, recording the nodes it introduces.
pub fn decode_request(registry: &mut Registry, bytes: &[u8]) -> Result<Request<Ast>> {
    let wire: Request<AstIndex> = decode_with(registry, bytes)?;
    wire.try_map(&mut resolve(registry))
}

/// Encode a response.
pub fn encode_response(registry: &mut Registry, response: &Response<Ast>) -> Result<Vec<u8>> {
    encode_with(registry, |encoder| {
        response.try_map(&mut |ast| encoder.encode(ast))
    })
}

/// Decode a response.
pub fn decode_response(registry: &mut Registry, bytes: &[u8]) -> Result<Response<Ast>> {
    let wire: Response<AstIndex> = decode_with(registry, bytes)?;
    wire.try_map(&mut resolve(registry))
}

// =============================
// Printing, for transcripts
// =============================

impl fmt::Display for Request<Ast> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Configure { name, value } => write!(f, "(set-option :{name} {value})"),
            Request::Assert(a) => write!(f, "(assert {a})"),
            Request::AssertAndTrack(a) => write!(f, "(assert (! {a} :named track))"),
            Request::Push => write!(f, "(push 1)"),
            Request::Pop(n) => write!(f, "(pop {n})"),
            Request::CheckSat {
                assumptions,
                timeout_ms,
            } => {
                if let Some(ms) = timeout_ms {
                    writeln!(f, "; timeout {ms}ms")?;
                }
                if assumptions.is_empty() {
                    write!(f, "(check-sat)")
                } else {
                    write!(f, "(check-sat-assuming ({}))", assumptions.iter().join(" "))
                }
            }
            Request::Model => write!(f, "(get-model)"),
            Request::ModelEval {
                model,
                expr,
                complete,
            } => write!(f, "; model {model}\n(eval {expr} :completion {complete})"),
            Request::ModelInterpretation { model, decl } => {
                write!(f, "; model {model}\n(get-interpretation {decl})")
            }
            Request::ModelUniverse { model, sort } => {
                write!(f, "; model {model}\n(get-universe {sort})")
            }
            Request::ReleaseModel(id) => write!(f, "; release model {id}"),
            Request::UnsatCore => write!(f, "(get-unsat-core)"),
            Request::ReasonUnknown => write!(f, "(get-info :reason-unknown)"),
            Request::Batch(requests) => write!(f, "{}", requests.iter().join("\n")),
            Request::Shutdown => write!(f, "(exit)"),
        }
    }
}
