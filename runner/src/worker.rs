// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The worker side of the protocol: decode requests, apply them to an
//! [`Engine`] and send back the results.

use std::{
    collections::HashMap,
    io::{BufReader, BufWriter, Read, Write},
    sync::atomic::{AtomicBool, Ordering},
};

use ast::{Ast, Context, Decl, Expr, Sort};

use crate::{
    codec::{as_decl, as_expr, as_sort},
    engine::{Engine, EngineError, EngineModel},
    frame::{check_hello, hello_ack, read_frame, write_frame},
    protocol::{decode_request, encode_response, Failure, FailureKind, ModelId, Request, Response},
    registry::Registry,
};

impl From<EngineError> for Failure {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnsupportedParameter(message) => Failure {
                kind: FailureKind::UnsupportedParameter,
                message,
            },
            EngineError::Failed(message) => Failure {
                kind: FailureKind::Engine,
                message,
            },
        }
    }
}

fn malformed(err: crate::Error) -> Failure {
    Failure {
        kind: FailureKind::Protocol,
        message: err.to_string(),
    }
}

fn expr(ast: &Ast) -> Result<Expr, Failure> {
    as_expr(ast).map_err(malformed)
}

fn decl(ast: &Ast) -> Result<Decl, Failure> {
    as_decl(ast).map_err(malformed)
}

fn sort(ast: &Ast) -> Result<Sort, Failure> {
    as_sort(ast).map_err(malformed)
}

struct Worker<E: Engine> {
    engine: E,
    models: HashMap<ModelId, E::Model>,
    next_model: ModelId,
}

impl<E: Engine> Worker<E> {
    fn model(&self, id: ModelId) -> Result<&E::Model, Failure> {
        self.models.get(&id).ok_or_else(|| Failure {
            kind: FailureKind::Engine,
            message: format!("no model with id {id}"),
        })
    }

    fn execute(&mut self, request: &Request<Ast>, interrupted: &AtomicBool) -> Response<Ast> {
        match self.try_execute(request, interrupted) {
            Ok(response) => response,
            Err(failure) => {
                log::debug!("request failed: {}", failure.message);
                Response::Failure(failure)
            }
        }
    }

    fn try_execute(
        &mut self,
        request: &Request<Ast>,
        interrupted: &AtomicBool,
    ) -> Result<Response<Ast>, Failure> {
        let response = match request {
            Request::Configure { name, value } => {
                self.engine.set_parameter(name, value)?;
                Response::Done
            }
            Request::Assert(a) => {
                self.engine.assert(&expr(a)?)?;
                Response::Done
            }
            Request::AssertAndTrack(a) => {
                self.engine.assert_and_track(&expr(a)?)?;
                Response::Done
            }
            Request::Push => {
                self.engine.push()?;
                Response::Done
            }
            Request::Pop(n) => {
                self.engine.pop(*n)?;
                Response::Done
            }
            Request::CheckSat {
                assumptions,
                timeout_ms,
            } => {
                let assumptions = assumptions.iter().map(expr).collect::<Result<Vec<_>, _>>()?;
                if let Some(ms) = timeout_ms {
                    log::debug!("check-sat with a deadline of {ms}ms");
                }
                Response::Status(self.engine.check_sat(&assumptions, interrupted)?)
            }
            Request::Model => {
                let model = self.engine.model()?;
                let id = self.next_model;
                self.next_model += 1;
                let response = Response::Model {
                    id,
                    declarations: model.declarations().iter().map(Ast::from).collect(),
                    sorts: model.uninterpreted_sorts().iter().map(Ast::from).collect(),
                };
                self.models.insert(id, model);
                response
            }
            Request::ModelEval {
                model,
                expr: e,
                complete,
            } => {
                let value = self.model(*model)?.eval(&expr(e)?, *complete)?;
                Response::Expr(value.into())
            }
            Request::ModelInterpretation { model, decl: d } => {
                let interp = self.model(*model)?.interpretation(&decl(d)?)?;
                Response::Interpretation(interp.map(|i| i.to_wire()))
            }
            Request::ModelUniverse { model, sort: s } => {
                let universe = self.model(*model)?.universe(&sort(s)?)?;
                Response::Universe(universe.map(|values| values.iter().map(Ast::from).collect()))
            }
            Request::ReleaseModel(id) => {
                self.models.remove(id);
                Response::Done
            }
            Request::UnsatCore => {
                Response::Exprs(self.engine.unsat_core()?.iter().map(Ast::from).collect())
            }
            Request::ReasonUnknown => Response::Reason(self.engine.reason_unknown()?),
            Request::Batch(requests) => {
                for r in requests {
                    self.try_execute(r, interrupted)?;
                }
                Response::Done
            }
            Request::Shutdown => Response::Done,
        };
        Ok(response)
    }
}

/// Serve requests from `input` until the caller sends a shutdown request or
/// closes the pipe.
///
/// Nodes are decoded into `ctx`, which must be the context `engine` builds
/// its results in. `interrupted` is handed to the engine during checks. It
/// is cleared whenever a request arrives, so an interrupt aimed at an
/// earlier request, even one landing after its response went out, never
/// reaches the next one.
pub fn serve<E, R, W>(
    engine: E,
    ctx: &Context,
    input: R,
    output: W,
    interrupted: &AtomicBool,
    max_frame_bytes: usize,
) -> crate::Result<()>
where
    E: Engine,
    R: Read,
    W: Write,
{
    let mut input = BufReader::new(input);
    let mut output = BufWriter::new(output);
    let Some(greeting) = read_frame(&mut input, max_frame_bytes)? else {
        log::info!("caller went away before the handshake");
        return Ok(());
    };
    check_hello(&greeting)?;
    write_frame(&mut output, &hello_ack(engine.name()), max_frame_bytes)?;
    log::info!("serving engine {}", engine.name());

    let mut registry = Registry::new();
    registry.bind(ctx)?;
    let mut worker = Worker {
        engine,
        models: HashMap::new(),
        next_model: 1,
    };
    while let Some(frame) = read_frame(&mut input, max_frame_bytes)? {
        interrupted.store(false, Ordering::SeqCst);
        let request = decode_request(&mut registry, &frame)?;
        log::trace!("request: {request}");
        let response = worker.execute(&request, interrupted);
        let bytes = encode_response(&mut registry, &response)?;
        write_frame(&mut output, &bytes, max_frame_bytes)?;
        if matches!(request, Request::Shutdown) {
            log::info!("shutting down");
            return Ok(());
        }
    }
    log::info!("caller closed the pipe");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Cursor, Read},
        sync::atomic::{AtomicBool, Ordering},
    };

    use ast::{Ast, Context, Decl, Expr, Sort};

    use super::serve;
    use crate::{
        conf::ParamValue,
        engine::{Engine, EngineError, EngineModel},
        frame::{check_hello, hello, read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES},
        model::FuncInterp,
        protocol::{
            decode_response, encode_request, FailureKind, Request, Response, SatStatus,
        },
        registry::Registry,
    };

    /// Unsat exactly when some assertion is literally `false`.
    struct Literal {
        frames: Vec<Vec<Expr>>,
        tracked: Vec<Expr>,
    }

    struct Empty;

    impl EngineModel for Empty {
        fn declarations(&self) -> Vec<Decl> {
            vec![]
        }
        fn uninterpreted_sorts(&self) -> Vec<Sort> {
            vec![]
        }
        fn eval(&self, expr: &Expr, _complete: bool) -> Result<Expr, EngineError> {
            Ok(expr.clone())
        }
        fn interpretation(&self, _decl: &Decl) -> Result<Option<FuncInterp>, EngineError> {
            Ok(None)
        }
        fn universe(&self, _sort: &Sort) -> Result<Option<Vec<Expr>>, EngineError> {
            Ok(None)
        }
    }

    impl Engine for Literal {
        type Model = Empty;

        fn name(&self) -> &str {
            "literal"
        }
        fn set_parameter(&mut self, name: &str, value: &ParamValue) -> Result<(), EngineError> {
            Err(EngineError::UnsupportedParameter(format!("{name} = {value}")))
        }
        fn assert(&mut self, expr: &Expr) -> Result<(), EngineError> {
            self.frames.last_mut().unwrap().push(expr.clone());
            Ok(())
        }
        fn assert_and_track(&mut self, expr: &Expr) -> Result<(), EngineError> {
            self.tracked.push(expr.clone());
            self.assert(expr)
        }
        fn push(&mut self) -> Result<(), EngineError> {
            self.frames.push(vec![]);
            Ok(())
        }
        fn pop(&mut self, levels: u32) -> Result<(), EngineError> {
            if levels as usize >= self.frames.len() {
                return Err(EngineError::Failed("pop below base level".to_string()));
            }
            let keep = self.frames.len() - levels as usize;
            self.frames.truncate(keep);
            Ok(())
        }
        fn check_sat(
            &mut self,
            assumptions: &[Expr],
            interrupted: &AtomicBool,
        ) -> Result<SatStatus, EngineError> {
            if interrupted.load(Ordering::SeqCst) {
                return Ok(SatStatus::Unknown);
            }
            let unsat = self
                .frames
                .iter()
                .flatten()
                .chain(assumptions)
                .any(|e| e.as_bool() == Some(false));
            Ok(if unsat { SatStatus::Unsat } else { SatStatus::Sat })
        }
        fn model(&mut self) -> Result<Self::Model, EngineError> {
            Ok(Empty)
        }
        fn unsat_core(&mut self) -> Result<Vec<Expr>, EngineError> {
            Ok(self.tracked.clone())
        }
        fn reason_unknown(&mut self) -> Result<String, EngineError> {
            Ok("interrupted".to_string())
        }
    }

    const MAX: usize = DEFAULT_MAX_FRAME_BYTES;

    fn literal() -> Literal {
        Literal {
            frames: vec![vec![]],
            tracked: vec![],
        }
    }

    /// Input that arrives one byte at a time, with an interrupt landing
    /// before every byte.
    struct Trickle<'a> {
        input: Cursor<Vec<u8>>,
        interrupted: &'a AtomicBool,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupted.store(true, Ordering::SeqCst);
            let n = buf.len().min(1);
            self.input.read(&mut buf[..n])
        }
    }

    /// The handshake and encoded `script`, with the caller's registry.
    fn script(ctx: &Context, script: &[Request<Ast>]) -> (Registry, Vec<u8>) {
        let mut caller = Registry::new();
        caller.bind(ctx).unwrap();
        let mut input = vec![];
        write_frame(&mut input, &hello(), MAX).unwrap();
        for request in script {
            let bytes = encode_request(&mut caller, request).unwrap();
            write_frame(&mut input, &bytes, MAX).unwrap();
        }
        (caller, input)
    }

    fn replies(caller: &mut Registry, output: Vec<u8>) -> Vec<Response<Ast>> {
        let mut output = Cursor::new(output);
        let ack = read_frame(&mut output, MAX).unwrap().unwrap();
        assert_eq!(check_hello(&ack).unwrap(), "literal");
        let mut responses = vec![];
        while let Some(frame) = read_frame(&mut output, MAX).unwrap() {
            responses.push(decode_response(caller, &frame).unwrap());
        }
        responses
    }

    /// Run a script of requests through `serve` and decode the responses.
    fn run(ctx: &Context, requests: &[Request<Ast>]) -> Vec<Response<Ast>> {
        let (mut caller, input) = script(ctx, requests);
        let flag = AtomicBool::new(false);
        let mut output = vec![];
        serve(literal(), &Context::new(), Cursor::new(input), &mut output, &flag, MAX).unwrap();
        replies(&mut caller, output)
    }

    #[test]
    fn test_scopes_and_failures() {
        let ctx = Context::new();
        let f = Ast::from(ctx.mk_bool(false));
        let check = Request::CheckSat {
            assumptions: vec![],
            timeout_ms: None,
        };
        let responses = run(
            &ctx,
            &[
                Request::Configure {
                    name: "seed".to_string(),
                    value: ParamValue::Int(1),
                },
                Request::Push,
                Request::Assert(f),
                check.clone(),
                Request::Pop(1),
                check,
                Request::Pop(1),
                Request::Assert(Ast::from(ctx.int_sort())),
            ],
        );
        assert_eq!(responses.len(), 8);
        assert!(matches!(&responses[0], Response::Failure(f) if f.kind == FailureKind::UnsupportedParameter));
        assert_eq!(responses[3], Response::Status(SatStatus::Unsat));
        assert_eq!(responses[5], Response::Status(SatStatus::Sat));
        assert!(matches!(&responses[6], Response::Failure(f) if f.kind == FailureKind::Engine));
        assert!(matches!(&responses[7], Response::Failure(f) if f.kind == FailureKind::Protocol));
    }

    #[test]
    fn test_models_and_shutdown() {
        let ctx = Context::new();
        let p = ctx.mk_const("p", &ctx.bool_sort()).unwrap();
        let responses = run(
            &ctx,
            &[
                Request::AssertAndTrack(Ast::from(&p)),
                Request::Model,
                Request::ModelEval {
                    model: 1,
                    expr: Ast::from(&p),
                    complete: true,
                },
                Request::ReleaseModel(1),
                Request::ModelEval {
                    model: 1,
                    expr: Ast::from(&p),
                    complete: true,
                },
                Request::UnsatCore,
                Request::Shutdown,
                // never executed
                Request::Push,
            ],
        );
        assert_eq!(responses.len(), 7);
        assert!(matches!(&responses[1], Response::Model { id: 1, .. }));
        assert_eq!(responses[2], Response::Expr(Ast::from(&p)));
        assert!(matches!(&responses[4], Response::Failure(_)));
        assert_eq!(responses[5], Response::Exprs(vec![Ast::from(&p)]));
        assert_eq!(responses[6], Response::Done);
    }

    #[test]
    fn test_interrupts_between_requests_are_dropped() {
        let ctx = Context::new();
        let check = Request::CheckSat {
            assumptions: vec![],
            timeout_ms: Some(100),
        };
        let (mut caller, input) = script(&ctx, &[check.clone(), Request::Push, Request::Pop(1), check]);
        let flag = AtomicBool::new(false);
        let input = Trickle {
            input: Cursor::new(input),
            interrupted: &flag,
        };
        let mut output = vec![];
        serve(literal(), &Context::new(), input, &mut output, &flag, MAX).unwrap();
        assert_eq!(
            replies(&mut caller, output),
            vec![
                Response::Status(SatStatus::Sat),
                Response::Done,
                Response::Done,
                Response::Status(SatStatus::Sat)
            ]
        );
    }

    #[test]
    fn test_batch_stops_at_first_failure() {
        let ctx = Context::new();
        let t = Ast::from(ctx.mk_bool(true));
        let responses = run(
            &ctx,
            &[
                Request::Batch(vec![
                    Request::Assert(t.clone()),
                    Request::Pop(3),
                    Request::Assert(Ast::from(ctx.mk_bool(false))),
                ]),
                Request::CheckSat {
                    assumptions: vec![],
                    timeout_ms: None,
                },
            ],
        );
        assert!(matches!(&responses[0], Response::Failure(_)));
        assert_eq!(responses[1], Response::Status(SatStatus::Sat));
    }
}
