// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! End-to-end tests running sessions against the real smt-worker binary.

use std::{
    env, fs,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use ast::{Context, Expr, Op};
use eyre::WrapErr;
use runner::{
    channel::ChannelState,
    conf::{SolverConfiguration, WorkerConf},
    path::{override_var, WORKER_BIN},
    protocol::SatStatus,
    session::Session,
    Error,
};

const CHECK: Duration = Duration::from_secs(30);

fn bounded() -> WorkerConf {
    WorkerConf::new(env!("CARGO_BIN_EXE_smt-worker"))
        .engine("bounded")
        .done()
}

fn open(ctx: &Context, conf: WorkerConf) -> Session {
    Session::open(ctx, conf)
        .wrap_err("could not start smt-worker")
        .unwrap()
}

fn int_const(ctx: &Context, name: &str) -> Expr {
    ctx.mk_const(name, &ctx.int_sort()).unwrap()
}

fn bool_const(ctx: &Context, name: &str) -> Expr {
    ctx.mk_const(name, &ctx.bool_sort()).unwrap()
}

/// Start a check on another thread and interrupt or kill the worker once it
/// is underway.
fn while_checking<F>(session: &Session, act: F) -> runner::Result<SatStatus>
where
    F: FnOnce(),
{
    thread::scope(|s| {
        let check = s.spawn(|| session.check_sat(CHECK));
        let start = Instant::now();
        while session.state() != ChannelState::Busy && start.elapsed() < CHECK {
            thread::sleep(Duration::from_millis(10));
        }
        // let the worker get into the engine
        thread::sleep(Duration::from_millis(100));
        act();
        check.join().unwrap()
    })
}

#[test]
fn test_handshake_and_close() {
    let ctx = Context::new();
    let session = open(&ctx, bounded());
    assert_eq!(session.engine(), "bounded");
    assert_eq!(session.state(), ChannelState::Ready);
    session.close();
    assert_eq!(session.state(), ChannelState::Stopped);
    let p = bool_const(&ctx, "p");
    assert!(matches!(session.assert(&p), Err(Error::SessionClosed)));
}

#[test]
fn test_find_worker_through_environment() {
    std::env::set_var(override_var(WORKER_BIN), env!("CARGO_BIN_EXE_smt-worker"));
    let ctx = Context::new();
    let session = open(&ctx, WorkerConf::worker("bounded"));
    assert_eq!(session.engine(), "bounded");
}

#[test]
fn test_requests_apply_in_order() {
    let ctx = Context::new();
    let session = open(&ctx, bounded());
    let x = int_const(&ctx, "x");

    session
        .assert(&ctx.mk_op(Op::Gt, [x.clone(), ctx.mk_int(3)]).unwrap())
        .unwrap();
    session.push().unwrap();
    session
        .assert(&ctx.mk_op(Op::Lt, [x.clone(), ctx.mk_int(2)]).unwrap())
        .unwrap();
    assert_eq!(session.check_sat(CHECK).unwrap(), SatStatus::Unsat);
    session.pop(1).unwrap();
    assert_eq!(session.check_sat(CHECK).unwrap(), SatStatus::Sat);

    // popping below the base level is an engine error, not a crash
    assert!(matches!(session.pop(1), Err(Error::Remote(_))));
    assert_eq!(session.state(), ChannelState::Ready);
    assert_eq!(session.check_sat(CHECK).unwrap(), SatStatus::Sat);
}

#[test]
fn test_unsat_core_of_assumptions() {
    let ctx = Context::new();
    let session = open(&ctx, bounded());
    let x = int_const(&ctx, "x");
    let big = ctx.mk_op(Op::Gt, [x.clone(), ctx.mk_int(5)]).unwrap();
    let small = ctx.mk_op(Op::Lt, [x.clone(), ctx.mk_int(0)]).unwrap();
    let odd = ctx.mk_op(Op::Distinct, [x.clone(), ctx.mk_int(6)]).unwrap();

    session.assert_and_track(&big).unwrap();
    assert_eq!(
        session
            .check_sat_assuming(&[odd.clone(), small.clone()], CHECK)
            .unwrap(),
        SatStatus::Unsat
    );
    assert_eq!(session.unsat_core().unwrap(), vec![big, small]);
    assert_eq!(
        session.check_sat_assuming(&[odd], CHECK).unwrap(),
        SatStatus::Sat
    );
    assert!(matches!(session.unsat_core(), Err(Error::Remote(_))));
}

#[test]
fn test_timeout_kills_worker() {
    let ctx = Context::new();
    let mut session = open(&ctx, bounded());
    session.set_int_parameter("sleep_ms", 60_000).unwrap();

    let start = Instant::now();
    let err = session
        .check_sat(Duration::from_millis(300))
        .expect_err("a sleeping engine should time out");
    assert!(matches!(err, Error::Timeout(_)), "wrong error {err}");
    assert!(err.is_recoverable());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(session.state(), ChannelState::Crashed);

    let p = bool_const(&ctx, "p");
    assert!(matches!(
        session.assert(&p),
        Err(Error::WorkerTerminated(_))
    ));
}

#[test]
fn test_crash_mid_request() {
    let ctx = Context::new();
    let mut session = open(&ctx, bounded());
    session.set_int_parameter("sleep_ms", 60_000).unwrap();
    let handle = session.handle();

    let err = while_checking(&session, || assert!(handle.kill())).unwrap_err();
    assert!(matches!(err, Error::WorkerTerminated(_)), "wrong error {err}");
    assert_eq!(session.state(), ChannelState::Crashed);
    // the process is gone; signalling it again does nothing
    assert!(!handle.kill());
    assert!(!session.interrupt());
}

#[test]
fn test_interrupt_check() {
    let ctx = Context::new();
    let mut session = open(&ctx, bounded());
    session.set_int_parameter("sleep_ms", 60_000).unwrap();

    let status = while_checking(&session, || assert!(session.interrupt())).unwrap();
    assert_eq!(status, SatStatus::Unknown);
    assert_eq!(session.reason_unknown().unwrap(), "interrupted");

    // the interrupt does not linger into the next check
    session.set_int_parameter("sleep_ms", 0).unwrap();
    assert_eq!(session.check_sat(CHECK).unwrap(), SatStatus::Sat);
    assert!(!session.interrupt());
}

#[test]
fn test_interrupt_between_requests_does_not_linger() {
    let ctx = Context::new();
    let session = open(&ctx, bounded());
    session.assert(&bool_const(&ctx, "p")).unwrap();
    let handle = session.handle();
    for _ in 0..50 {
        let done = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    handle.interrupt();
                }
            });
            for _ in 0..5 {
                session.push().unwrap();
                session.pop(1).unwrap();
            }
            done.store(true, Ordering::Relaxed);
        });
        // no request was in flight for this check, so it runs to the end
        assert_eq!(session.check_sat(CHECK).unwrap(), SatStatus::Sat);
    }
}

#[test]
fn test_deep_term_with_transcript() {
    let dir = env::temp_dir().join(format!("smt-worker-tee-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let ctx = Context::new();
    let session = open(&ctx, bounded().tee(dir.clone()).done());
    let mut e = bool_const(&ctx, "p");
    for _ in 0..200_000 {
        e = ctx.mk_not(&e).unwrap();
    }
    session.assert(&e).unwrap();

    // a crash saves the transcript
    assert!(session.handle().kill());
    assert!(matches!(session.push(), Err(Error::WorkerTerminated(_))));
    let saved = fs::read_dir(&dir)
        .unwrap()
        .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].contains("(assert (not (not (not "));
    assert!(saved[0].contains(" p))))"));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_unsupported_parameter() {
    let ctx = Context::new();
    let mut session = open(&ctx, bounded());
    let err = session.set_double_parameter("int_min", 0.5).unwrap_err();
    insta::assert_display_snapshot!(err, @"unsupported parameter: no parameter int_min of type double");
    assert!(matches!(
        session.set_string_parameter("logic", "QF_LIA"),
        Err(Error::UnsupportedParameter(_))
    ));
    session
        .configure(|conf| {
            conf.set_int_parameter("int_min", 0)?;
            conf.set_int_parameter("int_max", 3)
        })
        .unwrap();
    assert_eq!(session.check_sat(CHECK).unwrap(), SatStatus::Sat);
}

#[test]
fn test_detached_model_survives_close() {
    let ctx = Context::new();
    let session = open(&ctx, bounded());
    let x = int_const(&ctx, "x");
    let y = int_const(&ctx, "y");
    session.assert(&ctx.mk_eq(&x, &ctx.mk_int(5)).unwrap()).unwrap();
    assert_eq!(session.check_sat(CHECK).unwrap(), SatStatus::Sat);

    let mut model = session.model().unwrap();
    let mut lazy = session.model().unwrap();
    assert_eq!(model.eval(&x, true).unwrap(), ctx.mk_int(5));
    let sum = ctx.mk_op(Op::Add, [x.clone(), y.clone()]).unwrap();
    insta::assert_display_snapshot!(model.eval(&sum, false).unwrap(), @"(+ 5 y)");

    let snapshot = model.detach().unwrap();
    session.close();

    let x_decl = x.as_const().unwrap();
    assert_eq!(snapshot.constant(x_decl), Some(&ctx.mk_int(5)));
    assert_eq!(model.detach().unwrap(), snapshot);
    assert!(model.is_detached());
    assert!(matches!(model.eval(&x, true), Err(Error::SessionClosed)));
    assert!(matches!(lazy.eval(&x, true), Err(Error::SessionClosed)));
    assert!(matches!(lazy.detach(), Err(Error::SessionClosed)));
}

#[test]
fn test_model_dropped_while_busy_is_released_later() {
    let dir = env::temp_dir().join(format!("smt-worker-release-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let ctx = Context::new();
    let mut session = open(&ctx, bounded().tee(dir.clone()).done());
    session.assert(&bool_const(&ctx, "p")).unwrap();
    assert_eq!(session.check_sat(CHECK).unwrap(), SatStatus::Sat);
    let model = session.model().unwrap();
    let id = model.id();
    session.set_int_parameter("sleep_ms", 60_000).unwrap();

    let status = while_checking(&session, || {
        drop(model);
        assert!(session.interrupt());
    })
    .unwrap();
    assert_eq!(status, SatStatus::Unknown);
    session.push().unwrap();

    // a crash saves the transcript
    assert!(session.handle().kill());
    assert!(session.pop(1).is_err());
    let saved = fs::read_dir(&dir)
        .unwrap()
        .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(saved.len(), 1);
    let lines = saved[0].lines().collect::<Vec<_>>();
    let release = format!("; release model {id}");
    let at = lines.iter().position(|l| *l == release).unwrap();
    assert_eq!(lines[at + 1], "(push 1)");
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_model_of_uninterpreted_function() {
    let ctx = Context::new();
    let session = open(&ctx, bounded());
    let a = ctx.uninterpreted_sort("A");
    let f = ctx.mk_decl("f", [a.clone()], &ctx.bool_sort()).unwrap();
    let e0 = ctx.mk_uninterpreted_value(&a, 0).unwrap();
    let e1 = ctx.mk_uninterpreted_value(&a, 1).unwrap();
    session.assert(&ctx.mk_app(&f, [e0]).unwrap()).unwrap();
    session
        .assert(&ctx.mk_not(&ctx.mk_app(&f, [e1]).unwrap()).unwrap())
        .unwrap();
    assert_eq!(session.check_sat(CHECK).unwrap(), SatStatus::Sat);

    let mut model = session.model().unwrap();
    assert_eq!(model.declarations(), &[f.clone()]);
    assert_eq!(model.uninterpreted_sorts(), &[a.clone()]);
    let universe = model.uninterpreted_sort_universe(&a).unwrap().unwrap();
    assert_eq!(universe.len(), 2);
    let unused = ctx.uninterpreted_sort("B");
    assert_eq!(model.uninterpreted_sort_universe(&unused).unwrap(), None);
    let snapshot = model.detach().unwrap();
    assert_eq!(snapshot.uninterpreted_sort_universe(&unused), None);
    insta::assert_display_snapshot!(snapshot, @r###"
    ;; universe for A: A!val!0 A!val!1
    (define-fun f ((x!0 A)) Bool (ite (= x!0 A!val!0) true false))
    "###);
}

#[test]
fn test_fork_is_isolated() {
    let ctx = Context::new();
    let mut session = open(&ctx, bounded());
    let a = bool_const(&ctx, "a");
    let b = bool_const(&ctx, "b");
    let c = bool_const(&ctx, "c");
    let x = int_const(&ctx, "x");
    session.set_int_parameter("int_min", 0).unwrap();
    session.set_int_parameter("int_max", 3).unwrap();
    session.assert(&a).unwrap();
    session.push().unwrap();
    session.assert(&b).unwrap();

    let forked = session.fork().wrap_err("could not fork").unwrap();
    assert_ne!(forked.handle().pid(), session.handle().pid());
    session.assert(&c).unwrap();

    // the parent holds {a, b, c}, the fork only {a, b}
    let not_c = ctx.mk_not(&c).unwrap();
    assert_eq!(
        session.check_sat_assuming(&[not_c.clone()], CHECK).unwrap(),
        SatStatus::Unsat
    );
    assert_eq!(
        forked.check_sat_assuming(&[not_c], CHECK).unwrap(),
        SatStatus::Sat
    );

    // the fork has the parent's scopes and parameters
    forked.pop(1).unwrap();
    let not_b = ctx.mk_not(&b).unwrap();
    assert_eq!(
        forked.check_sat_assuming(&[not_b.clone()], CHECK).unwrap(),
        SatStatus::Sat
    );
    let beyond = ctx.mk_op(Op::Gt, [x, ctx.mk_int(5)]).unwrap();
    assert_eq!(
        forked.check_sat_assuming(&[beyond], CHECK).unwrap(),
        SatStatus::Unsat
    );
    assert_eq!(
        session.check_sat_assuming(&[not_b], CHECK).unwrap(),
        SatStatus::Unsat
    );
}
