// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Solver sessions: solver operations on top of a worker channel.
//!
//! A [`Session`] may be shared between threads. Operations take the
//! session's lock for their whole round trip, so they reach the worker in
//! the order they were issued, one at a time. [`Session::interrupt`] does not
//! take the lock and can cancel a check running on another thread.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use ast::{Ast, Context, Expr};

use crate::{
    channel::{Channel, ChannelState, WorkerHandle},
    conf::{ParamValue, SolverConfiguration, WorkerConf},
    model::RemoteModel,
    protocol::{Request, Response, SatStatus},
    Error, Result,
};

/// A solver running in a worker process.
pub struct Session {
    ctx: Context,
    channel: Arc<Mutex<Channel>>,
    handle: WorkerHandle,
}

/// Parameter access to a locked session; see [`Session::configure`].
pub struct SessionConfiguration<'s> {
    channel: &'s mut Channel,
}

impl SolverConfiguration for SessionConfiguration<'_> {
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<()> {
        let deadline = self.channel.conf().request_timeout;
        self.channel
            .call(
                &Request::Configure {
                    name: name.to_string(),
                    value,
                },
                deadline,
            )?
            .into_done()
    }
}

impl SolverConfiguration for Session {
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<()> {
        self.configure(|conf| conf.set_parameter(name, value))
    }
}

fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

impl Session {
    /// Start a worker for `ctx`.
    pub fn open(ctx: &Context, conf: WorkerConf) -> Result<Self> {
        let channel = Channel::spawn(ctx, conf)?;
        Self::from_channel(ctx, channel)
    }

    fn from_channel(ctx: &Context, channel: Channel) -> Result<Self> {
        let handle = channel.handle().ok_or(Error::SessionClosed)?;
        Ok(Self {
            ctx: ctx.clone(),
            channel: Arc::new(Mutex::new(channel)),
            handle,
        })
    }

    /// The context this session accepts nodes from.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The engine hosted by the worker.
    pub fn engine(&self) -> String {
        self.lock().engine().to_string()
    }

    /// The state of the underlying channel.
    pub fn state(&self) -> ChannelState {
        self.handle.state()
    }

    /// A handle to signal the worker without going through the session.
    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Channel> {
        self.channel.lock().unwrap()
    }

    fn call(&self, request: Request<Ast>) -> Result<Response<Ast>> {
        let mut channel = self.lock();
        let deadline = channel.conf().request_timeout;
        channel.call(&request, deadline)
    }

    /// Set several parameters in one critical section.
    pub fn configure<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut SessionConfiguration<'_>) -> Result<()>,
    {
        let mut channel = self.lock();
        f(&mut SessionConfiguration {
            channel: &mut *channel,
        })
    }

    /// Add an assertion to the current scope.
    pub fn assert(&self, expr: &Expr) -> Result<()> {
        self.call(Request::Assert(expr.into()))?.into_done()
    }

    /// Add an assertion that can appear in [`Session::unsat_core`].
    pub fn assert_and_track(&self, expr: &Expr) -> Result<()> {
        self.call(Request::AssertAndTrack(expr.into()))?.into_done()
    }

    /// Open a scope.
    pub fn push(&self) -> Result<()> {
        self.call(Request::Push)?.into_done()
    }

    /// Close `levels` scopes. Popping more scopes than are open fails and
    /// leaves the session usable.
    pub fn pop(&self, levels: u32) -> Result<()> {
        self.call(Request::Pop(levels))?.into_done()
    }

    /// Check the current assertions. If the worker takes longer than
    /// `timeout` it is killed, the session crashes and this returns
    /// [`Error::Timeout`].
    pub fn check_sat(&self, timeout: Duration) -> Result<SatStatus> {
        self.check_sat_assuming(&[], timeout)
    }

    /// Check the current assertions together with `assumptions`.
    pub fn check_sat_assuming(&self, assumptions: &[Expr], timeout: Duration) -> Result<SatStatus> {
        let request = Request::CheckSat {
            assumptions: assumptions.iter().map(Ast::from).collect(),
            timeout_ms: Some(millis(timeout)),
        };
        let status = self.lock().call(&request, timeout)?.into_status()?;
        log::debug!("check-sat: {status}");
        Ok(status)
    }

    /// The model of the last check, which must have been `sat`.
    pub fn model(&self) -> Result<RemoteModel> {
        let mut channel = self.lock();
        let deadline = channel.conf().request_timeout;
        let (id, declarations, sorts) = channel.call(&Request::Model, deadline)?.into_model()?;
        Ok(RemoteModel::new(
            self.channel.clone(),
            id,
            declarations,
            sorts,
            channel.orphans(),
        ))
    }

    /// Tracked assertions and assumptions explaining the last `unsat`.
    pub fn unsat_core(&self) -> Result<Vec<Expr>> {
        self.call(Request::UnsatCore)?.into_exprs()
    }

    /// Why the last check returned `unknown`.
    pub fn reason_unknown(&self) -> Result<String> {
        self.call(Request::ReasonUnknown)?.into_reason()
    }

    /// Ask the worker to abandon the check in flight; see
    /// [`WorkerHandle::interrupt`].
    pub fn interrupt(&self) -> bool {
        self.handle.interrupt()
    }

    /// A new session with its own worker, starting from this session's
    /// parameters and assertions.
    pub fn fork(&self) -> Result<Session> {
        let forked = self.lock().fork()?;
        Self::from_channel(&self.ctx, forked)
    }

    /// Stop the worker. Models obtained from this session can no longer be
    /// queried, but detached snapshots remain valid.
    pub fn close(&self) {
        self.lock().stop();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(mut channel) = self.channel.lock() {
            channel.stop();
        }
    }
}
