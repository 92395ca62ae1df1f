// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Manage a running worker process.
//!
//! A [`Channel`] spawns one worker, owns the registry used to talk to it and
//! runs requests one at a time. Deadlines are enforced by a reader thread
//! that moves frames from the worker's stdout into a queue, so the caller can
//! wait with a timeout and kill the worker when it expires. A
//! [`WorkerHandle`] can signal the process from other threads without
//! waiting for the request in flight.

use std::{
    ffi::OsStr,
    io::BufReader,
    path::PathBuf,
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use ast::{Ast, Context};
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};

use crate::{
    conf::WorkerConf,
    frame::{check_hello, hello, read_frame, write_frame},
    journal::Journal,
    protocol::{decode_response, encode_request, ModelId, Request, Response},
    registry::Registry,
    tee::Tee,
    Error, Result,
};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long to wait for the exit status of a worker that closed its output.
const EXIT_POLL: Duration = Duration::from_millis(200);

/// The states a channel can be in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Not started yet.
    Created,
    /// Spawned, handshake in progress.
    Starting,
    /// Idle and usable.
    Ready,
    /// A request is in flight.
    Busy,
    /// Shutting down.
    Stopping,
    /// Shut down in an orderly way; the process has been reaped.
    Stopped,
    /// The worker died, was killed or desynchronized. Nothing leaves this
    /// state.
    Crashed,
}

impl ChannelState {
    /// Is the channel finished for good?
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Stopped | ChannelState::Crashed)
    }

    /// Can the process still be signalled? Channels move to a terminal
    /// state before reaping, so this is false once the pid may be reused.
    fn is_live(self) -> bool {
        matches!(
            self,
            ChannelState::Starting
                | ChannelState::Ready
                | ChannelState::Busy
                | ChannelState::Stopping
        )
    }
}

/// A connection to one worker process.
#[derive(Debug)]
pub struct Channel {
    conf: WorkerConf,
    state: Arc<Mutex<ChannelState>>,
    child: Option<Child>,
    pid: Option<Pid>,
    stdin: Option<ChildStdin>,
    frames: Option<Receiver<Result<Vec<u8>>>>,
    reader: Option<JoinHandle<()>>,
    registry: Registry,
    journal: Journal,
    engine: String,
    crash: Option<String>,
    tee: Option<Tee>,
    orphans: Arc<Mutex<Vec<ModelId>>>,
}

/// A handle to a worker process for cancelling the request in flight.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pid: Pid,
    state: Arc<Mutex<ChannelState>>,
}

// =============================
// State-machine related code
// =============================

impl Drop for Channel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WorkerHandle {
    /// The worker's process id.
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// The current state of the channel.
    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    /// Ask the worker to abandon the request in flight. The worker answers
    /// it early (typically with `unknown`) and stays usable.
    ///
    /// Returns whether a signal was sent; nothing is sent unless a request
    /// is in flight.
    pub fn interrupt(&self) -> bool {
        let state = self.state.lock().unwrap();
        if *state != ChannelState::Busy {
            return false;
        }
        self.signal(Signal::SIGINT)
    }

    /// Kill the worker. The channel notices on its next receive and becomes
    /// [`ChannelState::Crashed`].
    pub fn kill(&self) -> bool {
        let state = self.state.lock().unwrap();
        if !state.is_live() {
            return false;
        }
        self.signal(Signal::SIGKILL)
    }

    fn signal(&self, sig: Signal) -> bool {
        match signal::kill(self.pid, sig) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(errno) => {
                log::warn!("sending {sig:?} to worker {} failed with {errno}", self.pid);
                false
            }
        }
    }
}

fn read_frames(stdout: ChildStdout, frames: Sender<Result<Vec<u8>>>, max_len: usize) {
    let mut stdout = BufReader::new(stdout);
    loop {
        match read_frame(&mut stdout, max_len) {
            Ok(Some(frame)) => {
                if frames.send(Ok(frame)).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                _ = frames.send(Err(err));
                return;
            }
        }
    }
}

impl Channel {
    /// A channel that will run the worker described by `conf`.
    pub fn new(conf: WorkerConf) -> Self {
        Self {
            conf,
            state: Arc::new(Mutex::new(ChannelState::Created)),
            child: None,
            pid: None,
            stdin: None,
            frames: None,
            reader: None,
            registry: Registry::new(),
            journal: Journal::default(),
            engine: String::new(),
            crash: None,
            tee: None,
            orphans: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Create and start a channel.
    pub fn spawn(ctx: &Context, conf: WorkerConf) -> Result<Self> {
        let mut channel = Self::new(conf);
        channel.start(ctx)?;
        Ok(channel)
    }

    /// The current state.
    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, new: ChannelState) {
        *self.state.lock().unwrap() = new;
    }

    /// The configuration the worker was launched with.
    pub fn conf(&self) -> &WorkerConf {
        &self.conf
    }

    /// Name of the engine the worker reported in the handshake.
    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// The channel's registry, for inspection.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of scopes pushed and not yet popped.
    pub fn scope_levels(&self) -> usize {
        self.journal.levels()
    }

    /// A handle for signalling the worker, once it has been spawned.
    pub fn handle(&self) -> Option<WorkerHandle> {
        self.pid.map(|pid| WorkerHandle {
            pid,
            state: self.state.clone(),
        })
    }

    /// Models dropped while the channel was in use. They are released
    /// before the next request.
    pub(crate) fn orphans(&self) -> Arc<Mutex<Vec<ModelId>>> {
        self.orphans.clone()
    }

    fn release_orphans(&mut self) {
        let orphans = std::mem::take(&mut *self.orphans.lock().unwrap());
        for id in orphans {
            let deadline = self.conf.request_timeout;
            match self.send_now(&Request::ReleaseModel(id), deadline) {
                Ok(Response::Failure(failure)) => {
                    log::debug!("could not release model {id}: {}", failure.message)
                }
                Ok(_) => log::debug!("released model {id}"),
                Err(err) => {
                    log::debug!("could not release model {id}: {err}");
                    return;
                }
            }
        }
    }

    fn crash_reason(&self) -> String {
        self.crash
            .clone()
            .unwrap_or_else(|| "worker crashed".to_string())
    }

    /// Spawn the worker, bind the registry to `ctx` and perform the
    /// handshake.
    pub fn start(&mut self, ctx: &Context) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ChannelState::Created => *state = ChannelState::Starting,
                ChannelState::Stopped | ChannelState::Crashed => return Err(Error::SessionClosed),
                _ => return Err(Error::AlreadyBound),
            }
        }
        match self.launch(ctx) {
            Ok(()) => {
                self.set_state(ChannelState::Ready);
                log::info!(
                    "started worker {} running {}",
                    self.pid.map(|p| p.as_raw()).unwrap_or_default(),
                    self.engine
                );
                Ok(())
            }
            Err(err) => {
                self.crash(format!("could not start {}: {err}", self.conf.cmdline()));
                Err(err)
            }
        }
    }

    fn launch(&mut self, ctx: &Context) -> Result<()> {
        log::debug!("launching {}", self.conf.cmdline());
        let child = Command::new(OsStr::new(&self.conf.cmd))
            .args(self.conf.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let pid = i32::try_from(child.id())
            .map_err(|_| Error::Handshake(format!("pid {} out of range", child.id())))?;
        let child = self.child.insert(child);
        self.pid = Some(Pid::from_raw(pid));
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(Error::Handshake("worker pipes are not available".to_string()));
        };
        self.stdin = Some(stdin);
        let (send, recv) = mpsc::channel();
        let max_len = self.conf.max_frame_bytes;
        self.reader = Some(
            thread::Builder::new()
                .name(format!("worker-{pid}"))
                .spawn(move || read_frames(stdout, send, max_len))?,
        );
        self.frames = Some(recv);
        self.registry.bind(ctx)?;
        if let Some(dir) = &self.conf.tee {
            let mut tee = Tee::new(dir);
            tee.comment(&self.conf.cmdline());
            self.tee = Some(tee);
        }

        self.write(&hello())?;
        let reply = self.receive(self.conf.startup_timeout)?;
        self.engine = check_hello(&reply)?;
        Ok(())
    }

    /// Move from `Ready` to `Busy`, noticing a worker that exited while idle.
    fn begin(&mut self) -> Result<()> {
        let state_m = self.state.clone();
        let mut state = state_m.lock().unwrap();
        match *state {
            ChannelState::Ready => {}
            ChannelState::Crashed => return Err(Error::WorkerTerminated(self.crash_reason())),
            _ => return Err(Error::SessionClosed),
        }
        if let Some(child) = self.child.as_mut() {
            // reaping while holding the lock keeps handles from signalling a
            // reused pid
            if let Some(status) = child.try_wait()? {
                *state = ChannelState::Crashed;
                drop(state);
                let reason = format!("worker exited ({status})");
                self.crash(reason.clone());
                return Err(Error::WorkerTerminated(reason));
            }
        }
        *state = ChannelState::Busy;
        Ok(())
    }

    /// Run one request and wait up to `deadline` for its response.
    ///
    /// Failures reported by the worker come back as
    /// [`Response::Failure`]; see [`Channel::call`] to turn them into
    /// errors. Transport errors tear the channel down, except for a context
    /// mismatch, which is detected before anything is sent.
    pub fn send(&mut self, request: &Request<Ast>, deadline: Duration) -> Result<Response<Ast>> {
        if self.state() == ChannelState::Ready {
            self.release_orphans();
        }
        self.send_now(request, deadline)
    }

    fn send_now(&mut self, request: &Request<Ast>, deadline: Duration) -> Result<Response<Ast>> {
        self.begin()?;
        let result = self.exchange(request, deadline);
        match &result {
            Ok(response) => {
                if matches!(response, Response::Done) && request.is_stateful() {
                    self.journal.record(request);
                }
                self.set_state(ChannelState::Ready);
            }
            Err(err) if err.is_fatal() || err.is_recoverable() => self.crash(err.to_string()),
            Err(_) => self.set_state(ChannelState::Ready),
        }
        result
    }

    /// Like [`Channel::send`], but a failure reported by the worker is an
    /// error.
    pub fn call(&mut self, request: &Request<Ast>, deadline: Duration) -> Result<Response<Ast>> {
        match self.send(request, deadline)? {
            Response::Failure(failure) => Err(failure.into_error()),
            response => Ok(response),
        }
    }

    fn exchange(&mut self, request: &Request<Ast>, deadline: Duration) -> Result<Response<Ast>> {
        // reject foreign nodes before any of the request is indexed
        request.try_map(&mut |ast| self.registry.ensure_context_match(ast))?;
        let bytes = encode_request(&mut self.registry, request)?;
        if let Some(tee) = &mut self.tee {
            tee.append(request.to_string());
        }
        self.write(&bytes)?;
        let reply = self.receive(deadline)?;
        decode_response(&mut self.registry, &reply)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(Error::SessionClosed)?;
        match write_frame(stdin, bytes, self.conf.max_frame_bytes) {
            Err(err) if crate::frame::is_broken_pipe(&err) => Err(Error::WorkerTerminated(
                "worker closed its input".to_string(),
            )),
            other => other,
        }
    }

    fn receive(&mut self, deadline: Duration) -> Result<Vec<u8>> {
        let frames = self.frames.as_ref().ok_or(Error::SessionClosed)?;
        match frames.recv_timeout(deadline) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(deadline)),
            Err(RecvTimeoutError::Disconnected) => Err(self.terminated()),
        }
    }

    /// The worker closed its output. Mark the channel crashed and wait
    /// briefly to learn how the worker exited.
    fn terminated(&mut self) -> Error {
        self.set_state(ChannelState::Crashed);
        let mut reason = "worker closed its output".to_string();
        if let Some(child) = self.child.as_mut() {
            let deadline = Instant::now() + EXIT_POLL;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        reason = format!("worker exited ({status})");
                        break;
                    }
                    Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                    _ => break,
                }
            }
        }
        Error::WorkerTerminated(reason)
    }

    fn crash(&mut self, reason: String) {
        self.set_state(ChannelState::Crashed);
        log::warn!("worker channel crashed: {reason}");
        if let Some(tee) = &mut self.tee {
            tee.comment(&reason);
        }
        if let Some(fname) = self.save_tee() {
            log::info!("saved transcript to {}", fname.display());
        }
        if self.crash.is_none() {
            self.crash = Some(reason);
        }
        self.release();
    }

    /// Kill and reap the process, stop the reader and unbind the registry.
    /// Callers move to a terminal state first.
    fn release(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            _ = child.kill();
            _ = child.wait();
        }
        self.frames = None;
        if let Some(reader) = self.reader.take() {
            _ = reader.join();
        }
        self.registry.unbind();
    }

    /// Reap the worker if it exited, moving to `Stopped` in the same
    /// critical section.
    fn reap_if_exited(&mut self) -> bool {
        let state_m = self.state.clone();
        let mut state = state_m.lock().unwrap();
        let Some(child) = self.child.as_mut() else {
            *state = ChannelState::Stopped;
            return true;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("worker exited ({status})");
                *state = ChannelState::Stopped;
                true
            }
            Ok(None) => false,
            Err(_) => {
                *state = ChannelState::Stopped;
                true
            }
        }
    }

    /// Shut the worker down: ask it to exit, give it the grace period and
    /// then kill it. A crashed channel is only cleaned up. Safe to call
    /// repeatedly.
    pub fn stop(&mut self) {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ChannelState::Stopped => return,
                ChannelState::Created => {
                    *state = ChannelState::Stopped;
                    return;
                }
                ChannelState::Crashed => {}
                _ => *state = ChannelState::Stopping,
            }
        }
        if self.state() == ChannelState::Crashed {
            self.release();
            return;
        }

        if let Ok(bytes) = encode_request(&mut self.registry, &Request::Shutdown) {
            _ = self.write(&bytes);
        }
        self.stdin = None;
        let deadline = Instant::now() + self.conf.shutdown_grace;
        let exited = loop {
            if self.reap_if_exited() {
                break true;
            }
            if Instant::now() >= deadline {
                break false;
            }
            thread::sleep(POLL_INTERVAL);
        };
        if !exited {
            log::warn!(
                "worker did not exit within {:?}, killing it",
                self.conf.shutdown_grace
            );
            self.set_state(ChannelState::Stopped);
        }
        self.release();
        log::info!("stopped worker running {}", self.engine);
    }

    /// Start a new worker with the same configuration, parameters and
    /// assertion scopes as this one. The two channels are independent from
    /// then on.
    pub fn fork(&mut self) -> Result<Channel> {
        match self.state() {
            ChannelState::Ready => {}
            ChannelState::Crashed => return Err(Error::WorkerTerminated(self.crash_reason())),
            _ => return Err(Error::SessionClosed),
        }
        let ctx = self.registry.context()?.clone();
        let mut forked = Channel::spawn(&ctx, self.conf.clone())?;
        let replay = self.journal.replay();
        if !matches!(&replay, Request::Batch(requests) if requests.is_empty()) {
            forked
                .call(&replay, self.conf.request_timeout)?
                .into_done()?;
        }
        log::debug!(
            "forked worker with {} open scopes",
            forked.journal.levels()
        );
        Ok(forked)
    }

    /// Save the transcript, if there is one. Returns the name of the created
    /// file.
    pub fn save_tee(&self) -> Option<PathBuf> {
        self.tee.as_ref().and_then(|tee| match tee.save() {
            Ok(name) => {
                log::debug!("transcript {} holds {} requests", name.display(), tee.requests());
                Some(name)
            }
            Err(err) => {
                // not fatal
                log::warn!("failed to save transcript: {err}");
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use ast::Context;
    use nix::{errno::Errno, sys::signal, unistd::Pid};

    use super::{Channel, ChannelState};
    use crate::{conf::WorkerConf, protocol::Request, Error};

    /// Consume the caller's hello and acknowledge it as engine `sh`.
    const HANDSHAKE: &str = r"head -c 12 >/dev/null; printf '\012\000\000\000SMTW\001\000\000\000sh'";

    fn sh(script: &str) -> WorkerConf {
        // the frame limit flag lands in $0 and $1 of the script
        WorkerConf::new("sh")
            .args(["-c", script])
            .startup_timeout(Duration::from_millis(500))
            .shutdown_grace(Duration::from_millis(100))
            .done()
    }

    #[test]
    fn test_missing_binary() {
        let ctx = Context::new();
        let mut channel = Channel::new(WorkerConf::new("/nonexistent/smt-worker"));
        assert!(matches!(channel.start(&ctx), Err(Error::Io(_))));
        assert_eq!(channel.state(), ChannelState::Crashed);
        assert!(!channel.registry().is_bound());
        channel.stop();
        assert_eq!(channel.state(), ChannelState::Crashed);
    }

    #[test]
    fn test_worker_exits_during_handshake() {
        let ctx = Context::new();
        let mut channel = Channel::new(sh("exit 3"));
        let err = channel.start(&ctx).unwrap_err();
        assert!(
            matches!(err, Error::WorkerTerminated(_)),
            "wrong error {err}"
        );
        assert_eq!(channel.state(), ChannelState::Crashed);
        assert!(channel.handle().unwrap().state().is_terminal());
        assert!(!channel.handle().unwrap().kill());
    }

    #[test]
    fn test_handshake_version_mismatch() {
        let ctx = Context::new();
        let mut channel = Channel::new(sh(
            r"printf '\010\000\000\000SMTW\002\000\000\000'; exec sleep 5",
        ));
        let start = Instant::now();
        assert!(matches!(channel.start(&ctx), Err(Error::Handshake(_))));
        assert_eq!(channel.state(), ChannelState::Crashed);
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_startup_timeout_kills_worker() {
        let ctx = Context::new();
        let mut channel = Channel::new(sh("exec sleep 10"));
        let start = Instant::now();
        assert!(matches!(channel.start(&ctx), Err(Error::Timeout(_))));
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(channel.state(), ChannelState::Crashed);
        // later sends report the crash
        assert!(matches!(
            channel.send(&Request::Push, Duration::from_secs(1)),
            Err(Error::WorkerTerminated(_))
        ));
    }

    #[test]
    fn test_unstarted_channel() {
        let mut channel = Channel::new(WorkerConf::new("smt-worker"));
        assert!(channel.handle().is_none());
        assert!(matches!(
            channel.send(&Request::Push, Duration::from_secs(1)),
            Err(Error::SessionClosed)
        ));
        channel.stop();
        assert_eq!(channel.state(), ChannelState::Stopped);
        assert!(matches!(
            channel.start(&Context::new()),
            Err(Error::SessionClosed)
        ));
    }

    #[test]
    fn test_worker_exits_while_idle() {
        let ctx = Context::new();
        let mut channel = Channel::spawn(&ctx, sh(&format!("{HANDSHAKE}; exit 4"))).unwrap();
        assert_eq!(channel.engine(), "sh");
        assert_eq!(channel.state(), ChannelState::Ready);
        thread::sleep(Duration::from_millis(300));

        let err = channel
            .send(&Request::Push, Duration::from_secs(1))
            .unwrap_err();
        assert!(
            matches!(err, Error::WorkerTerminated(_)),
            "wrong error {err}"
        );
        assert_eq!(channel.state(), ChannelState::Crashed);
        assert!(matches!(
            channel.send(&Request::Push, Duration::from_secs(1)),
            Err(Error::WorkerTerminated(_))
        ));
    }

    #[test]
    fn test_stop_kills_worker_ignoring_shutdown() {
        let ctx = Context::new();
        let mut channel =
            Channel::spawn(&ctx, sh(&format!("{HANDSHAKE}; trap '' INT TERM; exec sleep 30")))
                .unwrap();
        let pid = channel.handle().unwrap().pid();

        let start = Instant::now();
        channel.stop();
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(channel.state(), ChannelState::Stopped);
        assert_eq!(signal::kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
        assert!(!channel.handle().unwrap().kill());
    }
}
