// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Worker launch configuration and solver parameters.
//!
//! [`WorkerConf`] says how to start a worker process and how patient to be
//! with it. Solver parameters go through [`SolverConfiguration`]; besides a
//! live session there are two offline implementations:
//! [`UniversalConfigurationBuilder`] records parameters for a backend chosen
//! later, and [`ForkingConfiguration`] snapshots applied parameters so a
//! forked worker can be configured identically.

use std::{collections::BTreeMap, fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    frame::DEFAULT_MAX_FRAME_BYTES,
    path::{worker_path, WORKER_BIN},
    Result,
};

/// How to launch a worker and the deadlines applied to it.
#[derive(Debug, Clone)]
pub struct WorkerConf {
    /// Binary to launch
    pub cmd: String,
    /// Arguments to pass
    pub args: Vec<String>,
    /// Deadline for ordinary requests
    pub request_timeout: Duration,
    /// Deadline for the handshake after spawning
    pub startup_timeout: Duration,
    /// How long a stopping worker may take to exit before it is killed
    pub shutdown_grace: Duration,
    /// Largest frame either side may send; passed on to the worker
    pub max_frame_bytes: usize,
    /// Directory to save request transcripts to, for debugging
    pub tee: Option<PathBuf>,
}

impl WorkerConf {
    /// Configuration for running `cmd` with default deadlines.
    pub fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            args: vec![],
            request_timeout: Duration::from_secs(60),
            startup_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(1),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            tee: None,
        }
    }

    /// Configuration for the `smt-worker` binary found by
    /// [`worker_path`](crate::path::worker_path), hosting `engine`.
    pub fn worker(engine: &str) -> Self {
        Self::new(&worker_path(WORKER_BIN)).engine(engine).done()
    }

    /// Append command-line arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        return self;
    }

    /// Select the engine the worker should host.
    pub fn engine(&mut self, name: &str) -> &mut Self {
        self.args(["--engine", name])
    }

    /// Set the deadline for ordinary requests.
    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request_timeout = timeout;
        return self;
    }

    /// Set the deadline for the handshake.
    pub fn startup_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.startup_timeout = timeout;
        return self;
    }

    /// Set the grace period for a polite shutdown.
    pub fn shutdown_grace(&mut self, grace: Duration) -> &mut Self {
        self.shutdown_grace = grace;
        return self;
    }

    /// Set the frame size limit for both directions.
    pub fn max_frame_bytes(&mut self, max: usize) -> &mut Self {
        self.max_frame_bytes = max;
        return self;
    }

    /// Save request transcripts into `dir`.
    pub fn tee<P: Into<PathBuf>>(&mut self, dir: P) -> &mut Self {
        self.tee = Some(dir.into());
        return self;
    }

    /// Finish building.
    pub fn done(&mut self) -> Self {
        self.clone()
    }

    /// The full argument list, including the frame limit.
    pub(crate) fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--max-frame-bytes".to_string());
        args.push(self.max_frame_bytes.to_string());
        args
    }

    /// Build the command line string, for printing purposes.
    pub fn cmdline(&self) -> String {
        let args: Vec<_> = self
            .command_args()
            .into_iter()
            .map(|a| if a.contains(' ') { format!("\"{a}\"") } else { a })
            .collect();
        format!("{} {}", &self.cmd, args.join(" "))
    }
}

/// The value of a solver parameter.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i64),
    Str(String),
    Bool(bool),
    Double(f64),
}

impl ParamValue {
    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Int(_) => "int",
            ParamValue::Str(_) => "string",
            ParamValue::Bool(_) => "bool",
            ParamValue::Double(_) => "double",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Str(s) => write!(f, "\"{s}\""),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Double(d) => write!(f, "{d:?}"),
        }
    }
}

/// Something that accepts solver parameters.
///
/// Every setter fails with [`Error::UnsupportedParameter`](crate::Error::UnsupportedParameter)
/// if the backend does not know the parameter or not with that type.
pub trait SolverConfiguration {
    /// Set a parameter to a value of any type.
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<()>;

    /// Set an integer parameter.
    fn set_int_parameter(&mut self, name: &str, value: i64) -> Result<()> {
        self.set_parameter(name, ParamValue::Int(value))
    }

    /// Set a string parameter.
    fn set_string_parameter(&mut self, name: &str, value: &str) -> Result<()> {
        self.set_parameter(name, ParamValue::Str(value.to_string()))
    }

    /// Set a boolean parameter.
    fn set_bool_parameter(&mut self, name: &str, value: bool) -> Result<()> {
        self.set_parameter(name, ParamValue::Bool(value))
    }

    /// Set a floating-point parameter.
    fn set_double_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        self.set_parameter(name, ParamValue::Double(value))
    }
}

/// Parameters recorded now and realized later against whichever backend ends
/// up being used. Recording never fails; validation happens in
/// [`UniversalConfigurationBuilder::realize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniversalConfigurationBuilder {
    params: Vec<(String, ParamValue)>,
}

impl UniversalConfigurationBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded parameters, in the order they were set.
    pub fn params(&self) -> &[(String, ParamValue)] {
        &self.params
    }

    /// Apply every recorded parameter to `target`, stopping at the first one
    /// it rejects.
    pub fn realize(&self, target: &mut dyn SolverConfiguration) -> Result<()> {
        for (name, value) in &self.params {
            target.set_parameter(name, value.clone())?;
        }
        Ok(())
    }
}

impl SolverConfiguration for UniversalConfigurationBuilder {
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<()> {
        self.params.push((name.to_string(), value));
        Ok(())
    }
}

/// A snapshot of every parameter successfully applied to a worker, replayed
/// when the worker is forked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForkingConfiguration {
    params: BTreeMap<String, ParamValue>,
}

impl ForkingConfiguration {
    /// Remember that `name` now has `value`.
    pub fn record(&mut self, name: &str, value: &ParamValue) {
        self.params.insert(name.to_string(), value.clone());
    }

    /// The current value of every parameter that was set.
    pub fn params(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Apply the snapshot to `target`.
    pub fn replay(&self, target: &mut dyn SolverConfiguration) -> Result<()> {
        for (name, value) in &self.params {
            target.set_parameter(name, value.clone())?;
        }
        Ok(())
    }
}
