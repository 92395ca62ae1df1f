// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The smt-worker binary's command-line interface.
//!
//! A worker hosts one engine and serves the runner protocol on its standard
//! input and output until it is told to shut down or its input closes. Logs
//! go to standard error. `SIGINT` asks the engine to abandon the current
//! check instead of terminating the process.

#![deny(missing_docs)]
// configure clippy
#![allow(clippy::needless_return)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::type_complexity)]
#![deny(clippy::uninlined_format_args)]
// documentation-related lints (only checked when running rustdoc)
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::{
    io,
    sync::{atomic::AtomicBool, Arc},
};

use ast::Context;
use bounded::BoundedEngine;
use runner::{frame::DEFAULT_MAX_FRAME_BYTES, worker::serve};
use signal_hook::consts::SIGINT;

#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum EngineType {
    /// Exhaustive search over bounded interpretations
    Bounded,
}

#[derive(clap::Parser, Debug)]
#[command(about, long_about=None)]
/// Entrypoint for the smt-worker binary.
pub struct App {
    #[arg(value_enum, long, default_value_t = EngineType::Bounded)]
    /// Engine to host
    engine: EngineType,

    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    /// Largest frame accepted or sent, in bytes
    max_frame_bytes: usize,
}

impl App {
    /// Serve requests on stdin and stdout until shutdown.
    pub fn exec(self) -> runner::Result<()> {
        let interrupted = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGINT, Arc::clone(&interrupted))?;

        let ctx = Context::new();
        let engine = match self.engine {
            EngineType::Bounded => BoundedEngine::new(&ctx),
        };
        serve(
            engine,
            &ctx,
            io::stdin().lock(),
            io::stdout().lock(),
            &interrupted,
            self.max_frame_bytes,
        )?;
        log::info!("worker exiting");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{App, EngineType};

    #[test]
    fn test_parse_args() {
        let app = App::parse_from(["smt-worker", "--max-frame-bytes", "1024"]);
        assert_eq!(app.engine, EngineType::Bounded);
        assert_eq!(app.max_frame_bytes, 1024);
        assert!(App::try_parse_from(["smt-worker", "--engine", "z3"]).is_err());
    }
}
