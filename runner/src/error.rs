// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Errors from talking to a worker.

use std::{io, time::Duration};

use thiserror::Error;

/// An error from serializing, transporting or executing a request.
///
/// The variants fall into three groups (see [`Error::is_fatal`] and
/// [`Error::is_recoverable`]): desynchronization of the two sides, which
/// always ends the session; loss of the worker, after which the caller may
/// open a fresh session; and ordinary per-request failures, after which the
/// session keeps working.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O went wrong on the pipe to the worker
    #[error("some I/O went wrong: {0}")]
    Io(#[from] io::Error),
    /// The byte stream does not follow the protocol (forward reference,
    /// unterminated entry, conflicting index, unknown tag, ...)
    #[error("corrupted stream: {0}")]
    Corrupt(String),
    /// The encoder tried to give a second index to an already indexed node
    #[error("serialization failed: duplicate ast {0}")]
    DuplicateAst(String),
    /// A node from a foreign context was passed to a bound session
    #[error("node belongs to context {found}, session is bound to context {expected}")]
    ContextMismatch {
        /// Context the session is bound to
        expected: u64,
        /// Context of the rejected node
        found: u64,
    },
    /// Registry used before [`bind`](crate::registry::Registry::bind)
    #[error("serialization context is not initialized")]
    Unbound,
    /// Registry bound twice
    #[error("serialization context is already initialized")]
    AlreadyBound,
    /// A frame is larger than the configured limit
    #[error("frame of {len} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge {
        /// Size of the offending frame
        len: usize,
        /// Configured limit
        max: usize,
    },
    /// The worker did not answer the handshake correctly
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The worker did not respond before the deadline and was killed
    #[error("worker did not respond within {0:?} and was killed")]
    Timeout(Duration),
    /// The worker process is gone
    #[error("worker terminated: {0}")]
    WorkerTerminated(String),
    /// The session or channel was already shut down
    #[error("session is closed")]
    SessionClosed,
    /// The engine does not know a parameter, or not with this value type
    #[error("unsupported parameter: {0}")]
    UnsupportedParameter(String),
    /// The engine rejected an otherwise well-formed request
    #[error("worker failed to execute request: {0}")]
    Remote(String),
}

/// Result type for the runner.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors that mean the caller and the worker no longer agree on the
    /// stream; the channel is torn down and never resynchronized.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Corrupt(_)
                | Error::DuplicateAst(_)
                | Error::FrameTooLarge { .. }
                | Error::Handshake(_)
                | Error::Io(_)
        )
    }

    /// Errors after which the session is unusable but a new one may be
    /// opened. These are never retried internally.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::WorkerTerminated(_) | Error::SessionClosed
        )
    }

    pub(crate) fn corrupt<S: Into<String>>(msg: S) -> Self {
        Error::Corrupt(msg.into())
    }
}
