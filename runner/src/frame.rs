// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Length-prefixed frames on a byte pipe.
//!
//! Each frame is a little-endian `u32` length followed by that many bytes.
//! The first frame in each direction is the handshake.

use std::io::{ErrorKind, Read, Write};

use crate::{codec::put_u32, Error, Result};

/// Magic bytes opening both handshake frames.
pub const MAGIC: [u8; 4] = *b"SMTW";

/// Version of the request/response protocol. Both sides must agree exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default upper bound on the size of one frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// Write one frame and flush.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8], max_len: usize) -> Result<()> {
    if payload.len() > max_len || payload.len() > u32::MAX as usize {
        return Err(Error::FrameTooLarge {
            len: payload.len(),
            max: max_len,
        });
    }
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on a clean end of file before the
/// frame starts.
pub fn read_frame<R: Read>(r: &mut R, max_len: usize) -> Result<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    match r.read_exact(&mut len) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(Error::from(err)),
    }
    let len = u32::from_le_bytes(len) as usize;
    if len > max_len {
        return Err(Error::FrameTooLarge { len, max: max_len });
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            Error::corrupt("pipe closed in the middle of a frame")
        } else {
            Error::from(err)
        }
    })?;
    Ok(Some(payload))
}

/// The caller's half of the handshake.
pub fn hello() -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    put_u32(&mut out, PROTOCOL_VERSION);
    out
}

/// The worker's half of the handshake, naming its engine.
pub fn hello_ack(engine: &str) -> Vec<u8> {
    let mut out = hello();
    out.extend_from_slice(engine.as_bytes());
    out
}

/// Check a handshake frame, returning whatever follows the version (the
/// engine name on the worker's reply, nothing on the caller's).
pub fn check_hello(frame: &[u8]) -> Result<String> {
    if frame.len() < 8 || frame[..4] != MAGIC {
        return Err(Error::Handshake("bad magic".to_string()));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&frame[4..8]);
    let version = u32::from_le_bytes(version);
    if version != PROTOCOL_VERSION {
        return Err(Error::Handshake(format!(
            "protocol version {version} does not match {PROTOCOL_VERSION}"
        )));
    }
    String::from_utf8(frame[8..].to_vec())
        .map_err(|_| Error::Handshake("engine name is not utf-8".to_string()))
}

/// Is this I/O error the kind produced by writing to a dead worker?
pub(crate) fn is_broken_pipe(err: &Error) -> bool {
    matches!(err, Error::Io(e) if e.kind() == ErrorKind::BrokenPipe)
}
