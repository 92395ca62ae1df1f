// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Locate worker binaries.

use std::{env, path::PathBuf};

/// Name of the worker binary.
pub const WORKER_BIN: &str = "smt-worker";

/// Name of the environment variable overriding the path to `bin`: the binary
/// name uppercased, with dashes replaced, followed by `_BIN`.
pub fn override_var(bin: &str) -> String {
    bin.to_uppercase().replace('-', "_") + "_BIN"
}

/// Get the path to a worker binary.
///
/// This is the value of [`override_var`] if it is set; otherwise the binary
/// next to the running executable (or next to its parent directory, which is
/// where test binaries find the crate's binaries); and otherwise just the
/// name, to be looked up in `PATH`.
pub fn worker_path(bin: &str) -> String {
    if let Some(val) = env::var_os(override_var(bin)) {
        return val.to_string_lossy().into();
    }
    let bin = if env::consts::OS == "windows" && !bin.ends_with(".exe") {
        bin.to_owned() + ".exe"
    } else {
        bin.to_owned()
    };
    if let Some(found) = sibling(&bin) {
        return found.to_string_lossy().into();
    }
    bin
}

fn sibling(bin: &str) -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    exe.ancestors()
        .skip(1)
        .take(2)
        .map(|dir| dir.join(bin))
        .find(|p| p.is_file())
}
