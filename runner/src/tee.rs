// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Transcripts of the requests sent to a worker, saved for debugging.

use std::{
    collections::hash_map::DefaultHasher,
    fmt, fs,
    hash::{Hash, Hasher},
    io,
    path::{Path, PathBuf},
};

use itertools::Itertools;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Entry {
    Sent(String),
    Note(String),
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Sent(request) => write!(f, "{request}"),
            Entry::Note(note) => {
                for (i, line) in note.lines().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, ";; {line}")?;
                }
                Ok(())
            }
        }
    }
}

/// The transcript of one channel, in SMT-LIB-like syntax.
#[derive(Debug)]
pub struct Tee {
    dir: PathBuf,
    entries: Vec<Entry>,
}

impl Tee {
    /// An empty transcript to be saved into `dir`.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            entries: vec![],
        }
    }

    /// Record a request as it was sent.
    pub fn append(&mut self, request: String) {
        self.entries.push(Entry::Sent(request))
    }

    /// Record a note, saved as comment lines.
    pub fn comment(&mut self, note: &str) {
        self.entries.push(Entry::Note(note.to_string()))
    }

    /// Number of requests recorded.
    pub fn requests(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, Entry::Sent(_)))
            .count()
    }

    /// Write the transcript to `session-<hash>.smt2`, where the hash covers
    /// the contents, and return the file name. Saving an unchanged
    /// transcript again overwrites the same file.
    pub fn save(&self) -> io::Result<PathBuf> {
        let mut hasher = DefaultHasher::new();
        self.entries.hash(&mut hasher);
        let fname = PathBuf::from(format!("session-{:08x}.smt2", hasher.finish() as u32));
        let text = self.entries.iter().join("\n");
        fs::write(self.dir.join(&fname), text + "\n")?;
        Ok(fname)
    }
}
