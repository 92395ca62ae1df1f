// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The record of state-changing requests a worker has accepted, used to
//! rebuild the same solver state in a forked worker.

use ast::Ast;

use crate::{conf::ForkingConfiguration, protocol::Request};

#[derive(Debug, Clone)]
pub(crate) struct Journal {
    conf: ForkingConfiguration,
    /// Assertions per scope; the first frame is the base scope and is never
    /// popped
    frames: Vec<Vec<Request<Ast>>>,
}

impl Default for Journal {
    fn default() -> Self {
        Self {
            conf: ForkingConfiguration::default(),
            frames: vec![vec![]],
        }
    }
}

impl Journal {
    /// Record a request the worker acknowledged.
    pub(crate) fn record(&mut self, request: &Request<Ast>) {
        match request {
            Request::Configure { name, value } => self.conf.record(name, value),
            Request::Assert(_) | Request::AssertAndTrack(_) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.push(request.clone());
                }
            }
            Request::Push => self.frames.push(vec![]),
            Request::Pop(n) => {
                let keep = self.frames.len().saturating_sub(*n as usize).max(1);
                self.frames.truncate(keep);
            }
            Request::Batch(requests) => {
                for r in requests {
                    self.record(r);
                }
            }
            _ => {}
        }
    }

    /// Number of open scopes above the base scope.
    pub(crate) fn levels(&self) -> usize {
        self.frames.len() - 1
    }

    /// A single request that reproduces the recorded state on a fresh
    /// worker: parameters first, then the assertions of each scope.
    pub(crate) fn replay(&self) -> Request<Ast> {
        let mut requests: Vec<Request<Ast>> = self
            .conf
            .params()
            .map(|(name, value)| Request::Configure {
                name: name.to_string(),
                value: value.clone(),
            })
            .collect();
        for (level, frame) in self.frames.iter().enumerate() {
            if level > 0 {
                requests.push(Request::Push);
            }
            requests.extend(frame.iter().cloned());
        }
        Request::Batch(requests)
    }
}
