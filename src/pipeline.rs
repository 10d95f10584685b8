// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

//! Command batches: pipelines and `MULTI`/`EXEC` transactions.

use std::collections::HashMap;
use std::time::Duration;

use crate::cmd::{cmd, Cmd};

/// An ordered buffer of commands sent in one exchange.
///
/// The buffer carries the metadata the retry machinery needs: whether the
/// whole batch may be replayed on a fresh connection, and the sparse map of
/// per-command read-timeout overrides recorded by
/// [`blocking_call`](Pipeline::blocking_call).
#[derive(Debug, Clone)]
pub struct Pipeline {
    commands: Vec<Cmd>,
    retryable: bool,
    timeouts: HashMap<usize, Duration>,
}

impl Pipeline {
    pub(crate) fn new() -> Pipeline {
        Pipeline {
            commands: Vec::new(),
            retryable: true,
            timeouts: HashMap::new(),
        }
    }

    /// Append a command that is safe to replay on reconnection.
    pub fn call(&mut self, command: &Cmd) -> &mut Pipeline {
        self.commands.push(command.clone());
        self
    }

    /// Append a command and mark the whole batch non-retryable.
    pub fn call_once(&mut self, command: &Cmd) -> &mut Pipeline {
        self.retryable = false;
        self.commands.push(command.clone());
        self
    }

    /// Append a command with its own read deadline. `Duration::ZERO` waits
    /// forever. Retryability is left unchanged.
    pub fn blocking_call(&mut self, timeout: Duration, command: &Cmd) -> &mut Pipeline {
        self.timeouts.insert(self.commands.len(), timeout);
        self.commands.push(command.clone());
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    /// The sparse command-index → read-deadline map, `None` when no
    /// blocking command was appended.
    pub fn timeouts(&self) -> Option<&HashMap<usize, Duration>> {
        if self.timeouts.is_empty() {
            None
        } else {
            Some(&self.timeouts)
        }
    }

    pub(crate) fn commands(&self) -> &[Cmd] {
        &self.commands
    }
}

/// A pipeline framed by `MULTI` and `EXEC`.
///
/// The builder opens with `MULTI`; [`seal`](Transaction::seal) appends
/// `EXEC`. Only the `EXEC` reply reaches the caller, aligned with the
/// user-appended commands.
#[derive(Debug)]
pub struct Transaction {
    pipeline: Pipeline,
}

impl Transaction {
    pub(crate) fn new() -> Transaction {
        let mut pipeline = Pipeline::new();
        pipeline.call(&cmd("MULTI"));
        Transaction { pipeline }
    }

    pub fn call(&mut self, command: &Cmd) -> &mut Transaction {
        self.pipeline.call(command);
        self
    }

    pub fn call_once(&mut self, command: &Cmd) -> &mut Transaction {
        self.pipeline.call_once(command);
        self
    }

    pub fn blocking_call(&mut self, timeout: Duration, command: &Cmd) -> &mut Transaction {
        self.pipeline.blocking_call(timeout, command);
        self
    }

    /// Number of user-appended commands, the framing excluded.
    pub fn len(&self) -> usize {
        self.pipeline.len() - 1
    }

    /// True when nothing but the framing would go to the wire.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retryable(&self) -> bool {
        self.pipeline.retryable()
    }

    pub(crate) fn seal(mut self) -> Pipeline {
        self.pipeline.call(&cmd("EXEC"));
        self.pipeline
    }
}
