// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

//! Instrumentation hooks around command execution.
//!
//! Middlewares decorate every user-initiated command or batch; the
//! connection prelude bypasses them. Registration is process-wide and
//! happens at startup: [`Config`](crate::config::Config) snapshots the
//! registry when it is built, so the stack seen by a client never changes
//! mid-command.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::cmd::Cmd;
use crate::config::Config;
use crate::errors::Result;
use crate::types::Value;

/// A pass-through decorator around command execution. Implement either hook
/// and call `next()` exactly once to proceed (skipping it short-circuits the
/// exchange).
pub trait Middleware: Send + Sync {
    fn call(
        &self,
        command: &Cmd,
        config: &Config,
        next: &mut dyn FnMut() -> Result<Value>,
    ) -> Result<Value> {
        let _ = (command, config);
        next()
    }

    fn call_pipelined(
        &self,
        commands: &[Cmd],
        config: &Config,
        next: &mut dyn FnMut() -> Result<Vec<Value>>,
    ) -> Result<Vec<Value>> {
        let _ = (commands, config);
        next()
    }
}

static REGISTRY: Lazy<RwLock<Vec<Arc<dyn Middleware>>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Register a middleware process-wide. Intended for startup; configs built
/// afterwards pick it up.
pub fn register(middleware: Arc<dyn Middleware>) {
    if let Ok(mut registry) = REGISTRY.write() {
        registry.push(middleware);
    }
}

/// An ordered, immutable middleware stack.
#[derive(Clone, Default)]
pub struct Middlewares {
    stack: Arc<Vec<Arc<dyn Middleware>>>,
}

impl Middlewares {
    pub fn new(stack: Vec<Arc<dyn Middleware>>) -> Middlewares {
        Middlewares { stack: Arc::new(stack) }
    }

    /// Snapshot of the process-wide registry.
    pub fn registered() -> Middlewares {
        let stack = REGISTRY
            .read()
            .map(|registry| registry.clone())
            .unwrap_or_default();
        Middlewares { stack: Arc::new(stack) }
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn call(
        &self,
        command: &Cmd,
        config: &Config,
        next: &mut dyn FnMut() -> Result<Value>,
    ) -> Result<Value> {
        fn invoke(
            stack: &[Arc<dyn Middleware>],
            command: &Cmd,
            config: &Config,
            next: &mut dyn FnMut() -> Result<Value>,
        ) -> Result<Value> {
            match stack.split_first() {
                None => next(),
                Some((middleware, rest)) => middleware.call(command, config, &mut || {
                    invoke(rest, command, config, &mut *next)
                }),
            }
        }
        invoke(&self.stack, command, config, next)
    }

    pub fn call_pipelined(
        &self,
        commands: &[Cmd],
        config: &Config,
        next: &mut dyn FnMut() -> Result<Vec<Value>>,
    ) -> Result<Vec<Value>> {
        fn invoke(
            stack: &[Arc<dyn Middleware>],
            commands: &[Cmd],
            config: &Config,
            next: &mut dyn FnMut() -> Result<Vec<Value>>,
        ) -> Result<Vec<Value>> {
            match stack.split_first() {
                None => next(),
                Some((middleware, rest)) => middleware.call_pipelined(commands, config, &mut || {
                    invoke(rest, commands, config, &mut *next)
                }),
            }
        }
        invoke(&self.stack, commands, config, next)
    }
}

impl std::fmt::Debug for Middlewares {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middlewares")
            .field("len", &self.stack.len())
            .finish()
    }
}
