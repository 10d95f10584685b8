// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

//! The command-execution engine.
//!
//! A [`Client`] owns at most one live [`Connection`], establishes it lazily
//! (running the configured prelude on every fresh connection), and drives
//! every operation through one retry state machine: connection-class
//! failures tear the connection down and are replayed when both the
//! operation and the configured policy allow it, everything else surfaces
//! untouched.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cmd::{cmd, Cmd};
use crate::config::{ClientOptions, Config};
use crate::connection::Connection;
use crate::errors::{Error, Result};
use crate::pipeline::{Pipeline, Transaction};
use crate::pubsub::PubSub;
use crate::types::Value;

mod scan;
pub use scan::{ScanIter, ScanPairs};

pub struct Client {
    config: Arc<Config>,
    id: Option<String>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    raw_connection: Option<Connection>,
    disable_reconnection: Cell<bool>,
}

/// Scoped acquisition of the no-reconnection flag. Restores the previous
/// value on every exit path, re-entry included.
struct ReconnectionGuard<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> ReconnectionGuard<'a> {
    fn disable(flag: &'a Cell<bool>) -> ReconnectionGuard<'a> {
        let previous = flag.replace(true);
        ReconnectionGuard { flag, previous }
    }
}

impl Drop for ReconnectionGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

impl Client {
    pub fn from_config(config: Config) -> Client {
        let config = Arc::new(config);
        Client {
            id: config.id().map(str::to_owned),
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            raw_connection: None,
            disable_reconnection: Cell::new(false),
            config,
        }
    }

    pub fn from_options(options: ClientOptions) -> Client {
        Client::from_config(Config::from_options(options))
    }

    pub fn from_url(url: &str) -> Result<Client> {
        Ok(Client::from_config(Config::from_url(url)?))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Send one command and return its decoded reply, retrying
    /// connection-class failures per the configured policy.
    pub fn call(&mut self, command: &Cmd) -> Result<Value> {
        self.execute(command, true, None)
    }

    /// As [`call`](Client::call), but never replayed, even on transient
    /// failure.
    pub fn call_once(&mut self, command: &Cmd) -> Result<Value> {
        self.execute(command, false, None)
    }

    /// As [`call`](Client::call) with the read deadline overridden for this
    /// one command. `Duration::ZERO` waits forever. An expired deadline
    /// surfaces [`Error::ReadTimeout`] and tears the connection down; the
    /// command is not replayed.
    pub fn blocking_call(&mut self, timeout: Duration, command: &Cmd) -> Result<Value> {
        self.execute(command, false, Some(timeout))
    }

    /// Buffer commands through the block, then send them as one batch and
    /// collect the replies in order. An empty pipeline never touches the
    /// wire.
    pub fn pipelined<F>(&mut self, block: F) -> Result<Vec<Value>>
    where
        F: FnOnce(&mut Pipeline) -> Result<()>,
    {
        let mut pipeline = Pipeline::new();
        block(&mut pipeline)?;
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }
        let config = Arc::clone(&self.config);
        self.ensure_connected(pipeline.retryable(), |connection| {
            config
                .middlewares()
                .call_pipelined(pipeline.commands(), &config, &mut || {
                    connection.call_pipelined(pipeline.commands(), pipeline.timeouts())
                })
        })
    }

    /// Run a `MULTI`/`EXEC` transaction and return the per-command results
    /// from the `EXEC` reply.
    ///
    /// With `watch` keys, optimistic-lock state cannot be replayed, so
    /// reconnection is disabled for the whole scope; any failure triggers a
    /// best-effort `UNWATCH` while the connection is still healthy. A nil
    /// `EXEC` reply (lock lost) surfaces [`Error::TransactionAborted`].
    pub fn multi<F>(&mut self, watch: Option<&[&str]>, block: F) -> Result<Vec<Value>>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        match watch {
            Some(keys) => self.watched_multi(keys, block),
            None => self.unwatched_multi(block),
        }
    }

    /// Hand the connection off to pub/sub mode. The client keeps no
    /// connection afterwards and reconnects on its next command.
    pub fn pubsub(&mut self) -> Result<PubSub> {
        self.connect_with_retry()?;
        let connection = self
            .raw_connection
            .take()
            .ok_or_else(|| Error::Connection("Connection was closed or lost".into()))?;
        Ok(PubSub::new(connection))
    }

    pub fn close(&mut self) {
        if let Some(mut connection) = self.raw_connection.take() {
            debug!("closing connection");
            connection.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.raw_connection
            .as_ref()
            .is_some_and(Connection::is_connected)
    }

    /// Logical connection count; pooled wrappers report their pool size.
    pub fn size(&self) -> usize {
        1
    }

    /// Yields the client itself, so call sites stay uniform across pooled
    /// and unpooled usage.
    pub fn with<T>(&mut self, block: impl FnOnce(&mut Client) -> T) -> T {
        block(self)
    }

    /// Set all three timeouts at once.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.connect_timeout = timeout;
        self.read_timeout = timeout;
        self.write_timeout = timeout;
        if let Some(connection) = self.raw_connection.as_mut() {
            connection.set_read_timeout(timeout);
            connection.set_write_timeout(timeout);
        }
    }

    /// Affects future connection attempts only.
    pub fn set_connect_timeout(&mut self, timeout: Option<Duration>) {
        self.connect_timeout = timeout;
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
        if let Some(connection) = self.raw_connection.as_mut() {
            connection.set_read_timeout(timeout);
        }
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
        if let Some(connection) = self.raw_connection.as_mut() {
            connection.set_write_timeout(timeout);
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    fn execute(&mut self, command: &Cmd, retryable: bool, timeout: Option<Duration>) -> Result<Value> {
        let config = Arc::clone(&self.config);
        self.ensure_connected(retryable, |connection| {
            config
                .middlewares()
                .call(command, &config, &mut || connection.call(command, timeout))
        })
    }

    fn unwatched_multi<F>(&mut self, block: F) -> Result<Vec<Value>>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        let mut transaction = Transaction::new();
        block(&mut transaction)?;
        if transaction.is_empty() {
            return Ok(Vec::new());
        }
        let retryable = transaction.retryable();
        let pipeline = transaction.seal();
        let config = Arc::clone(&self.config);
        let replies = self.ensure_connected(retryable, |connection| {
            config
                .middlewares()
                .call_pipelined(pipeline.commands(), &config, &mut || {
                    connection.call_pipelined(pipeline.commands(), pipeline.timeouts())
                })
        })?;
        finish_transaction(replies.into_iter().next_back())
    }

    fn watched_multi<F>(&mut self, keys: &[&str], block: F) -> Result<Vec<Value>>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        let config = Arc::clone(&self.config);
        let mut block = Some(block);
        let exec_reply = self.ensure_connected(false, |connection| {
            let mut watch_cmd = cmd("WATCH");
            for key in keys {
                watch_cmd.arg(*key);
            }
            connection.call(&watch_cmd, None)?;

            let attempt = (|| {
                let mut transaction = Transaction::new();
                if let Some(build) = block.take() {
                    build(&mut transaction)?;
                }
                if transaction.is_empty() {
                    connection.call(&cmd("UNWATCH"), None)?;
                    return Ok(None);
                }
                let pipeline = transaction.seal();
                let replies = config
                    .middlewares()
                    .call_pipelined(pipeline.commands(), &config, &mut || {
                        connection.call_pipelined(pipeline.commands(), pipeline.timeouts())
                    })?;
                Ok(replies.into_iter().next_back())
            })();

            match attempt {
                Ok(reply) => Ok(reply),
                Err(err) => {
                    // Best effort, so watch state does not leak onto a
                    // connection that outlives this scope.
                    if connection.is_connected() {
                        let _ = connection.call(&cmd("UNWATCH"), None);
                    }
                    Err(err)
                }
            }
        })?;
        finish_transaction(exec_reply)
    }

    /// The retry state machine every operation runs through.
    fn ensure_connected<T>(
        &mut self,
        retryable: bool,
        mut operation: impl FnMut(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        if self.disable_reconnection.get() {
            let connection = self
                .raw_connection
                .as_mut()
                .ok_or_else(|| Error::Connection("Connection was closed or lost".into()))?;
            return operation(connection);
        }

        if retryable {
            let mut tries = 0;
            loop {
                let result = match self.raw_connection() {
                    Ok(connection) => operation(connection),
                    Err(err) => Err(err),
                };
                match result {
                    Ok(value) => return Ok(value),
                    Err(err) if err.is_connection_error() => {
                        self.close();
                        if self.config.retry_connecting(tries, &err) {
                            warn!(error = %err, tries, "retrying after connection failure");
                            tries += 1;
                        } else {
                            return Err(err);
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
        } else {
            // The initial connection attempt stays retryable even for
            // non-retryable operations; only the operation itself must not
            // be replayed.
            self.connect_with_retry()?;
            let guard = ReconnectionGuard::disable(&self.disable_reconnection);
            let connection = match self.raw_connection.as_mut() {
                Some(connection) => connection,
                None => {
                    drop(guard);
                    return Err(Error::Connection("Connection was closed or lost".into()));
                }
            };
            let result = operation(connection);
            drop(guard);
            if let Err(err) = &result {
                if err.is_connection_error() {
                    self.close();
                }
            }
            result
        }
    }

    fn connect_with_retry(&mut self) -> Result<()> {
        let mut tries = 0;
        loop {
            match self.raw_connection() {
                Ok(_) => return Ok(()),
                Err(err) if err.is_connection_error() => {
                    self.close();
                    if self.config.retry_connecting(tries, &err) {
                        tries += 1;
                    } else {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// The live connection, opened on first need.
    fn raw_connection(&mut self) -> Result<&mut Connection> {
        if self.raw_connection.is_none() {
            let connection = self.connect()?;
            self.raw_connection = Some(connection);
        }
        // Populated just above.
        Ok(self.raw_connection.as_mut().unwrap())
    }

    /// Open a fresh connection and run the prelude. The prelude bypasses
    /// middlewares.
    fn connect(&mut self) -> Result<Connection> {
        debug!(host = %self.config.host(), port = self.config.port(), "establishing connection");
        let driver = self.config.new_driver(
            self.connect_timeout,
            self.read_timeout,
            self.write_timeout,
        )?;
        let mut connection = Connection::new(driver);

        let mut prelude = self.config.connection_prelude();
        if let Some(id) = &self.id {
            let mut setname = cmd("CLIENT");
            setname.arg("SETNAME").arg(id.as_str());
            prelude.push(setname);
        }
        if self.config.sentinel() {
            prelude.push(cmd("ROLE"));
        }
        if !prelude.is_empty() {
            let replies = connection.call_pipelined(&prelude, None)?;
            if self.config.sentinel() {
                let role_reply = replies
                    .last()
                    .ok_or_else(|| Error::Protocol("missing ROLE reply in prelude".into()))?;
                self.config.check_role(role_reply)?;
            }
        }
        Ok(connection)
    }
}

/// Post-process an `EXEC` reply: nil means the optimistic lock was lost,
/// and the first in-band command error aborts the whole result.
fn finish_transaction(exec_reply: Option<Value>) -> Result<Vec<Value>> {
    match exec_reply {
        None => Ok(Vec::new()),
        Some(Value::Nil) => fail!(Error::TransactionAborted),
        Some(Value::Array(results)) => {
            for result in &results {
                if let Value::ServerError(err) = result {
                    fail!(err.clone());
                }
            }
            Ok(results)
        }
        Some(other) => fail!(Error::Protocol(format!(
            "unexpected EXEC reply: {other:?}"
        ))),
    }
}
