// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

//! Pub/sub mode.
//!
//! Entering pub/sub detaches a connection from the client's retry
//! machinery: replies stop aligning with commands, so the usual
//! request/reply engine can no longer drive it. A [`PubSub`] owns its
//! connection exclusively and is not re-attachable; the client that handed
//! it off reconnects on its next command.

use std::time::Duration;

use tracing::debug;

use crate::cmd::Cmd;
use crate::connection::Connection;
use crate::errors::{Error, Result};
use crate::types::Value;

pub struct PubSub {
    connection: Option<Connection>,
}

impl PubSub {
    pub(crate) fn new(connection: Connection) -> PubSub {
        PubSub {
            connection: Some(connection),
        }
    }

    /// Send a command without waiting for a reply; confirmations arrive as
    /// events.
    pub fn call(&mut self, command: &Cmd) -> Result<()> {
        self.connection_mut()?.write(command)
    }

    /// Read the next event. Returns `Ok(None)` when the read deadline
    /// expires with no event pending; `timeout` of `Duration::ZERO` waits
    /// forever, `None` uses the connection's read timeout.
    pub fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<Value>> {
        let connection = self.connection_mut()?;
        match connection.read(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(Error::ReadTimeout) => Ok(None),
            Err(err) if err.is_connection_error() => Err(err),
            Err(err) => Err(Error::Connection(err.to_string())),
        }
    }

    pub fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            debug!("closing pub/sub connection");
            connection.close();
        }
    }

    fn connection_mut(&mut self) -> Result<&mut Connection> {
        self.connection
            .as_mut()
            .ok_or_else(|| Error::Connection("Connection was closed or lost".into()))
    }
}

impl Drop for PubSub {
    fn drop(&mut self) {
        self.close();
    }
}
