// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

//! The transport seam: the [`Driver`] contract, the [`Connection`] handle
//! the client executes through, and the production [`TcpDriver`].

use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};

use crate::cmd::Cmd;
use crate::codec;
use crate::errors::{Error, Result};
use crate::types::Value;

/// Raw transport for one server connection.
///
/// Drivers speak the wire protocol but stay policy-free: they return decoded
/// replies verbatim, server errors included as in-band
/// [`Value::ServerError`], and never retry. A read timeout passed as
/// `Duration::ZERO` means "wait forever".
pub trait Driver: Send {
    /// Send one command and read its reply. `timeout` overrides the read
    /// deadline for this exchange only.
    fn call(&mut self, command: &Cmd, timeout: Option<Duration>) -> Result<Value>;

    /// Send every command in one write, then read one reply per command in
    /// order. `timeouts` maps command index to a read-deadline override.
    fn call_pipelined(
        &mut self,
        commands: &[Cmd],
        timeouts: Option<&HashMap<usize, Duration>>,
    ) -> Result<Vec<Value>>;

    /// Send a command without reading a reply (pub/sub framing).
    fn write(&mut self, command: &Cmd) -> Result<()>;

    /// Read the next frame without having sent anything (pub/sub framing).
    fn read(&mut self, timeout: Option<Duration>) -> Result<Value>;

    fn close(&mut self);

    fn is_connected(&self) -> bool;

    fn set_read_timeout(&mut self, timeout: Option<Duration>);

    fn set_write_timeout(&mut self, timeout: Option<Duration>);
}

/// A one-shot handle over a boxed [`Driver`].
///
/// The handle is where wire-agnostic policy lives: empty commands are
/// rejected before touching the driver, and top-level server errors become
/// `Err` (nested ones, e.g. inside an `EXEC` reply, stay in-band for the
/// caller to scan).
pub struct Connection {
    driver: Box<dyn Driver>,
}

impl Connection {
    pub fn new(driver: Box<dyn Driver>) -> Connection {
        Connection { driver }
    }

    pub fn call(&mut self, command: &Cmd, timeout: Option<Duration>) -> Result<Value> {
        ensure_command(command)?;
        match self.driver.call(command, timeout)? {
            Value::ServerError(err) => Err(err.into()),
            value => Ok(value),
        }
    }

    /// All replies are consumed before the first server error aborts, so the
    /// connection stays aligned with the reply stream.
    pub fn call_pipelined(
        &mut self,
        commands: &[Cmd],
        timeouts: Option<&HashMap<usize, Duration>>,
    ) -> Result<Vec<Value>> {
        for command in commands {
            ensure_command(command)?;
        }
        let replies = self.driver.call_pipelined(commands, timeouts)?;
        for reply in &replies {
            if let Value::ServerError(err) = reply {
                return Err(err.clone().into());
            }
        }
        Ok(replies)
    }

    pub fn write(&mut self, command: &Cmd) -> Result<()> {
        ensure_command(command)?;
        self.driver.write(command)
    }

    pub fn read(&mut self, timeout: Option<Duration>) -> Result<Value> {
        self.driver.read(timeout)
    }

    pub fn close(&mut self) {
        self.driver.close();
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.driver.set_read_timeout(timeout);
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.driver.set_write_timeout(timeout);
    }
}

fn ensure_command(command: &Cmd) -> Result<()> {
    if command.is_empty() {
        fail!(Error::InvalidCommand("command is empty"));
    }
    Ok(())
}

/// A zero duration means "wait forever", which the socket layer spells
/// `None`.
fn effective(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|timeout| !timeout.is_zero())
}

/// Blocking TCP driver over `std::net::TcpStream`.
pub struct TcpDriver {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    read_timeout: Option<Duration>,
    open: bool,
}

impl TcpDriver {
    pub fn connect(
        host: &str,
        port: u16,
        connect_timeout: Option<Duration>,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Result<TcpDriver> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|err| Error::Connection(format!("failed to resolve `{host}`: {err}")))?
            .collect();

        // Try each resolved address, keeping the last failure around.
        let connect_timeout = effective(connect_timeout);
        let mut last_error = None;
        let mut stream = None;
        for addr in addrs {
            let attempt = match connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(socket) => {
                    stream = Some(socket);
                    break;
                }
                Err(err) => last_error = Some(err),
            }
        }
        let Some(stream) = stream else {
            return Err(match last_error {
                Some(err) => Error::connect_error(err),
                None => Error::Connection(format!("no addresses resolved for `{host}`")),
            });
        };

        stream.set_nodelay(true).map_err(Error::connect_error)?;
        socket2::SockRef::from(&stream)
            .set_keepalive(true)
            .map_err(Error::connect_error)?;
        let read_timeout = effective(read_timeout);
        stream
            .set_read_timeout(read_timeout)
            .map_err(Error::connect_error)?;
        stream
            .set_write_timeout(effective(write_timeout))
            .map_err(Error::connect_error)?;

        debug!(host, port, "tcp connection established");
        let writer = stream.try_clone().map_err(Error::connect_error)?;
        Ok(TcpDriver {
            reader: BufReader::new(stream),
            writer,
            read_timeout,
            open: true,
        })
    }

    fn send_packed(&mut self, buffer: &[u8]) -> Result<()> {
        let result = self
            .writer
            .write_all(buffer)
            .and_then(|()| self.writer.flush());
        if let Err(err) = result {
            self.open = false;
            return Err(Error::write_error(err));
        }
        Ok(())
    }

    /// Read one reply, optionally under an overridden deadline.
    ///
    /// `fatal_on_timeout` distinguishes request/reply reads (an expired
    /// deadline leaves an unread reply in flight, so the stream can no
    /// longer be trusted) from pub/sub polls (a timeout just means no event
    /// yet).
    fn read_reply(
        &mut self,
        override_timeout: Option<Duration>,
        fatal_on_timeout: bool,
    ) -> Result<Value> {
        if let Some(timeout) = override_timeout {
            self.reader
                .get_ref()
                .set_read_timeout(effective(Some(timeout)))
                .map_err(|err| Error::Connection(err.to_string()))?;
        }
        let result = codec::decode_value(&mut self.reader);
        if override_timeout.is_some() {
            let _ = self.reader.get_ref().set_read_timeout(self.read_timeout);
        }
        if let Err(err) = &result {
            let fatal = match err {
                Error::ReadTimeout => fatal_on_timeout,
                Error::Protocol(_) => true,
                other => other.is_connection_error(),
            };
            if fatal {
                trace!(error = %err, "tearing down tcp stream after failed read");
                self.close();
            }
        }
        result
    }
}

impl Driver for TcpDriver {
    fn call(&mut self, command: &Cmd, timeout: Option<Duration>) -> Result<Value> {
        let mut buffer = Vec::new();
        codec::encode_command(command, &mut buffer);
        self.send_packed(&buffer)?;
        self.read_reply(timeout, true)
    }

    fn call_pipelined(
        &mut self,
        commands: &[Cmd],
        timeouts: Option<&HashMap<usize, Duration>>,
    ) -> Result<Vec<Value>> {
        let mut buffer = Vec::new();
        for command in commands {
            codec::encode_command(command, &mut buffer);
        }
        self.send_packed(&buffer)?;

        let mut replies = Vec::with_capacity(commands.len());
        for index in 0..commands.len() {
            let timeout = timeouts.and_then(|map| map.get(&index)).copied();
            replies.push(self.read_reply(timeout, true)?);
        }
        Ok(replies)
    }

    fn write(&mut self, command: &Cmd) -> Result<()> {
        let mut buffer = Vec::new();
        codec::encode_command(command, &mut buffer);
        self.send_packed(&buffer)
    }

    fn read(&mut self, timeout: Option<Duration>) -> Result<Value> {
        self.read_reply(timeout, false)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.writer.shutdown(Shutdown::Both);
        }
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = effective(timeout);
        let _ = self.reader.get_ref().set_read_timeout(self.read_timeout);
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        let _ = self.writer.set_write_timeout(effective(timeout));
    }
}

impl Drop for TcpDriver {
    fn drop(&mut self) {
        self.close();
    }
}
