// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

//! Error taxonomy for the client.
//!
//! Errors split into two classes: connection errors (the transport failed or
//! timed out, the reply stream can no longer be trusted) and command errors
//! (the server processed the command and reported a logical failure). Only
//! connection errors feed the retry machinery.

use std::collections::HashMap;
use std::io;
use std::sync::RwLock;

use once_cell::sync::Lazy;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-layer failure. Retryable per the configured policy.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server is not in the role the configuration expects.
    #[error("expected server in `{expected}` role, got `{actual}`")]
    Failover { expected: String, actual: String },

    /// Deadline exceeded while waiting for a reply.
    #[error("timed out reading from the server")]
    ReadTimeout,

    /// Deadline exceeded while sending a command.
    #[error("timed out writing to the server")]
    WriteTimeout,

    /// Deadline exceeded while establishing a connection.
    #[error("timed out connecting to the server")]
    ConnectTimeout,

    /// Deadline exceeded while waiting for a pooled connection. Raised by
    /// pooled wrappers, carried here so they share the taxonomy.
    #[error("timed out waiting for a connection checkout")]
    CheckoutTimeout,

    /// The server processed the command and reported an error.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The reply stream could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The command could not be coerced into a valid argument vector.
    #[error("invalid command: {0}")]
    InvalidCommand(&'static str),

    /// `EXEC` returned nil: a watched key changed and the transaction was
    /// discarded by the server.
    #[error("transaction discarded because a watched key changed")]
    TransactionAborted,
}

impl Error {
    /// True for transport-class failures, the ones that tear down the
    /// connection and may be retried.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Failover { .. }
                | Error::ReadTimeout
                | Error::WriteTimeout
                | Error::ConnectTimeout
                | Error::CheckoutTimeout
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::ReadTimeout | Error::WriteTimeout | Error::ConnectTimeout | Error::CheckoutTimeout
        )
    }

    pub(crate) fn read_error(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::ReadTimeout,
            _ => Error::Connection(err.to_string()),
        }
    }

    pub(crate) fn write_error(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::WriteTimeout,
            _ => Error::Connection(err.to_string()),
        }
    }

    pub(crate) fn connect_error(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::ConnectTimeout,
            _ => Error::Connection(err.to_string()),
        }
    }
}

/// A logical error reported by the server in a reply.
///
/// The leading whitespace-delimited token of the message is the server's
/// error code (`ERR`, `WRONGPASS`, `MOVED`, ...); [`CommandError::parse`]
/// classifies it through the registered code table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CommandError {
    kind: CommandErrorKind,
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandErrorKind {
    Generic,
    Authentication,
    Permission,
    ReadOnly,
    MasterDown,
    OutOfMemory,
    ExecAbort,
}

static ERROR_CODES: Lazy<RwLock<HashMap<String, CommandErrorKind>>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert("WRONGPASS".to_owned(), CommandErrorKind::Authentication);
    table.insert("NOPERM".to_owned(), CommandErrorKind::Permission);
    table.insert("READONLY".to_owned(), CommandErrorKind::ReadOnly);
    table.insert("MASTERDOWN".to_owned(), CommandErrorKind::MasterDown);
    table.insert("OOM".to_owned(), CommandErrorKind::OutOfMemory);
    table.insert("EXECABORT".to_owned(), CommandErrorKind::ExecAbort);
    RwLock::new(table)
});

/// Extend the error-code table. Intended for startup, before any client is
/// built; codes registered later are picked up by subsequent replies.
pub fn register_error_code(code: &str, kind: CommandErrorKind) {
    if let Ok(mut table) = ERROR_CODES.write() {
        table.insert(code.to_owned(), kind);
    }
}

impl CommandError {
    /// Classify a server error message by its leading code token. Unknown
    /// codes fall back to [`CommandErrorKind::Generic`].
    pub fn parse(message: impl Into<String>) -> CommandError {
        let message = message.into();
        let code = message.split_whitespace().next().unwrap_or("");
        let kind = ERROR_CODES
            .read()
            .ok()
            .and_then(|table| table.get(code).copied())
            .unwrap_or(CommandErrorKind::Generic);
        CommandError { kind, message }
    }

    pub fn kind(&self) -> CommandErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_classifies_known_codes() {
        assert_eq!(
            CommandError::parse("WRONGPASS invalid username-password pair").kind(),
            CommandErrorKind::Authentication
        );
        assert_eq!(
            CommandError::parse("NOPERM this user has no permissions").kind(),
            CommandErrorKind::Permission
        );
        assert_eq!(
            CommandError::parse("ERR unknown command").kind(),
            CommandErrorKind::Generic
        );
    }

    #[test]
    fn parse_keeps_the_full_message() {
        let error = CommandError::parse("ERR wrong number of arguments for 'incr' command");
        assert_eq!(
            error.message(),
            "ERR wrong number of arguments for 'incr' command"
        );
    }

    #[test]
    fn registered_codes_extend_the_table() {
        register_error_code("NOREPLICAS", CommandErrorKind::ReadOnly);
        assert_eq!(
            CommandError::parse("NOREPLICAS not enough good replicas to write").kind(),
            CommandErrorKind::ReadOnly
        );
    }

    #[test]
    fn connection_error_class() {
        assert!(Error::ReadTimeout.is_connection_error());
        assert!(Error::Connection("reset".into()).is_connection_error());
        assert!(Error::Failover {
            expected: "master".into(),
            actual: "slave".into()
        }
        .is_connection_error());
        assert!(!Error::Command(CommandError::parse("ERR boom")).is_connection_error());
        assert!(!Error::TransactionAborted.is_connection_error());
    }
}
