// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

//! keyline is a synchronous client for Valkey- and Redis-compatible
//! key/value servers.
//!
//! The crate is the command-execution engine around a single connection:
//! it establishes the connection lazily, runs the configured handshake,
//! retries connection-class failures for operations that are safe to
//! replay, and exposes pipelines, `MULTI`/`EXEC` transactions, pub/sub
//! mode, and lazy cursor scans.
//!
//! ```rust,no_run
//! use keyline::{cmd, Client, ClientOptions};
//!
//! fn main() -> keyline::Result<()> {
//!     let mut client = Client::from_options(ClientOptions::default());
//!
//!     let mut set = cmd("SET");
//!     set.arg("answer").arg(42);
//!     client.call(&set)?;
//!
//!     let replies = client.pipelined(|pipeline| {
//!         pipeline.call(cmd("GET").arg("answer"));
//!         Ok(())
//!     })?;
//!     println!("{replies:?}");
//!     Ok(())
//! }
//! ```
//!
//! A [`Client`] is single-flight: it is not meant to be shared across
//! threads. Run one client per executor, or put a pool in front.

#[macro_use]
mod macros;

pub mod client;
pub mod cmd;
pub mod codec;
pub mod config;
pub mod connection;
pub mod errors;
pub mod middleware;
pub mod pipeline;
pub mod pubsub;
mod retry_strategies;
pub mod types;

pub use client::{Client, ScanIter, ScanPairs};
pub use cmd::{cmd, ArgWrite, Cmd, ToArgs};
pub use config::{ClientOptions, Config, ProtocolVersion, Role};
pub use connection::{Connection, Driver, TcpDriver};
pub use errors::{
    register_error_code, CommandError, CommandErrorKind, Error, Result,
};
pub use middleware::{Middleware, Middlewares};
pub use pipeline::{Pipeline, Transaction};
pub use pubsub::PubSub;
pub use retry_strategies::RetryStrategy;
pub use types::Value;
