// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0
#![allow(dead_code)]

pub mod mocks;

use keyline::{Client, ClientOptions, Cmd, ProtocolVersion, RetryStrategy, Value};

use self::mocks::MockHandle;

/// A client wired to a scripted [`mocks::MockDriver`], with a fast
/// reconnect backoff so retry tests stay quick. RESP2 keeps the prelude
/// empty unless a test opts into more.
pub fn mock_client_with(configure: impl FnOnce(&mut ClientOptions)) -> (Client, MockHandle) {
    let handle = MockHandle::new();
    let mut options = ClientOptions::default();
    options.protocol = ProtocolVersion::Resp2;
    options.reconnect_strategy = Some(RetryStrategy::fixed(1, 2));
    options.driver = Some(handle.factory());
    configure(&mut options);
    (Client::from_options(options), handle)
}

pub fn mock_client() -> (Client, MockHandle) {
    mock_client_with(|_| {})
}

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    keyline::codec::encode_value(value, &mut out);
    out
}

pub fn packed(command: &Cmd) -> Vec<u8> {
    command.get_packed_command()
}

pub fn bulk(text: &str) -> Value {
    Value::BulkString(text.as_bytes().to_vec())
}

pub fn args(tokens: &[&str]) -> Vec<Vec<u8>> {
    tokens.iter().map(|token| token.as_bytes().to_vec()).collect()
}
