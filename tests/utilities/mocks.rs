// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use keyline::config::DriverFactory;
use keyline::{Cmd, Config, Driver, Error, Result, Value};

/// One scripted driver exchange.
pub enum Exchange {
    Reply(Value),
    PipelineReplies(Vec<Value>),
    Failure(Error),
}

#[derive(Default)]
pub struct MockState {
    pub script: VecDeque<Exchange>,
    pub connect_failures: VecDeque<Error>,
    pub commands: Vec<Vec<Vec<u8>>>,
    pub connections: usize,
    pub calls: usize,
    pub pipeline_calls: usize,
    pub writes: usize,
    pub reads: usize,
    pub last_call_timeout: Option<Option<Duration>>,
    pub last_pipeline_timeouts: Option<HashMap<usize, Duration>>,
    pub factory_timeouts: Vec<(Option<Duration>, Option<Duration>, Option<Duration>)>,
    pub read_timeout_updates: Vec<Option<Duration>>,
    pub write_timeout_updates: Vec<Option<Duration>>,
}

/// Shared view on a scripted driver: scripts exchanges up front, inspects
/// what the client put on the (fake) wire afterwards.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn new() -> MockHandle {
        MockHandle {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn push_reply(&self, value: Value) {
        self.lock().script.push_back(Exchange::Reply(value));
    }

    pub fn push_pipeline(&self, values: Vec<Value>) {
        self.lock().script.push_back(Exchange::PipelineReplies(values));
    }

    pub fn push_failure(&self, error: Error) {
        self.lock().script.push_back(Exchange::Failure(error));
    }

    pub fn push_connect_failure(&self, error: Error) {
        self.lock().connect_failures.push_back(error);
    }

    pub fn commands(&self) -> Vec<Vec<Vec<u8>>> {
        self.lock().commands.clone()
    }

    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    pub fn pipeline_calls(&self) -> usize {
        self.lock().pipeline_calls
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    pub fn last_call_timeout(&self) -> Option<Option<Duration>> {
        self.lock().last_call_timeout
    }

    pub fn last_pipeline_timeouts(&self) -> Option<HashMap<usize, Duration>> {
        self.lock().last_pipeline_timeouts.clone()
    }

    pub fn factory_timeouts(&self) -> Vec<(Option<Duration>, Option<Duration>, Option<Duration>)> {
        self.lock().factory_timeouts.clone()
    }

    pub fn read_timeout_updates(&self) -> Vec<Option<Duration>> {
        self.lock().read_timeout_updates.clone()
    }

    pub fn write_timeout_updates(&self) -> Vec<Option<Duration>> {
        self.lock().write_timeout_updates.clone()
    }

    pub fn factory(&self) -> DriverFactory {
        let state = self.state.clone();
        Arc::new(
            move |_config: &Config, connect_timeout, read_timeout, write_timeout| {
                let mut guard = state.lock().unwrap();
                if let Some(error) = guard.connect_failures.pop_front() {
                    return Err(error);
                }
                guard.connections += 1;
                guard
                    .factory_timeouts
                    .push((connect_timeout, read_timeout, write_timeout));
                let driver: Box<dyn Driver> = Box::new(MockDriver {
                    state: state.clone(),
                    open: true,
                });
                Ok(driver)
            },
        )
    }
}

pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
    open: bool,
}

fn printable(command: &Cmd) -> Vec<String> {
    command
        .args_vec()
        .iter()
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}

impl Driver for MockDriver {
    fn call(&mut self, command: &Cmd, timeout: Option<Duration>) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.commands.push(command.args_vec());
        state.last_call_timeout = Some(timeout);
        match state.script.pop_front() {
            Some(Exchange::Reply(value)) => Ok(value),
            Some(Exchange::Failure(error)) => {
                self.open = false;
                Err(error)
            }
            Some(Exchange::PipelineReplies(_)) => {
                panic!("scripted pipeline replies for a single call")
            }
            None => panic!("unscripted command: {:?}", printable(command)),
        }
    }

    fn call_pipelined(
        &mut self,
        commands: &[Cmd],
        timeouts: Option<&HashMap<usize, Duration>>,
    ) -> Result<Vec<Value>> {
        let mut state = self.state.lock().unwrap();
        state.pipeline_calls += 1;
        for command in commands {
            state.commands.push(command.args_vec());
        }
        state.last_pipeline_timeouts = timeouts.cloned();
        match state.script.pop_front() {
            Some(Exchange::PipelineReplies(values)) => Ok(values),
            Some(Exchange::Failure(error)) => {
                self.open = false;
                Err(error)
            }
            Some(Exchange::Reply(_)) => panic!("scripted a single reply for a pipelined call"),
            None => panic!("unscripted pipeline"),
        }
    }

    fn write(&mut self, command: &Cmd) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.commands.push(command.args_vec());
        Ok(())
    }

    fn read(&mut self, _timeout: Option<Duration>) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        match state.script.pop_front() {
            Some(Exchange::Reply(value)) => Ok(value),
            Some(Exchange::Failure(error)) => Err(error),
            Some(Exchange::PipelineReplies(_)) => {
                panic!("scripted pipeline replies for a raw read")
            }
            None => panic!("unscripted read"),
        }
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.state.lock().unwrap().read_timeout_updates.push(timeout);
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.state
            .lock()
            .unwrap()
            .write_timeout_updates
            .push(timeout);
    }
}

/// One accepted connection: ordered (expected bytes, response bytes)
/// exchanges. An empty response answers nothing; the socket closes after
/// the last exchange of the session.
pub type ServerSession = Vec<(Vec<u8>, Vec<u8>)>;

/// A scripted server speaking literal RESP over a real TCP socket, one
/// session per accepted connection.
pub struct ServerMock {
    pub host: String,
    pub port: u16,
    received: Arc<AtomicU16>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ServerMock {
    pub fn start(sessions: Vec<ServerSession>) -> ServerMock {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(AtomicU16::new(0));
        let received_in_thread = received.clone();
        let handle = thread::spawn(move || {
            for session in sessions {
                let Ok((mut socket, _)) = listener.accept() else {
                    return;
                };
                for (expected, response) in session {
                    let mut buffer = vec![0; expected.len()];
                    if socket.read_exact(&mut buffer).is_err() {
                        return;
                    }
                    assert_eq!(
                        buffer, expected,
                        "unexpected bytes on the wire: {:?}",
                        String::from_utf8_lossy(&buffer)
                    );
                    received_in_thread.fetch_add(1, Ordering::AcqRel);
                    if !response.is_empty() {
                        socket.write_all(&response).unwrap();
                    }
                }
                let _ = socket.shutdown(std::net::Shutdown::Both);
            }
        });
        ServerMock {
            host: "127.0.0.1".to_owned(),
            port,
            received,
            handle: Some(handle),
        }
    }

    pub fn received(&self) -> u16 {
        self.received.load(Ordering::Acquire)
    }

    /// Wait for every scripted session to complete.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}
