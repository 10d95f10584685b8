// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

//! Lazy cursor-paginated scans.
//!
//! Each iterator owns a command template whose cursor slot is rewritten in
//! place between pages; the literal cursor `0` coming back terminates the
//! scan. Iterators are restartable by construction: a freshly built one
//! always begins at cursor zero.

use std::vec::IntoIter;

use crate::cmd::{cmd, Cmd, ToArgs};
use crate::errors::{Error, Result};
use crate::types::Value;

use super::Client;

/// Drives one cursor template across pages.
struct PageDriver {
    template: Cmd,
    cursor: u64,
    exhausted: bool,
}

impl PageDriver {
    fn new(template: Cmd) -> PageDriver {
        PageDriver {
            template,
            cursor: 0,
            exhausted: false,
        }
    }

    fn fetch(&mut self, client: &mut Client) -> Result<Vec<Value>> {
        self.template.set_cursor(self.cursor);
        let reply = client.call(&self.template)?;
        let (cursor, items) = parse_scan_page(reply)?;
        if cursor == 0 {
            self.exhausted = true;
        }
        self.cursor = cursor;
        Ok(items)
    }
}

fn parse_scan_page(reply: Value) -> Result<(u64, Vec<Value>)> {
    let Value::Array(mut parts) = reply else {
        fail!(Error::Protocol("scan reply is not an array".into()));
    };
    if parts.len() != 2 {
        fail!(Error::Protocol("scan reply is not a two-element page".into()));
    }
    let items = match parts.pop() {
        Some(Value::Array(items)) => items,
        _ => fail!(Error::Protocol("scan page carries no element array".into())),
    };
    let cursor = match parts.pop() {
        Some(Value::Int(cursor)) if cursor >= 0 => cursor as u64,
        Some(value) => value
            .as_str()
            .and_then(|text| text.parse::<u64>().ok())
            .ok_or_else(|| Error::Protocol("invalid scan cursor".into()))?,
        None => fail!(Error::Protocol("invalid scan cursor".into())),
    };
    Ok((cursor, items))
}

/// Element-wise scan (`SCAN`, `SSCAN`). Yields elements in server order; a
/// mid-scan failure is yielded once, then the iterator ends.
pub struct ScanIter<'a> {
    client: &'a mut Client,
    pages: PageDriver,
    buffer: IntoIter<Value>,
}

impl<'a> ScanIter<'a> {
    fn new(client: &'a mut Client, template: Cmd) -> ScanIter<'a> {
        ScanIter {
            client,
            pages: PageDriver::new(template),
            buffer: Vec::new().into_iter(),
        }
    }
}

impl Iterator for ScanIter<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Result<Value>> {
        loop {
            if let Some(value) = self.buffer.next() {
                return Some(Ok(value));
            }
            if self.pages.exhausted {
                return None;
            }
            match self.pages.fetch(self.client) {
                Ok(items) => self.buffer = items.into_iter(),
                Err(err) => {
                    self.pages.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Pair-wise scan (`HSCAN`, `ZSCAN`): consumes two elements per yield, in
/// server order.
pub struct ScanPairs<'a> {
    client: &'a mut Client,
    pages: PageDriver,
    buffer: IntoIter<Value>,
}

impl<'a> ScanPairs<'a> {
    fn new(client: &'a mut Client, template: Cmd) -> ScanPairs<'a> {
        ScanPairs {
            client,
            pages: PageDriver::new(template),
            buffer: Vec::new().into_iter(),
        }
    }
}

impl Iterator for ScanPairs<'_> {
    type Item = Result<(Value, Value)>;

    fn next(&mut self) -> Option<Result<(Value, Value)>> {
        loop {
            if let Some(field) = self.buffer.next() {
                let Some(value) = self.buffer.next() else {
                    self.pages.exhausted = true;
                    return Some(Err(Error::Protocol(
                        "pair scan page with an odd element count".into(),
                    )));
                };
                return Some(Ok((field, value)));
            }
            if self.pages.exhausted {
                return None;
            }
            match self.pages.fetch(self.client) {
                Ok(items) => self.buffer = items.into_iter(),
                Err(err) => {
                    self.pages.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

fn keyspace_template<A: ToArgs>(args: A) -> Cmd {
    let mut template = cmd("SCAN");
    template.cursor_arg(0);
    template.arg(args);
    template
}

fn keyed_template<K: ToArgs, A: ToArgs>(name: &str, key: K, args: A) -> Cmd {
    let mut template = cmd(name);
    template.arg(key);
    template.cursor_arg(0);
    template.arg(args);
    template
}

impl Client {
    /// Iterate the keyspace (`SCAN`). Extra `args` follow the cursor
    /// (`("MATCH", pattern)`, `("COUNT", n)`, ...); pass `()` for none.
    pub fn scan<A: ToArgs>(&mut self, args: A) -> ScanIter<'_> {
        ScanIter::new(self, keyspace_template(args))
    }

    /// Drive a keyspace scan to completion through a consumer.
    pub fn scan_each<A: ToArgs>(&mut self, args: A, mut consumer: impl FnMut(Value)) -> Result<()> {
        for element in self.scan(args) {
            consumer(element?);
        }
        Ok(())
    }

    /// Iterate the members of a set (`SSCAN`).
    pub fn sscan<K: ToArgs, A: ToArgs>(&mut self, key: K, args: A) -> ScanIter<'_> {
        ScanIter::new(self, keyed_template("SSCAN", key, args))
    }

    pub fn sscan_each<K: ToArgs, A: ToArgs>(
        &mut self,
        key: K,
        args: A,
        mut consumer: impl FnMut(Value),
    ) -> Result<()> {
        for element in self.sscan(key, args) {
            consumer(element?);
        }
        Ok(())
    }

    /// Iterate the field/value pairs of a hash (`HSCAN`).
    pub fn hscan<K: ToArgs, A: ToArgs>(&mut self, key: K, args: A) -> ScanPairs<'_> {
        ScanPairs::new(self, keyed_template("HSCAN", key, args))
    }

    pub fn hscan_each<K: ToArgs, A: ToArgs>(
        &mut self,
        key: K,
        args: A,
        mut consumer: impl FnMut(Value, Value),
    ) -> Result<()> {
        for pair in self.hscan(key, args) {
            let (field, value) = pair?;
            consumer(field, value);
        }
        Ok(())
    }

    /// Iterate the member/score pairs of a sorted set (`ZSCAN`).
    pub fn zscan<K: ToArgs, A: ToArgs>(&mut self, key: K, args: A) -> ScanPairs<'_> {
        ScanPairs::new(self, keyed_template("ZSCAN", key, args))
    }

    pub fn zscan_each<K: ToArgs, A: ToArgs>(
        &mut self,
        key: K,
        args: A,
        mut consumer: impl FnMut(Value, Value),
    ) -> Result<()> {
        for pair in self.zscan(key, args) {
            let (member, score) = pair?;
            consumer(member, score);
        }
        Ok(())
    }
}
