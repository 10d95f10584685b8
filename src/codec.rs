// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

//! RESP wire encoding and decoding.
//!
//! Commands are always written as arrays of bulk strings. Replies are
//! decoded from either RESP2 or RESP3 framing; the decoder does not need to
//! know which protocol was negotiated, every type byte is always accepted.
//! Server error replies (`-`, `!`) decode to in-band
//! [`Value::ServerError`] at any nesting depth.

use std::io::BufRead;

use crate::cmd::{Arg, Cmd};
use crate::errors::{CommandError, Error, Result};
use crate::types::Value;

const CRLF: &[u8] = b"\r\n";

/// Append the packed wire form of `command` to `out`.
pub fn encode_command(command: &Cmd, out: &mut Vec<u8>) {
    let mut count = itoa::Buffer::new();
    out.push(b'*');
    out.extend_from_slice(count.format(command.len()).as_bytes());
    out.extend_from_slice(CRLF);
    for arg in command.args_spans() {
        match arg {
            Arg::Simple(range) => write_bulk(out, &command.data()[range.clone()]),
            Arg::Cursor => {
                let mut cursor = itoa::Buffer::new();
                write_bulk(out, cursor.format(command.cursor().unwrap_or(0)).as_bytes());
            }
        }
    }
}

fn write_bulk(out: &mut Vec<u8>, payload: &[u8]) {
    let mut len = itoa::Buffer::new();
    out.push(b'$');
    out.extend_from_slice(len.format(payload.len()).as_bytes());
    out.extend_from_slice(CRLF);
    out.extend_from_slice(payload);
    out.extend_from_slice(CRLF);
}

/// Append the RESP3 wire form of `value` to `out`. Used by tests and tools
/// that have to impersonate a server.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) {
    let mut ints = itoa::Buffer::new();
    match value {
        Value::Nil => out.extend_from_slice(b"_\r\n"),
        Value::Okay => out.extend_from_slice(b"+OK\r\n"),
        Value::Int(i) => {
            out.push(b':');
            out.extend_from_slice(ints.format(*i).as_bytes());
            out.extend_from_slice(CRLF);
        }
        Value::Double(d) => {
            let mut floats = ryu::Buffer::new();
            out.push(b',');
            out.extend_from_slice(floats.format(*d).as_bytes());
            out.extend_from_slice(CRLF);
        }
        Value::Boolean(b) => out.extend_from_slice(if *b { b"#t\r\n" } else { b"#f\r\n" }),
        Value::SimpleString(s) => {
            out.push(b'+');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(CRLF);
        }
        Value::BulkString(b) => write_bulk(out, b),
        Value::Array(items) => {
            out.push(b'*');
            out.extend_from_slice(ints.format(items.len()).as_bytes());
            out.extend_from_slice(CRLF);
            for item in items {
                encode_value(item, out);
            }
        }
        Value::Map(pairs) => {
            out.push(b'%');
            out.extend_from_slice(ints.format(pairs.len()).as_bytes());
            out.extend_from_slice(CRLF);
            for (key, val) in pairs {
                encode_value(key, out);
                encode_value(val, out);
            }
        }
        Value::Set(items) => {
            out.push(b'~');
            out.extend_from_slice(ints.format(items.len()).as_bytes());
            out.extend_from_slice(CRLF);
            for item in items {
                encode_value(item, out);
            }
        }
        Value::BigNumber(n) => {
            out.push(b'(');
            out.extend_from_slice(n.as_bytes());
            out.extend_from_slice(CRLF);
        }
        Value::Verbatim { format, text } => {
            out.push(b'=');
            out.extend_from_slice(ints.format(format.len() + 1 + text.len()).as_bytes());
            out.extend_from_slice(CRLF);
            out.extend_from_slice(format.as_bytes());
            out.push(b':');
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(CRLF);
        }
        Value::Push(items) => {
            out.push(b'>');
            out.extend_from_slice(ints.format(items.len()).as_bytes());
            out.extend_from_slice(CRLF);
            for item in items {
                encode_value(item, out);
            }
        }
        Value::ServerError(err) => {
            out.push(b'-');
            out.extend_from_slice(err.message().as_bytes());
            out.extend_from_slice(CRLF);
        }
    }
}

/// Decode the next reply from `reader`, blocking until one full value is
/// available or the socket read deadline expires.
pub fn decode_value<R: BufRead>(reader: &mut R) -> Result<Value> {
    let line = read_line(reader)?;
    let Some((&tag, rest)) = line.split_first() else {
        fail!(Error::Protocol("empty reply line".into()));
    };
    match tag {
        b'+' => {
            if rest == b"OK" {
                Ok(Value::Okay)
            } else {
                Ok(Value::SimpleString(as_text(rest)?.to_owned()))
            }
        }
        b'-' => Ok(Value::ServerError(CommandError::parse(as_text(rest)?))),
        b':' => Ok(Value::Int(parse_int(rest)?)),
        b'$' => {
            if rest == b"-1" {
                return Ok(Value::Nil);
            }
            Ok(Value::BulkString(read_payload(reader, parse_len(rest)?)?))
        }
        b'*' => {
            if rest == b"-1" {
                return Ok(Value::Nil);
            }
            Ok(Value::Array(decode_values(reader, parse_len(rest)?)?))
        }
        b'%' => {
            let len = parse_len(rest)?;
            let mut pairs = Vec::with_capacity(len);
            for _ in 0..len {
                let key = decode_value(reader)?;
                let value = decode_value(reader)?;
                pairs.push((key, value));
            }
            Ok(Value::Map(pairs))
        }
        b'~' => Ok(Value::Set(decode_values(reader, parse_len(rest)?)?)),
        b'>' => Ok(Value::Push(decode_values(reader, parse_len(rest)?)?)),
        b'#' => match rest {
            b"t" => Ok(Value::Boolean(true)),
            b"f" => Ok(Value::Boolean(false)),
            _ => fail!(Error::Protocol("invalid boolean reply".into())),
        },
        b',' => {
            let text = as_text(rest)?;
            let value = text
                .parse::<f64>()
                .map_err(|_| Error::Protocol(format!("invalid double reply `{text}`")))?;
            Ok(Value::Double(value))
        }
        b'_' => Ok(Value::Nil),
        b'(' => Ok(Value::BigNumber(as_text(rest)?.to_owned())),
        b'!' => {
            let payload = read_payload(reader, parse_len(rest)?)?;
            Ok(Value::ServerError(CommandError::parse(as_text(&payload)?)))
        }
        b'=' => {
            let payload = read_payload(reader, parse_len(rest)?)?;
            let text = as_text(&payload)?;
            let Some((format, body)) = text.split_once(':') else {
                fail!(Error::Protocol("verbatim string without format prefix".into()));
            };
            Ok(Value::Verbatim {
                format: format.to_owned(),
                text: body.to_owned(),
            })
        }
        other => fail!(Error::Protocol(format!(
            "unknown reply type byte `{}`",
            char::from(other)
        ))),
    }
}

fn decode_values<R: BufRead>(reader: &mut R, len: usize) -> Result<Vec<Value>> {
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(decode_value(reader)?);
    }
    Ok(items)
}

/// Read one CRLF-terminated line, without the terminator.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    let read = reader
        .read_until(b'\n', &mut line)
        .map_err(Error::read_error)?;
    if read == 0 {
        fail!(Error::Connection("server closed the connection".into()));
    }
    if !line.ends_with(b"\r\n") {
        fail!(Error::Protocol("reply line without CRLF terminator".into()));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

/// Read a length-prefixed payload and its trailing CRLF.
fn read_payload<R: BufRead>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut payload = vec![0; len + 2];
    reader.read_exact(&mut payload).map_err(Error::read_error)?;
    if !payload.ends_with(b"\r\n") {
        fail!(Error::Protocol("bulk payload without CRLF terminator".into()));
    }
    payload.truncate(len);
    Ok(payload)
}

fn as_text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| Error::Protocol("reply is not valid UTF-8".into()))
}

fn parse_int(bytes: &[u8]) -> Result<i64> {
    as_text(bytes)?
        .parse::<i64>()
        .map_err(|_| Error::Protocol("invalid integer reply".into()))
}

fn parse_len(bytes: &[u8]) -> Result<usize> {
    as_text(bytes)?
        .parse::<usize>()
        .map_err(|_| Error::Protocol("invalid length prefix".into()))
}
