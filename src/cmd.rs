// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

//! Command building and argument coercion.
//!
//! A [`Cmd`] is a validated argument vector, stored as one contiguous byte
//! buffer plus per-argument spans. Scan templates reserve a dedicated cursor
//! slot ([`Cmd::cursor_arg`]) that is rewritten in place between pages
//! instead of rebuilding the command.

use std::ops::Range;

/// Shortcut for starting a new command:
///
/// ```rust
/// let mut set = keyline::cmd("SET");
/// set.arg("key").arg(42);
/// assert_eq!(set.len(), 3);
/// ```
pub fn cmd(name: &str) -> Cmd {
    let mut command = Cmd::new();
    command.arg(name);
    command
}

#[derive(Debug, Clone, Default)]
pub struct Cmd {
    data: Vec<u8>,
    args: Vec<Arg>,
    cursor: Option<u64>,
}

#[derive(Debug, Clone)]
pub(crate) enum Arg {
    Simple(Range<usize>),
    Cursor,
}

impl Cmd {
    pub fn new() -> Cmd {
        Cmd {
            data: Vec::new(),
            args: Vec::new(),
            cursor: None,
        }
    }

    /// Append one or more arguments. Nested groups (slices, vecs, options,
    /// tuples) are flattened into individual tokens.
    pub fn arg<T: ToArgs>(&mut self, arg: T) -> &mut Cmd {
        arg.write_args(self);
        self
    }

    /// Reserve the cursor slot used by `SCAN`-family templates and set its
    /// initial position.
    pub fn cursor_arg(&mut self, cursor: u64) -> &mut Cmd {
        self.cursor = Some(cursor);
        self.args.push(Arg::Cursor);
        self
    }

    pub(crate) fn set_cursor(&mut self, cursor: u64) {
        self.cursor = Some(cursor);
    }

    /// Number of argument tokens, the cursor slot included.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Materialize the argument tokens. The cursor slot renders as its
    /// current numeric position.
    pub fn args_vec(&self) -> Vec<Vec<u8>> {
        let mut buffer = itoa::Buffer::new();
        self.args
            .iter()
            .map(|arg| match arg {
                Arg::Simple(range) => self.data[range.clone()].to_vec(),
                Arg::Cursor => buffer.format(self.cursor.unwrap_or(0)).as_bytes().to_vec(),
            })
            .collect()
    }

    /// The command name (first argument), when present.
    pub fn name(&self) -> Option<&[u8]> {
        match self.args.first() {
            Some(Arg::Simple(range)) => Some(&self.data[range.clone()]),
            _ => None,
        }
    }

    /// Render the RESP wire form of this command.
    pub fn get_packed_command(&self) -> Vec<u8> {
        let mut out = Vec::new();
        crate::codec::encode_command(self, &mut out);
        out
    }

    pub(crate) fn args_spans(&self) -> &[Arg] {
        &self.args
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn cursor(&self) -> Option<u64> {
        self.cursor
    }
}

/// Sink for coerced argument tokens.
pub trait ArgWrite {
    fn write_arg(&mut self, arg: &[u8]);
}

impl ArgWrite for Cmd {
    fn write_arg(&mut self, arg: &[u8]) {
        let start = self.data.len();
        self.data.extend_from_slice(arg);
        self.args.push(Arg::Simple(start..self.data.len()));
    }
}

impl ArgWrite for Vec<Vec<u8>> {
    fn write_arg(&mut self, arg: &[u8]) {
        self.push(arg.to_vec());
    }
}

/// Types that coerce into command argument tokens.
pub trait ToArgs {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W);
}

impl ToArgs for str {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
        out.write_arg(self.as_bytes());
    }
}

impl ToArgs for &str {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
        out.write_arg(self.as_bytes());
    }
}

impl ToArgs for String {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
        out.write_arg(self.as_bytes());
    }
}

impl ToArgs for &String {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
        out.write_arg(self.as_bytes());
    }
}

impl ToArgs for &[u8] {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
        out.write_arg(self);
    }
}

impl ToArgs for Vec<u8> {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
        out.write_arg(self);
    }
}

impl ToArgs for bool {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
        out.write_arg(if *self { b"1" } else { b"0" });
    }
}

macro_rules! itoa_to_args {
    ($($ty:ty),* $(,)?) => {
        $(impl ToArgs for $ty {
            fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
                let mut buffer = itoa::Buffer::new();
                out.write_arg(buffer.format(*self).as_bytes());
            }
        })*
    };
}

itoa_to_args!(i16, u16, i32, u32, i64, u64, isize, usize);

macro_rules! ryu_to_args {
    ($($ty:ty),* $(,)?) => {
        $(impl ToArgs for $ty {
            fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
                let mut buffer = ryu::Buffer::new();
                out.write_arg(buffer.format(*self).as_bytes());
            }
        })*
    };
}

ryu_to_args!(f32, f64);

impl<T: ToArgs> ToArgs for Option<T> {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
        if let Some(value) = self {
            value.write_args(out);
        }
    }
}

impl ToArgs for () {
    fn write_args<W: ArgWrite + ?Sized>(&self, _out: &mut W) {}
}

macro_rules! flatten_to_args {
    ($($ty:ty),* $(,)?) => {
        $(impl ToArgs for $ty {
            fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
                for item in self.iter() {
                    item.write_args(out);
                }
            }
        })*
    };
}

flatten_to_args!(&[&str], Vec<&str>, &[String], Vec<String>);

impl<A: ToArgs, B: ToArgs> ToArgs for (A, B) {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
        self.0.write_args(out);
        self.1.write_args(out);
    }
}

impl<A: ToArgs, B: ToArgs, C: ToArgs> ToArgs for (A, B, C) {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
        self.0.write_args(out);
        self.1.write_args(out);
        self.2.write_args(out);
    }
}

impl<A: ToArgs, B: ToArgs, C: ToArgs, D: ToArgs> ToArgs for (A, B, C, D) {
    fn write_args<W: ArgWrite + ?Sized>(&self, out: &mut W) {
        self.0.write_args(out);
        self.1.write_args(out);
        self.2.write_args(out);
        self.3.write_args(out);
    }
}
