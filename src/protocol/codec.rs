//! PostgreSQL wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers.

use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I16, I32, U16, U32};

use crate::error::{Error, Result};

/// Size of the header of every typed backend message: type byte + length.
pub const HEADER_LEN: usize = 5;

/// Forward-only cursor over a message payload.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Peek the next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn u8(&mut self) -> Result<u8> {
        let (&byte, rest) = self
            .data
            .split_first()
            .ok_or_else(|| Error::Protocol("read_u8: empty buffer".into()))?;
        self.data = rest;
        Ok(byte)
    }

    pub fn i16(&mut self) -> Result<i16> {
        let (value, rest) = I16::read_from_prefix(self.data)
            .map_err(|_| short_buffer("read_i16", self.data.len(), 2))?;
        self.data = rest;
        Ok(value.get())
    }

    pub fn u16(&mut self) -> Result<u16> {
        let (value, rest) = U16::read_from_prefix(self.data)
            .map_err(|_| short_buffer("read_u16", self.data.len(), 2))?;
        self.data = rest;
        Ok(value.get())
    }

    pub fn i32(&mut self) -> Result<i32> {
        let (value, rest) = I32::read_from_prefix(self.data)
            .map_err(|_| short_buffer("read_i32", self.data.len(), 4))?;
        self.data = rest;
        Ok(value.get())
    }

    pub fn u32(&mut self) -> Result<u32> {
        let (value, rest) = U32::read_from_prefix(self.data)
            .map_err(|_| short_buffer("read_u32", self.data.len(), 4))?;
        self.data = rest;
        Ok(value.get())
    }

    /// Read exactly `len` bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let (head, rest) = self
            .data
            .split_at_checked(len)
            .ok_or_else(|| short_buffer("read_bytes", self.data.len(), len))?;
        self.data = rest;
        Ok(head)
    }

    /// Read a null-terminated byte string, without the terminator.
    pub fn cstring(&mut self) -> Result<&'a [u8]> {
        let pos = memchr::memchr(0, self.data)
            .ok_or_else(|| Error::Protocol("read_cstring: no null terminator found".into()))?;
        let (head, rest) = self.data.split_at(pos);
        self.data = &rest[1..];
        Ok(head)
    }

    /// Read a null-terminated UTF-8 string.
    pub fn cstr(&mut self) -> Result<&'a str> {
        let bytes = self.cstring()?;
        simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))
    }
}

fn short_buffer(what: &str, have: usize, need: usize) -> Error {
    Error::Protocol(format!("{what}: buffer too short: {have} < {need}"))
}

/// Locate the first complete typed message at the start of `buf`.
///
/// Returns the type byte and the total frame length (header included), or
/// `None` when more bytes are needed.
pub fn frame_len(buf: &[u8]) -> Result<Option<(u8, usize)>> {
    let Some((&type_byte, rest)) = buf.split_first() else {
        return Ok(None);
    };
    let Ok((len, _)) = I32::read_from_prefix(rest) else {
        return Ok(None);
    };
    let len = len.get();
    if len < 4 {
        return Err(Error::Protocol(format!("Invalid message length: {len}")));
    }
    let total = len as usize + 1;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some((type_byte, total)))
}

/// Message builder that back-fills the length field.
///
/// PostgreSQL message format:
/// - Type byte (1 byte) - NOT included in length
/// - Length (4 bytes) - includes itself
/// - Payload (Length - 4 bytes)
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start a typed message.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::untyped(buf)
    }

    /// Start a message without a type byte (startup, SSL and cancel requests).
    pub fn untyped(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0; 4]);
        Self { buf, start }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn cstr(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self
    }

    /// Fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}
