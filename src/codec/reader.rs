//! Positioned reader over wire bytes.
//!
//! Reads never backtrack. Every failure reports the byte offset it happened
//! at so a malformed guest response can be located in a hex dump.

use crate::error::DecodeError;
use rmp::decode::bytes::BytesReadError;
use rmp::decode::{self, Bytes, NumValueReadError, ValueReadError};
use rmp::Marker;

pub struct Reader<'a> {
    bytes: Bytes<'a>,
    len: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader {
            bytes: Bytes::new(bytes),
            len: bytes.len(),
        }
    }
}

impl<'a> Reader<'a> {
    // Basic operations --------------------------------------------------------
    pub fn pos(&self) -> usize {
        self.len - self.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.bytes.remaining_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let rest = self.bytes.remaining_slice();
        if len > rest.len() {
            return Err(DecodeError::UnexpectedEof {
                at: self.pos(),
                needed: len - rest.len(),
            });
        }
        let (slice, tail) = rest.split_at(len);
        self.bytes = Bytes::new(tail);
        Ok(slice)
    }

    // Values ------------------------------------------------------------------

    /// Reads any integer family into an i32.
    pub fn read_int(&mut self) -> Result<i32, DecodeError> {
        let at = self.pos();
        decode::read_int(&mut self.bytes).map_err(|err| match err {
            NumValueReadError::InvalidMarkerRead(e) | NumValueReadError::InvalidDataRead(e) => self.eof(e),
            NumValueReadError::TypeMismatch(marker) => unexpected(at, marker, "int"),
            NumValueReadError::OutOfRange => DecodeError::IntegerOverflow { at },
        })
    }

    /// Reads a str or bin payload as UTF-8 text.
    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let at = self.pos();
        let start = self.bytes;
        let len = match decode::read_str_len(&mut self.bytes) {
            Err(ValueReadError::TypeMismatch(Marker::Bin8 | Marker::Bin16 | Marker::Bin32)) => {
                self.bytes = start;
                decode::read_bin_len(&mut self.bytes)
            }
            other => other,
        }
        .map_err(|err| self.value_error(at, err, "string"))?;

        let payload_at = self.pos();
        let bytes = self.read_slice(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { at: payload_at })
    }

    /// Reads an array header; the count is checked against the bytes left
    /// (every element takes at least one byte).
    pub fn read_array_len(&mut self) -> Result<u32, DecodeError> {
        let at = self.pos();
        let count = decode::read_array_len(&mut self.bytes).map_err(|err| self.value_error(at, err, "array"))?;
        self.check_count(at, count as u64, count as u64)?;
        Ok(count)
    }

    /// Reads a map header; every entry takes at least two bytes.
    pub fn read_map_len(&mut self) -> Result<u32, DecodeError> {
        let at = self.pos();
        let count = decode::read_map_len(&mut self.bytes).map_err(|err| self.value_error(at, err, "map"))?;
        self.check_count(at, count as u64, count as u64 * 2)?;
        Ok(count)
    }

    fn check_count(&self, at: usize, count: u64, min_bytes: u64) -> Result<(), DecodeError> {
        if min_bytes > self.remaining() as u64 {
            return Err(DecodeError::CountOverflow {
                at,
                count,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    // Errors ------------------------------------------------------------------

    fn value_error(&self, at: usize, err: ValueReadError<BytesReadError>, expected: &str) -> DecodeError {
        match err {
            ValueReadError::InvalidMarkerRead(e) | ValueReadError::InvalidDataRead(e) => self.eof(e),
            ValueReadError::TypeMismatch(marker) => unexpected(at, marker, expected),
        }
    }

    /// A short read leaves the input where it was, so the current position is
    /// where the missing bytes start.
    fn eof(&self, err: BytesReadError) -> DecodeError {
        let needed = match err {
            BytesReadError::InsufficientBytes { expected, actual, .. } => expected - actual,
            _ => 1,
        };
        DecodeError::UnexpectedEof {
            at: self.pos(),
            needed,
        }
    }
}

fn unexpected(at: usize, marker: Marker, expected: &str) -> DecodeError {
    DecodeError::UnexpectedMarker {
        at,
        marker: marker.to_u8(),
        expected: expected.to_string(),
    }
}
