//! Wire primitives.
//!
//! The wire format is MessagePack restricted to integers, strings, arrays and
//! maps, written with `rmp`. Every writer emits the smallest form that holds
//! the value, so the host's output is byte-identical to other compact
//! MessagePack encoders.
//!
//! All functions append to a caller-provided `&mut Vec<u8>` buffer.

use rmp::encode::{self, ByteBuf, ValueWriteError};
use std::convert::Infallible;
use std::mem;

/// Runs an `rmp` writer against `buf`.
///
/// `ByteBuf` writes into memory and so its error type is uninhabited.
fn append<T>(buf: &mut Vec<u8>, write: impl FnOnce(&mut ByteBuf) -> Result<T, ValueWriteError<Infallible>>) {
    let mut out = ByteBuf::from_vec(mem::take(buf));
    let result = write(&mut out);
    *buf = out.into_vec();
    if let Err(ValueWriteError::InvalidMarkerWrite(never) | ValueWriteError::InvalidDataWrite(never)) = result {
        match never {}
    }
}

// ---------------------------------------------------------------------------
// Compact integers
// ---------------------------------------------------------------------------

/// Appends the compact encoding of an i32.
///
/// Non-negative values use the unsigned families, negative values the
/// signed ones; -32..=127 fit in the marker byte itself.
pub fn write_int(buf: &mut Vec<u8>, v: i32) {
    append(buf, |out| encode::write_sint(out, i64::from(v)));
}

// ---------------------------------------------------------------------------
// Length prefixes
// ---------------------------------------------------------------------------

/// Appends a string header for `len` bytes of UTF-8.
pub fn write_str_len(buf: &mut Vec<u8>, len: u32) {
    append(buf, |out| encode::write_str_len(out, len));
}

/// Appends a length-prefixed UTF-8 string.
///
/// The caller guarantees `s.len()` fits in a u32.
pub fn write_str(buf: &mut Vec<u8>, s: &str) {
    append(buf, |out| encode::write_str(out, s));
}

/// Appends an array header for `len` elements.
pub fn write_array_len(buf: &mut Vec<u8>, len: u32) {
    append(buf, |out| encode::write_array_len(out, len));
}

/// Appends a map header for `len` key/value entries.
pub fn write_map_len(buf: &mut Vec<u8>, len: u32) {
    append(buf, |out| encode::write_map_len(out, len));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
