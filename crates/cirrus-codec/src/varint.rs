//! Unsigned LEB128 varints
//!
//! Each byte carries 7 bits of the value, least significant group first; a set
//! high bit means another byte follows.

use crate::error::{DecodeError, Result};

/// Longest encoding of a `u64`
pub const MAX_VARINT_LEN: usize = 10;

/// Decode a varint starting at `offset`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode(buf: &[u8], offset: usize) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;

    for i in 0..MAX_VARINT_LEN {
        let Some(&byte) = buf.get(offset + i) else {
            return Err(DecodeError::truncated("varint", offset));
        };
        let group = u64::from(byte & 0x7f);
        // the tenth byte only has room for the top bit of a u64
        if i == MAX_VARINT_LEN - 1 && group > 1 {
            return Err(DecodeError::Overlong { offset });
        }
        value |= group << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }

    Err(DecodeError::Overlong { offset })
}

/// Decode a varint that must fit in `usize` (lengths, sizes).
pub fn decode_usize(buf: &[u8], offset: usize) -> Result<(usize, usize)> {
    let (value, read) = decode(buf, offset)?;
    let value = usize::try_from(value).map_err(|_| DecodeError::Overlong { offset })?;
    Ok((value, read))
}

/// Write `value` into `buf` at `offset`, returning the number of bytes written.
///
/// # Panics
///
/// Panics if `buf` has fewer than [`encoding_length`] bytes after `offset`.
pub fn encode_to(value: u64, buf: &mut [u8], offset: usize) -> usize {
    let mut value = value;
    let mut pos = offset;
    while value >= 0x80 {
        buf[pos] = (value as u8 & 0x7f) | 0x80;
        value >>= 7;
        pos += 1;
    }
    buf[pos] = value as u8;
    pos + 1 - offset
}

/// Append the encoding of `value` to `out`.
pub fn encode_into(value: u64, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + encoding_length(value), 0);
    encode_to(value, out, start);
}

/// Number of bytes needed to encode `value`.
pub fn encoding_length(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}
