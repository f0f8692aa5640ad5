//! # Variable-Length Quantities
//!
//! Unsigned LEB128-style encoding: seven data bits per byte, least
//! significant group first, high bit set on every byte except the last.
//!
//! ```text
//!   300 = 0b1_0010_1100
//!   ┌──────────┬──────────┐
//!   │ 1010_1100│ 0000_0010│
//!   └──────────┴──────────┘
//!    cont + 44   stop + 2
//! ```
//!
//! A `u64` needs at most ten bytes; values below 2^63 fit in nine. A stream
//! with a tenth continuation byte is rejected as [`Error::VarintOverflow`].

use std::io::{self, Read, Write};

use bytes::BufMut;

use crate::error::{Error, Result};

/// Longest encoding of a `u64`.
pub const MAX_VLQ_LEN: usize = 10;

/// Continuation bytes allowed before the terminating byte.
pub const MAX_CONTINUATION_BYTES: usize = MAX_VLQ_LEN - 1;

/// Number of bytes `value` occupies once encoded.
pub const fn vlq_size(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Encode into a fixed buffer, returning the number of bytes used.
pub fn encode_vlq(mut value: u64, buf: &mut [u8; MAX_VLQ_LEN]) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8 & 0x7f) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

/// Append the encoding to a growable buffer.
pub fn put_vlq<B: BufMut>(buf: &mut B, value: u64) {
    let mut scratch = [0u8; MAX_VLQ_LEN];
    let n = encode_vlq(value, &mut scratch);
    buf.put_slice(&scratch[..n]);
}

/// Write the encoding to a stream, returning the number of bytes written.
pub fn write_vlq<W: Write + ?Sized>(writer: &mut W, value: u64) -> io::Result<usize> {
    let mut scratch = [0u8; MAX_VLQ_LEN];
    let n = encode_vlq(value, &mut scratch);
    writer.write_all(&scratch[..n])?;
    Ok(n)
}

/// Write a 32-bit magnitude.
pub fn write_vlq_u32<W: Write + ?Sized>(writer: &mut W, value: u32) -> io::Result<usize> {
    write_vlq(writer, value as u64)
}

/// Decode from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` ends before the terminating byte, so callers
/// can map truncation to their own corruption error.
pub fn decode_vlq(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().enumerate() {
        if i == MAX_CONTINUATION_BYTES && byte > 1 {
            return Err(Error::VarintOverflow {
                max_continuation: MAX_CONTINUATION_BYTES,
            });
        }
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

/// Read one quantity from a stream.
pub fn read_vlq<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    let mut value = 0u64;
    let mut byte = [0u8; 1];
    for i in 0..MAX_VLQ_LEN {
        reader.read_exact(&mut byte)?;
        let b = byte[0];
        if i == MAX_CONTINUATION_BYTES && b > 1 {
            break;
        }
        value |= ((b & 0x7f) as u64) << (7 * i);
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::VarintOverflow {
        max_continuation: MAX_CONTINUATION_BYTES,
    })
}

/// Read a quantity that must fit a 32-bit magnitude.
pub fn read_vlq_u32<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    let value = read_vlq(reader)?;
    u32::try_from(value).map_err(|_| Error::VarintOverflow {
        max_continuation: 4,
    })
}
