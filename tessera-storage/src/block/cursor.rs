//! Block cursor: per-reader decode state over framed, compressed bytes.
//!
//! The bytes themselves live in a shared mapping ([`BlockSource`]); the cursor
//! only owns the decompressed block and a position inside it. Cloning a
//! cursor deep-copies that state, so two clones never share a decode buffer.

use tessera_core::error::{Error, Result};
use tessera_core::varint::decode_vlq;

use super::codec::{BlockCodec, Codec};

/// Read-only view of a framed block stream
#[derive(Clone, Copy)]
pub struct BlockSource<'a> {
    pub data: &'a [u8],
    pub codec: &'a Codec,
    pub block_size: usize,
    /// Offset one past the last valid frame
    pub end: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BlockCursor {
    block_offset: u64,
    next_block: u64,
    buffer: Vec<u8>,
    pos: usize,
    loaded: bool,
}

impl BlockCursor {
    /// Cursor whose first fill decodes the frame at `start`
    pub fn new(start: u64) -> Self {
        Self {
            block_offset: start,
            next_block: start,
            ..Default::default()
        }
    }

    /// Offset of the frame currently decoded
    pub fn block_offset(&self) -> u64 {
        self.block_offset
    }

    /// Decoded bytes not yet consumed
    pub fn remaining(&self) -> usize {
        if self.loaded {
            self.buffer.len() - self.pos
        } else {
            0
        }
    }

    /// Position at the start of the frame at `offset`, decoding it unless it
    /// is the frame already held.
    pub fn seek_block(&mut self, src: &BlockSource<'_>, offset: u64) -> Result<()> {
        if self.loaded && self.block_offset == offset {
            self.pos = 0;
            return Ok(());
        }
        self.load(src, offset)
    }

    /// Make at least one decoded byte available, moving to following frames
    /// as needed. Returns `false` at the end of the stream.
    pub fn fill(&mut self, src: &BlockSource<'_>) -> Result<bool> {
        while self.remaining() == 0 {
            if self.next_block >= src.end {
                return Ok(false);
            }
            self.load(src, self.next_block)?;
        }
        Ok(true)
    }

    pub fn read_u8(&mut self, src: &BlockSource<'_>) -> Result<u8> {
        if !self.fill(src)? {
            return Err(unexpected_end(self.next_block));
        }
        let b = self.buffer[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Read a VLQ that may straddle two frames
    pub fn read_vlq(&mut self, src: &BlockSource<'_>) -> Result<u64> {
        if self.fill(src)? {
            if let Some((value, n)) = decode_vlq(&self.buffer[self.pos..])? {
                self.pos += n;
                return Ok(value);
            }
        }
        let mut raw = Vec::with_capacity(tessera_core::varint::MAX_VLQ_LEN);
        loop {
            let b = self.read_u8(src)?;
            raw.push(b);
            if let Some((value, _)) = decode_vlq(&raw)? {
                return Ok(value);
            }
        }
    }

    /// Copy up to `out.len()` bytes, crossing frames; returns bytes copied.
    pub fn read(&mut self, src: &BlockSource<'_>, out: &mut [u8]) -> Result<usize> {
        let mut copied = 0;
        while copied < out.len() {
            if !self.fill(src)? {
                break;
            }
            let n = self.remaining().min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
            self.pos += n;
            copied += n;
        }
        Ok(copied)
    }

    pub fn read_exact(&mut self, src: &BlockSource<'_>, out: &mut [u8]) -> Result<()> {
        if self.read(src, out)? != out.len() {
            return Err(unexpected_end(self.next_block));
        }
        Ok(())
    }

    /// Skip `n` decoded bytes without copying
    pub fn skip(&mut self, src: &BlockSource<'_>, mut n: u64) -> Result<()> {
        while n > 0 {
            if !self.fill(src)? {
                return Err(unexpected_end(self.next_block));
            }
            let step = (self.remaining() as u64).min(n);
            self.pos += step as usize;
            n -= step;
        }
        Ok(())
    }

    /// Compare the next `expected.len()` bytes against `expected`, consuming
    /// them either way.
    pub fn consume_eq(&mut self, src: &BlockSource<'_>, mut expected: &[u8]) -> Result<bool> {
        let mut equal = true;
        while !expected.is_empty() {
            if !self.fill(src)? {
                return Err(unexpected_end(self.next_block));
            }
            let n = self.remaining().min(expected.len());
            if equal && self.buffer[self.pos..self.pos + n] != expected[..n] {
                equal = false;
            }
            self.pos += n;
            expected = &expected[n..];
        }
        Ok(equal)
    }

    fn load(&mut self, src: &BlockSource<'_>, offset: u64) -> Result<()> {
        let start = offset as usize;
        if offset >= src.end || start >= src.data.len() {
            return Err(Error::LogCorruption {
                details: format!("block offset {} beyond data end {}", offset, src.end),
            });
        }

        let (len, prefix) = decode_vlq(&src.data[start..])?.ok_or_else(|| Error::LogCorruption {
            details: format!("truncated block header at {}", offset),
        })?;
        let body_start = start + prefix;
        let body_end = body_start as u64 + len;
        if body_end > src.end || body_end > src.data.len() as u64 {
            return Err(Error::LogCorruption {
                details: format!(
                    "block at {} with {} bytes runs past data end {}",
                    offset, len, src.end
                ),
            });
        }

        self.buffer.resize(src.block_size, 0);
        let n = src
            .codec
            .decompress(&src.data[body_start..body_end as usize], &mut self.buffer)?;
        self.buffer.truncate(n);

        self.block_offset = offset;
        self.next_block = body_end;
        self.pos = 0;
        self.loaded = true;
        Ok(())
    }
}

fn unexpected_end(at: u64) -> Error {
    Error::LogCorruption {
        details: format!("unexpected end of block stream at {}", at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::codec::SnappyCodec;
    use crate::block::writer::BlockWriter;

    fn framed(entries: &[&[u8]], block_size: usize) -> Vec<u8> {
        let mut writer = BlockWriter::new(Vec::new(), Codec::Snappy(SnappyCodec), block_size);
        for entry in entries {
            writer.begin_entry(entry.len()).unwrap();
            writer.write(entry).unwrap();
            writer.end_entry().unwrap();
        }
        writer.flush_block().unwrap();
        writer.get_ref().clone()
    }

    #[test]
    fn test_read_across_frames() {
        let codec = Codec::Snappy(SnappyCodec);
        let data = framed(&[b"hello", b"world", b"0123456789abcdef-tail"], 12);
        let src = BlockSource {
            data: &data,
            codec: &codec,
            block_size: 12,
            end: data.len() as u64,
        };

        let mut cursor = BlockCursor::new(0);
        let mut all = vec![0u8; 31];
        cursor.read_exact(&src, &mut all).unwrap();
        assert_eq!(&all[..], b"helloworld0123456789abcdef-tail");
        assert!(!cursor.fill(&src).unwrap());
        assert!(cursor.read_u8(&src).is_err());
    }

    #[test]
    fn test_clone_keeps_independent_position() {
        let codec = Codec::Snappy(SnappyCodec);
        let data = framed(&[b"abcdef"], 16);
        let src = BlockSource {
            data: &data,
            codec: &codec,
            block_size: 16,
            end: data.len() as u64,
        };

        let mut a = BlockCursor::new(0);
        assert_eq!(a.read_u8(&src).unwrap(), b'a');
        let mut b = a.clone();
        assert_eq!(a.read_u8(&src).unwrap(), b'b');
        assert_eq!(a.read_u8(&src).unwrap(), b'c');
        assert_eq!(b.read_u8(&src).unwrap(), b'b');
    }

    #[test]
    fn test_seek_reuses_loaded_frame() {
        let codec = Codec::Snappy(SnappyCodec);
        let data = framed(&[b"abc", b"def"], 16);
        let src = BlockSource {
            data: &data,
            codec: &codec,
            block_size: 16,
            end: data.len() as u64,
        };

        let mut cursor = BlockCursor::new(0);
        cursor.skip(&src, 4).unwrap();
        cursor.seek_block(&src, 0).unwrap();
        assert!(cursor.consume_eq(&src, b"abc").unwrap());
        assert!(!cursor.consume_eq(&src, b"dxf").unwrap());
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_truncated_stream_is_corruption() {
        let codec = Codec::Snappy(SnappyCodec);
        let data = framed(&[b"abcdef"], 16);
        let src = BlockSource {
            data: &data[..data.len() - 2],
            codec: &codec,
            block_size: 16,
            end: data.len() as u64,
        };
        let mut cursor = BlockCursor::new(0);
        let err = cursor.fill(&src).unwrap_err();
        assert!(err.is_corruption());
    }
}
