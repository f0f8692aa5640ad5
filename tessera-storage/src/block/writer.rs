//! Block writer: buffers raw bytes and emits `VLQ(len) || compressed` frames.

use std::io::Write;

use tessera_core::error::Result;
use tessera_core::varint::write_vlq;

use super::codec::{BlockCodec, Codec};

/// Compressing block writer
///
/// Entries are bracketed with [`begin_entry`](Self::begin_entry) /
/// [`end_entry`](Self::end_entry) so every block starts on an entry boundary.
/// An entry larger than a block spills into continuation blocks and the block
/// holding its tail is flushed as soon as the entry ends.
pub struct BlockWriter<W: Write> {
    inner: W,
    codec: Codec,
    buffer: Vec<u8>,
    scratch: Vec<u8>,
    block_size: usize,
    entries_in_block: u32,
    max_entries_per_block: u32,
    spilled: bool,
    bytes_written: u64,
    blocks_written: u64,
}

impl<W: Write> BlockWriter<W> {
    /// Create a new block writer with specified block size
    pub fn new(inner: W, codec: Codec, block_size: usize) -> Self {
        Self {
            inner,
            codec,
            buffer: Vec::with_capacity(block_size),
            scratch: vec![0u8; codec.max_compressed_len(block_size)],
            block_size,
            entries_in_block: 0,
            max_entries_per_block: 0,
            spilled: false,
            bytes_written: 0,
            blocks_written: 0,
        }
    }

    /// Carry over the high-water mark from an existing log
    pub fn with_max_entries(mut self, max_entries_per_block: u32) -> Self {
        self.max_entries_per_block = max_entries_per_block;
        self
    }

    /// Start an entry of `entry_len` raw bytes.
    ///
    /// Flushes the pending block first when the entry would straddle it.
    pub fn begin_entry(&mut self, entry_len: usize) -> Result<()> {
        if !self.buffer.is_empty() && self.buffer.len() + entry_len > self.block_size {
            self.flush_block()?;
        }
        self.entries_in_block += 1;
        self.max_entries_per_block = self.max_entries_per_block.max(self.entries_in_block);
        self.spilled = false;
        Ok(())
    }

    /// Append raw bytes of the current entry
    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let room = self.block_size - self.buffer.len();
            if room == 0 {
                self.flush_block()?;
                self.spilled = true;
                continue;
            }
            let n = room.min(data.len());
            self.buffer.extend_from_slice(&data[..n]);
            data = &data[n..];
        }
        Ok(())
    }

    /// Finish the current entry
    pub fn end_entry(&mut self) -> Result<()> {
        if self.spilled {
            self.flush_block()?;
            self.spilled = false;
        }
        Ok(())
    }

    /// Compress and emit the pending block, if any
    pub fn flush_block(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let len = self.codec.compress(&self.buffer, &mut self.scratch)?;
        let prefix = write_vlq(&mut self.inner, len as u64)?;
        self.inner.write_all(&self.scratch[..len])?;

        self.bytes_written += (prefix + len) as u64;
        self.blocks_written += 1;
        self.buffer.clear();
        self.entries_in_block = 0;
        Ok(())
    }

    /// Framed bytes handed to the inner writer so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Raw bytes waiting in the current block
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn max_entries_per_block(&self) -> u32 {
        self.max_entries_per_block
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}
