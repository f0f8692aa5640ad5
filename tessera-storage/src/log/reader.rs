//! Memory-mapped log reader
//!
//! The mapping and the parsed header live in a shared [`LogBacking`]; a
//! [`LogReader`] adds a private cursor on top. Duplicating a reader clones the
//! cursor (and for compressed logs its decoded block) but never the mapping.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::{Mmap, MmapOptions};
use tracing::debug;

use tessera_core::error::{Error, IoResultExt, Result};
use tessera_core::varint::decode_vlq;
use tessera_core::Metrics;

use crate::block::{BlockCursor, BlockSource, Codec};
use crate::log::header::{LogHeader, LOG_HEADER_SIZE};
use crate::log::iterator::LogIterator;
use crate::log::record::{RecordHeader, RecordKind};

pub(crate) struct LogBacking {
    path: PathBuf,
    mmap: Mmap,
    header: LogHeader,
    codec: Option<Codec>,
    metrics: Metrics,
}

impl Drop for LogBacking {
    fn drop(&mut self) {
        self.metrics.map_closed(self.mmap.len() as u64);
    }
}

fn block_source(backing: &LogBacking, end: u64) -> Result<BlockSource<'_>> {
    let codec = backing.codec.as_ref().ok_or_else(|| Error::LogCorruption {
        details: "block cursor over an uncompressed log".to_string(),
    })?;
    Ok(BlockSource {
        data: &backing.mmap,
        codec,
        block_size: backing.header.compression_block_size as usize,
        end,
    })
}

#[derive(Debug, Clone)]
enum LogCursor {
    Plain { pos: u64 },
    Blocked(BlockCursor),
}

/// Read handle over one log file
#[derive(Clone)]
pub struct LogReader {
    backing: Arc<LogBacking>,
    cursor: LogCursor,
    /// Reads never go past this offset
    end: u64,
    /// Unread bytes of the value the cursor is parked on
    pending: u64,
}

impl LogReader {
    /// Open a log for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_metrics(path, Metrics::new())
    }

    pub fn open_with_metrics(path: impl AsRef<Path>, metrics: Metrics) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).io_context(|| format!("Failed to open log {}", path.display()))?;
        let file_size = file.metadata()?.len();
        if file_size < LOG_HEADER_SIZE as u64 {
            return Err(Error::LogFormat {
                message: format!("log file too small: {} bytes", file_size),
            });
        }

        // Memory-map the file
        let mmap = unsafe {
            MmapOptions::new().map(&file).map_err(|e| Error::Io {
                message: "Failed to mmap log".to_string(),
                source: e,
            })?
        };

        let header = LogHeader::decode(&mmap)?;
        if header.data_end > file_size {
            return Err(Error::LogFormat {
                message: format!(
                    "data end {} beyond file length {}",
                    header.data_end, file_size
                ),
            });
        }

        // The level only matters when compressing
        let codec = Codec::for_type(header.compression_type, 0);
        metrics.map_opened(file_size);
        debug!(
            path = %path.display(),
            data_end = header.data_end,
            puts = header.num_puts,
            deletes = header.num_deletes,
            "Opened log"
        );

        let backing = Arc::new(LogBacking {
            path,
            mmap,
            header,
            codec,
            metrics,
        });
        Ok(Self::with_backing(backing))
    }

    fn with_backing(backing: Arc<LogBacking>) -> Self {
        let end = backing.header.data_end;
        let cursor = Self::cursor_at(&backing, LOG_HEADER_SIZE as u64);
        Self {
            backing,
            cursor,
            end,
            pending: 0,
        }
    }

    fn cursor_at(backing: &LogBacking, offset: u64) -> LogCursor {
        if backing.codec.is_some() {
            LogCursor::Blocked(BlockCursor::new(offset))
        } else {
            LogCursor::Plain { pos: offset }
        }
    }

    pub fn header(&self) -> &LogHeader {
        &self.backing.header
    }

    pub fn path(&self) -> &Path {
        &self.backing.path
    }

    /// Size of the shared mapping
    pub fn mapped_bytes(&self) -> u64 {
        self.backing.mmap.len() as u64
    }

    /// Independent cursor over the same mapping
    pub fn duplicate(&self) -> LogReader {
        self.clone()
    }

    /// Scan every record from the start of the log
    pub fn iter(&self) -> LogIterator {
        let mut reader = self.clone();
        reader.rewind(LOG_HEADER_SIZE as u64);
        LogIterator::new(reader)
    }

    /// Scan from `offset`, which must be a record start (a block start for
    /// compressed logs).
    pub fn iter_from(&self, offset: u64) -> Result<LogIterator> {
        if offset < LOG_HEADER_SIZE as u64 || offset > self.end {
            return Err(Error::LogFormat {
                message: format!(
                    "scan offset {} outside [{}, {}]",
                    offset, LOG_HEADER_SIZE, self.end
                ),
            });
        }
        let mut reader = self.clone();
        reader.rewind(offset);
        Ok(LogIterator::new(reader))
    }

    pub(crate) fn rewind(&mut self, offset: u64) {
        self.cursor = Self::cursor_at(&self.backing, offset);
        self.pending = 0;
    }

    /// Stop reads at `end` (clamped to the log's data end)
    pub(crate) fn set_end(&mut self, end: u64) {
        self.end = end.min(self.backing.header.data_end);
    }

    pub(crate) fn pending(&self) -> u64 {
        self.pending
    }

    pub(crate) fn set_pending(&mut self, len: u64) {
        self.pending = len;
    }

    pub(crate) fn skip_pending(&mut self) -> Result<()> {
        let n = self.pending;
        self.pending = 0;
        self.skip(n)
    }

    /// Offset of the block holding the next record, or `None` at the end
    pub(crate) fn next_record_position(&mut self) -> Result<Option<u64>> {
        let backing = &*self.backing;
        let end = self.end;
        match &mut self.cursor {
            LogCursor::Plain { pos } => Ok((*pos < end).then_some(*pos)),
            LogCursor::Blocked(cursor) => {
                if cursor.fill(&block_source(backing, end)?)? {
                    Ok(Some(cursor.block_offset()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Park the cursor on the record named by `(position, entry_index)`.
    pub(crate) fn seek_record(&mut self, position: u64, entry_index: u64) -> Result<()> {
        if position < LOG_HEADER_SIZE as u64 || position >= self.end {
            return Err(Error::IndexCorruption {
                details: format!(
                    "address position {} outside log data [{}, {})",
                    position, LOG_HEADER_SIZE, self.end
                ),
            });
        }
        self.pending = 0;

        let backing = &*self.backing;
        let end = self.end;
        match &mut self.cursor {
            LogCursor::Plain { pos } => {
                if entry_index != 0 {
                    return Err(Error::IndexCorruption {
                        details: format!(
                            "entry index {} in an uncompressed log at {}",
                            entry_index, position
                        ),
                    });
                }
                *pos = position;
                return Ok(());
            }
            LogCursor::Blocked(cursor) => {
                cursor.seek_block(&block_source(backing, end)?, position)?;
            }
        }

        // Earlier records of the block are skipped by their stored lengths
        for _ in 0..entry_index {
            let header = self.read_record_header()?;
            self.skip(header.body_len())?;
        }
        Ok(())
    }

    pub(crate) fn read_record_header(&mut self) -> Result<RecordHeader> {
        let first = self.read_vlq()?;
        if first == 0 {
            let key_len = self.read_vlq()?;
            Ok(RecordHeader {
                kind: RecordKind::Delete,
                key_len,
                value_len: 0,
            })
        } else {
            let value_len = self.read_vlq()?;
            Ok(RecordHeader {
                kind: RecordKind::Put,
                key_len: first - 1,
                value_len,
            })
        }
    }

    /// Compare the key of the record at `(position, entry_index)` with `key`.
    ///
    /// On a match the cursor is left on the record's value.
    pub(crate) fn matches_key_at(
        &mut self,
        position: u64,
        entry_index: u64,
        key: &[u8],
    ) -> Result<Option<RecordHeader>> {
        self.seek_record(position, entry_index)?;
        let header = self.read_record_header()?;
        self.check_lengths(&header)?;
        if header.key_len != key.len() as u64 || !self.consume_eq(key)? {
            return Ok(None);
        }
        self.pending = header.value_len;
        Ok(Some(header))
    }

    /// Read the key of the record at `(position, entry_index)` into `out`.
    pub(crate) fn read_key_at(
        &mut self,
        position: u64,
        entry_index: u64,
        out: &mut Vec<u8>,
    ) -> Result<RecordHeader> {
        self.seek_record(position, entry_index)?;
        let header = self.read_record_header()?;
        self.check_lengths(&header)?;
        out.resize(header.key_len as usize, 0);
        self.read_exact(out)?;
        self.pending = header.value_len;
        Ok(header)
    }

    /// Reject lengths the header says cannot occur before allocating for them
    pub(crate) fn check_lengths(&self, header: &RecordHeader) -> Result<()> {
        let log = &self.backing.header;
        if header.key_len > log.max_key_len || header.value_len > log.max_value_len {
            return Err(Error::LogCorruption {
                details: format!(
                    "record lengths {}/{} exceed log maxima {}/{}",
                    header.key_len, header.value_len, log.max_key_len, log.max_value_len
                ),
            });
        }
        Ok(())
    }

    fn read_vlq(&mut self) -> Result<u64> {
        let backing = &*self.backing;
        let end = self.end;
        match &mut self.cursor {
            LogCursor::Plain { pos } => {
                let start = (*pos).min(end) as usize;
                match decode_vlq(&backing.mmap[start..end as usize])? {
                    Some((value, n)) => {
                        *pos += n as u64;
                        Ok(value)
                    }
                    None => Err(unexpected_end(*pos)),
                }
            }
            LogCursor::Blocked(cursor) => cursor.read_vlq(&block_source(backing, end)?),
        }
    }

    /// Copy up to `out.len()` bytes; returns the count copied.
    pub(crate) fn read_partial(&mut self, out: &mut [u8]) -> Result<usize> {
        let backing = &*self.backing;
        let end = self.end;
        match &mut self.cursor {
            LogCursor::Plain { pos } => {
                let start = (*pos).min(end);
                let n = (out.len() as u64).min(end - start) as usize;
                out[..n].copy_from_slice(&backing.mmap[start as usize..start as usize + n]);
                *pos = start + n as u64;
                Ok(n)
            }
            LogCursor::Blocked(cursor) => cursor.read(&block_source(backing, end)?, out),
        }
    }

    pub(crate) fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        if self.read_partial(out)? != out.len() {
            return Err(unexpected_end(self.end));
        }
        Ok(())
    }

    pub(crate) fn skip(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let backing = &*self.backing;
        let end = self.end;
        match &mut self.cursor {
            LogCursor::Plain { pos } => {
                if *pos + n > end {
                    return Err(unexpected_end(*pos));
                }
                *pos += n;
                Ok(())
            }
            LogCursor::Blocked(cursor) => cursor.skip(&block_source(backing, end)?, n),
        }
    }

    fn consume_eq(&mut self, expected: &[u8]) -> Result<bool> {
        let backing = &*self.backing;
        let end = self.end;
        match &mut self.cursor {
            LogCursor::Plain { pos } => {
                let stop = *pos + expected.len() as u64;
                if stop > end {
                    return Err(unexpected_end(*pos));
                }
                let equal = &backing.mmap[*pos as usize..stop as usize] == expected;
                *pos = stop;
                Ok(equal)
            }
            LogCursor::Blocked(cursor) => cursor.consume_eq(&block_source(backing, end)?, expected),
        }
    }

    /// Unread value bytes straight from the mapping, when the log is uncompressed
    fn mapped_pending(&self) -> Option<&[u8]> {
        match &self.cursor {
            LogCursor::Plain { pos } => {
                let start = (*pos).min(self.end);
                let stop = (start + self.pending).min(self.end);
                Some(&self.backing.mmap[start as usize..stop as usize])
            }
            LogCursor::Blocked(_) => None,
        }
    }
}

fn unexpected_end(at: u64) -> Error {
    Error::LogCorruption {
        details: format!("record runs past data end at {}", at),
    }
}

/// Lazily read value of a PUT record.
///
/// Nothing is copied until the bytes are requested; the value borrows the
/// reader's cursor, so the next lookup or scan step invalidates it.
pub struct Value<'a> {
    reader: &'a mut LogReader,
    len: u64,
}

impl<'a> Value<'a> {
    pub(crate) fn new(reader: &'a mut LogReader, len: u64) -> Self {
        Self { reader, len }
    }

    /// Total value length
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> u64 {
        self.reader.pending()
    }

    /// The unread bytes without copying; `None` for compressed logs.
    pub fn as_mapped(&self) -> Option<&[u8]> {
        self.reader.mapped_pending()
    }

    /// Read the rest of the value
    pub fn to_vec(&mut self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.remaining() as usize];
        self.reader.read_exact(&mut out)?;
        self.reader.set_pending(0);
        Ok(out)
    }

    pub fn to_bytes(&mut self) -> Result<Bytes> {
        match self.as_mapped() {
            Some(slice) => {
                let bytes = Bytes::copy_from_slice(slice);
                self.reader.skip_pending()?;
                Ok(bytes)
            }
            None => self.to_vec().map(Bytes::from),
        }
    }
}

impl Read for Value<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = (buf.len() as u64).min(self.reader.pending()) as usize;
        let n = self
            .reader
            .read_partial(&mut buf[..want])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.reader.set_pending(self.reader.pending() - n as u64);
        Ok(n)
    }
}

impl std::fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("len", &self.len)
            .field("remaining", &self.remaining())
            .finish()
    }
}
