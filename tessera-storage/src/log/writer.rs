//! Append-only log writer

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use tessera_core::error::{Error, IoResultExt, Result};
use tessera_core::varint::MAX_VLQ_LEN;
use tessera_core::{IndexConfig, LogConfig, Metrics};

use crate::block::{BlockWriter, Codec};
use crate::hash::{HashBuilder, IndexHeader};
use crate::log::header::{LogHeader, LOG_HEADER_SIZE};
use crate::log::record::{encode_delete_prefix, encode_put_prefix};

enum Sink {
    Plain(BufWriter<File>),
    Blocked(BlockWriter<BufWriter<File>>),
}

/// Single writer over one log file.
///
/// Records reach the file through a `BufWriter` (and a block writer for
/// compressed logs); the header is only rewritten by [`flush`](Self::flush),
/// so readers see new records once a flush has moved `data_end` past them.
pub struct LogWriter {
    path: PathBuf,
    sink: Option<Sink>,
    header: LogHeader,
    config: LogConfig,
    metrics: Metrics,
    blocks_recorded: u64,
}

impl LogWriter {
    /// Create (or truncate) a log at `path`
    pub fn create(path: impl AsRef<Path>, config: LogConfig) -> Result<Self> {
        Self::create_with_metrics(path, config, Metrics::new())
    }

    pub fn create_with_metrics(
        path: impl AsRef<Path>,
        config: LogConfig,
        metrics: Metrics,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .io_context(|| format!("Failed to create log {}", path.display()))?;

        let header = LogHeader::new(rand::random::<u32>(), config.compression, config.block_size);
        let mut writer = BufWriter::new(file);
        writer.write_all(&header.to_bytes()?)?;

        info!(
            path = %path.display(),
            compression = ?config.compression,
            block_size = header.compression_block_size,
            file_identifier = header.file_identifier,
            "Created log"
        );
        Ok(Self::from_parts(path, writer, header, config, metrics))
    }

    /// Reopen an existing log for appending.
    ///
    /// Anything past the header's `data_end` is truncated away. Compression
    /// and block size are the log's own; only `zstd_level` and `fsync` are
    /// taken from `config`.
    pub fn append(path: impl AsRef<Path>, config: LogConfig) -> Result<Self> {
        Self::append_with_metrics(path, config, Metrics::new())
    }

    pub fn append_with_metrics(
        path: impl AsRef<Path>,
        config: LogConfig,
        metrics: Metrics,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .io_context(|| format!("Failed to open log {}", path.display()))?;

        let file_size = file.metadata()?.len();
        if file_size < LOG_HEADER_SIZE as u64 {
            return Err(Error::LogFormat {
                message: format!("log file too small: {} bytes", file_size),
            });
        }
        let mut buf = [0u8; LOG_HEADER_SIZE];
        file.read_exact(&mut buf)?;
        let header = LogHeader::decode(&buf)?;
        if header.data_end > file_size {
            return Err(Error::LogFormat {
                message: format!("data end {} beyond file length {}", header.data_end, file_size),
            });
        }

        if header.data_end < file_size {
            debug!(
                data_end = header.data_end,
                file_size,
                "Truncating unflushed tail"
            );
        }
        file.set_len(header.data_end)?;
        file.seek(SeekFrom::End(0))?;

        if config.compression != header.compression_type {
            warn!(
                requested = ?config.compression,
                existing = ?header.compression_type,
                "Keeping the log's own compression on append"
            );
        }
        let config = LogConfig {
            compression: header.compression_type,
            block_size: header.compression_block_size,
            ..config
        };

        info!(
            path = %path.display(),
            puts = header.num_puts,
            deletes = header.num_deletes,
            data_end = header.data_end,
            "Resumed log"
        );
        Ok(Self::from_parts(path, BufWriter::new(file), header, config, metrics))
    }

    fn from_parts(
        path: PathBuf,
        writer: BufWriter<File>,
        header: LogHeader,
        config: LogConfig,
        metrics: Metrics,
    ) -> Self {
        let sink = match Codec::for_type(header.compression_type, config.zstd_level) {
            None => Sink::Plain(writer),
            Some(codec) => Sink::Blocked(
                BlockWriter::new(writer, codec, header.compression_block_size as usize)
                    .with_max_entries(header.max_entries_per_block),
            ),
        };
        metrics.file_opened();
        Self {
            path,
            sink: Some(sink),
            header,
            config,
            metrics,
            blocks_recorded: 0,
        }
    }

    /// Append a PUT record
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(Error::Closed { resource: "log writer" })?;

        let mut prefix = [0u8; 2 * MAX_VLQ_LEN];
        let n = encode_put_prefix(key.len() as u64, value.len() as u64, &mut prefix);
        let size = (n + key.len() + value.len()) as u64;
        match sink {
            Sink::Plain(w) => {
                w.write_all(&prefix[..n])?;
                w.write_all(key)?;
                w.write_all(value)?;
            }
            Sink::Blocked(w) => {
                w.begin_entry(size as usize)?;
                w.write(&prefix[..n])?;
                w.write(key)?;
                w.write(value)?;
                w.end_entry()?;
            }
        }

        self.header.num_puts += 1;
        self.header.put_size += size;
        self.header.max_key_len = self.header.max_key_len.max(key.len() as u64);
        self.header.max_value_len = self.header.max_value_len.max(value.len() as u64);
        self.metrics.record_put();
        self.sync_block_metrics();
        Ok(())
    }

    /// Append a DELETE record.
    ///
    /// Keys longer than any key written so far cannot be present and are
    /// ignored.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(Error::Closed { resource: "log writer" })?;
        if key.len() as u64 > self.header.max_key_len {
            return Ok(());
        }

        let mut prefix = [0u8; 2 * MAX_VLQ_LEN];
        let n = encode_delete_prefix(key.len() as u64, &mut prefix);
        let size = (n + key.len()) as u64;
        match sink {
            Sink::Plain(w) => {
                w.write_all(&prefix[..n])?;
                w.write_all(key)?;
            }
            Sink::Blocked(w) => {
                w.begin_entry(size as usize)?;
                w.write(&prefix[..n])?;
                w.write(key)?;
                w.end_entry()?;
            }
        }

        self.header.num_deletes += 1;
        self.header.delete_size += size;
        self.metrics.record_delete();
        self.sync_block_metrics();
        Ok(())
    }

    /// Push buffered records to the file and rewrite the header.
    ///
    /// `data_end` becomes the file length. With `fsync` (or the config's
    /// `fsync`) the data is synced before returning.
    pub fn flush(&mut self, fsync: bool) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(Error::Closed { resource: "log writer" })?;
        let writer = match sink {
            Sink::Plain(w) => w,
            Sink::Blocked(w) => {
                w.flush_block()?;
                self.header.max_entries_per_block = w.max_entries_per_block();
                w.get_mut()
            }
        };
        writer.flush()?;

        let file = writer.get_mut();
        self.header.data_end = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.header.to_bytes()?)?;
        file.seek(SeekFrom::End(0))?;
        if fsync || self.config.fsync {
            file.sync_data()?;
        }

        self.sync_block_metrics();
        debug!(
            data_end = self.header.data_end,
            puts = self.header.num_puts,
            deletes = self.header.num_deletes,
            "Flushed log"
        );
        Ok(())
    }

    /// Flush and release the file. Later operations fail with `Closed`.
    pub fn close(&mut self) -> Result<()> {
        self.flush(self.config.fsync)?;
        self.sink = None;
        self.metrics.file_closed();
        info!(path = %self.path.display(), data_end = self.header.data_end, "Closed log");
        Ok(())
    }

    /// Flush, then build an index over the flushed records
    pub fn write_index(&mut self, index_path: impl AsRef<Path>, config: IndexConfig) -> Result<IndexHeader> {
        self.flush(self.config.fsync)?;
        HashBuilder::with_metrics(config, self.metrics.clone()).build(&self.path, index_path)
    }

    /// Header as of the last write; `data_end` only moves on flush.
    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_none()
    }

    fn sync_block_metrics(&mut self) {
        if let Some(Sink::Blocked(w)) = &self.sink {
            while self.blocks_recorded < w.blocks_written() {
                self.metrics.record_block();
                self.blocks_recorded += 1;
            }
        }
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if self.sink.is_none() {
            return;
        }
        if let Err(e) = self.flush(self.config.fsync) {
            warn!(path = %self.path.display(), error = %e, "Failed to flush log on drop");
        }
        self.sink = None;
        self.metrics.file_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::reader::LogReader;
    use crate::log::record::RecordKind;
    use tempfile::TempDir;
    use tessera_core::CompressionType;

    #[test]
    fn test_flush_publishes_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.log");

        let mut writer = LogWriter::create(&path, LogConfig::default()).unwrap();
        writer.put(b"k", b"v").unwrap();
        writer.delete(b"k").unwrap();
        writer.flush(false).unwrap();

        let header = writer.header().clone();
        assert_eq!(header.num_puts, 1);
        assert_eq!(header.num_deletes, 1);
        assert_eq!(header.put_size, 4);
        assert_eq!(header.delete_size, 3);
        assert_eq!(header.data_end, LOG_HEADER_SIZE as u64 + 7);

        let reader = LogReader::open(&path).unwrap();
        assert_eq!(reader.header(), &header);
    }

    #[test]
    fn test_delete_of_unseen_long_key_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.log");

        let mut writer = LogWriter::create(&path, LogConfig::default()).unwrap();
        writer.put(b"ab", b"1").unwrap();
        writer.delete(b"abc").unwrap();
        writer.close().unwrap();
        assert_eq!(writer.header().num_deletes, 0);
    }

    #[test]
    fn test_closed_writer_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let metrics = Metrics::new();
        let mut writer =
            LogWriter::create_with_metrics(dir.path().join("data.log"), LogConfig::default(), metrics.clone())
                .unwrap();
        assert_eq!(metrics.snapshot().open_files, 1);
        writer.close().unwrap();
        assert_eq!(metrics.snapshot().open_files, 0);

        assert!(matches!(writer.put(b"k", b"v"), Err(Error::Closed { .. })));
        assert!(matches!(writer.flush(false), Err(Error::Closed { .. })));
        drop(writer);
        assert_eq!(metrics.snapshot().open_files, 0);
    }

    #[test]
    fn test_append_truncates_unflushed_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.log");

        let config = LogConfig::default().compression(CompressionType::Snappy).block_size(64);
        let mut writer = LogWriter::create(&path, config.clone()).unwrap();
        writer.put(b"a", b"1").unwrap();
        writer.close().unwrap();
        let file_id = writer.header().file_identifier;

        // Garbage past data_end, as left by a crash between write and flush
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB; 13]).unwrap();
        drop(file);

        let mut writer = LogWriter::append(&path, LogConfig::default()).unwrap();
        assert_eq!(writer.header().file_identifier, file_id);
        assert_eq!(writer.header().compression_type, CompressionType::Snappy);
        writer.put(b"b", b"2").unwrap();
        writer.close().unwrap();

        let reader = LogReader::open(&path).unwrap();
        let records: Vec<_> = reader.iter().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[1].key[..], b"b");
        assert_eq!(records[1].kind, RecordKind::Put);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), reader.header().data_end);
    }
}
