//! Read handle over an index and its log
//!
//! ```text
//!   HashReader ──┐             ┌── Arc<IndexBacking>  (mapped slots)
//!   duplicate ───┼── shares ───┤
//!   duplicate ───┘             └── Arc<LogBacking>    (mapped records)
//! ```
//!
//! Each handle owns its log cursor; duplicates share only the mappings.
//! Handles are `Send` but not `Sync`: move a duplicate to each thread
//! instead of sharing one.

use std::cell::Cell;
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};
use tracing::debug;

use tessera_core::error::{Error, IoResultExt, Result};
use tessera_core::Metrics;

use crate::hash::address::Address;
use crate::hash::header::{IndexHeader, INDEX_HEADER_SIZE};
use crate::hash::iterator::LiveEntries;
use crate::hash::table::{self, SlotLayout};
use crate::log::{LogHeader, LogIterator, LogReader, RecordKind, Value};

pub(crate) struct IndexBacking {
    path: PathBuf,
    mmap: Mmap,
    header: IndexHeader,
    layout: SlotLayout,
    metrics: Metrics,
}

impl IndexBacking {
    fn open(path: &Path, log: &LogHeader, metrics: Metrics) -> Result<Self> {
        let file = File::open(path).io_context(|| format!("Failed to open index {}", path.display()))?;
        let file_size = file.metadata()?.len();
        if file_size < INDEX_HEADER_SIZE as u64 {
            return Err(Error::IndexFormat {
                message: format!("index file too small: {} bytes", file_size),
            });
        }

        let mmap = unsafe {
            MmapOptions::new().map(&file).map_err(|e| Error::Io {
                message: "Failed to mmap index".to_string(),
                source: e,
            })?
        };
        let header = IndexHeader::decode(&mmap)?;

        if header.file_identifier != log.file_identifier {
            return Err(Error::IndexFormat {
                message: format!(
                    "file identifier {:#010x} does not match log {:#010x}",
                    header.file_identifier, log.file_identifier
                ),
            });
        }
        if header.data_end > log.data_end {
            return Err(Error::IndexFormat {
                message: format!(
                    "index covers log data up to {} but the log ends at {}",
                    header.data_end, log.data_end
                ),
            });
        }
        if file_size != header.index_size() {
            return Err(Error::IndexFormat {
                message: format!(
                    "index file is {} bytes, expected {} for {} slots",
                    file_size,
                    header.index_size(),
                    header.hash_capacity
                ),
            });
        }

        metrics.map_opened(file_size);
        let layout = SlotLayout::from_header(&header);
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            header,
            layout,
            metrics,
        })
    }

    fn table(&self) -> &[u8] {
        &self.mmap[INDEX_HEADER_SIZE..]
    }

    /// True when the live slot for `key` holds exactly `address`
    pub(crate) fn is_at(&self, key: &[u8], address: Address) -> Result<bool> {
        let hash = self.layout.hash(key);
        let probe = table::find(&self.layout, self.table(), hash, self.header.max_displacement, |a| {
            Ok(a == address)
        })?;
        Ok(probe.slot.is_some())
    }

    pub(crate) fn header(&self) -> &IndexHeader {
        &self.header
    }
}

impl Drop for IndexBacking {
    fn drop(&mut self) {
        self.metrics.map_closed(self.mmap.len() as u64);
    }
}

/// Point lookups and live scans over one index/log pair
pub struct HashReader {
    index: Option<Arc<IndexBacking>>,
    log: Option<LogReader>,
    metrics: Metrics,
    _not_sync: PhantomData<Cell<()>>,
}

impl HashReader {
    pub fn open(index_path: impl AsRef<Path>, log_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_metrics(index_path, log_path, Metrics::new())
    }

    pub fn open_with_metrics(
        index_path: impl AsRef<Path>,
        log_path: impl AsRef<Path>,
        metrics: Metrics,
    ) -> Result<Self> {
        let mut log = LogReader::open_with_metrics(log_path, metrics.clone())?;
        let index = IndexBacking::open(index_path.as_ref(), log.header(), metrics.clone())?;
        // Records past the build snapshot are not indexed
        log.set_end(index.header.data_end);

        debug!(
            index = %index.path.display(),
            entries = index.header.num_entries,
            capacity = index.header.hash_capacity,
            "Opened hash reader"
        );
        Ok(Self {
            index: Some(Arc::new(index)),
            log: Some(log),
            metrics,
            _not_sync: PhantomData,
        })
    }

    fn parts(&self) -> Result<(&Arc<IndexBacking>, &LogReader)> {
        match (&self.index, &self.log) {
            (Some(index), Some(log)) => Ok((index, log)),
            _ => Err(Error::Closed { resource: "hash reader" }),
        }
    }

    /// Find the current value of `key`
    pub fn lookup(&mut self, key: &[u8]) -> Result<Option<Value<'_>>> {
        let (index, log) = match (&self.index, &mut self.log) {
            (Some(index), Some(log)) => (index, log),
            _ => return Err(Error::Closed { resource: "hash reader" }),
        };

        let bits = index.header.entry_block_bits;
        let hash = index.layout.hash(key);
        let mut value_len = 0;
        let probe = table::find(
            &index.layout,
            index.table(),
            hash,
            index.header.max_displacement,
            |address| {
                let (position, entry_index) = address.unpack(bits);
                match log.matches_key_at(position, entry_index, key)? {
                    Some(record) if record.kind == RecordKind::Put => {
                        value_len = record.value_len;
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            },
        )?;

        self.metrics.record_lookup(probe.length, probe.slot.is_some());
        if probe.slot.is_none() {
            return Ok(None);
        }
        Ok(Some(Value::new(log, value_len)))
    }

    /// Owned copy of the current value of `key`
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.lookup(key)? {
            Some(mut value) => value.to_vec().map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    /// Scan live entries in log order
    pub fn iter(&self) -> Result<LiveEntries> {
        let (index, log) = self.parts()?;
        Ok(LiveEntries::new(index.clone(), log.iter(), self.metrics.clone()))
    }

    /// Scan every indexed record, superseded and deleted ones included
    pub fn log_iter(&self) -> Result<LogIterator> {
        let (_, log) = self.parts()?;
        Ok(log.iter())
    }

    pub fn header(&self) -> Result<&IndexHeader> {
        let (index, _) = self.parts()?;
        Ok(&index.header)
    }

    pub fn log_header(&self) -> Result<&LogHeader> {
        let (_, log) = self.parts()?;
        Ok(log.header())
    }

    /// New handle over the same mappings with its own cursor.
    ///
    /// Close duplicates before the handle they came from.
    pub fn duplicate(&self) -> Result<HashReader> {
        let (index, log) = self.parts()?;
        self.metrics.record_duplicate();
        debug!(index = %index.path.display(), "Duplicated hash reader");
        Ok(HashReader {
            index: Some(index.clone()),
            log: Some(log.duplicate()),
            metrics: self.metrics.clone(),
            _not_sync: PhantomData,
        })
    }

    /// Release this handle. Other duplicates stay usable.
    pub fn close(&mut self) {
        self.index = None;
        self.log = None;
    }

    pub fn is_closed(&self) -> bool {
        self.index.is_none()
    }

    /// Bytes mapped for the index and the log
    pub fn mapped_bytes(&self) -> u64 {
        match self.parts() {
            Ok((index, log)) => index.mmap.len() as u64 + log.mapped_bytes(),
            Err(_) => 0,
        }
    }
}
