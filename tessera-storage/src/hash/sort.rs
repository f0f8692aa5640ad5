//! Bounded-memory external sort of slot candidates.
//!
//! Entries are buffered up to a budget, spilled as sorted runs to anonymous
//! temp files and merged back with a binary heap.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use tessera_core::error::{IoResultExt, Result};

/// Budget charged per buffered entry
pub(crate) const SORT_ENTRY_MEMORY: usize = 32;
/// Smallest run, whatever the budget
pub(crate) const MIN_RUN_ENTRIES: usize = 64;

/// One log record projected onto the table. Sorts by `(wanted, address)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct SortEntry {
    pub wanted: u64,
    pub address: u64,
    pub hash: u64,
    pub is_delete: bool,
}

impl SortEntry {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<LittleEndian>(self.wanted)?;
        writer.write_u64::<LittleEndian>(self.address)?;
        writer.write_u64::<LittleEndian>(self.hash)?;
        writer.write_u8(self.is_delete as u8)?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            wanted: reader.read_u64::<LittleEndian>()?,
            address: reader.read_u64::<LittleEndian>()?,
            hash: reader.read_u64::<LittleEndian>()?,
            is_delete: reader.read_u8()? != 0,
        })
    }
}

pub(crate) struct ExternalSorter {
    dir: PathBuf,
    buffer: Vec<SortEntry>,
    run_limit: usize,
    runs: Vec<(File, u64)>,
}

impl ExternalSorter {
    pub fn new(dir: impl AsRef<Path>, memory_budget: usize) -> Self {
        let run_limit = (memory_budget / SORT_ENTRY_MEMORY).max(MIN_RUN_ENTRIES);
        Self {
            dir: dir.as_ref().to_path_buf(),
            buffer: Vec::with_capacity(run_limit.min(1 << 20)),
            run_limit,
            runs: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: SortEntry) -> Result<()> {
        self.buffer.push(entry);
        if self.buffer.len() >= self.run_limit {
            self.spill()?;
        }
        Ok(())
    }

    pub fn runs(&self) -> usize {
        self.runs.len()
    }

    fn spill(&mut self) -> Result<()> {
        self.buffer.sort_unstable();
        let file = tempfile::tempfile_in(&self.dir)
            .io_context(|| format!("Failed to create sort run in {}", self.dir.display()))?;
        let mut writer = BufWriter::new(file);
        for entry in &self.buffer {
            entry.write_to(&mut writer)?;
        }
        let mut file = writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;

        debug!(run = self.runs.len(), entries = self.buffer.len(), "Spilled sort run");
        self.runs.push((file, self.buffer.len() as u64));
        self.buffer.clear();
        Ok(())
    }

    /// Sorted stream of everything pushed
    pub fn finish(mut self) -> Result<SortedEntries> {
        if self.runs.is_empty() {
            self.buffer.sort_unstable();
            return Ok(SortedEntries::Memory(self.buffer.into_iter()));
        }
        if !self.buffer.is_empty() {
            self.spill()?;
        }

        let mut runs = Vec::with_capacity(self.runs.len());
        let mut heap = BinaryHeap::with_capacity(self.runs.len());
        for (i, (file, count)) in self.runs.into_iter().enumerate() {
            let mut run = Run {
                reader: BufReader::new(file),
                remaining: count,
            };
            if let Some(entry) = run.next_entry()? {
                heap.push(Reverse((entry, i)));
            }
            runs.push(run);
        }
        Ok(SortedEntries::Merge { runs, heap })
    }
}

pub(crate) struct Run {
    reader: BufReader<File>,
    remaining: u64,
}

impl Run {
    fn next_entry(&mut self) -> Result<Option<SortEntry>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        SortEntry::read_from(&mut self.reader).map(Some)
    }
}

pub(crate) enum SortedEntries {
    Memory(std::vec::IntoIter<SortEntry>),
    Merge {
        runs: Vec<Run>,
        heap: BinaryHeap<Reverse<(SortEntry, usize)>>,
    },
}

impl SortedEntries {
    pub fn next_entry(&mut self) -> Result<Option<SortEntry>> {
        match self {
            SortedEntries::Memory(iter) => Ok(iter.next()),
            SortedEntries::Merge { runs, heap } => {
                let Reverse((entry, i)) = match heap.pop() {
                    Some(top) => top,
                    None => return Ok(None),
                };
                if let Some(next) = runs[i].next_entry()? {
                    heap.push(Reverse((next, i)));
                }
                Ok(Some(entry))
            }
        }
    }
}
