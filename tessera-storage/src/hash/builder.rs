//! Index construction
//!
//! ```text
//! SIZING ──► FILLING ──► FINALIZING ──► DONE
//!              │
//!              ├─ in-memory:    replay the log into a Vec-backed table
//!              └─ external-sort: sort (wanted, address) candidates, then
//!                                lay clusters out in one pass over a
//!                                mapped table
//! ```
//!
//! Both fillers produce the same bytes: the table layout depends only on the
//! live set (see [`table`](super::table)), and the external pass writes that
//! layout directly.

use std::collections::VecDeque;
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use tessera_core::error::{Error, IoResultExt, Result};
use tessera_core::metrics::Timer;
use tessera_core::{BuildStrategy, HashType, IndexConfig, Metrics};

use crate::hash::address::{address_size_for, Address};
use crate::hash::header::{IndexHeader, INDEX_HEADER_SIZE, INDEX_MAJOR_VERSION, INDEX_MINOR_VERSION};
use crate::hash::sort::{ExternalSorter, SortEntry};
use crate::hash::table::{self, Slot, SlotLayout};
use crate::log::{LogReader, RecordKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    Sizing,
    Filling,
    Finalizing,
    Done,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Sizing => "SIZING",
            BuildState::Filling => "FILLING",
            BuildState::Finalizing => "FINALIZING",
            BuildState::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Everything SIZING decides
#[derive(Debug, Clone)]
struct BuildPlan {
    header: IndexHeader,
    layout: SlotLayout,
    strategy: BuildStrategy,
}

#[derive(Debug, Clone, Copy, Default)]
struct FillStats {
    entries: u64,
    garbage: u64,
}

/// Builds an index file from a log snapshot
#[derive(Debug, Clone)]
pub struct HashBuilder {
    config: IndexConfig,
    metrics: Metrics,
}

impl HashBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self::with_metrics(config, Metrics::new())
    }

    pub fn with_metrics(config: IndexConfig, metrics: Metrics) -> Self {
        Self { config, metrics }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Build the index for `log_path` and atomically replace `index_path`.
    pub fn build(&self, log_path: impl AsRef<Path>, index_path: impl AsRef<Path>) -> Result<IndexHeader> {
        self.config.validate()?;
        let index_path = index_path.as_ref();
        let timer = Timer::new("index_build");
        let mut state = BuildState::Sizing;

        let log = LogReader::open_with_metrics(log_path, self.metrics.clone())?;
        let plan = self.size(&log)?;
        info!(
            log = %log.path().display(),
            strategy = ?plan.strategy,
            capacity = plan.header.hash_capacity,
            hash_size = plan.header.hash_type.size(),
            address_size = plan.header.address_size,
            seed = plan.header.hash_seed,
            "Building index"
        );

        let dir = match index_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut output = NamedTempFile::new_in(&dir)
            .io_context(|| format!("Failed to create temp index in {}", dir.display()))?;

        transition(&mut state, BuildState::Filling);
        let layout = plan.layout;
        let header = match plan.strategy {
            BuildStrategy::ExternalSort => {
                output.as_file().set_len(plan.header.index_size())?;
                let mut mmap = unsafe {
                    MmapOptions::new().map_mut(output.as_file()).map_err(|e| Error::Io {
                        message: "Failed to mmap temp index".to_string(),
                        source: e,
                    })?
                };
                let table = &mut mmap[INDEX_HEADER_SIZE..];
                let fill = fill_external(&log, &layout, table, &dir, self.config.memory_budget)?;

                transition(&mut state, BuildState::Finalizing);
                let header = finalize(plan.header, &layout, table, fill)?;
                mmap[..INDEX_HEADER_SIZE].copy_from_slice(&header.to_bytes()?);
                mmap.flush()?;
                header
            }
            _ => {
                let mut table = vec![0u8; layout.table_bytes()];
                let fill = fill_in_memory(&log, &layout, &mut table)?;

                transition(&mut state, BuildState::Finalizing);
                let header = finalize(plan.header, &layout, &table, fill)?;
                let mut writer = BufWriter::new(output.as_file_mut());
                writer.write_all(&header.to_bytes()?)?;
                writer.write_all(&table)?;
                writer.flush()?;
                header
            }
        };

        if self.config.fsync {
            output.as_file().sync_all()?;
        }
        output.persist(index_path).map_err(|e| Error::Io {
            message: format!("Failed to persist index {}", index_path.display()),
            source: e.error,
        })?;
        transition(&mut state, BuildState::Done);

        self.metrics.record_index_build();
        let elapsed = timer.stop();
        info!(
            index = %index_path.display(),
            entries = header.num_entries,
            capacity = header.hash_capacity,
            max_displacement = header.max_displacement,
            average_displacement = header.average_displacement(),
            hash_collisions = header.hash_collisions,
            garbage_size = header.garbage_size,
            elapsed_ms = elapsed.as_millis() as u64,
            "Index built"
        );
        Ok(header)
    }

    fn size(&self, log: &LogReader) -> Result<BuildPlan> {
        let log_header = log.header();
        let sparsity = self.config.effective_sparsity();
        let capacity = ((log_header.num_puts as f64 * sparsity).round() as u64).max(1) | 1;
        let hash_type = self
            .config
            .hash_type
            .unwrap_or_else(|| HashType::for_key_count(log_header.num_puts));
        let entry_block_bits = log_header.entry_block_bits();
        let address_size = address_size_for(log_header.data_end, entry_block_bits);
        let seed = self.config.seed.unwrap_or_else(rand::random);

        let slot_size = (hash_type.size() + address_size) as u64;
        let table_bytes = capacity.checked_mul(slot_size).filter(|&b| b <= isize::MAX as u64);
        let table_bytes = table_bytes.ok_or_else(|| Error::Configuration {
            message: format!("table of {} slots is too large", capacity),
        })?;

        let strategy = match self.config.strategy {
            BuildStrategy::Auto if table_bytes <= self.config.memory_budget as u64 => BuildStrategy::InMemory,
            BuildStrategy::Auto => BuildStrategy::ExternalSort,
            forced => forced,
        };

        let header = IndexHeader {
            major_version: INDEX_MAJOR_VERSION,
            minor_version: INDEX_MINOR_VERSION,
            file_identifier: log_header.file_identifier,
            hash_seed: seed,
            data_end: log_header.data_end,
            max_key_len: log_header.max_key_len,
            max_value_len: log_header.max_value_len,
            num_puts: log_header.num_puts,
            garbage_size: 0,
            num_entries: 0,
            address_size: address_size as u32,
            hash_type,
            hash_capacity: capacity,
            max_displacement: 0,
            entry_block_bits,
            hash_collisions: 0,
            total_displacement: 0,
        };
        let layout = SlotLayout::from_header(&header);
        Ok(BuildPlan {
            header,
            layout,
            strategy,
        })
    }
}

fn transition(state: &mut BuildState, next: BuildState) {
    debug!(from = %state, to = %next, "Index build state");
    *state = next;
}

/// Locate the live slot for `key`, returning its index and the on-disk size
/// of the record it points at.
fn find_live(
    layout: &SlotLayout,
    table: &[u8],
    resolver: &mut LogReader,
    bits: u32,
    hash: u64,
    key: &[u8],
) -> Result<Option<(u64, u64)>> {
    let mut size = 0;
    let probe = table::find(layout, table, hash, u64::MAX, |address| {
        let (position, entry_index) = address.unpack(bits);
        match resolver.matches_key_at(position, entry_index, key)? {
            Some(record) => {
                size = record.encoded_len();
                Ok(true)
            }
            None => Ok(false),
        }
    })?;
    Ok(probe.slot.map(|index| (index, size)))
}

fn fill_in_memory(log: &LogReader, layout: &SlotLayout, table: &mut [u8]) -> Result<FillStats> {
    let bits = log.header().entry_block_bits();
    let mut resolver = log.duplicate();
    let mut records = log.iter();
    let mut stats = FillStats::default();

    while records.advance()? {
        let Some(record) = records.record().copied() else {
            break;
        };
        let key = records.key();
        let hash = layout.hash(key);

        // A later record for a key always supersedes the earlier one
        if let Some((index, old_size)) = find_live(layout, table, &mut resolver, bits, hash, key)? {
            table::remove(layout, table, index);
            stats.garbage += old_size;
            stats.entries -= 1;
        }

        match record.kind {
            RecordKind::Put => {
                let address = Address::pack(records.position(), records.entry_index(), bits);
                table::insert(layout, table, Slot { hash, address })?;
                stats.entries += 1;
            }
            RecordKind::Delete => stats.garbage += record.encoded_len(),
        }
    }
    Ok(stats)
}

fn fill_external(
    log: &LogReader,
    layout: &SlotLayout,
    table: &mut [u8],
    dir: &Path,
    memory_budget: usize,
) -> Result<FillStats> {
    let bits = log.header().entry_block_bits();

    let mut sorter = ExternalSorter::new(dir, memory_budget);
    let mut records = log.iter();
    while records.advance()? {
        let Some(record) = records.record().copied() else {
            break;
        };
        let hash = layout.hash(records.key());
        sorter.push(SortEntry {
            wanted: layout.wanted(hash),
            address: Address::pack(records.position(), records.entry_index(), bits).raw(),
            hash,
            is_delete: record.kind == RecordKind::Delete,
        })?;
    }
    debug!(runs = sorter.runs(), "Sorted slot candidates");
    let mut sorted = sorter.finish()?;

    let mut resolver = log.duplicate();
    let mut key = Vec::new();
    let mut stats = FillStats::default();
    let mut placer = Placer::default();
    // Live slots of the current home slot, in address order
    let mut group: Vec<Slot> = Vec::new();
    let mut group_wanted = None;

    while let Some(entry) = sorted.next_entry()? {
        if group_wanted != Some(entry.wanted) {
            if let Some(wanted) = group_wanted {
                placer.place(layout, table, wanted, &group);
            }
            group.clear();
            group_wanted = Some(entry.wanted);
        }

        let address = Address::from_raw(entry.address);
        let candidates = group.iter().any(|slot| slot.hash == entry.hash);
        let mut record_size = 0;
        if candidates || entry.is_delete {
            let (position, entry_index) = address.unpack(bits);
            record_size = resolver.read_key_at(position, entry_index, &mut key)?.encoded_len();
        }

        if candidates {
            let mut superseded = None;
            for (i, slot) in group.iter().enumerate() {
                if slot.hash != entry.hash {
                    continue;
                }
                let (position, entry_index) = slot.address.unpack(bits);
                if let Some(old) = resolver.matches_key_at(position, entry_index, &key)? {
                    superseded = Some((i, old.encoded_len()));
                    break;
                }
            }
            if let Some((i, old_size)) = superseded {
                group.remove(i);
                stats.garbage += old_size;
                stats.entries -= 1;
            }
        }

        if entry.is_delete {
            stats.garbage += record_size;
        } else {
            group.push(Slot { hash: entry.hash, address });
            stats.entries += 1;
        }
    }
    if let Some(wanted) = group_wanted {
        placer.place(layout, table, wanted, &group);
    }
    placer.wrap(layout, table)?;
    Ok(stats)
}

/// Lays sorted clusters out left to right
#[derive(Default)]
struct Placer {
    cursor: u64,
    /// Slots pushed past the last index, in order
    overflow: Vec<Slot>,
}

impl Placer {
    fn place(&mut self, layout: &SlotLayout, table: &mut [u8], wanted: u64, group: &[Slot]) {
        let mut index = wanted.max(self.cursor);
        for slot in group {
            if index < layout.capacity {
                layout.write(table, index, *slot);
            } else {
                self.overflow.push(*slot);
            }
            index += 1;
        }
        self.cursor = index;
    }

    /// Move overflow to the front of the table. Wrapped slots sit further
    /// from home than anything already at the front, so they go first and
    /// push the front run along until a gap absorbs it.
    fn wrap(self, layout: &SlotLayout, table: &mut [u8]) -> Result<()> {
        let mut pending: VecDeque<Slot> = self.overflow.into();
        let mut index = 0;
        while let Some(slot) = pending.pop_front() {
            if index >= layout.capacity {
                return Err(Error::CapacityExhausted {
                    capacity: layout.capacity,
                });
            }
            let occupant = layout.read(table, index);
            if !occupant.is_empty() {
                pending.push_back(occupant);
            }
            layout.write(table, index, slot);
            index += 1;
        }
        Ok(())
    }
}

fn finalize(mut header: IndexHeader, layout: &SlotLayout, table: &[u8], fill: FillStats) -> Result<IndexHeader> {
    let stats = table::table_stats(layout, table);
    if stats.entries != fill.entries {
        return Err(Error::IndexCorruption {
            details: format!(
                "table holds {} entries after filling {}",
                stats.entries, fill.entries
            ),
        });
    }
    header.num_entries = stats.entries;
    header.garbage_size = fill.garbage;
    header.max_displacement = stats.max_displacement;
    header.total_displacement = stats.total_displacement;
    header.hash_collisions = stats.hash_collisions;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogWriter;
    use tempfile::TempDir;
    use tessera_core::LogConfig;

    fn log_with_puts(dir: &TempDir, n: usize) -> PathBuf {
        let path = dir.path().join("data.log");
        let mut writer = LogWriter::create(&path, LogConfig::default()).unwrap();
        for i in 0..n {
            writer.put(format!("key-{}", i).as_bytes(), b"v").unwrap();
        }
        writer.close().unwrap();
        path
    }

    #[test]
    fn test_sizing() {
        let dir = TempDir::new().unwrap();
        let log = LogReader::open(log_with_puts(&dir, 100)).unwrap();

        let plan = HashBuilder::new(IndexConfig::default().seed(1)).size(&log).unwrap();
        assert_eq!(plan.header.hash_capacity, 131);
        assert_eq!(plan.header.hash_type, HashType::Hash32);
        assert_eq!(plan.header.address_size, 4);
        assert_eq!(plan.header.entry_block_bits, 0);
        assert_eq!(plan.header.hash_seed, 1);
        assert_eq!(plan.strategy, BuildStrategy::InMemory);

        // Sparsity below the floor is clamped
        let plan = HashBuilder::new(IndexConfig::default().sparsity(1.0)).size(&log).unwrap();
        assert_eq!(plan.header.hash_capacity, 131);

        let plan = HashBuilder::new(IndexConfig::default().sparsity(2.0)).size(&log).unwrap();
        assert_eq!(plan.header.hash_capacity, 201);
    }

    #[test]
    fn test_auto_strategy_follows_budget() {
        let dir = TempDir::new().unwrap();
        let log = LogReader::open(log_with_puts(&dir, 100)).unwrap();

        let tight = IndexConfig::default().memory_budget(131 * 8 - 1);
        let plan = HashBuilder::new(tight).size(&log).unwrap();
        assert_eq!(plan.strategy, BuildStrategy::ExternalSort);

        let exact = IndexConfig::default().memory_budget(131 * 8);
        let plan = HashBuilder::new(exact).size(&log).unwrap();
        assert_eq!(plan.strategy, BuildStrategy::InMemory);
    }

    #[test]
    fn test_empty_log_gets_single_slot() {
        let dir = TempDir::new().unwrap();
        let log_path = log_with_puts(&dir, 0);
        let index_path = dir.path().join("data.idx");

        let header = HashBuilder::new(IndexConfig::default()).build(&log_path, &index_path).unwrap();
        assert_eq!(header.hash_capacity, 1);
        assert_eq!(header.num_entries, 0);
        assert_eq!(std::fs::metadata(&index_path).unwrap().len(), header.index_size());
    }

    #[test]
    fn test_wrap_moves_overflow_to_front() {
        let layout = SlotLayout {
            hash_type: HashType::Hash32,
            seed: 0,
            address_size: 4,
            capacity: 7,
        };
        let slot = |hash: u64, address: u64| Slot { hash, address: Address::from_raw(address) };

        let mut table = vec![0u8; layout.table_bytes()];
        let mut placer = Placer::default();
        placer.place(&layout, &mut table, 0, &[slot(7, 30)]);
        placer.place(&layout, &mut table, 6, &[slot(6, 10), slot(13, 20)]);
        placer.wrap(&layout, &mut table).unwrap();

        let mut expected = vec![0u8; layout.table_bytes()];
        for s in [slot(6, 10), slot(13, 20), slot(7, 30)] {
            table::insert(&layout, &mut expected, s).unwrap();
        }
        assert_eq!(table, expected);
    }
}
