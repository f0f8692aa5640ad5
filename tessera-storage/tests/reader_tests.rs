//! # Hash Reader Tests
//!
//! This test suite verifies:
//! - Lookups and live iteration against a model map
//! - Probe lengths stay within the recorded displacement bound
//! - Zero-copy values on uncompressed logs
//! - Duplicated handles and their lifecycle
//! - Records appended after a build stay invisible
//! - Rejection of mismatched or damaged index files

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread;
use tempfile::TempDir;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tessera_core::{BuildStrategy, CompressionType};
use tessera_storage::hash::INDEX_HEADER_SIZE;
use tessera_storage::{
    build_index, paths, Error, HashReader, IndexConfig, IndexHeader, LogConfig, LogWriter, Metrics,
};

fn test_key(num: u64) -> Vec<u8> {
    format!("key_{:06}", num).into_bytes()
}

fn test_value(rng: &mut StdRng) -> Vec<u8> {
    let len = rng.gen_range(0..64);
    (0..len).map(|_| rng.gen()).collect()
}

/// Log with a random workload plus its index; returns the log path and the live set
fn build_pair(
    dir: &TempDir,
    name: &str,
    log_config: LogConfig,
    index_config: IndexConfig,
    seed: u64,
    ops: usize,
) -> (PathBuf, BTreeMap<Vec<u8>, Vec<u8>>) {
    let log = dir.path().join(format!("{}.log", name));
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model = BTreeMap::new();

    let mut writer = LogWriter::create(&log, log_config).unwrap();
    for _ in 0..ops {
        let key = test_key(rng.gen_range(0..(ops as u64 / 2).max(1)));
        if rng.gen_bool(0.2) {
            writer.delete(&key).unwrap();
            model.remove(&key);
        } else {
            let value = test_value(&mut rng);
            writer.put(&key, &value).unwrap();
            model.insert(key, value);
        }
    }
    writer.close().unwrap();
    build_index(&log, index_config).unwrap();
    (log, model)
}

fn open_with(log: &Path, metrics: Metrics) -> HashReader {
    HashReader::open_with_metrics(paths::index_path_for(log), log, metrics).unwrap()
}

#[test]
fn test_lookups_match_model() {
    let temp_dir = TempDir::new().unwrap();
    let log_configs = [
        LogConfig::default(),
        LogConfig::default().compression(CompressionType::Snappy).block_size(512),
        LogConfig::default().compression(CompressionType::Zstd).block_size(2048),
    ];

    for (i, log_config) in log_configs.into_iter().enumerate() {
        let (log, model) = build_pair(
            &temp_dir,
            &format!("model{}", i),
            log_config,
            IndexConfig::default(),
            40 + i as u64,
            4000,
        );
        let mut reader = tessera_storage::open(&log).unwrap();

        for (key, value) in &model {
            assert_eq!(reader.get(key).unwrap().as_ref(), Some(value));
            assert!(reader.contains(key).unwrap());
        }
        // Deleted and never-written keys
        for k in 0..2000 {
            let key = test_key(k);
            if !model.contains_key(&key) {
                assert_eq!(reader.get(&key).unwrap(), None);
            }
        }
        assert_eq!(reader.get(b"no such key").unwrap(), None);
        assert_eq!(reader.get(b"").unwrap(), None);
    }
}

#[test]
fn test_iteration_is_complete() {
    let temp_dir = TempDir::new().unwrap();
    let (log, model) = build_pair(
        &temp_dir,
        "iter",
        LogConfig::default().compression(CompressionType::Snappy).block_size(1024),
        IndexConfig::default().strategy(BuildStrategy::ExternalSort).memory_budget(0),
        7,
        3000,
    );

    let metrics = Metrics::new();
    let reader = open_with(&log, metrics.clone());
    let mut seen = BTreeMap::new();
    for entry in reader.iter().unwrap() {
        let entry = entry.unwrap();
        let previous = seen.insert(entry.key.to_vec(), entry.value.to_vec());
        assert!(previous.is_none(), "key yielded twice");
    }

    assert_eq!(seen, model);
    assert_eq!(reader.header().unwrap().num_entries, model.len() as u64);
    assert_eq!(metrics.snapshot().live_entries_iterated, model.len() as u64);
}

#[test]
fn test_live_scan_with_lazy_values() {
    let temp_dir = TempDir::new().unwrap();
    let (log, model) = build_pair(&temp_dir, "lazy", LogConfig::default(), IndexConfig::default(), 3, 500);

    let reader = tessera_storage::open(&log).unwrap();
    let mut entries = reader.iter().unwrap();
    let mut count = 0;
    while entries.advance().unwrap() {
        let key = entries.key().to_vec();
        // Read every other value, skip the rest
        if count % 2 == 0 {
            let mut value = entries.value().unwrap();
            assert_eq!(Some(&value.to_vec().unwrap()), model.get(&key));
        }
        count += 1;
    }
    assert_eq!(count, model.len());
}

#[test]
fn test_probes_bounded_by_max_displacement() {
    let temp_dir = TempDir::new().unwrap();
    let (log, model) = build_pair(
        &temp_dir,
        "probe",
        LogConfig::default(),
        IndexConfig::default().sparsity(1.3),
        17,
        20_000,
    );

    let metrics = Metrics::new();
    let mut reader = open_with(&log, metrics.clone());
    let max_displacement = reader.header().unwrap().max_displacement;

    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..5000 {
        let key = test_key(rng.gen_range(0..20_000));
        let found = reader.contains(&key).unwrap();
        assert_eq!(found, model.contains_key(&key));
    }
    for _ in 0..1000 {
        let key: Vec<u8> = (0..12).map(|_| rng.gen()).collect();
        reader.contains(&key).unwrap();
    }

    let snap = metrics.snapshot();
    assert_eq!(snap.lookups, 6000);
    assert!(snap.max_probe <= max_displacement);
}

#[test]
fn test_value_access() {
    let temp_dir = TempDir::new().unwrap();
    let log = temp_dir.path().join("values.log");
    let mut writer = LogWriter::create(&log, LogConfig::default()).unwrap();
    writer.put(b"empty", b"").unwrap();
    writer.put(b"text", b"hello world").unwrap();
    writer.put(b"", b"empty key").unwrap();
    writer.close().unwrap();
    build_index(&log, IndexConfig::default()).unwrap();

    let mut reader = tessera_storage::open(&log).unwrap();
    {
        let value = reader.lookup(b"text").unwrap().unwrap();
        assert_eq!(value.len(), 11);
        assert_eq!(value.as_mapped(), Some(&b"hello world"[..]));
    }
    {
        let mut value = reader.lookup(b"text").unwrap().unwrap();
        let mut head = [0u8; 5];
        value.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"hello");
        assert_eq!(value.remaining(), 6);
        let mut rest = Vec::new();
        value.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b" world");
    }
    {
        let value = reader.lookup(b"empty").unwrap().unwrap();
        assert!(value.is_empty());
    }
    assert_eq!(reader.get(b"").unwrap(), Some(b"empty key".to_vec()));

    // Compressed values have no mapping to borrow
    let zlog = temp_dir.path().join("values_zstd.log");
    let config = LogConfig::default().compression(CompressionType::Zstd).block_size(64);
    let mut writer = LogWriter::create(&zlog, config).unwrap();
    writer.put(b"text", b"hello world").unwrap();
    writer.close().unwrap();
    build_index(&zlog, IndexConfig::default()).unwrap();

    let mut reader = tessera_storage::open(&zlog).unwrap();
    let mut value = reader.lookup(b"text").unwrap().unwrap();
    assert!(value.as_mapped().is_none());
    assert_eq!(value.to_bytes().unwrap().as_ref(), b"hello world");
}

#[test]
fn test_empty_log() {
    let temp_dir = TempDir::new().unwrap();
    let log = temp_dir.path().join("empty.log");
    LogWriter::create(&log, LogConfig::default()).unwrap().close().unwrap();

    let header = build_index(&log, IndexConfig::default()).unwrap();
    assert_eq!(header.hash_capacity, 1);

    let mut reader = tessera_storage::open(&log).unwrap();
    assert_eq!(reader.get(b"anything").unwrap(), None);
    assert_eq!(reader.iter().unwrap().count(), 0);
}

#[test]
fn test_records_after_build_are_invisible() {
    let temp_dir = TempDir::new().unwrap();
    let log = temp_dir.path().join("grow.log");
    let index = paths::index_path_for(&log);

    let mut writer = LogWriter::create(&log, LogConfig::default()).unwrap();
    writer.put(b"old", b"1").unwrap();
    writer.write_index(&index, IndexConfig::default()).unwrap();
    writer.put(b"new", b"2").unwrap();
    writer.put(b"old", b"3").unwrap();
    writer.flush(false).unwrap();

    let mut reader = tessera_storage::open(&log).unwrap();
    assert_eq!(reader.get(b"new").unwrap(), None);
    assert_eq!(reader.get(b"old").unwrap(), Some(b"1".to_vec()));
    assert_eq!(reader.log_iter().unwrap().count(), 1);

    // A rebuild picks the tail up; the open reader keeps its snapshot
    writer.write_index(&index, IndexConfig::default()).unwrap();
    writer.close().unwrap();
    let mut fresh = tessera_storage::open(&log).unwrap();
    assert_eq!(fresh.get(b"new").unwrap(), Some(b"2".to_vec()));
    assert_eq!(fresh.get(b"old").unwrap(), Some(b"3".to_vec()));
    assert_eq!(reader.get(b"old").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_duplicates_are_independent() {
    let temp_dir = TempDir::new().unwrap();
    let (log, model) = build_pair(&temp_dir, "dup", LogConfig::default(), IndexConfig::default(), 12, 2000);

    let metrics = Metrics::new();
    let mut reader = open_with(&log, metrics.clone());
    let mapped = metrics.snapshot().mapped_bytes;
    assert_eq!(reader.mapped_bytes(), mapped);

    let mut dup = reader.duplicate().unwrap();
    assert_eq!(metrics.snapshot().duplicates, 1);
    // Mappings are shared, not repeated
    assert_eq!(metrics.snapshot().mapped_bytes, mapped);

    let (key, value) = model.iter().next().unwrap();
    assert_eq!(dup.get(key).unwrap().as_ref(), Some(value));

    dup.close();
    assert!(dup.is_closed());
    assert!(matches!(dup.get(key), Err(Error::Closed { .. })));
    assert!(matches!(dup.iter(), Err(Error::Closed { .. })));
    assert!(matches!(dup.duplicate(), Err(Error::Closed { .. })));
    assert_eq!(dup.mapped_bytes(), 0);

    // The original is unaffected
    assert_eq!(reader.get(key).unwrap().as_ref(), Some(value));

    reader.close();
    assert_eq!(metrics.snapshot().open_maps, 0);
    assert_eq!(metrics.snapshot().mapped_bytes, 0);
}

#[test]
fn test_duplicates_across_threads() {
    let temp_dir = TempDir::new().unwrap();
    let (log, model) = build_pair(
        &temp_dir,
        "threads",
        LogConfig::default().compression(CompressionType::Snappy).block_size(256),
        IndexConfig::default(),
        33,
        4000,
    );

    let reader = tessera_storage::open(&log).unwrap();
    let model = std::sync::Arc::new(model);
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let mut dup = reader.duplicate().unwrap();
            let model = model.clone();
            thread::spawn(move || {
                for (i, (key, value)) in model.iter().enumerate() {
                    if i % 4 == t {
                        assert_eq!(dup.get(key).unwrap().as_ref(), Some(value));
                    }
                }
                dup.close();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!reader.is_closed());
}

#[test]
fn test_index_from_another_log() {
    let temp_dir = TempDir::new().unwrap();
    let (first, _) = build_pair(&temp_dir, "first", LogConfig::default(), IndexConfig::default(), 1, 100);
    let (second, _) = build_pair(&temp_dir, "second", LogConfig::default(), IndexConfig::default(), 2, 100);

    let result = HashReader::open(paths::index_path_for(&first), &second);
    assert!(matches!(result, Err(Error::IndexFormat { .. })));
}

#[test]
fn test_damaged_index_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let (log, _) = build_pair(&temp_dir, "damaged", LogConfig::default(), IndexConfig::default(), 4, 300);
    let index = paths::index_path_for(&log);
    let original = fs::read(&index).unwrap();

    let expect_format_error = |bytes: &[u8]| {
        fs::write(&index, bytes).unwrap();
        let result = HashReader::open(&index, &log);
        assert!(matches!(result, Err(Error::IndexFormat { .. })), "{:?}", result.err());
    };

    // Bad magic
    let mut bytes = original.clone();
    bytes[0] ^= 0xff;
    expect_format_error(&bytes);

    // Truncated table
    expect_format_error(&original[..original.len() - 1]);

    // Too short for a header
    expect_format_error(&original[..40]);

    // Claims more log data than the log holds
    let mut bytes = original.clone();
    bytes[20..28].copy_from_slice(&u64::MAX.to_le_bytes());
    expect_format_error(&bytes);

    // Capacity whose table size overflows
    let mut bytes = original.clone();
    bytes[76..84].copy_from_slice(&(1u64 << 62).to_le_bytes());
    expect_format_error(&bytes);

    fs::write(&index, &original).unwrap();
    assert!(HashReader::open(&index, &log).is_ok());
}

#[test]
fn test_slot_past_log_is_corruption() {
    let temp_dir = TempDir::new().unwrap();
    let log = temp_dir.path().join("corrupt.log");
    let mut writer = LogWriter::create(&log, LogConfig::default()).unwrap();
    writer.put(b"a", b"1").unwrap();
    writer.close().unwrap();
    build_index(&log, IndexConfig::default()).unwrap();

    // Point every occupied slot far past the end of the log
    let index = paths::index_path_for(&log);
    let mut bytes = fs::read(&index).unwrap();
    let header = IndexHeader::decode(&bytes[..INDEX_HEADER_SIZE]).unwrap();
    let hash_size = header.slot_size() - header.address_size as usize;
    let address = 100_000u64 << header.entry_block_bits;
    for slot in bytes[INDEX_HEADER_SIZE..].chunks_mut(header.slot_size()) {
        let field = &mut slot[hash_size..];
        if field.iter().any(|&b| b != 0) {
            field.copy_from_slice(&address.to_le_bytes()[..field.len()]);
        }
    }
    fs::write(&index, &bytes).unwrap();

    let mut reader = HashReader::open(&index, &log).unwrap();
    let result = reader.get(b"a");
    assert!(matches!(result, Err(Error::IndexCorruption { .. })), "{:?}", result);
    assert!(!matches!(result, Err(Error::Closed { .. })));
    assert!(matches!(reader.contains(b"a"), Err(Error::IndexCorruption { .. })));

    // The live scan walks the log, so it finds no slot naming the record
    let live: Vec<_> = reader.iter().unwrap().collect::<Result<_, _>>().unwrap();
    assert!(live.is_empty());
    assert!(!reader.is_closed());
}

#[test]
fn test_truncated_log_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let (log, _) = build_pair(&temp_dir, "short", LogConfig::default(), IndexConfig::default(), 6, 200);

    let len = fs::metadata(&log).unwrap().len();
    OpenOptions::new().write(true).open(&log).unwrap().set_len(len - 5).unwrap();
    let result = tessera_storage::open(&log);
    assert!(matches!(result, Err(Error::LogFormat { .. })));
}
