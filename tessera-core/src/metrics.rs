//! # Metrics and Monitoring
//!
//! An explicit telemetry sink handed to writers, builders and readers.
//! Cloning a [`Metrics`] shares the same counters, so one handle can watch a
//! whole set of files; separate handles keep separate books.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Resource gauges
    open_files: AtomicU64,
    open_maps: AtomicU64,
    mapped_bytes: AtomicU64,

    // Write metrics
    puts: AtomicU64,
    deletes: AtomicU64,
    blocks_written: AtomicU64,
    index_builds: AtomicU64,

    // Read metrics
    lookups: AtomicU64,
    lookup_hits: AtomicU64,
    probed_slots: AtomicU64,
    max_probe: AtomicU64,
    live_entries_iterated: AtomicU64,
    duplicates: AtomicU64,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Metrics").field(&self.snapshot()).finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// A file handle was opened for writing
    pub fn file_opened(&self) {
        self.inner.open_files.fetch_add(1, Ordering::Relaxed);
    }

    /// A file handle opened for writing was released
    pub fn file_closed(&self) {
        self.inner.open_files.fetch_sub(1, Ordering::Relaxed);
    }

    /// A file was memory-mapped
    pub fn map_opened(&self, bytes: u64) {
        self.inner.open_maps.fetch_add(1, Ordering::Relaxed);
        self.inner.mapped_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A mapping was released
    pub fn map_closed(&self, bytes: u64) {
        self.inner.open_maps.fetch_sub(1, Ordering::Relaxed);
        self.inner.mapped_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Record a PUT appended to a log
    pub fn record_put(&self) {
        self.inner.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a DELETE appended to a log
    pub fn record_delete(&self) {
        self.inner.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a compressed block written
    pub fn record_block(&self) {
        self.inner.blocks_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed index build
    pub fn record_index_build(&self) {
        self.inner.index_builds.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a point lookup and how far past the home slot it probed
    pub fn record_lookup(&self, probes: u64, hit: bool) {
        self.inner.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.inner.lookup_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.probed_slots.fetch_add(probes, Ordering::Relaxed);
        self.inner.max_probe.fetch_max(probes, Ordering::Relaxed);
    }

    /// Record a live entry produced by iteration
    pub fn record_live_entry(&self) {
        self.inner.live_entries_iterated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reader duplication
    pub fn record_duplicate(&self) {
        self.inner.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            open_files: self.inner.open_files.load(Ordering::Relaxed),
            open_maps: self.inner.open_maps.load(Ordering::Relaxed),
            mapped_bytes: self.inner.mapped_bytes.load(Ordering::Relaxed),
            puts: self.inner.puts.load(Ordering::Relaxed),
            deletes: self.inner.deletes.load(Ordering::Relaxed),
            blocks_written: self.inner.blocks_written.load(Ordering::Relaxed),
            index_builds: self.inner.index_builds.load(Ordering::Relaxed),
            lookups: self.inner.lookups.load(Ordering::Relaxed),
            lookup_hits: self.inner.lookup_hits.load(Ordering::Relaxed),
            probed_slots: self.inner.probed_slots.load(Ordering::Relaxed),
            max_probe: self.inner.max_probe.load(Ordering::Relaxed),
            live_entries_iterated: self.inner.live_entries_iterated.load(Ordering::Relaxed),
            duplicates: self.inner.duplicates.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub open_files: u64,
    pub open_maps: u64,
    pub mapped_bytes: u64,
    pub puts: u64,
    pub deletes: u64,
    pub blocks_written: u64,
    pub index_builds: u64,
    pub lookups: u64,
    pub lookup_hits: u64,
    pub probed_slots: u64,
    pub max_probe: u64,
    pub live_entries_iterated: u64,
    pub duplicates: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Start new timer
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and log duration
    pub fn stop(self) -> Duration {
        let duration = self.elapsed();
        tracing::debug!(
            name = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
        duration
    }
}
