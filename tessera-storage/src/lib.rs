//! # Tessera Storage
//!
//! Append-only key-value files read through a static hash index.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                             │
//! │                                                             │
//! │  put/delete ──> LogWriter ──> blocks ──> data.log           │
//! │                                │                            │
//! │                                ▼                            │
//! │                 HashBuilder (in-memory | external sort)     │
//! │                                │                            │
//! │                                ▼                            │
//! │                 temp file ──> rename ──> data.idx           │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path                              │
//! │                                                             │
//! │  lookup ──> hash ──> probe slots ──> resolve address ──>    │
//! │                        │              compare key in log    │
//! │                        ▼                                    │
//! │                 bounded by max displacement                 │
//! │                                                             │
//! │  iter ──> scan log ──> keep PUTs the index still points at  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! One writer appends and rebuilds; readers open the pair read-only and hand
//! each thread its own [`HashReader::duplicate`].

pub mod block;
pub mod hash;
pub mod log;
pub mod paths;

use std::path::Path;

pub use hash::{Address, HashBuilder, HashReader, IndexHeader, LiveEntries, LiveEntry};
pub use log::{LogHeader, LogIterator, LogReader, LogRecord, LogWriter, RecordKind, Value};
pub use tessera_core::{Error, IndexConfig, LogConfig, Metrics, Result};

/// Build (or rebuild) the index that pairs with `log_path`
pub fn build_index(log_path: impl AsRef<Path>, config: IndexConfig) -> Result<IndexHeader> {
    let log_path = log_path.as_ref();
    HashBuilder::new(config).build(log_path, paths::index_path_for(log_path))
}

/// Open a log together with its paired index
pub fn open(log_path: impl AsRef<Path>) -> Result<HashReader> {
    let log_path = log_path.as_ref();
    HashReader::open(paths::index_path_for(log_path), log_path)
}
