//! Live-entry scan
//!
//! Walks the raw log and keeps a PUT only when the index still points at
//! that exact record. Superseded PUTs and all DELETEs fall out, at the cost of
//! one probe per PUT.

use std::sync::Arc;

use bytes::Bytes;

use tessera_core::error::Result;
use tessera_core::Metrics;

use crate::hash::address::Address;
use crate::hash::reader::IndexBacking;
use crate::log::{LogIterator, RecordKind, Value};

/// A key and its current value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEntry {
    pub key: Bytes,
    pub value: Bytes,
}

pub struct LiveEntries {
    index: Arc<IndexBacking>,
    records: LogIterator,
    metrics: Metrics,
    failed: bool,
}

impl LiveEntries {
    pub(crate) fn new(index: Arc<IndexBacking>, records: LogIterator, metrics: Metrics) -> Self {
        Self {
            index,
            records,
            metrics,
            failed: false,
        }
    }

    /// Move to the next live entry, leaving its value unread.
    pub fn advance(&mut self) -> Result<bool> {
        let bits = self.index.header().entry_block_bits;
        while self.records.advance()? {
            if self.records.kind() != Some(RecordKind::Put) {
                continue;
            }
            let address = Address::pack(self.records.position(), self.records.entry_index(), bits);
            if self.index.is_at(self.records.key(), address)? {
                self.metrics.record_live_entry();
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn key(&self) -> &[u8] {
        self.records.key()
    }

    pub fn value(&mut self) -> Option<Value<'_>> {
        self.records.value()
    }

    fn next_entry(&mut self) -> Result<Option<LiveEntry>> {
        if !self.advance()? {
            return Ok(None);
        }
        let key = Bytes::copy_from_slice(self.records.key());
        let value = match self.records.value() {
            Some(mut value) => value.to_bytes()?,
            None => Bytes::new(),
        };
        Ok(Some(LiveEntry { key, value }))
    }
}

impl Iterator for LiveEntries {
    type Item = Result<LiveEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
