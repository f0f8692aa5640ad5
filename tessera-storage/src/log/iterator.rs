//! Sequential log scan

use bytes::Bytes;

use tessera_core::error::Result;

use crate::log::header::LogHeader;
use crate::log::reader::{LogReader, Value};
use crate::log::record::{RecordHeader, RecordKind};

/// One record as stored in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub kind: RecordKind,
    pub key: Bytes,
    /// Empty for deletes
    pub value: Bytes,
    /// Offset of the block holding the record (the record itself when uncompressed)
    pub position: u64,
    /// Ordinal of the record inside its block
    pub entry_index: u64,
}

/// Raw record scan, PUTs and DELETEs alike.
///
/// [`advance`](Self::advance) parks on a record with its key decoded and its
/// value still unread; the value is skipped on the next step unless read
/// through [`value`](Self::value). The [`Iterator`] impl copies out whole
/// records instead.
pub struct LogIterator {
    reader: LogReader,
    key: Vec<u8>,
    current: Option<RecordHeader>,
    position: u64,
    entry_index: u64,
    started: bool,
    failed: bool,
}

impl LogIterator {
    pub(crate) fn new(reader: LogReader) -> Self {
        Self {
            reader,
            key: Vec::new(),
            current: None,
            position: 0,
            entry_index: 0,
            started: false,
            failed: false,
        }
    }

    /// Move to the next record. Returns `false` at the end of the log.
    pub fn advance(&mut self) -> Result<bool> {
        self.current = None;
        self.reader.skip_pending()?;

        let position = match self.reader.next_record_position()? {
            Some(position) => position,
            None => return Ok(false),
        };
        if self.started && position == self.position {
            self.entry_index += 1;
        } else {
            self.entry_index = 0;
        }
        self.position = position;
        self.started = true;

        let header = self.reader.read_record_header()?;
        self.reader.check_lengths(&header)?;
        self.key.resize(header.key_len as usize, 0);
        self.reader.read_exact(&mut self.key)?;
        self.reader.set_pending(header.value_len);
        self.current = Some(header);
        Ok(true)
    }

    pub fn kind(&self) -> Option<RecordKind> {
        self.current.map(|h| h.kind)
    }

    /// Key of the current record
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Prefix of the current record
    pub fn record(&self) -> Option<&RecordHeader> {
        self.current.as_ref()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn entry_index(&self) -> u64 {
        self.entry_index
    }

    /// Lazy value of the current PUT
    pub fn value(&mut self) -> Option<Value<'_>> {
        match self.current {
            Some(header) if header.kind == RecordKind::Put => {
                Some(Value::new(&mut self.reader, header.value_len))
            }
            _ => None,
        }
    }

    pub fn log_header(&self) -> &LogHeader {
        self.reader.header()
    }

    fn next_record(&mut self) -> Result<Option<LogRecord>> {
        if !self.advance()? {
            return Ok(None);
        }
        let kind = match self.current {
            Some(header) => header.kind,
            None => return Ok(None),
        };
        let value = match self.value() {
            Some(mut value) => value.to_bytes()?,
            None => Bytes::new(),
        };
        Ok(Some(LogRecord {
            kind,
            key: Bytes::copy_from_slice(&self.key),
            value,
            position: self.position,
            entry_index: self.entry_index,
        }))
    }
}

impl Iterator for LogIterator {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
