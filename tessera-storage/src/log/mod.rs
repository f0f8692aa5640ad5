//! Append-only record log.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────┬───────────────┐
//! │ header (84B) │ records, or VLQ-framed record blocks │ unflushed ... │
//! └──────────────┴──────────────────────────────────────┴───────────────┘
//!                                                      ^ data_end
//! ```
//!
//! A record is addressed by `(position, entry_index)`: the offset of the
//! block holding it and its ordinal inside that block. Uncompressed logs hold
//! one record per "block", so the entry index is always zero there.

mod header;
mod iterator;
mod reader;
mod record;
mod writer;

pub use header::{LogHeader, LOG_HEADER_SIZE, LOG_MAGIC, LOG_MAJOR_VERSION, LOG_MINOR_VERSION};
pub use iterator::{LogIterator, LogRecord};
pub use reader::{LogReader, Value};
pub use record::{delete_record_size, put_record_size, RecordHeader, RecordKind, DELETE_MARKER};
pub use writer::LogWriter;
