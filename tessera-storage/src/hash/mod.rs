//! Static open-addressing hash index.
//!
//! ```text
//! ┌───────────────┬──────────────────┬──────────────────┬─────┐
//! │ header (112B) │ slot 0           │ slot 1           │ ... │
//! │               │ hash | address   │ hash | address   │     │
//! └───────────────┴──────────────────┴──────────────────┴─────┘
//! ```
//!
//! The table is built once from a log snapshot and never updated in place;
//! a rebuild writes a new file and renames it over the old one.

mod address;
mod builder;
mod header;
mod iterator;
mod reader;
mod sort;
mod table;

pub use address::{address_size_for, Address};
pub use builder::HashBuilder;
pub use header::{IndexHeader, INDEX_HEADER_SIZE, INDEX_MAGIC, INDEX_MAJOR_VERSION, INDEX_MINOR_VERSION};
pub use iterator::{LiveEntries, LiveEntry};
pub use reader::HashReader;
