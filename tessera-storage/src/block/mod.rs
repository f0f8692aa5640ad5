//! Compression block framing.
//!
//! ```text
//! ┌──────────────────────┬──────────────────────┬─────
//! │ VLQ(len) │ len bytes │ VLQ(len) │ len bytes │ ...
//! └──────────────────────┴──────────────────────┴─────
//!   frame 0: entries 0..k   frame 1: entries 0..m
//! ```
//!
//! Each frame decompresses to at most `block_size` bytes and starts on an
//! entry boundary, which is what lets `(frame offset, entry index)` name an
//! entry. An entry bigger than a block continues into the next frames.

mod codec;
mod cursor;
mod writer;

pub use codec::{BlockCodec, Codec, SnappyCodec, ZstdCodec};
pub use cursor::{BlockCursor, BlockSource};
pub use writer::BlockWriter;
