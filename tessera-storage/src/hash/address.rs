//! Slot addresses
//!
//! ```text
//!  63                          entry_block_bits            0
//! ┌──────────────────────────────┬──────────────────────────┐
//! │ log position (block offset)  │ entry index within block │
//! └──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! Positions start after the 84-byte log header, so a packed address is never
//! zero and zero can mark an empty slot.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(u64);

impl Address {
    pub const EMPTY: Address = Address(0);

    pub fn pack(position: u64, entry_index: u64, entry_block_bits: u32) -> Self {
        Address((position << entry_block_bits) | entry_index)
    }

    pub fn from_raw(raw: u64) -> Self {
        Address(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn position(self, entry_block_bits: u32) -> u64 {
        self.0 >> entry_block_bits
    }

    pub fn entry_index(self, entry_block_bits: u32) -> u64 {
        self.0 & entry_mask(entry_block_bits)
    }

    pub fn unpack(self, entry_block_bits: u32) -> (u64, u64) {
        (self.position(entry_block_bits), self.entry_index(entry_block_bits))
    }
}

pub(crate) fn entry_mask(entry_block_bits: u32) -> u64 {
    (1u64 << entry_block_bits) - 1
}

/// Bytes per stored address: 4 when every address fits in 30 bits.
pub fn address_size_for(data_end: u64, entry_block_bits: u32) -> usize {
    if entry_block_bits <= 30 && data_end < (1u64 << (30 - entry_block_bits)) {
        4
    } else {
        8
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}
