//! Open-addressing table over raw slot bytes.
//!
//! The same routines run over a `Vec<u8>` during an in-memory build, a
//! writable mapping during an external-sort build and the read-only mapping
//! of an opened index. A slot is `hash || address`, both little-endian.
//!
//! Insertion is Robin Hood with ties broken by the smaller address, and
//! removal shifts the following run back by one. Together they make the
//! layout a function of the live set alone: every cluster holds its entries
//! ordered by `(wanted slot, address)`, whatever order they arrived in.

use byteorder::{ByteOrder, LittleEndian};
use xxhash_rust::xxh32::xxh32;
use xxhash_rust::xxh64::xxh64;

use tessera_core::error::{Error, Result};
use tessera_core::HashType;

use crate::hash::address::Address;
use crate::hash::header::IndexHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub hash: u64,
    pub address: Address,
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        self.address.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotLayout {
    pub hash_type: HashType,
    pub seed: u32,
    pub address_size: usize,
    pub capacity: u64,
}

impl SlotLayout {
    pub fn from_header(header: &IndexHeader) -> Self {
        Self {
            hash_type: header.hash_type,
            seed: header.hash_seed,
            address_size: header.address_size as usize,
            capacity: header.hash_capacity,
        }
    }

    pub fn slot_size(&self) -> usize {
        self.hash_type.size() + self.address_size
    }

    pub fn table_bytes(&self) -> usize {
        self.capacity as usize * self.slot_size()
    }

    pub fn hash(&self, key: &[u8]) -> u64 {
        match self.hash_type {
            HashType::Hash32 => xxh32(key, self.seed) as u64,
            HashType::Hash64 => xxh64(key, self.seed as u64),
        }
    }

    pub fn wanted(&self, hash: u64) -> u64 {
        hash % self.capacity
    }

    /// Distance of `index` past the home slot of `hash`
    pub fn displacement(&self, index: u64, hash: u64) -> u64 {
        (index + self.capacity - self.wanted(hash)) % self.capacity
    }

    pub fn next(&self, index: u64) -> u64 {
        if index + 1 == self.capacity {
            0
        } else {
            index + 1
        }
    }

    pub fn read(&self, table: &[u8], index: u64) -> Slot {
        let offset = index as usize * self.slot_size();
        let hash_size = self.hash_type.size();
        let hash = read_uint(&table[offset..offset + hash_size]);
        let address = read_uint(&table[offset + hash_size..offset + hash_size + self.address_size]);
        Slot {
            hash,
            address: Address::from_raw(address),
        }
    }

    pub fn write(&self, table: &mut [u8], index: u64, slot: Slot) {
        let offset = index as usize * self.slot_size();
        let hash_size = self.hash_type.size();
        write_uint(&mut table[offset..offset + hash_size], slot.hash);
        write_uint(
            &mut table[offset + hash_size..offset + hash_size + self.address_size],
            slot.address.raw(),
        );
    }

    pub fn clear(&self, table: &mut [u8], index: u64) {
        let offset = index as usize * self.slot_size();
        table[offset..offset + self.slot_size()].fill(0);
    }
}

fn read_uint(buf: &[u8]) -> u64 {
    if buf.len() == 4 {
        LittleEndian::read_u32(buf) as u64
    } else {
        LittleEndian::read_u64(buf)
    }
}

fn write_uint(buf: &mut [u8], value: u64) {
    if buf.len() == 4 {
        LittleEndian::write_u32(buf, value as u32);
    } else {
        LittleEndian::write_u64(buf, value);
    }
}

/// Outcome of a probe walk
#[derive(Debug, Clone, Copy)]
pub(crate) struct Probe {
    pub slot: Option<u64>,
    /// Displacement of the last slot inspected
    pub length: u64,
}

/// Walk the probe sequence of `hash`, asking `matches` about every slot with
/// an equal hash.
///
/// The walk ends at an empty slot, at an occupant closer to its own home than
/// the walk is to ours, or past `max_displacement`.
pub(crate) fn find<F>(
    layout: &SlotLayout,
    table: &[u8],
    hash: u64,
    max_displacement: u64,
    mut matches: F,
) -> Result<Probe>
where
    F: FnMut(Address) -> Result<bool>,
{
    let limit = max_displacement.min(layout.capacity - 1);
    let mut index = layout.wanted(hash);
    for displacement in 0..=limit {
        let slot = layout.read(table, index);
        if slot.is_empty() {
            return Ok(Probe { slot: None, length: displacement });
        }
        if slot.hash == hash && matches(slot.address)? {
            return Ok(Probe { slot: Some(index), length: displacement });
        }
        if layout.displacement(index, slot.hash) < displacement {
            return Ok(Probe { slot: None, length: displacement });
        }
        index = layout.next(index);
    }
    Ok(Probe { slot: None, length: limit })
}

/// Robin Hood insert of a slot whose key is not in the table
pub(crate) fn insert(layout: &SlotLayout, table: &mut [u8], mut incoming: Slot) -> Result<()> {
    let mut index = layout.wanted(incoming.hash);
    let mut displacement = 0;
    for _ in 0..layout.capacity {
        let occupant = layout.read(table, index);
        if occupant.is_empty() {
            layout.write(table, index, incoming);
            return Ok(());
        }
        let other = layout.displacement(index, occupant.hash);
        if displacement > other || (displacement == other && incoming.address < occupant.address) {
            layout.write(table, index, incoming);
            incoming = occupant;
            displacement = other;
        }
        index = layout.next(index);
        displacement += 1;
    }
    Err(Error::CapacityExhausted {
        capacity: layout.capacity,
    })
}

/// Backward-shift removal of the slot at `index`
pub(crate) fn remove(layout: &SlotLayout, table: &mut [u8], index: u64) {
    let mut hole = index;
    loop {
        let next = layout.next(hole);
        if next == index {
            break;
        }
        let slot = layout.read(table, next);
        if slot.is_empty() || layout.displacement(next, slot.hash) == 0 {
            break;
        }
        layout.write(table, hole, slot);
        hole = next;
    }
    layout.clear(table, hole);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TableStats {
    pub entries: u64,
    pub max_displacement: u64,
    pub total_displacement: u64,
    pub hash_collisions: u64,
}

/// One pass over a finished table
pub(crate) fn table_stats(layout: &SlotLayout, table: &[u8]) -> TableStats {
    let mut stats = TableStats::default();
    let mut previous: Option<Slot> = None;
    for index in 0..layout.capacity {
        let slot = layout.read(table, index);
        if slot.is_empty() {
            previous = None;
            continue;
        }
        let displacement = layout.displacement(index, slot.hash);
        stats.entries += 1;
        stats.total_displacement += displacement;
        stats.max_displacement = stats.max_displacement.max(displacement);
        if matches!(previous, Some(p) if p.hash == slot.hash) {
            stats.hash_collisions += 1;
        }
        previous = Some(slot);
    }
    // Clusters wrap, so the last slot also neighbours slot 0
    if layout.capacity > 1 {
        let (first, last) = (layout.read(table, 0), layout.read(table, layout.capacity - 1));
        if !first.is_empty() && !last.is_empty() && first.hash == last.hash {
            stats.hash_collisions += 1;
        }
    }
    stats
}
