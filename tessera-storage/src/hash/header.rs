//! Index file header

use std::io::{Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;

use tessera_core::error::{Error, Result};
use tessera_core::HashType;

use crate::log::LOG_HEADER_SIZE;

pub const INDEX_MAGIC: u32 = 0x9a11_318f;
pub const INDEX_MAJOR_VERSION: u32 = 1;
pub const INDEX_MINOR_VERSION: u32 = 0;
pub const INDEX_HEADER_SIZE: usize = 112;

/// Parameters and statistics of one index build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexHeader {
    pub major_version: u32,
    pub minor_version: u32,
    /// Must equal the paired log's identifier
    pub file_identifier: u32,
    pub hash_seed: u32,
    /// Log `data_end` at build time
    pub data_end: u64,
    pub max_key_len: u64,
    pub max_value_len: u64,
    pub num_puts: u64,
    /// Bytes of superseded and deleted records
    pub garbage_size: u64,
    /// Live keys
    pub num_entries: u64,
    pub address_size: u32,
    pub hash_type: HashType,
    pub hash_capacity: u64,
    pub max_displacement: u64,
    pub entry_block_bits: u32,
    pub hash_collisions: u64,
    pub total_displacement: u64,
}

impl IndexHeader {
    pub fn slot_size(&self) -> usize {
        self.hash_type.size() + self.address_size as usize
    }

    /// Exact length of a well-formed index file; `decode` bounds the capacity so this cannot overflow
    pub fn index_size(&self) -> u64 {
        INDEX_HEADER_SIZE as u64 + self.hash_capacity * self.slot_size() as u64
    }

    pub fn entry_block_bitmask(&self) -> u64 {
        crate::hash::address::entry_mask(self.entry_block_bits)
    }

    pub fn average_displacement(&self) -> f64 {
        if self.num_entries == 0 {
            0.0
        } else {
            self.total_displacement as f64 / self.num_entries as f64
        }
    }

    /// Share of the indexed log payload that is garbage
    pub fn garbage_ratio(&self) -> f64 {
        let payload = self.data_end.saturating_sub(LOG_HEADER_SIZE as u64);
        if payload == 0 {
            0.0
        } else {
            self.garbage_size as f64 / payload as f64
        }
    }

    /// Live entries over capacity
    pub fn load_factor(&self) -> f64 {
        self.num_entries as f64 / self.hash_capacity.max(1) as f64
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(INDEX_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.major_version)?;
        writer.write_u32::<LittleEndian>(self.minor_version)?;
        writer.write_u32::<LittleEndian>(self.file_identifier)?;
        writer.write_u32::<LittleEndian>(self.hash_seed)?;
        writer.write_u64::<LittleEndian>(self.data_end)?;
        writer.write_u64::<LittleEndian>(self.max_key_len)?;
        writer.write_u64::<LittleEndian>(self.max_value_len)?;
        writer.write_u64::<LittleEndian>(self.num_puts)?;
        writer.write_u64::<LittleEndian>(self.garbage_size)?;
        writer.write_u64::<LittleEndian>(self.num_entries)?;
        writer.write_u32::<LittleEndian>(self.address_size)?;
        writer.write_u32::<LittleEndian>(self.hash_type as u32)?;
        writer.write_u64::<LittleEndian>(self.hash_capacity)?;
        writer.write_u64::<LittleEndian>(self.max_displacement)?;
        writer.write_u32::<LittleEndian>(self.entry_block_bits)?;
        writer.write_u64::<LittleEndian>(self.hash_collisions)?;
        writer.write_u64::<LittleEndian>(self.total_displacement)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(INDEX_HEADER_SIZE);
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_HEADER_SIZE {
            return Err(Error::IndexFormat {
                message: format!("index file too small for header: {} bytes", bytes.len()),
            });
        }
        let mut cursor = Cursor::new(&bytes[..INDEX_HEADER_SIZE]);

        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != INDEX_MAGIC {
            return Err(Error::IndexFormat {
                message: format!("invalid index magic number: {:#010x}", magic),
            });
        }
        let major_version = cursor.read_u32::<LittleEndian>()?;
        if major_version != INDEX_MAJOR_VERSION {
            return Err(Error::IndexFormat {
                message: format!("unsupported index major version: {}", major_version),
            });
        }

        let header = IndexHeader {
            major_version,
            minor_version: cursor.read_u32::<LittleEndian>()?,
            file_identifier: cursor.read_u32::<LittleEndian>()?,
            hash_seed: cursor.read_u32::<LittleEndian>()?,
            data_end: cursor.read_u64::<LittleEndian>()?,
            max_key_len: cursor.read_u64::<LittleEndian>()?,
            max_value_len: cursor.read_u64::<LittleEndian>()?,
            num_puts: cursor.read_u64::<LittleEndian>()?,
            garbage_size: cursor.read_u64::<LittleEndian>()?,
            num_entries: cursor.read_u64::<LittleEndian>()?,
            address_size: cursor.read_u32::<LittleEndian>()?,
            hash_type: HashType::try_from(cursor.read_u32::<LittleEndian>()?)?,
            hash_capacity: cursor.read_u64::<LittleEndian>()?,
            max_displacement: cursor.read_u64::<LittleEndian>()?,
            entry_block_bits: cursor.read_u32::<LittleEndian>()?,
            hash_collisions: cursor.read_u64::<LittleEndian>()?,
            total_displacement: cursor.read_u64::<LittleEndian>()?,
        };

        if header.address_size != 4 && header.address_size != 8 {
            return Err(Error::IndexFormat {
                message: format!("invalid address size: {}", header.address_size),
            });
        }
        if header.hash_capacity == 0 || header.num_entries > header.hash_capacity {
            return Err(Error::IndexFormat {
                message: format!(
                    "capacity {} cannot hold {} entries",
                    header.hash_capacity, header.num_entries
                ),
            });
        }
        let max_capacity = (u64::MAX - INDEX_HEADER_SIZE as u64) / header.slot_size() as u64;
        if header.hash_capacity > max_capacity {
            return Err(Error::IndexFormat {
                message: format!("capacity {} overflows the index size", header.hash_capacity),
            });
        }
        if header.entry_block_bits > 32 {
            return Err(Error::IndexFormat {
                message: format!("invalid entry block bits: {}", header.entry_block_bits),
            });
        }
        Ok(header)
    }
}
