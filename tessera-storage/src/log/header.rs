//! Log file header

use std::io::{Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;

use tessera_core::config::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use tessera_core::error::{Error, Result};
use tessera_core::CompressionType;

pub const LOG_MAGIC: u32 = 0x49b3_9c95;
pub const LOG_MAJOR_VERSION: u32 = 1;
pub const LOG_MINOR_VERSION: u32 = 0;
pub const LOG_HEADER_SIZE: usize = 84;

/// Counters and parameters persisted at the front of every log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogHeader {
    pub major_version: u32,
    pub minor_version: u32,
    /// Random tag binding this log to the indexes built from it
    pub file_identifier: u32,
    pub num_puts: u64,
    pub num_deletes: u64,
    /// End of valid data; the file may be longer
    pub data_end: u64,
    pub max_key_len: u64,
    pub max_value_len: u64,
    /// Total on-disk bytes of DELETE records
    pub delete_size: u64,
    pub compression_type: CompressionType,
    pub compression_block_size: u32,
    /// Total on-disk bytes of PUT records
    pub put_size: u64,
    pub max_entries_per_block: u32,
}

impl LogHeader {
    pub fn new(file_identifier: u32, compression_type: CompressionType, block_size: u32) -> Self {
        let compressed = compression_type.is_compressed();
        Self {
            major_version: LOG_MAJOR_VERSION,
            minor_version: LOG_MINOR_VERSION,
            file_identifier,
            num_puts: 0,
            num_deletes: 0,
            data_end: LOG_HEADER_SIZE as u64,
            max_key_len: 0,
            max_value_len: 0,
            delete_size: 0,
            compression_type,
            compression_block_size: if compressed { block_size } else { 0 },
            put_size: 0,
            // Uncompressed logs hold exactly one entry per "block"
            max_entries_per_block: if compressed { 0 } else { 1 },
        }
    }

    /// Bits needed for an entry's index inside its block
    pub fn entry_block_bits(&self) -> u32 {
        ceil_log2(self.max_entries_per_block as u64)
    }

    pub fn num_entries(&self) -> u64 {
        self.num_puts + self.num_deletes
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_type.is_compressed()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(LOG_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.major_version)?;
        writer.write_u32::<LittleEndian>(self.minor_version)?;
        writer.write_u32::<LittleEndian>(self.file_identifier)?;
        writer.write_u64::<LittleEndian>(self.num_puts)?;
        writer.write_u64::<LittleEndian>(self.num_deletes)?;
        writer.write_u64::<LittleEndian>(self.data_end)?;
        writer.write_u64::<LittleEndian>(self.max_key_len)?;
        writer.write_u64::<LittleEndian>(self.max_value_len)?;
        writer.write_u64::<LittleEndian>(self.delete_size)?;
        writer.write_u32::<LittleEndian>(self.compression_type as u32)?;
        writer.write_u32::<LittleEndian>(self.compression_block_size)?;
        writer.write_u64::<LittleEndian>(self.put_size)?;
        writer.write_u32::<LittleEndian>(self.max_entries_per_block)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(LOG_HEADER_SIZE);
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LOG_HEADER_SIZE {
            return Err(Error::LogFormat {
                message: format!("log file too small for header: {} bytes", bytes.len()),
            });
        }
        let mut cursor = Cursor::new(&bytes[..LOG_HEADER_SIZE]);

        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != LOG_MAGIC {
            return Err(Error::LogFormat {
                message: format!("invalid log magic number: {:#010x}", magic),
            });
        }

        let major_version = cursor.read_u32::<LittleEndian>()?;
        if major_version != LOG_MAJOR_VERSION {
            return Err(Error::LogFormat {
                message: format!("unsupported log major version: {}", major_version),
            });
        }
        let minor_version = cursor.read_u32::<LittleEndian>()?;
        let file_identifier = cursor.read_u32::<LittleEndian>()?;
        let num_puts = cursor.read_u64::<LittleEndian>()?;
        let num_deletes = cursor.read_u64::<LittleEndian>()?;
        let data_end = cursor.read_u64::<LittleEndian>()?;
        let max_key_len = cursor.read_u64::<LittleEndian>()?;
        let max_value_len = cursor.read_u64::<LittleEndian>()?;
        let delete_size = cursor.read_u64::<LittleEndian>()?;
        let compression_type = CompressionType::try_from(cursor.read_u32::<LittleEndian>()?)?;
        let compression_block_size = cursor.read_u32::<LittleEndian>()?;
        let put_size = cursor.read_u64::<LittleEndian>()?;
        let max_entries_per_block = cursor.read_u32::<LittleEndian>()?;

        if data_end < LOG_HEADER_SIZE as u64 {
            return Err(Error::LogFormat {
                message: format!("data end {} inside the header", data_end),
            });
        }
        if compression_type.is_compressed()
            && !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&compression_block_size)
        {
            return Err(Error::LogFormat {
                message: format!("invalid compression block size: {}", compression_block_size),
            });
        }

        Ok(Self {
            major_version,
            minor_version,
            file_identifier,
            num_puts,
            num_deletes,
            data_end,
            max_key_len,
            max_value_len,
            delete_size,
            compression_type,
            compression_block_size,
            put_size,
            max_entries_per_block,
        })
    }
}

/// Smallest `b` with `2^b >= n`; zero for `n <= 1`.
pub(crate) fn ceil_log2(n: u64) -> u32 {
    if n <= 1 {
        0
    } else {
        64 - (n - 1).leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut header = LogHeader::new(0xdead_beef, CompressionType::Snappy, 4096);
        header.num_puts = 3;
        header.data_end = 1000;
        header.max_entries_per_block = 17;

        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), LOG_HEADER_SIZE);
        assert_eq!(&bytes[0..4], &LOG_MAGIC.to_le_bytes());
        assert_eq!(&bytes[12..16], &0xdead_beefu32.to_le_bytes());
        assert_eq!(&bytes[80..84], &17u32.to_le_bytes());

        let decoded = LogHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.entry_block_bits(), 5);
    }

    #[test]
    fn test_reject_bad_headers() {
        let header = LogHeader::new(1, CompressionType::None, 0);
        let good = header.to_bytes().unwrap();

        assert!(LogHeader::decode(&good[..40]).is_err());

        let mut bad_magic = good.clone();
        bad_magic[0] ^= 0xff;
        assert!(matches!(LogHeader::decode(&bad_magic), Err(Error::LogFormat { .. })));

        let mut bad_version = good.clone();
        bad_version[4] = 9;
        assert!(matches!(LogHeader::decode(&bad_version), Err(Error::LogFormat { .. })));

        let mut bad_compression = good;
        bad_compression[72] = 5;
        assert!(LogHeader::decode(&bad_compression).is_err());
    }

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(1 << 20), 20);
    }

    #[test]
    fn test_uncompressed_defaults() {
        let header = LogHeader::new(7, CompressionType::None, 4096);
        assert_eq!(header.compression_block_size, 0);
        assert_eq!(header.max_entries_per_block, 1);
        assert_eq!(header.entry_block_bits(), 0);
        assert_eq!(header.data_end, LOG_HEADER_SIZE as u64);
    }
}
