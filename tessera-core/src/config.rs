//! # Configuration Management
//!
//! Options for the two write-side components: the log writer (fixed at log
//! creation) and the hash index builder (chosen per build).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Smallest compression block accepted for compressed logs.
pub const MIN_BLOCK_SIZE: u32 = 16;
/// Largest compression block accepted for compressed logs (1 GiB).
pub const MAX_BLOCK_SIZE: u32 = 1 << 30;
/// Lowest sparsity the builder will use; keeps the load factor under ~77%.
pub const MIN_SPARSITY: f64 = 1.3;
/// Key counts at or above this get 64-bit hashes when no width is forced.
pub const HASH64_THRESHOLD: u64 = 1 << 23;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub log: LogConfig,
    pub index: IndexConfig,
}

impl Config {
    /// Check both sections.
    pub fn validate(&self) -> Result<()> {
        self.log.validate()?;
        self.index.validate()
    }
}

/// Block compression applied to the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
    Zstd = 2,
}

impl CompressionType {
    pub fn is_compressed(&self) -> bool {
        !matches!(self, CompressionType::None)
    }
}

impl TryFrom<u32> for CompressionType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Snappy),
            2 => Ok(CompressionType::Zstd),
            _ => Err(Error::LogFormat {
                message: format!("Invalid compression type: {}", value),
            }),
        }
    }
}

/// Log writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub compression: CompressionType,
    /// Uncompressed bytes per block; ignored for uncompressed logs
    pub block_size: u32,
    pub zstd_level: i32,
    /// fsync on every explicit flush and on close
    pub fsync: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            compression: CompressionType::None,
            block_size: 4 * 1024,
            zstd_level: 3,
            fsync: false,
        }
    }
}

impl LogConfig {
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    pub fn fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.compression.is_compressed()
            && !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size)
        {
            return Err(Error::Configuration {
                message: format!(
                    "block size {} outside [{}, {}]",
                    self.block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
                ),
            });
        }
        Ok(())
    }
}

/// Width of the hash stored in each slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum HashType {
    Hash32 = 4,
    Hash64 = 8,
}

impl HashType {
    /// Bytes per stored hash
    pub fn size(&self) -> usize {
        *self as usize
    }

    /// Pick a width from the number of PUT records in the log.
    pub fn for_key_count(num_puts: u64) -> Self {
        if num_puts < HASH64_THRESHOLD {
            HashType::Hash32
        } else {
            HashType::Hash64
        }
    }
}

impl TryFrom<u32> for HashType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            4 => Ok(HashType::Hash32),
            8 => Ok(HashType::Hash64),
            _ => Err(Error::IndexFormat {
                message: format!("Invalid hash size: {}", value),
            }),
        }
    }
}

/// How the builder fills the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStrategy {
    /// In-memory when the table fits the memory budget, external sort otherwise
    Auto,
    InMemory,
    ExternalSort,
}

/// Hash index builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Forced hash width; chosen from the key count when unset
    pub hash_type: Option<HashType>,
    /// Capacity / number of PUT records
    pub sparsity: f64,
    /// Hash seed; random when unset
    pub seed: Option<u32>,
    pub strategy: BuildStrategy,
    /// Bytes the builder may hold in memory (table or sort buffer)
    pub memory_budget: usize,
    pub fsync: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            hash_type: None,
            sparsity: MIN_SPARSITY,
            seed: None,
            strategy: BuildStrategy::Auto,
            memory_budget: 64 * 1024 * 1024, // 64MB
            fsync: false,
        }
    }
}

impl IndexConfig {
    pub fn hash_type(mut self, hash_type: HashType) -> Self {
        self.hash_type = Some(hash_type);
        self
    }

    pub fn sparsity(mut self, sparsity: f64) -> Self {
        self.sparsity = sparsity;
        self
    }

    pub fn seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn strategy(mut self, strategy: BuildStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sparsity.is_finite() {
            return Err(Error::Configuration {
                message: format!("sparsity must be finite, got {}", self.sparsity),
            });
        }
        Ok(())
    }

    /// Sparsity actually used for sizing.
    pub fn effective_sparsity(&self) -> f64 {
        if self.sparsity < MIN_SPARSITY {
            warn!(
                requested = self.sparsity,
                floor = MIN_SPARSITY,
                "Sparsity below floor, clamping"
            );
            MIN_SPARSITY
        } else {
            self.sparsity
        }
    }
}
