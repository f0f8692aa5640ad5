//! Pluggable block codecs.
//!
//! The codec is resolved once from the log header's compression tag and then
//! handed to block writers and cursors; per-block calls go through a single
//! `match`, never per byte.

use tessera_core::error::{Error, Result};
use tessera_core::CompressionType;

/// Contract every block codec satisfies
pub trait BlockCodec {
    /// Upper bound on the compressed size of `block_size` raw bytes
    fn max_compressed_len(&self, block_size: usize) -> usize;

    /// Compress `src` into `dst`, returning the compressed length
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize>;

    /// Decompress `src` into `dst`, returning the decompressed length
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SnappyCodec;

impl BlockCodec for SnappyCodec {
    fn max_compressed_len(&self, block_size: usize) -> usize {
        snap::raw::max_compress_len(block_size)
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        snap::raw::Encoder::new()
            .compress(src, dst)
            .map_err(|e| Error::Compression {
                message: format!("Snappy compression failed: {}", e),
            })
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        snap::raw::Decoder::new()
            .decompress(src, dst)
            .map_err(|e| Error::Compression {
                message: format!("Snappy decompression failed: {}", e),
            })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(3)
    }
}

impl BlockCodec for ZstdCodec {
    fn max_compressed_len(&self, block_size: usize) -> usize {
        zstd::zstd_safe::compress_bound(block_size)
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        zstd::bulk::compress_to_buffer(src, dst, self.level).map_err(|e| Error::Compression {
            message: format!("Zstd compression failed: {}", e),
        })
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        zstd::bulk::decompress_to_buffer(src, dst).map_err(|e| Error::Compression {
            message: format!("Zstd decompression failed: {}", e),
        })
    }
}

/// Codec selected by a log's compression tag
#[derive(Debug, Clone, Copy)]
pub enum Codec {
    Snappy(SnappyCodec),
    Zstd(ZstdCodec),
}

impl Codec {
    /// Resolve the codec for a compression tag; `None` for uncompressed logs.
    pub fn for_type(compression: CompressionType, zstd_level: i32) -> Option<Self> {
        match compression {
            CompressionType::None => None,
            CompressionType::Snappy => Some(Codec::Snappy(SnappyCodec)),
            CompressionType::Zstd => Some(Codec::Zstd(ZstdCodec::new(zstd_level))),
        }
    }

    pub fn compression_type(&self) -> CompressionType {
        match self {
            Codec::Snappy(_) => CompressionType::Snappy,
            Codec::Zstd(_) => CompressionType::Zstd,
        }
    }
}

impl BlockCodec for Codec {
    fn max_compressed_len(&self, block_size: usize) -> usize {
        match self {
            Codec::Snappy(c) => c.max_compressed_len(block_size),
            Codec::Zstd(c) => c.max_compressed_len(block_size),
        }
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        match self {
            Codec::Snappy(c) => c.compress(src, dst),
            Codec::Zstd(c) => c.compress(src, dst),
        }
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        match self {
            Codec::Snappy(c) => c.decompress(src, dst),
            Codec::Zstd(c) => c.decompress(src, dst),
        }
    }
}
