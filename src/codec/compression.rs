//! LZ4 block compression for chunk payloads
//!
//! Every value buffer and null mask is compressed before it is placed in a
//! frame. Blocks carry their uncompressed size so decompression needs no
//! side channel.

use crate::storage::error::{StoreError, StoreResult};

/// Compress a raw buffer into a size-prepended LZ4 block
pub fn compress(raw: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(raw)
}

/// Decompress a block produced by [`compress`]
pub fn decompress(block: &[u8]) -> StoreResult<Vec<u8>> {
    lz4_flex::decompress_size_prepended(block)
        .map_err(|e| StoreError::Compression(format!("LZ4 decompression failed: {}", e)))
}

/// Compression statistics for a single buffer
#[derive(Debug, Clone, Copy)]
pub struct CompressionStats {
    /// Uncompressed size (bytes)
    pub original_size: usize,
    /// Compressed size (bytes)
    pub compressed_size: usize,
    /// Compression ratio (original / compressed)
    pub ratio: f64,
}

/// Calculate compression statistics
pub fn compression_stats(original_size: usize, compressed_size: usize) -> CompressionStats {
    let ratio = if compressed_size > 0 {
        original_size as f64 / compressed_size as f64
    } else {
        0.0
    };

    CompressionStats {
        original_size,
        compressed_size,
        ratio,
    }
}
