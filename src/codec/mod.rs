//! Binary codec for chunk payloads
//!
//! - **array**: typed columns, null masks, dtype inference
//! - **table**: multi-column framing with index handling
//! - **compression**: LZ4 blocks for values and masks
//!
//! Every frame is wrapped in a small envelope before it is handed to a
//! backing store:
//!
//! ```text
//! ┌────────┬─────────┬────────┬──────────────────────┐
//! │ "STRC" │ version │ crc32  │ bincode(frame)       │
//! │ 4 B    │ u16 LE  │ u32 LE │ ...                  │
//! └────────┴─────────┴────────┴──────────────────────┘
//! ```

pub mod array;
pub mod compression;
pub mod table;

pub use array::{decode_array, encode_array, Array, ArrayData, DType, SerializedArray};
pub use compression::{compress, compression_stats, decompress, CompressionStats};
pub use table::{decode_table, decode_tables, encode_table, Column, SerializedTable, Table};

use crate::storage::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

const ENVELOPE_MAGIC: [u8; 4] = *b"STRC";
const ENVELOPE_VERSION: u16 = 1;
const ENVELOPE_HEADER: usize = 10;

/// Serialize a frame into an enveloped payload
pub fn seal<T: Serialize>(frame: &T) -> StoreResult<Vec<u8>> {
    let body = bincode::serialize(frame)?;
    let mut buf = Vec::with_capacity(ENVELOPE_HEADER + body.len());
    buf.extend_from_slice(&ENVELOPE_MAGIC);
    buf.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Verify and deserialize a payload produced by [`seal`]
pub fn open<T: DeserializeOwned>(payload: &[u8]) -> StoreResult<T> {
    if payload.len() < ENVELOPE_HEADER {
        return Err(StoreError::Corruption(format!(
            "Payload too short: {} bytes",
            payload.len()
        )));
    }
    if payload[0..4] != ENVELOPE_MAGIC {
        return Err(StoreError::Corruption("Invalid payload magic".into()));
    }

    let version = u16::from_le_bytes([payload[4], payload[5]]);
    if version > ENVELOPE_VERSION {
        return Err(StoreError::Corruption(format!(
            "Unsupported payload version: {}",
            version
        )));
    }

    let stored = u32::from_le_bytes([payload[6], payload[7], payload[8], payload[9]]);
    let body = &payload[ENVELOPE_HEADER..];
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(StoreError::Corruption(format!(
            "Payload checksum mismatch: stored={:08x}, computed={:08x}",
            stored, computed
        )));
    }

    Ok(bincode::deserialize(body)?)
}
