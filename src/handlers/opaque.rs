//! Fallback handler for values no other handler claims
//!
//! The value is serialized as JSON. Small values live inline in the version
//! document; larger ones become a single LZ4-compressed chunk.

use crate::backend::{BackingStore, Layout, VersionDoc};
use crate::chunker::SegmentFilter;
use crate::codec::{compress, decompress, open, seal, Array, ArrayData};
use crate::handlers::{fetch_chunks, store_chunk, HandlerOutput, TypeHandler, WriteContext};
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::types::{Data, DateRange, WriteOptions};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueHandler;

/// JSON has no NaN or infinity; serde_json would write them as `null`
fn has_non_finite(array: &Array) -> bool {
    match array.data() {
        ArrayData::Float64(values) => values
            .iter()
            .enumerate()
            .any(|(i, x)| !x.is_finite() && !array.is_null(i)),
        _ => false,
    }
}

fn check_representable(symbol: &str, data: &Data) -> StoreResult<()> {
    let column = match data {
        Data::Array(array) => has_non_finite(array).then(|| "array".to_string()),
        Data::Table(table) => table
            .index()
            .iter()
            .chain(table.columns())
            .find(|c| has_non_finite(&c.values))
            .map(|c| format!("column {}", c.name)),
        // serde_json::Value cannot hold non-finite numbers
        Data::Object(_) => None,
    };
    match column {
        Some(what) => Err(StoreError::UnsupportedType(format!(
            "'{}': {} holds NaN or infinite values, which cannot be stored as JSON",
            symbol, what
        ))),
        None => Ok(()),
    }
}

impl TypeHandler for OpaqueHandler {
    fn name(&self) -> &'static str {
        "default"
    }

    fn can_write(
        &self,
        _previous: Option<&VersionDoc>,
        _symbol: &str,
        _data: &Data,
        _options: &WriteOptions,
    ) -> bool {
        true
    }

    fn write(
        &self,
        store: &dyn BackingStore,
        ctx: &WriteContext<'_>,
        data: &Data,
    ) -> StoreResult<HandlerOutput> {
        check_representable(ctx.symbol, data)?;
        let raw = serde_json::to_vec(data)?;
        let size = raw.len() as u64;

        if raw.len() <= ctx.config.inline_threshold_bytes {
            tracing::debug!(symbol = ctx.symbol, size, "storing value inline");
            return Ok(HandlerOutput {
                chunk_refs: Vec::new(),
                layout: Layout::Opaque {
                    inline: Some(serde_json::to_value(data)?),
                    size,
                },
            });
        }

        let hash = blake3::hash(&raw).to_hex().to_string();
        let payload = seal(&compress(&raw))?;
        let id = store_chunk(store, ctx, (None, None), hash, 1, payload)?;

        Ok(HandlerOutput {
            chunk_refs: vec![id],
            layout: Layout::Opaque { inline: None, size },
        })
    }

    fn read(
        &self,
        store: &dyn BackingStore,
        library: &str,
        version: &VersionDoc,
        _range: Option<DateRange>,
    ) -> StoreResult<Data> {
        match &version.layout {
            Layout::Opaque {
                inline: Some(value), ..
            } => Ok(serde_json::from_value(value.clone())?),
            Layout::Opaque { inline: None, .. } => {
                let chunks = fetch_chunks(store, library, version, SegmentFilter::Any)?;
                let chunk = chunks.first().ok_or_else(|| {
                    StoreError::InvariantViolation(format!(
                        "version {} of '{}' has no payload chunk",
                        version.version, version.symbol
                    ))
                })?;
                let block: Vec<u8> = open(&chunk.payload)?;
                let raw = decompress(&block)?;
                Ok(serde_json::from_slice(&raw)?)
            }
            other => Err(StoreError::Corruption(format!(
                "Opaque version {} of '{}' has layout {:?}",
                version.version, version.symbol, other
            ))),
        }
    }

    fn get_info(&self, version: &VersionDoc) -> Value {
        let (inline, size) = match &version.layout {
            Layout::Opaque { inline, size } => (inline.is_some(), *size),
            _ => (false, 0),
        };
        json!({
            "handler": self.name(),
            "inline": inline,
            "size": size,
            "chunks": version.chunk_refs.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{new_version_id, InMemoryStore};
    use crate::config::EngineConfig;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn version_from(output: HandlerOutput, id: crate::backend::VersionId) -> VersionDoc {
        VersionDoc {
            id,
            symbol: "blob".into(),
            version: 1,
            created_at: Utc::now(),
            metadata: None,
            handler: "default".into(),
            deleted: false,
            chunk_refs: output.chunk_refs,
            parent_snapshots: BTreeSet::new(),
            layout: output.layout,
        }
    }

    fn write(store: &InMemoryStore, config: &EngineConfig, data: &Data) -> VersionDoc {
        let id = new_version_id();
        let options = WriteOptions::default();
        let ctx = WriteContext {
            library: "lib",
            symbol: "blob",
            version_id: id,
            previous: None,
            options: &options,
            config,
        };
        version_from(OpaqueHandler.write(store, &ctx, data).unwrap(), id)
    }

    #[test]
    fn test_small_values_stay_inline() {
        let store = InMemoryStore::new();
        let config = EngineConfig::default();
        let data: Data = json!({"weights": [1, 2, 3]}).into();

        let version = write(&store, &config, &data);
        assert!(version.chunk_refs.is_empty());
        assert!(store.list_chunks("lib", None).unwrap().is_empty());
        assert_eq!(OpaqueHandler.read(&store, "lib", &version, None).unwrap(), data);
    }

    #[test]
    fn test_large_values_use_one_chunk() {
        let store = InMemoryStore::new();
        let config = EngineConfig {
            inline_threshold_bytes: 16,
            ..EngineConfig::default()
        };
        let data: Data = json!({"text": "x".repeat(1000)}).into();

        let version = write(&store, &config, &data);
        assert_eq!(version.chunk_refs.len(), 1);
        assert_eq!(OpaqueHandler.read(&store, "lib", &version, None).unwrap(), data);
        assert_eq!(OpaqueHandler.get_info(&version)["inline"], json!(false));
    }

    #[test]
    fn test_non_finite_floats_are_rejected() {
        let store = InMemoryStore::new();
        let config = EngineConfig::default();
        let options = WriteOptions::default();
        let ctx = WriteContext {
            library: "lib",
            symbol: "blob",
            version_id: new_version_id(),
            previous: None,
            options: &options,
            config: &config,
        };

        let data: Data = Array::from_f64(vec![1.0, f64::NAN]).into();
        let err = OpaqueHandler.write(&store, &ctx, &data).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedType(ref m) if m.contains("NaN")));

        let masked: Data = Array::nullable_f64(vec![Some(1.0), None]).into();
        assert!(OpaqueHandler.write(&store, &ctx, &masked).is_ok());
    }

    #[test]
    fn test_append_is_unsupported() {
        let store = InMemoryStore::new();
        let config = EngineConfig::default();
        let options = WriteOptions::default();
        let ctx = WriteContext {
            library: "lib",
            symbol: "blob",
            version_id: new_version_id(),
            previous: None,
            options: &options,
            config: &config,
        };
        let err = OpaqueHandler
            .append(&store, &ctx, &json!(1).into())
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperation(_)));
    }
}
