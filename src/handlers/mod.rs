//! Type handlers
//!
//! A handler turns one shape of [`Data`] into chunks and back. The version
//! store picks a handler for each write by asking the registry, and records
//! the handler's name in the version so reads dispatch without looking at
//! the data again.
//!
//! ```text
//! write: [table, ndarray] ── first can_write ──▶ handler ──▶ chunks + layout
//!                        └── none ─────────────▶ default (opaque)
//! read:  version.handler ── can_read ──▶ handler ──▶ Data
//! ```

pub mod ndarray;
pub mod opaque;
pub mod table;

pub use ndarray::NdArrayHandler;
pub use opaque::OpaqueHandler;
pub use table::TableHandler;

use crate::backend::{BackingStore, ChunkDoc, ChunkQuery, Layout, VersionDoc, VersionId};
use crate::chunker::SegmentFilter;
use crate::config::EngineConfig;
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::types::{Data, DateRange, WriteOptions};
use serde_json::Value;
use std::sync::Arc;

/// Everything a handler needs to write one version
#[derive(Debug, Clone, Copy)]
pub struct WriteContext<'a> {
    pub library: &'a str,
    pub symbol: &'a str,
    /// Id of the version being created; new and reused chunks get it as a parent
    pub version_id: VersionId,
    /// Latest version of the symbol, required by append and update
    pub previous: Option<&'a VersionDoc>,
    pub options: &'a WriteOptions,
    pub config: &'a EngineConfig,
}

impl<'a> WriteContext<'a> {
    pub(crate) fn require_previous(&self) -> StoreResult<&'a VersionDoc> {
        self.previous.ok_or_else(|| {
            StoreError::not_found(format!(
                "previous version of '{}' in library '{}'",
                self.symbol, self.library
            ))
        })
    }
}

/// Result of a handler write: what the version document should record
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    /// Chunk ids in segment order
    pub chunk_refs: Vec<String>,
    pub layout: Layout,
}

/// Serializer for one shape of data
///
/// `can_write` and `can_read` are pure predicates.
pub trait TypeHandler: Send + Sync {
    /// Name recorded in the version's `handler` field
    fn name(&self) -> &'static str;

    fn can_write(
        &self,
        previous: Option<&VersionDoc>,
        symbol: &str,
        data: &Data,
        options: &WriteOptions,
    ) -> bool;

    fn can_read(&self, version: &VersionDoc) -> bool {
        version.handler == self.name()
    }

    fn write(
        &self,
        store: &dyn BackingStore,
        ctx: &WriteContext<'_>,
        data: &Data,
    ) -> StoreResult<HandlerOutput>;

    /// Add rows after the previous version, reusing its chunks
    fn append(
        &self,
        _store: &dyn BackingStore,
        _ctx: &WriteContext<'_>,
        _data: &Data,
    ) -> StoreResult<HandlerOutput> {
        Err(StoreError::UnsupportedOperation(format!(
            "{} handler cannot append",
            self.name()
        )))
    }

    /// Overwrite the rows of the previous version inside `range`
    fn update(
        &self,
        _store: &dyn BackingStore,
        _ctx: &WriteContext<'_>,
        _data: &Data,
        _range: Option<DateRange>,
    ) -> StoreResult<HandlerOutput> {
        Err(StoreError::UnsupportedOperation(format!(
            "{} handler cannot update a range",
            self.name()
        )))
    }

    fn read(
        &self,
        store: &dyn BackingStore,
        library: &str,
        version: &VersionDoc,
        range: Option<DateRange>,
    ) -> StoreResult<Data>;

    /// Read only the named columns (plus any index columns)
    fn read_columns(
        &self,
        _store: &dyn BackingStore,
        _library: &str,
        _version: &VersionDoc,
        _range: Option<DateRange>,
        _columns: &[String],
    ) -> StoreResult<Data> {
        Err(StoreError::UnsupportedOperation(format!(
            "{} handler cannot select columns",
            self.name()
        )))
    }

    /// Handler-specific description of a version
    fn get_info(&self, version: &VersionDoc) -> Value;
}

/// Store one encoded segment under the version being written
pub(crate) fn store_chunk(
    store: &dyn BackingStore,
    ctx: &WriteContext<'_>,
    bounds: (Option<i64>, Option<i64>),
    content_hash: String,
    rows: u64,
    payload: Vec<u8>,
) -> StoreResult<String> {
    let chunk = ChunkDoc::new(ctx.symbol, bounds.0, bounds.1, content_hash, rows, payload);
    let fresh = store.write_chunk(ctx.library, &chunk, ctx.version_id)?;
    tracing::debug!(
        symbol = ctx.symbol,
        chunk = %chunk.id,
        rows,
        bytes = chunk.payload.len(),
        fresh,
        "stored chunk"
    );
    Ok(chunk.id)
}

/// Make an existing chunk part of the version being written
pub(crate) fn reuse_chunk(
    store: &dyn BackingStore,
    ctx: &WriteContext<'_>,
    chunk_id: &str,
) -> StoreResult<()> {
    store.add_chunk_parent(ctx.library, chunk_id, ctx.version_id)?;
    tracing::debug!(symbol = ctx.symbol, chunk = chunk_id, "reused chunk");
    Ok(())
}

/// Load a version's chunks in segment order
///
/// A full read must find exactly the chunks the version references.
pub(crate) fn fetch_chunks(
    store: &dyn BackingStore,
    library: &str,
    version: &VersionDoc,
    segment: SegmentFilter,
) -> StoreResult<Vec<ChunkDoc>> {
    let query = ChunkQuery::for_version(version, segment);
    let chunks = store
        .read_chunks(library, &query)?
        .collect::<StoreResult<Vec<_>>>()?;

    if segment == SegmentFilter::Any && chunks.len() != version.chunk_refs.len() {
        return Err(StoreError::InvariantViolation(format!(
            "version {} of '{}' references {} chunks but {} were found",
            version.version,
            version.symbol,
            version.chunk_refs.len(),
            chunks.len()
        )));
    }
    Ok(chunks)
}

/// Ordered handler list with the opaque handler as fallback
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn TypeHandler>>,
    fallback: Arc<dyn TypeHandler>,
}

impl HandlerRegistry {
    /// Table first, then arrays
    pub fn builtin() -> Self {
        Self::with_handlers(vec![Arc::new(TableHandler), Arc::new(NdArrayHandler)])
    }

    /// Replace the built-in list
    pub fn with_handlers(handlers: Vec<Arc<dyn TypeHandler>>) -> Self {
        Self {
            handlers,
            fallback: Arc::new(OpaqueHandler),
        }
    }

    pub fn handlers(&self) -> &[Arc<dyn TypeHandler>] {
        &self.handlers
    }

    /// First handler claiming the write, else the fallback
    pub fn write_handler(
        &self,
        previous: Option<&VersionDoc>,
        symbol: &str,
        data: &Data,
        options: &WriteOptions,
    ) -> Arc<dyn TypeHandler> {
        self.handlers
            .iter()
            .find(|h| h.can_write(previous, symbol, data, options))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Handler named by the version
    pub fn read_handler(&self, version: &VersionDoc) -> StoreResult<Arc<dyn TypeHandler>> {
        if let Some(h) = self.handlers.iter().find(|h| h.can_read(version)) {
            return Ok(Arc::clone(h));
        }
        if self.fallback.can_read(version) {
            return Ok(Arc::clone(&self.fallback));
        }
        Err(StoreError::UnsupportedOperation(format!(
            "No handler named '{}' is registered for version {} of '{}'",
            version.handler, version.version, version.symbol
        )))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &names)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}
