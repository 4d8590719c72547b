//! Handler for single typed arrays
//!
//! Rows are cut into segments that fit the byte budget. Segment bounds are
//! row offsets, so an append only encodes rows past the previous length and
//! a range read selects chunks by offset.

use crate::backend::{BackingStore, Layout, VersionDoc};
use crate::chunker::SegmentFilter;
use crate::codec::{decode_array, encode_array, open, seal, Array, DType, SerializedArray};
use crate::handlers::{
    fetch_chunks, reuse_chunk, store_chunk, HandlerOutput, TypeHandler, WriteContext,
};
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::types::{Data, DateRange, WriteOptions};
use serde_json::{json, Value};

/// Assumed width of an object element before it is narrowed to text
const OBJECT_ITEMSIZE: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct NdArrayHandler;

fn rows_per_chunk(array: &Array, ctx: &WriteContext<'_>) -> usize {
    let itemsize = match array.dtype() {
        DType::Object => OBJECT_ITEMSIZE,
        dtype => dtype.itemsize(),
    }
    .max(1);
    let rows = (ctx.config.max_chunk_bytes / itemsize).max(1);
    match ctx.options.chunk_size {
        Some(limit) => rows.min(limit.max(1)),
        None => rows,
    }
}

fn expect_array<'a>(data: &'a Data, symbol: &str) -> StoreResult<&'a Array> {
    data.as_array().ok_or_else(|| {
        StoreError::SchemaMismatch(format!(
            "'{}' holds an array, got {}",
            symbol,
            data.kind()
        ))
    })
}

/// Encode `array` as segments starting at row `offset`
///
/// Returns the chunk ids and the widest text dtype seen, if any.
fn write_segments(
    store: &dyn BackingStore,
    ctx: &WriteContext<'_>,
    array: &Array,
    offset: u64,
) -> StoreResult<(Vec<String>, Option<DType>)> {
    let step = rows_per_chunk(array, ctx);
    let mut refs = Vec::new();
    let mut text_width: Option<usize> = None;

    let mut pos = 0;
    while pos < array.len() {
        let end = (pos + step).min(array.len());
        let (frame, hash) = encode_array(&array.slice(pos, end))?;
        if let DType::Text(width) = DType::parse(&frame.dtype)? {
            text_width = Some(text_width.map_or(width, |w| w.max(width)));
        }

        let start = offset + pos as u64;
        let stop = offset + end as u64;
        let bounds = (Some(start as i64), Some(stop as i64));
        refs.push(store_chunk(store, ctx, bounds, hash, (end - pos) as u64, seal(&frame)?)?);
        pos = end;
    }

    Ok((refs, text_width.map(DType::Text)))
}

/// Dtype to record for a version: objects are stored as text
fn recorded_dtype(array: &Array, encoded_text: Option<DType>) -> DType {
    match (array.dtype(), encoded_text) {
        (DType::Object, Some(text)) => text,
        (DType::Object, None) => DType::Text(1),
        (dtype, _) => dtype,
    }
}

fn array_layout(version: &VersionDoc) -> StoreResult<(DType, u64)> {
    match &version.layout {
        Layout::Array { dtype, rows } => Ok((DType::parse(dtype)?, *rows)),
        other => Err(StoreError::Corruption(format!(
            "Array version {} of '{}' has layout {:?}",
            version.version, version.symbol, other
        ))),
    }
}

impl TypeHandler for NdArrayHandler {
    fn name(&self) -> &'static str {
        "ndarray"
    }

    fn can_write(
        &self,
        _previous: Option<&VersionDoc>,
        _symbol: &str,
        data: &Data,
        _options: &WriteOptions,
    ) -> bool {
        matches!(data, Data::Array(_))
    }

    fn write(
        &self,
        store: &dyn BackingStore,
        ctx: &WriteContext<'_>,
        data: &Data,
    ) -> StoreResult<HandlerOutput> {
        let array = expect_array(data, ctx.symbol)?;
        let (chunk_refs, text) = write_segments(store, ctx, array, 0)?;
        let dtype = recorded_dtype(array, text);

        tracing::debug!(
            symbol = ctx.symbol,
            rows = array.len(),
            chunks = chunk_refs.len(),
            %dtype,
            "wrote array"
        );

        Ok(HandlerOutput {
            chunk_refs,
            layout: Layout::Array {
                dtype: dtype.tag(),
                rows: array.len() as u64,
            },
        })
    }

    fn append(
        &self,
        store: &dyn BackingStore,
        ctx: &WriteContext<'_>,
        data: &Data,
    ) -> StoreResult<HandlerOutput> {
        let previous = ctx.require_previous()?;
        let (stored, rows) = array_layout(previous)?;
        let array = expect_array(data, ctx.symbol)?;

        if !array.is_empty() && !array.dtype().compatible_with(&stored) {
            return Err(StoreError::SchemaMismatch(format!(
                "cannot append {} to '{}' stored as {}",
                array.dtype(),
                ctx.symbol,
                stored
            )));
        }

        for id in &previous.chunk_refs {
            reuse_chunk(store, ctx, id)?;
        }
        let (new_refs, text) = write_segments(store, ctx, array, rows)?;

        let dtype = match (stored, text) {
            (DType::Text(a), Some(DType::Text(b))) => DType::Text(a.max(b)),
            (dtype, _) => dtype,
        };

        tracing::debug!(
            symbol = ctx.symbol,
            reused = previous.chunk_refs.len(),
            new = new_refs.len(),
            "appended array rows"
        );

        let mut chunk_refs = previous.chunk_refs.clone();
        chunk_refs.extend(new_refs);
        Ok(HandlerOutput {
            chunk_refs,
            layout: Layout::Array {
                dtype: dtype.tag(),
                rows: rows + array.len() as u64,
            },
        })
    }

    fn read(
        &self,
        store: &dyn BackingStore,
        library: &str,
        version: &VersionDoc,
        range: Option<DateRange>,
    ) -> StoreResult<Data> {
        let (dtype, rows) = array_layout(version)?;
        if rows == 0 {
            return Ok(Array::empty(dtype).into());
        }

        let segment = match range {
            Some(r) => SegmentFilter::Overlapping {
                start: r.start,
                end: r.end,
            },
            None => SegmentFilter::Any,
        };
        let chunks = fetch_chunks(store, library, version, segment)?;
        let first_row = match chunks.first() {
            Some(c) => c.segment_start.unwrap_or(0),
            None => return Ok(Array::empty(dtype).into()),
        };

        let parts = chunks
            .iter()
            .map(|c| decode_array(&open::<SerializedArray>(&c.payload)?))
            .collect::<StoreResult<Vec<_>>>()?;
        let array = if parts.len() == 1 {
            parts.into_iter().next().unwrap_or_else(|| Array::empty(dtype))
        } else {
            Array::concat(&parts)?
        };

        let array = match range {
            Some(r) => {
                let len = array.len() as i64;
                let lo = r.start.map_or(0, |s| s.saturating_sub(first_row).clamp(0, len));
                let hi = r.end.map_or(len, |e| e.saturating_sub(first_row).clamp(lo, len));
                array.slice(lo as usize, hi as usize)
            }
            None => array,
        };
        Ok(array.into())
    }

    fn get_info(&self, version: &VersionDoc) -> Value {
        let (dtype, rows) = match &version.layout {
            Layout::Array { dtype, rows } => (dtype.clone(), *rows),
            _ => (String::new(), 0),
        };
        json!({
            "handler": self.name(),
            "dtype": dtype,
            "rows": rows,
            "chunks": version.chunk_refs.len(),
        })
    }
}
