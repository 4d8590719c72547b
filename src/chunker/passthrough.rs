//! Whole-object chunking

use crate::chunker::{ChunkIter, Chunker, ChunkerSpec, RangeToken, SegmentFilter, TableChunk};
use crate::codec::Table;
use crate::storage::error::StoreResult;

/// Stores a table as a single unbounded segment
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughChunker;

impl Chunker for PassthroughChunker {
    fn kind(&self) -> &'static str {
        "passthru"
    }

    fn spec(&self) -> ChunkerSpec {
        ChunkerSpec::Passthrough
    }

    fn to_chunks<'a>(&self, data: &'a Table, _max_chunk_size: usize) -> ChunkIter<'a> {
        if data.is_empty() {
            return Box::new(std::iter::empty());
        }
        Box::new(std::iter::once(Ok(TableChunk {
            start: None,
            end: None,
            data: data.clone(),
        })))
    }

    fn to_range(&self, _start: Option<i64>, _end: Option<i64>) -> RangeToken {
        RangeToken::Whole
    }

    fn to_query_predicate(&self, _range: &RangeToken) -> SegmentFilter {
        SegmentFilter::Any
    }

    fn filter(&self, data: &Table, _range: &RangeToken) -> StoreResult<Table> {
        Ok(data.clone())
    }

    fn exclude(&self, data: &Table, _range: &RangeToken) -> StoreResult<Table> {
        Ok(data.empty_like())
    }
}
