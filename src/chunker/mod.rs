//! Chunking strategies
//!
//! A chunker decides how a table maps onto stored segments and how a
//! sub-range of it is addressed for partial reads and overwrites.
//!
//! - **passthrough**: the whole table as one segment with no bounds
//! - **date**: calendar-period segments over a timestamp column
//!
//! Segment bounds are half-open `[start, end)` in epoch milliseconds. A
//! `None` bound is the sentinel for "no meaningful sub-range".

pub mod date;
pub mod passthrough;

pub use date::{DateChunker, Frequency};
pub use passthrough::PassthroughChunker;

use crate::codec::Table;
use crate::storage::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Range descriptor built by [`Chunker::to_range`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeToken {
    /// The whole object
    Whole,
    /// `[start, end)`; an open side is unbounded
    Bounded { start: Option<i64>, end: Option<i64> },
}

impl RangeToken {
    pub fn contains(&self, value: i64) -> bool {
        match self {
            RangeToken::Whole => true,
            RangeToken::Bounded { start, end } => {
                start.map_or(true, |s| value >= s) && end.map_or(true, |e| value < e)
            }
        }
    }
}

/// Backing-store predicate over chunk segment bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentFilter {
    /// Every chunk of the version
    Any,
    /// Chunks whose segment overlaps `[start, end)`
    Overlapping { start: Option<i64>, end: Option<i64> },
}

impl SegmentFilter {
    /// Whether a chunk with these bounds is selected
    ///
    /// Sentinel bounds overlap everything.
    pub fn matches(&self, seg_start: Option<i64>, seg_end: Option<i64>) -> bool {
        match *self {
            SegmentFilter::Any => true,
            SegmentFilter::Overlapping { start, end } => {
                let before_end = match (seg_start, end) {
                    (Some(s), Some(e)) => s < e,
                    _ => true,
                };
                let after_start = match (seg_end, start) {
                    (Some(e), Some(s)) => e > s,
                    _ => true,
                };
                before_end && after_start
            }
        }
    }
}

/// One segment produced by [`Chunker::to_chunks`]
#[derive(Debug, Clone, PartialEq)]
pub struct TableChunk {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub data: Table,
}

pub type ChunkIter<'a> = Box<dyn Iterator<Item = StoreResult<TableChunk>> + 'a>;

/// Partitioning strategy for tables
pub trait Chunker: Send + Sync {
    /// Short name recorded in version documents
    fn kind(&self) -> &'static str;

    /// Serializable description of this chunker
    fn spec(&self) -> ChunkerSpec;

    /// Split `data` into ordered segments of at most `max_chunk_size` rows
    ///
    /// Empty input yields nothing.
    fn to_chunks<'a>(&self, data: &'a Table, max_chunk_size: usize) -> ChunkIter<'a>;

    fn to_range(&self, start: Option<i64>, end: Option<i64>) -> RangeToken;

    fn to_query_predicate(&self, range: &RangeToken) -> SegmentFilter;

    /// Rows of `data` inside `range`
    fn filter(&self, data: &Table, range: &RangeToken) -> StoreResult<Table>;

    /// Rows of `data` outside `range`
    fn exclude(&self, data: &Table, range: &RangeToken) -> StoreResult<Table>;
}

/// Chunker configuration as stored alongside a version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkerSpec {
    #[default]
    Passthrough,
    Date { frequency: Frequency, column: String },
}

impl ChunkerSpec {
    pub fn date(frequency: Frequency) -> Self {
        ChunkerSpec::Date {
            frequency,
            column: date::DEFAULT_COLUMN.to_string(),
        }
    }

    pub fn build(&self) -> Box<dyn Chunker> {
        match self {
            ChunkerSpec::Passthrough => Box::new(PassthroughChunker),
            ChunkerSpec::Date { frequency, column } => {
                Box::new(DateChunker::new(*frequency, column.clone()))
            }
        }
    }
}

impl fmt::Display for ChunkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkerSpec::Passthrough => write!(f, "passthru"),
            ChunkerSpec::Date { frequency, column } => {
                write!(f, "date:{}:{}", frequency.code(), column)
            }
        }
    }
}

/// Parses `passthru`, `date`, `date:M` or `date:M:column`
impl FromStr for ChunkerSpec {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, ':');
        match parts.next() {
            Some("passthru") | Some("passthrough") => Ok(ChunkerSpec::Passthrough),
            Some("date") => {
                let frequency = match parts.next() {
                    Some(code) => Frequency::from_code(code)?,
                    None => Frequency::Day,
                };
                let column = parts.next().unwrap_or(date::DEFAULT_COLUMN).to_string();
                Ok(ChunkerSpec::Date { frequency, column })
            }
            _ => Err(StoreError::InvalidInput(format!("Unknown chunker: {}", s))),
        }
    }
}
