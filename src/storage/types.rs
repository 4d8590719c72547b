//! Core value types of the version store
//!
//! - `Data`: what callers write and read back
//! - `VersionedItem`: one resolved version, with or without its data
//! - `WriteOptions` / `ReadOptions`: per-call knobs
//! - `DateRange`: a half-open `[start, end)` interval for partial reads
//!   and updates
//! - `VersionInfo` and `StoreStats`: listing and statistics views

use crate::backend::VersionDoc;
use crate::chunker::ChunkerSpec;
use crate::codec::{Array, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value stored under a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Data {
    /// A single typed array
    Array(Array),
    /// Named columns with an optional index
    Table(Table),
    /// Anything else, stored opaquely
    Object(Value),
}

impl Data {
    pub fn kind(&self) -> &'static str {
        match self {
            Data::Array(_) => "array",
            Data::Table(_) => "table",
            Data::Object(_) => "object",
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Data::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Data::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_table(self) -> Option<Table> {
        match self {
            Data::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Array> {
        match self {
            Data::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl From<Table> for Data {
    fn from(t: Table) -> Self {
        Data::Table(t)
    }
}

impl From<Array> for Data {
    fn from(a: Array) -> Self {
        Data::Array(a)
    }
}

impl From<Value> for Data {
    fn from(v: Value) -> Self {
        Data::Object(v)
    }
}

/// A resolved version of a symbol
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedItem {
    pub symbol: String,
    pub library: String,
    pub version: u64,
    pub metadata: Option<Value>,
    /// `None` for metadata-only results
    pub data: Option<Data>,
    pub created_at: DateTime<Utc>,
}

impl VersionedItem {
    pub(crate) fn from_doc(library: &str, doc: &VersionDoc, data: Option<Data>) -> Self {
        Self {
            symbol: doc.symbol.clone(),
            library: library.to_string(),
            version: doc.version,
            metadata: doc.metadata.clone(),
            data,
            created_at: doc.created_at,
        }
    }
}

/// Half-open interval `[start, end)`
///
/// For date-chunked tables the bounds are epoch milliseconds; for arrays
/// they are row positions. An open side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl DateRange {
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    pub fn between(start: i64, end: i64) -> Self {
        Self::new(Some(start), Some(end))
    }

    /// Everything from `start` onward
    pub fn from(start: i64) -> Self {
        Self::new(Some(start), None)
    }

    /// Everything before `end`
    pub fn until(end: i64) -> Self {
        Self::new(None, Some(end))
    }

    pub fn from_datetimes(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::between(start.timestamp_millis(), end.timestamp_millis())
    }

    pub fn contains(&self, value: i64) -> bool {
        self.start.map_or(true, |s| value >= s) && self.end.map_or(true, |e| value < e)
    }
}

/// Options for `write`, `append` and `update`
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    /// Prune superseded, unpinned versions after a successful write
    pub prune_previous_version: bool,
    /// `append` on a missing symbol behaves like `write`
    pub upsert: bool,
    /// Chunker for tables; engine default when `None`
    pub chunker: Option<ChunkerSpec>,
    /// Row limit per chunk; engine default when `None`
    pub chunk_size: Option<usize>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            prune_previous_version: false,
            upsert: true,
            chunker: None,
            chunk_size: None,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: prune previous versions
    pub fn prune(mut self, prune: bool) -> Self {
        self.prune_previous_version = prune;
        self
    }

    /// Builder method: set upsert
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// Builder method: set the chunker
    pub fn chunker(mut self, chunker: ChunkerSpec) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Builder method: set the row limit per chunk
    pub fn chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = Some(rows);
        self
    }
}

/// Version selectors, range and column projection for `read`
///
/// Selectors are tried in order: `version`, `snapshot`, `as_of`, then
/// latest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    pub version: Option<u64>,
    pub snapshot: Option<String>,
    pub as_of: Option<DateTime<Utc>>,
    pub range: Option<DateRange>,
    /// Table columns to decode; index columns are always returned
    pub columns: Option<Vec<String>>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn snapshot(mut self, name: impl Into<String>) -> Self {
        self.snapshot = Some(name.into());
        self
    }

    pub fn as_of(mut self, instant: DateTime<Utc>) -> Self {
        self.as_of = Some(instant);
        self
    }

    pub fn range(mut self, range: DateRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Summary of one version for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub symbol: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub handler: String,
    pub deleted: bool,
    pub snapshots: Vec<String>,
}

impl From<&VersionDoc> for VersionInfo {
    fn from(doc: &VersionDoc) -> Self {
        Self {
            symbol: doc.symbol.clone(),
            version: doc.version,
            created_at: doc.created_at,
            handler: doc.handler.clone(),
            deleted: doc.deleted,
            snapshots: doc.parent_snapshots.iter().cloned().collect(),
        }
    }
}

/// Storage statistics for one library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub library: String,
    pub symbols: usize,
    pub versions: usize,
    pub chunks: usize,
    pub snapshots: usize,
    pub stored_bytes: u64,
    pub quota: Option<u64>,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Library: {}", self.library)?;
        writeln!(f, "  Symbols:   {}", self.symbols)?;
        writeln!(f, "  Versions:  {}", self.versions)?;
        writeln!(f, "  Chunks:    {}", self.chunks)?;
        writeln!(f, "  Snapshots: {}", self.snapshots)?;
        writeln!(f, "  Stored:    {} bytes", self.stored_bytes)?;
        match self.quota {
            Some(q) => write!(f, "  Quota:     {} bytes", q),
            None => write!(f, "  Quota:     unlimited"),
        }
    }
}

/// Result of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub used: u64,
    pub quota: Option<u64>,
}

impl QuotaStatus {
    pub fn is_over(&self) -> bool {
        self.quota.map_or(false, |q| self.used > q)
    }

    /// Share of the quota in use, if one is set
    pub fn usage_ratio(&self) -> Option<f64> {
        self.quota
            .filter(|&q| q > 0)
            .map(|q| self.used as f64 / q as f64)
    }
}
