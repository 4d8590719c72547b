//! Documents persisted by backing stores
//!
//! Three document kinds live in a library:
//!
//! - [`VersionDoc`]: immutable description of one state of a symbol
//! - [`ChunkDoc`]: content-addressed encoded segment, shared by versions
//!   through its `parents` set
//! - [`SnapshotDoc`]: named symbol → version number map

use crate::chunker::{ChunkerSpec, SegmentFilter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Identity of a version document
pub type VersionId = Uuid;

/// Mint a fresh, time-ordered version id
pub fn new_version_id() -> VersionId {
    Uuid::now_v7()
}

/// Creation time embedded in a version id, in unix seconds
pub fn version_id_secs(id: &VersionId) -> Option<u64> {
    id.get_timestamp().map(|ts| ts.to_unix().0)
}

/// How a version's data is laid out, recorded by its handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Layout {
    /// Tombstone; no data
    Empty,
    /// Opaque value, inline when small
    Opaque {
        inline: Option<Value>,
        size: u64,
    },
    /// Single typed array split by row offset
    Array {
        dtype: String,
        rows: u64,
    },
    /// Table chunked by `chunker`
    Table {
        columns: Vec<String>,
        /// Dtype tag per column, used to rebuild an empty table
        #[serde(default)]
        dtypes: Vec<String>,
        index: Vec<String>,
        rows: u64,
        chunker: ChunkerSpec,
    },
}

impl Layout {
    pub fn rows(&self) -> u64 {
        match self {
            Layout::Array { rows, .. } | Layout::Table { rows, .. } => *rows,
            Layout::Opaque { .. } => 1,
            Layout::Empty => 0,
        }
    }
}

/// One immutable version of a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDoc {
    pub id: VersionId,
    pub symbol: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Name of the type handler that wrote this version
    pub handler: String,
    #[serde(default)]
    pub deleted: bool,
    /// Chunk ids covering the data, in segment order
    #[serde(default)]
    pub chunk_refs: Vec<String>,
    /// Snapshots pinning this version
    #[serde(default)]
    pub parent_snapshots: BTreeSet<String>,
    pub layout: Layout,
}

impl VersionDoc {
    pub fn is_pinned(&self) -> bool {
        !self.parent_snapshots.is_empty()
    }
}

/// Content address of a chunk
pub fn chunk_id(symbol: &str, start: Option<i64>, end: Option<i64>, content_hash: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(symbol.as_bytes());
    hasher.update(&[0]);
    for bound in [start, end] {
        match bound {
            Some(b) => hasher.update(&b.to_le_bytes()),
            None => hasher.update(b"-"),
        };
    }
    hasher.update(content_hash.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// An encoded segment of a symbol's data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDoc {
    pub id: String,
    pub symbol: String,
    pub segment_start: Option<i64>,
    pub segment_end: Option<i64>,
    pub content_hash: String,
    pub rows: u64,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub parents: BTreeSet<VersionId>,
}

impl ChunkDoc {
    pub fn new(
        symbol: impl Into<String>,
        segment_start: Option<i64>,
        segment_end: Option<i64>,
        content_hash: String,
        rows: u64,
        payload: Vec<u8>,
    ) -> Self {
        let symbol = symbol.into();
        Self {
            id: chunk_id(&symbol, segment_start, segment_end, &content_hash),
            symbol,
            segment_start,
            segment_end,
            content_hash,
            rows,
            payload,
            parents: BTreeSet::new(),
        }
    }

    pub fn summary(&self) -> ChunkSummary {
        ChunkSummary {
            id: self.id.clone(),
            symbol: self.symbol.clone(),
            segment_start: self.segment_start,
            segment_end: self.segment_end,
            size: self.payload.len() as u64,
            parents: self.parents.clone(),
        }
    }
}

/// Payload-free view of a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub id: String,
    pub symbol: String,
    pub segment_start: Option<i64>,
    pub segment_end: Option<i64>,
    pub size: u64,
    pub parents: BTreeSet<VersionId>,
}

/// Named pin of symbol → version number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDoc {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub versions: BTreeMap<String, u64>,
}

/// Which version of a symbol to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    /// Highest version number, tombstones included
    Latest,
    Number(u64),
    /// Highest version created at or before the instant
    AsOf(DateTime<Utc>),
}

/// Chunk lookup for one version of one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkQuery {
    pub symbol: String,
    /// Restrict to chunks referenced by this version
    pub parent: Option<VersionId>,
    pub segment: SegmentFilter,
}

impl ChunkQuery {
    pub fn for_version(doc: &VersionDoc, segment: SegmentFilter) -> Self {
        Self {
            symbol: doc.symbol.clone(),
            parent: Some(doc.id),
            segment,
        }
    }

    pub fn matches(&self, chunk: &ChunkDoc) -> bool {
        chunk.symbol == self.symbol
            && self.parent.map_or(true, |p| chunk.parents.contains(&p))
            && self.segment.matches(chunk.segment_start, chunk.segment_end)
    }
}
