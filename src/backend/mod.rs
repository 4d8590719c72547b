//! Backing store adapters
//!
//! The version store treats its backing store as a document substrate with
//! three guarantees:
//!
//! - atomic single-document writes
//! - a uniqueness constraint on `(library, symbol, version)` that turns a
//!   racing insert into [`StoreError::WriteConflict`]
//! - idempotent add/remove on a chunk's parent set
//!
//! Two adapters ship with the crate:
//!
//! - **memory**: `RwLock`-guarded maps, for tests and embedding
//! - **sqlite**: a shared database file, safe across processes

pub mod documents;
pub mod memory;
pub mod sqlite;

pub use documents::{
    chunk_id, new_version_id, version_id_secs, ChunkDoc, ChunkQuery, ChunkSummary, Layout,
    SnapshotDoc, VersionDoc, VersionId, VersionSelector,
};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::storage::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Lazily fetched chunks, ordered by segment start
pub type ChunkStream = Box<dyn Iterator<Item = StoreResult<ChunkDoc>> + Send>;

/// Document operations the version store relies on
pub trait BackingStore: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Atomically allocate the next version number for a symbol
    fn next_version_number(&self, library: &str, symbol: &str) -> StoreResult<u64>;

    fn find_version(
        &self,
        library: &str,
        symbol: &str,
        selector: VersionSelector,
    ) -> StoreResult<Option<VersionDoc>>;

    /// Insert a version; a duplicate `(symbol, version)` is a write conflict
    fn write_version(&self, library: &str, doc: &VersionDoc) -> StoreResult<()>;

    /// Insert a version built on `base`, the symbol's newest version number
    ///
    /// Fails with `WriteConflict` when any other version was inserted (or the
    /// symbol removed) since `base` was read.
    fn write_version_after(&self, library: &str, doc: &VersionDoc, base: u64) -> StoreResult<()>;

    /// Versions ordered by symbol, then version number ascending
    fn list_versions(&self, library: &str, symbol: Option<&str>) -> StoreResult<Vec<VersionDoc>>;

    /// Remove version documents; returns how many existed
    fn delete_versions(&self, library: &str, ids: &[VersionId]) -> StoreResult<usize>;

    fn add_version_snapshot(&self, library: &str, id: VersionId, snapshot: &str) -> StoreResult<()>;

    fn remove_version_snapshot(
        &self,
        library: &str,
        id: VersionId,
        snapshot: &str,
    ) -> StoreResult<()>;

    fn read_chunks(&self, library: &str, query: &ChunkQuery) -> StoreResult<ChunkStream>;

    /// Store a chunk with `parent` in its parent set
    ///
    /// Writing a chunk whose id already exists only adds the parent.
    /// Returns whether the payload was newly stored.
    fn write_chunk(&self, library: &str, chunk: &ChunkDoc, parent: VersionId) -> StoreResult<bool>;

    /// Idempotently add a parent to an existing chunk
    fn add_chunk_parent(&self, library: &str, chunk_id: &str, parent: VersionId) -> StoreResult<()>;

    /// Remove a parent; the chunk is deleted once no parent remains
    ///
    /// Returns whether the chunk was deleted.
    fn remove_chunk_parent(
        &self,
        library: &str,
        chunk_id: &str,
        parent: VersionId,
    ) -> StoreResult<bool>;

    fn list_chunks(&self, library: &str, symbol: Option<&str>) -> StoreResult<Vec<ChunkSummary>>;

    fn delete_chunk(&self, library: &str, chunk_id: &str) -> StoreResult<()>;

    /// Symbols with at least one version document
    fn list_symbols(&self, library: &str) -> StoreResult<Vec<String>>;

    /// Fails with `DuplicateSnapshot` when the name is taken
    fn create_snapshot(&self, library: &str, snapshot: &SnapshotDoc) -> StoreResult<()>;

    fn read_snapshot(&self, library: &str, name: &str) -> StoreResult<Option<SnapshotDoc>>;

    /// Returns whether the snapshot existed
    fn delete_snapshot(&self, library: &str, name: &str) -> StoreResult<bool>;

    fn list_snapshots(&self, library: &str) -> StoreResult<Vec<SnapshotDoc>>;

    fn get_quota(&self, library: &str) -> StoreResult<Option<u64>>;

    fn set_quota(&self, library: &str, quota: Option<u64>) -> StoreResult<()>;

    /// Stored bytes: chunk payloads plus version documents
    fn library_size(&self, library: &str) -> StoreResult<u64>;

    /// Resolve one version: explicit number, then snapshot, then as-of,
    /// then latest
    fn read_version(
        &self,
        library: &str,
        symbol: &str,
        version: Option<u64>,
        snapshot: Option<&str>,
        as_of: Option<DateTime<Utc>>,
    ) -> StoreResult<VersionDoc> {
        let selector = if let Some(number) = version {
            VersionSelector::Number(number)
        } else if let Some(name) = snapshot {
            let snap = self
                .read_snapshot(library, name)?
                .ok_or_else(|| StoreError::not_found(format!("snapshot '{}'", name)))?;
            let number = snap.versions.get(symbol).ok_or_else(|| {
                StoreError::not_found(format!("symbol '{}' in snapshot '{}'", symbol, name))
            })?;
            VersionSelector::Number(*number)
        } else if let Some(instant) = as_of {
            VersionSelector::AsOf(instant)
        } else {
            VersionSelector::Latest
        };

        self.find_version(library, symbol, selector)?.ok_or_else(|| {
            StoreError::not_found(format!(
                "symbol '{}' in library '{}' ({:?})",
                symbol, library, selector
            ))
        })
    }

    /// Drop every version of a symbol that no snapshot pins
    ///
    /// Returns the removed documents so their chunks can be detached.
    fn delete_symbol(&self, library: &str, symbol: &str) -> StoreResult<Vec<VersionDoc>> {
        let pinned: HashSet<u64> = self
            .list_snapshots(library)?
            .iter()
            .filter_map(|s| s.versions.get(symbol).copied())
            .collect();

        let doomed: Vec<VersionDoc> = self
            .list_versions(library, Some(symbol))?
            .into_iter()
            .filter(|v| !v.is_pinned() && !pinned.contains(&v.version))
            .collect();

        let ids: Vec<VersionId> = doomed.iter().map(|v| v.id).collect();
        self.delete_versions(library, &ids)?;
        Ok(doomed)
    }
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every backing store must share

    use super::*;
    use crate::chunker::SegmentFilter;
    use std::collections::{BTreeMap, BTreeSet};

    pub fn version(symbol: &str, number: u64, created_at: DateTime<Utc>) -> VersionDoc {
        VersionDoc {
            id: new_version_id(),
            symbol: symbol.to_string(),
            version: number,
            created_at,
            metadata: None,
            handler: "default".into(),
            deleted: false,
            chunk_refs: Vec::new(),
            parent_snapshots: BTreeSet::new(),
            layout: Layout::Empty,
        }
    }

    pub fn version_numbers_are_sequential(store: &dyn BackingStore) {
        let numbers: Vec<u64> = (0..5)
            .map(|_| store.next_version_number("lib", "s").unwrap())
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.next_version_number("lib", "other").unwrap(), 1);
        assert_eq!(store.next_version_number("lib2", "s").unwrap(), 1);
    }

    pub fn duplicate_version_conflicts(store: &dyn BackingStore) {
        let now = Utc::now();
        store.write_version("lib", &version("s", 1, now)).unwrap();
        let err = store.write_version("lib", &version("s", 1, now)).unwrap_err();
        assert!(err.is_retryable(), "expected conflict, got {:?}", err);
    }

    pub fn stale_base_conflicts(store: &dyn BackingStore) {
        let now = Utc::now();
        store.write_version("lib", &version("s", 1, now)).unwrap();

        // nothing to build on yet
        let err = store.write_version_after("lib", &version("t", 1, now), 0).unwrap_err();
        assert!(err.is_retryable(), "expected conflict, got {:?}", err);

        store.write_version_after("lib", &version("s", 2, now), 1).unwrap();
        let err = store.write_version_after("lib", &version("s", 3, now), 1).unwrap_err();
        assert!(err.is_retryable(), "expected conflict, got {:?}", err);
        assert!(store.find_version("lib", "s", VersionSelector::Number(3)).unwrap().is_none());

        store.write_version_after("lib", &version("s", 3, now), 2).unwrap();
        assert_eq!(store.read_version("lib", "s", None, None, None).unwrap().version, 3);
    }

    pub fn selectors_resolve(store: &dyn BackingStore) {
        let t0 = Utc::now() - chrono::Duration::seconds(100);
        let t1 = t0 + chrono::Duration::seconds(50);
        store.write_version("lib", &version("s", 1, t0)).unwrap();
        store.write_version("lib", &version("s", 2, t1)).unwrap();

        let latest = store.read_version("lib", "s", None, None, None).unwrap();
        assert_eq!(latest.version, 2);

        let as_of = t0 + chrono::Duration::seconds(10);
        let old = store.read_version("lib", "s", None, None, Some(as_of)).unwrap();
        assert_eq!(old.version, 1);

        let before = t0 - chrono::Duration::seconds(1);
        let err = store.read_version("lib", "s", None, None, Some(before)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let snap = SnapshotDoc {
            name: "snap".into(),
            created_at: Utc::now(),
            metadata: None,
            versions: BTreeMap::from([("s".to_string(), 1)]),
        };
        store.create_snapshot("lib", &snap).unwrap();
        let pinned = store.read_version("lib", "s", None, Some("snap"), None).unwrap();
        assert_eq!(pinned.version, 1);

        // explicit number wins over snapshot
        let explicit = store.read_version("lib", "s", Some(2), Some("snap"), None).unwrap();
        assert_eq!(explicit.version, 2);
    }

    pub fn chunk_parents_are_idempotent(store: &dyn BackingStore) {
        let a = new_version_id();
        let b = new_version_id();
        let chunk = ChunkDoc::new("s", Some(0), Some(10), "h".into(), 3, vec![1, 2, 3]);

        assert!(store.write_chunk("lib", &chunk, a).unwrap());
        assert!(!store.write_chunk("lib", &chunk, a).unwrap());
        store.add_chunk_parent("lib", &chunk.id, b).unwrap();
        store.add_chunk_parent("lib", &chunk.id, b).unwrap();

        let listed = store.list_chunks("lib", Some("s")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].parents, BTreeSet::from([a, b]));

        assert!(!store.remove_chunk_parent("lib", &chunk.id, a).unwrap());
        assert!(!store.remove_chunk_parent("lib", &chunk.id, a).unwrap());
        assert!(store.remove_chunk_parent("lib", &chunk.id, b).unwrap());
        assert!(store.list_chunks("lib", None).unwrap().is_empty());
    }

    pub fn chunks_filter_and_order(store: &dyn BackingStore) {
        let v = new_version_id();
        let other = new_version_id();
        for (start, end) in [(20, 30), (0, 10), (10, 20)] {
            let c = ChunkDoc::new("s", Some(start), Some(end), format!("h{}", start), 1, vec![start as u8]);
            store.write_chunk("lib", &c, v).unwrap();
        }
        let foreign = ChunkDoc::new("s", Some(30), Some(40), "x".into(), 1, vec![9]);
        store.write_chunk("lib", &foreign, other).unwrap();

        let query = ChunkQuery {
            symbol: "s".into(),
            parent: Some(v),
            segment: SegmentFilter::Any,
        };
        let starts: Vec<_> = store
            .read_chunks("lib", &query)
            .unwrap()
            .map(|c| c.unwrap().segment_start)
            .collect();
        assert_eq!(starts, vec![Some(0), Some(10), Some(20)]);

        let narrowed = ChunkQuery {
            segment: SegmentFilter::Overlapping {
                start: Some(12),
                end: Some(25),
            },
            ..query
        };
        let payloads: Vec<_> = store
            .read_chunks("lib", &narrowed)
            .unwrap()
            .map(|c| c.unwrap().payload)
            .collect();
        assert_eq!(payloads, vec![vec![10], vec![20]]);
    }

    pub fn snapshots_are_unique(store: &dyn BackingStore) {
        let snap = SnapshotDoc {
            name: "eod".into(),
            created_at: Utc::now(),
            metadata: None,
            versions: BTreeMap::new(),
        };
        store.create_snapshot("lib", &snap).unwrap();
        let err = store.create_snapshot("lib", &snap).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSnapshot(_)));

        assert_eq!(store.list_snapshots("lib").unwrap().len(), 1);
        assert!(store.delete_snapshot("lib", "eod").unwrap());
        assert!(!store.delete_snapshot("lib", "eod").unwrap());
        assert!(store.read_snapshot("lib", "eod").unwrap().is_none());
    }

    pub fn snapshot_backrefs_update(store: &dyn BackingStore) {
        let doc = version("s", 1, Utc::now());
        store.write_version("lib", &doc).unwrap();
        store.add_version_snapshot("lib", doc.id, "a").unwrap();
        store.add_version_snapshot("lib", doc.id, "a").unwrap();
        store.add_version_snapshot("lib", doc.id, "b").unwrap();
        store.remove_version_snapshot("lib", doc.id, "a").unwrap();

        let back = store.find_version("lib", "s", VersionSelector::Number(1)).unwrap().unwrap();
        assert_eq!(back.parent_snapshots, BTreeSet::from(["b".to_string()]));
    }

    pub fn delete_symbol_keeps_pinned(store: &dyn BackingStore) {
        let now = Utc::now();
        let mut pinned = version("s", 1, now);
        pinned.parent_snapshots.insert("snap".into());
        store.write_version("lib", &pinned).unwrap();
        store.write_version("lib", &version("s", 2, now)).unwrap();
        store.write_version("lib", &version("t", 1, now)).unwrap();

        let removed = store.delete_symbol("lib", "s").unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].version, 2);

        let left: Vec<u64> = store
            .list_versions("lib", Some("s"))
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(left, vec![1]);
        assert_eq!(store.list_symbols("lib").unwrap(), vec!["s", "t"]);
    }

    pub fn quota_and_size(store: &dyn BackingStore) {
        assert_eq!(store.get_quota("lib").unwrap(), None);
        store.set_quota("lib", Some(1024)).unwrap();
        assert_eq!(store.get_quota("lib").unwrap(), Some(1024));
        store.set_quota("lib", None).unwrap();
        assert_eq!(store.get_quota("lib").unwrap(), None);

        let empty = store.library_size("lib").unwrap();
        let chunk = ChunkDoc::new("s", None, None, "h".into(), 1, vec![0u8; 500]);
        store.write_chunk("lib", &chunk, new_version_id()).unwrap();
        assert!(store.library_size("lib").unwrap() >= empty + 500);
    }

    pub fn libraries_are_isolated(store: &dyn BackingStore) {
        store.write_version("a", &version("s", 1, Utc::now())).unwrap();
        assert!(store.list_symbols("b").unwrap().is_empty());
        assert!(store.find_version("b", "s", VersionSelector::Latest).unwrap().is_none());
    }

    /// Run every check against fresh stores from `make`
    pub fn run_all(make: impl Fn() -> Box<dyn BackingStore>) {
        version_numbers_are_sequential(make().as_ref());
        duplicate_version_conflicts(make().as_ref());
        stale_base_conflicts(make().as_ref());
        selectors_resolve(make().as_ref());
        chunk_parents_are_idempotent(make().as_ref());
        chunks_filter_and_order(make().as_ref());
        snapshots_are_unique(make().as_ref());
        snapshot_backrefs_update(make().as_ref());
        delete_symbol_keeps_pinned(make().as_ref());
        quota_and_size(make().as_ref());
        libraries_are_isolated(make().as_ref());
    }
}
