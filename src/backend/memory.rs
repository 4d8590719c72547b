//! In-process backing store
//!
//! All libraries live in one `RwLock`-guarded map. Every trait operation
//! takes the lock once, which makes each of them atomic with respect to the
//! others, the same guarantee a document database gives per document.

use crate::backend::{
    BackingStore, ChunkDoc, ChunkQuery, ChunkStream, ChunkSummary, SnapshotDoc, VersionDoc,
    VersionId, VersionSelector,
};
use crate::storage::error::{StoreError, StoreResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Library {
    /// symbol → version number → document
    versions: HashMap<String, BTreeMap<u64, VersionDoc>>,
    counters: HashMap<String, u64>,
    chunks: HashMap<String, ChunkDoc>,
    snapshots: BTreeMap<String, SnapshotDoc>,
    quota: Option<u64>,
}

impl Library {
    fn insert_version(&mut self, doc: &VersionDoc) -> StoreResult<()> {
        let versions = self.versions.entry(doc.symbol.clone()).or_default();
        if versions.contains_key(&doc.version) {
            return Err(StoreError::WriteConflict {
                symbol: doc.symbol.clone(),
                reason: format!("version {} already exists", doc.version),
            });
        }
        versions.insert(doc.version, doc.clone());
        let counter = self.counters.entry(doc.symbol.clone()).or_insert(0);
        *counter = (*counter).max(doc.version);
        Ok(())
    }

    fn version_mut(&mut self, id: VersionId) -> Option<&mut VersionDoc> {
        self.versions
            .values_mut()
            .flat_map(|m| m.values_mut())
            .find(|v| v.id == id)
    }
}

/// Backing store holding everything in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    libraries: RwLock<HashMap<String, Library>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<String, Library>>> {
        self.libraries
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<String, Library>>> {
        self.libraries
            .write()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    /// Run `f` against a library, creating it on first use
    fn with_library<T>(&self, library: &str, f: impl FnOnce(&mut Library) -> StoreResult<T>) -> StoreResult<T> {
        let mut libs = self.write()?;
        f(libs.entry(library.to_string()).or_default())
    }

    /// Run `f` against a library if it exists
    fn view_library<T>(&self, library: &str, empty: T, f: impl FnOnce(&Library) -> StoreResult<T>) -> StoreResult<T> {
        let libs = self.read()?;
        match libs.get(library) {
            Some(lib) => f(lib),
            None => Ok(empty),
        }
    }
}

impl BackingStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn next_version_number(&self, library: &str, symbol: &str) -> StoreResult<u64> {
        self.with_library(library, |lib| {
            let n = lib.counters.entry(symbol.to_string()).or_insert(0);
            *n += 1;
            Ok(*n)
        })
    }

    fn find_version(
        &self,
        library: &str,
        symbol: &str,
        selector: VersionSelector,
    ) -> StoreResult<Option<VersionDoc>> {
        self.view_library(library, None, |lib| {
            let Some(versions) = lib.versions.get(symbol) else {
                return Ok(None);
            };
            let found = match selector {
                VersionSelector::Latest => versions.values().next_back(),
                VersionSelector::Number(n) => versions.get(&n),
                VersionSelector::AsOf(instant) => versions
                    .values()
                    .rev()
                    .find(|v| v.created_at <= instant),
            };
            Ok(found.cloned())
        })
    }

    fn write_version(&self, library: &str, doc: &VersionDoc) -> StoreResult<()> {
        self.with_library(library, |lib| lib.insert_version(doc))
    }

    fn write_version_after(&self, library: &str, doc: &VersionDoc, base: u64) -> StoreResult<()> {
        self.with_library(library, |lib| {
            let newest = lib
                .versions
                .get(&doc.symbol)
                .and_then(|m| m.keys().next_back().copied());
            if newest != Some(base) {
                return Err(StoreError::WriteConflict {
                    symbol: doc.symbol.clone(),
                    reason: format!("built on version {}, newest is now {:?}", base, newest),
                });
            }
            lib.insert_version(doc)
        })
    }

    fn list_versions(&self, library: &str, symbol: Option<&str>) -> StoreResult<Vec<VersionDoc>> {
        self.view_library(library, Vec::new(), |lib| {
            let mut symbols: Vec<&String> = lib
                .versions
                .keys()
                .filter(|s| symbol.map_or(true, |want| want == s.as_str()))
                .collect();
            symbols.sort();
            Ok(symbols
                .into_iter()
                .flat_map(|s| lib.versions[s].values().cloned())
                .collect())
        })
    }

    fn delete_versions(&self, library: &str, ids: &[VersionId]) -> StoreResult<usize> {
        self.with_library(library, |lib| {
            let mut removed = 0;
            for versions in lib.versions.values_mut() {
                let before = versions.len();
                versions.retain(|_, v| !ids.contains(&v.id));
                removed += before - versions.len();
            }
            lib.versions.retain(|_, v| !v.is_empty());
            Ok(removed)
        })
    }

    fn add_version_snapshot(&self, library: &str, id: VersionId, snapshot: &str) -> StoreResult<()> {
        self.with_library(library, |lib| {
            let doc = lib
                .version_mut(id)
                .ok_or_else(|| StoreError::not_found(format!("version {}", id)))?;
            doc.parent_snapshots.insert(snapshot.to_string());
            Ok(())
        })
    }

    fn remove_version_snapshot(&self, library: &str, id: VersionId, snapshot: &str) -> StoreResult<()> {
        self.with_library(library, |lib| {
            if let Some(doc) = lib.version_mut(id) {
                doc.parent_snapshots.remove(snapshot);
            }
            Ok(())
        })
    }

    fn read_chunks(&self, library: &str, query: &ChunkQuery) -> StoreResult<ChunkStream> {
        let mut chunks = self.view_library(library, Vec::new(), |lib| {
            Ok(lib
                .chunks
                .values()
                .filter(|c| query.matches(c))
                .cloned()
                .collect::<Vec<_>>())
        })?;
        chunks.sort_by_key(|c| c.segment_start);
        Ok(Box::new(chunks.into_iter().map(Ok)))
    }

    fn write_chunk(&self, library: &str, chunk: &ChunkDoc, parent: VersionId) -> StoreResult<bool> {
        self.with_library(library, |lib| match lib.chunks.get_mut(&chunk.id) {
            Some(existing) => {
                existing.parents.insert(parent);
                Ok(false)
            }
            None => {
                let mut stored = chunk.clone();
                stored.parents.insert(parent);
                lib.chunks.insert(stored.id.clone(), stored);
                Ok(true)
            }
        })
    }

    fn add_chunk_parent(&self, library: &str, chunk_id: &str, parent: VersionId) -> StoreResult<()> {
        self.with_library(library, |lib| {
            let chunk = lib
                .chunks
                .get_mut(chunk_id)
                .ok_or_else(|| StoreError::not_found(format!("chunk {}", chunk_id)))?;
            chunk.parents.insert(parent);
            Ok(())
        })
    }

    fn remove_chunk_parent(&self, library: &str, chunk_id: &str, parent: VersionId) -> StoreResult<bool> {
        self.with_library(library, |lib| {
            let Some(chunk) = lib.chunks.get_mut(chunk_id) else {
                return Ok(false);
            };
            chunk.parents.remove(&parent);
            if chunk.parents.is_empty() {
                lib.chunks.remove(chunk_id);
                return Ok(true);
            }
            Ok(false)
        })
    }

    fn list_chunks(&self, library: &str, symbol: Option<&str>) -> StoreResult<Vec<ChunkSummary>> {
        self.view_library(library, Vec::new(), |lib| {
            let mut out: Vec<ChunkSummary> = lib
                .chunks
                .values()
                .filter(|c| symbol.map_or(true, |s| c.symbol == s))
                .map(ChunkDoc::summary)
                .collect();
            out.sort_by(|a, b| (&a.symbol, a.segment_start).cmp(&(&b.symbol, b.segment_start)));
            Ok(out)
        })
    }

    fn delete_chunk(&self, library: &str, chunk_id: &str) -> StoreResult<()> {
        self.with_library(library, |lib| {
            lib.chunks.remove(chunk_id);
            Ok(())
        })
    }

    fn list_symbols(&self, library: &str) -> StoreResult<Vec<String>> {
        self.view_library(library, Vec::new(), |lib| {
            let mut symbols: Vec<String> = lib.versions.keys().cloned().collect();
            symbols.sort();
            Ok(symbols)
        })
    }

    fn create_snapshot(&self, library: &str, snapshot: &SnapshotDoc) -> StoreResult<()> {
        self.with_library(library, |lib| {
            if lib.snapshots.contains_key(&snapshot.name) {
                return Err(StoreError::DuplicateSnapshot(snapshot.name.clone()));
            }
            lib.snapshots.insert(snapshot.name.clone(), snapshot.clone());
            Ok(())
        })
    }

    fn read_snapshot(&self, library: &str, name: &str) -> StoreResult<Option<SnapshotDoc>> {
        self.view_library(library, None, |lib| Ok(lib.snapshots.get(name).cloned()))
    }

    fn delete_snapshot(&self, library: &str, name: &str) -> StoreResult<bool> {
        self.with_library(library, |lib| Ok(lib.snapshots.remove(name).is_some()))
    }

    fn list_snapshots(&self, library: &str) -> StoreResult<Vec<SnapshotDoc>> {
        self.view_library(library, Vec::new(), |lib| Ok(lib.snapshots.values().cloned().collect()))
    }

    fn get_quota(&self, library: &str) -> StoreResult<Option<u64>> {
        self.view_library(library, None, |lib| Ok(lib.quota))
    }

    fn set_quota(&self, library: &str, quota: Option<u64>) -> StoreResult<()> {
        self.with_library(library, |lib| {
            lib.quota = quota;
            Ok(())
        })
    }

    fn library_size(&self, library: &str) -> StoreResult<u64> {
        self.view_library(library, 0, |lib| {
            let chunks: u64 = lib.chunks.values().map(|c| c.payload.len() as u64).sum();
            let mut docs = 0u64;
            for v in lib.versions.values().flat_map(BTreeMap::values) {
                docs += serde_json::to_vec(v)?.len() as u64;
            }
            Ok(chunks + docs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::conformance;

    #[test]
    fn test_memory_store_conformance() {
        conformance::run_all(|| Box::new(InMemoryStore::new()));
    }

    #[test]
    fn test_concurrent_version_numbers_are_unique() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| store.next_version_number("lib", "s").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort();
        assert_eq!(all, (1..=400).collect::<Vec<_>>());
    }
}
