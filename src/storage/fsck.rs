//! Consistency check and repair
//!
//! A write that dies between storing its chunks and inserting its version
//! document leaves chunks whose parent set names a version that never
//! became visible. `run` detaches such parents (deleting chunks left with
//! none), drops snapshot back-references to snapshots that no longer exist,
//! and verifies the chunk layout of every live version.
//!
//! Parents younger than `orphan_grace_secs` are skipped: they may belong to
//! a write still in progress.

use crate::backend::{version_id_secs, BackingStore, ChunkSummary, VersionDoc, VersionId};
use crate::config::EngineConfig;
use crate::storage::error::{StoreError, StoreResult};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Outcome of a consistency pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsckReport {
    pub dry_run: bool,
    pub versions_scanned: usize,
    pub chunks_scanned: usize,
    /// Chunk parent references naming no live version
    pub orphaned_parents: usize,
    /// Chunks removed (or that would be, in a dry run)
    pub chunks_deleted: usize,
    /// Orphaned references inside the grace window, left alone
    pub recent_orphans_skipped: usize,
    /// Version back-references to snapshots that no longer exist
    pub stale_snapshot_refs: usize,
}

impl FsckReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_parents == 0 && self.stale_snapshot_refs == 0
    }
}

impl fmt::Display for FsckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "would delete" } else { "deleted" };
        writeln!(
            f,
            "Scanned {} versions, {} chunks",
            self.versions_scanned, self.chunks_scanned
        )?;
        writeln!(
            f,
            "  Orphaned parents: {} ({} chunks {})",
            self.orphaned_parents, self.chunks_deleted, verb
        )?;
        writeln!(f, "  Recent orphans skipped: {}", self.recent_orphans_skipped)?;
        write!(f, "  Stale snapshot refs: {}", self.stale_snapshot_refs)
    }
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Check and repair one library
///
/// Repairs are skipped when `dry_run` is set. Layout violations (overlapping
/// segments, references to missing chunks) cannot be repaired here and are
/// returned as [`StoreError::InvariantViolation`] in either mode.
pub fn run(
    store: &dyn BackingStore,
    library: &str,
    config: &EngineConfig,
    dry_run: bool,
) -> StoreResult<FsckReport> {
    let versions = store.list_versions(library, None)?;
    let chunks = store.list_chunks(library, None)?;
    let mut report = FsckReport {
        dry_run,
        versions_scanned: versions.len(),
        chunks_scanned: chunks.len(),
        ..FsckReport::default()
    };

    sweep_orphans(store, library, config, &versions, &chunks, &mut report)?;
    sweep_snapshot_refs(store, library, &versions, &mut report)?;
    check_layouts(&versions, &chunks)?;

    tracing::info!(
        library,
        dry_run,
        orphaned_parents = report.orphaned_parents,
        chunks_deleted = report.chunks_deleted,
        stale_snapshot_refs = report.stale_snapshot_refs,
        "fsck complete"
    );
    Ok(report)
}

fn sweep_orphans(
    store: &dyn BackingStore,
    library: &str,
    config: &EngineConfig,
    versions: &[VersionDoc],
    chunks: &[ChunkSummary],
    report: &mut FsckReport,
) -> StoreResult<()> {
    let live: HashSet<VersionId> = versions.iter().map(|v| v.id).collect();
    let cutoff = now_secs().saturating_sub(config.orphan_grace_secs);

    for chunk in chunks {
        let orphans: Vec<VersionId> = chunk
            .parents
            .iter()
            .filter(|p| !live.contains(p))
            .copied()
            .collect();
        if orphans.is_empty() {
            continue;
        }

        // ids without a timestamp are treated as old
        let (recent, stale): (Vec<VersionId>, Vec<VersionId>) = orphans
            .into_iter()
            .partition(|id| version_id_secs(id).map_or(false, |secs| secs > cutoff));
        report.recent_orphans_skipped += recent.len();
        if stale.is_empty() {
            continue;
        }

        report.orphaned_parents += stale.len();
        tracing::warn!(
            library,
            chunk = %chunk.id,
            symbol = %chunk.symbol,
            orphans = stale.len(),
            "Chunk has orphaned parents"
        );

        if report.dry_run {
            if stale.len() == chunk.parents.len() {
                report.chunks_deleted += 1;
            }
            continue;
        }
        for parent in stale {
            if store.remove_chunk_parent(library, &chunk.id, parent)? {
                report.chunks_deleted += 1;
            }
        }
    }
    Ok(())
}

fn sweep_snapshot_refs(
    store: &dyn BackingStore,
    library: &str,
    versions: &[VersionDoc],
    report: &mut FsckReport,
) -> StoreResult<()> {
    let snapshots: HashSet<String> = store
        .list_snapshots(library)?
        .into_iter()
        .map(|s| s.name)
        .collect();

    for version in versions {
        for name in version.parent_snapshots.iter().filter(|n| !snapshots.contains(*n)) {
            report.stale_snapshot_refs += 1;
            tracing::warn!(
                library,
                symbol = %version.symbol,
                version = version.version,
                snapshot = %name,
                "Version references a missing snapshot"
            );
            if !report.dry_run {
                store.remove_version_snapshot(library, version.id, name)?;
            }
        }
    }
    Ok(())
}

/// Every chunk a live version references must exist, and bounded segments
/// of one version must not overlap
fn check_layouts(versions: &[VersionDoc], chunks: &[ChunkSummary]) -> StoreResult<()> {
    let by_id: HashMap<&str, &ChunkSummary> = chunks.iter().map(|c| (c.id.as_str(), c)).collect();

    for version in versions.iter().filter(|v| !v.deleted) {
        let mut bounds = Vec::with_capacity(version.chunk_refs.len());
        for id in &version.chunk_refs {
            let chunk = by_id.get(id.as_str()).ok_or_else(|| {
                StoreError::InvariantViolation(format!(
                    "{} v{} references missing chunk {}",
                    version.symbol, version.version, id
                ))
            })?;
            if let (Some(start), Some(end)) = (chunk.segment_start, chunk.segment_end) {
                bounds.push((start, end));
            }
        }

        bounds.sort_unstable();
        if let Some(pair) = bounds.windows(2).find(|w| w[1].0 < w[0].1) {
            return Err(StoreError::InvariantViolation(format!(
                "{} v{} has overlapping segments [{}, {}) and [{}, {})",
                version.symbol, version.version, pair[0].0, pair[0].1, pair[1].0, pair[1].1
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{new_version_id, ChunkDoc, InMemoryStore, SnapshotDoc};
    use crate::codec::Array;
    use crate::storage::engine::VersionStore;
    use crate::storage::types::WriteOptions;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use uuid::Uuid;

    fn setup() -> VersionStore {
        let store = VersionStore::new(Arc::new(InMemoryStore::new()), "lib");
        store
            .write("live", Array::from_i64(vec![1, 2, 3]), None, &WriteOptions::default())
            .unwrap();
        store
    }

    /// Chunk written by a version that never got inserted
    fn orphan_chunk(store: &VersionStore, parent: VersionId) -> String {
        let chunk = ChunkDoc::new("ghost", Some(0), Some(1), "h".into(), 1, vec![1, 2, 3]);
        store.backing_store().write_chunk("lib", &chunk, parent).unwrap();
        chunk.id
    }

    #[test]
    fn test_clean_library() {
        let store = setup();
        let report = store.fsck(false).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.versions_scanned, 1);
        assert_eq!(report.chunks_scanned, 1);
    }

    #[test]
    fn test_removes_old_orphans() {
        let store = setup();
        // nil ids carry no timestamp, so they count as old
        let id = orphan_chunk(&store, Uuid::nil());

        let report = store.fsck(false).unwrap();
        assert_eq!(report.orphaned_parents, 1);
        assert_eq!(report.chunks_deleted, 1);
        let remaining = store.backing_store().list_chunks("lib", None).unwrap();
        assert!(remaining.iter().all(|c| c.id != id));
        assert!(store.fsck(false).unwrap().is_clean());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let store = setup();
        orphan_chunk(&store, Uuid::nil());

        let report = store.fsck(true).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.chunks_deleted, 1);
        assert_eq!(store.backing_store().list_chunks("lib", None).unwrap().len(), 2);
    }

    #[test]
    fn test_recent_orphans_are_skipped() {
        let store = setup();
        orphan_chunk(&store, new_version_id());

        let report = store.fsck(false).unwrap();
        assert_eq!(report.recent_orphans_skipped, 1);
        assert_eq!(report.orphaned_parents, 0);
        assert_eq!(store.backing_store().list_chunks("lib", None).unwrap().len(), 2);

        let eager = EngineConfig {
            orphan_grace_secs: 0,
            ..EngineConfig::default()
        };
        // sleep past the second boundary so the id is strictly older than now
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let report = run(store.backing_store().as_ref(), "lib", &eager, false).unwrap();
        assert_eq!(report.chunks_deleted, 1);
    }

    #[test]
    fn test_shared_chunk_keeps_live_parent() {
        let store = setup();
        let live = store.backing_store().list_chunks("lib", None).unwrap();
        store
            .backing_store()
            .add_chunk_parent("lib", &live[0].id, Uuid::nil())
            .unwrap();

        let report = store.fsck(false).unwrap();
        assert_eq!(report.orphaned_parents, 1);
        assert_eq!(report.chunks_deleted, 0);
        let after = store.backing_store().list_chunks("lib", None).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].parents.len(), 1);
    }

    #[test]
    fn test_stale_snapshot_refs() {
        let store = setup();
        let backend = store.backing_store();
        let snap = SnapshotDoc {
            name: "gone".into(),
            created_at: Utc::now(),
            metadata: None,
            versions: BTreeMap::from([("live".to_string(), 1)]),
        };
        backend.create_snapshot("lib", &snap).unwrap();
        let doc = backend
            .find_version("lib", "live", crate::backend::VersionSelector::Latest)
            .unwrap()
            .unwrap();
        backend.add_version_snapshot("lib", doc.id, "gone").unwrap();
        backend.delete_snapshot("lib", "gone").unwrap();

        let report = store.fsck(false).unwrap();
        assert_eq!(report.stale_snapshot_refs, 1);
        let doc = backend
            .find_version("lib", "live", crate::backend::VersionSelector::Latest)
            .unwrap()
            .unwrap();
        assert!(doc.parent_snapshots.is_empty());
    }

    #[test]
    fn test_missing_chunk_is_reported() {
        let store = setup();
        let chunk = &store.backing_store().list_chunks("lib", None).unwrap()[0];
        store.backing_store().delete_chunk("lib", &chunk.id).unwrap();

        let err = store.fsck(true).unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(ref m) if m.contains("missing chunk")));
    }
}
