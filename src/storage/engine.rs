//! Version store
//!
//! Orchestrates every symbol-level operation against a backing store:
//! - Write path: Data → handler → chunks → version number → version document
//! - Read path: selector → version document → handler → chunks → Data
//!
//! The store holds no locks of its own. Concurrent writers on one symbol are
//! serialized by the backing store's version counter and its uniqueness
//! constraint; a lost race surfaces as [`StoreError::WriteConflict`] and is
//! never retried here.

use crate::backend::{
    new_version_id, BackingStore, InMemoryStore, Layout, SnapshotDoc, SqliteStore, VersionDoc,
    VersionId, VersionSelector,
};
use crate::config::{Config, EngineConfig};
use crate::handlers::{HandlerOutput, HandlerRegistry, WriteContext};
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::fsck::{self, FsckReport};
use crate::storage::types::{
    Data, DateRange, QuotaStatus, ReadOptions, StoreStats, VersionInfo, VersionedItem,
    WriteOptions,
};
use chrono::{Duration, Utc};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Versioned storage for the symbols of one library
pub struct VersionStore {
    store: Arc<dyn BackingStore>,
    library: String,
    registry: HandlerRegistry,
    config: EngineConfig,
}

impl VersionStore {
    pub fn new(store: Arc<dyn BackingStore>, library: impl Into<String>) -> Self {
        Self {
            store,
            library: library.into(),
            registry: HandlerRegistry::builtin(),
            config: EngineConfig::default(),
        }
    }

    /// Open the backing store named by `config` and bind to its library
    pub fn open(config: &Config) -> StoreResult<Self> {
        let store: Arc<dyn BackingStore> = match config.store.backend.as_str() {
            "memory" => Arc::new(InMemoryStore::new()),
            "sqlite" => {
                let path = config.store.db_path();
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Arc::new(SqliteStore::open(&path, config.store.connect_timeout())?)
            }
            other => {
                return Err(StoreError::InvalidInput(format!(
                    "Unknown backend: {}",
                    other
                )))
            }
        };
        tracing::info!(
            backend = store.name(),
            library = %config.store.library,
            "Opened version store"
        );
        Ok(Self::new(store, config.store.library.clone()).with_config(config.engine.clone()))
    }

    /// Builder method: engine settings
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder method: replace the handler list
    pub fn with_handlers(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backing_store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    fn validate_symbol(symbol: &str) -> StoreResult<()> {
        if symbol.trim().is_empty() {
            return Err(StoreError::InvalidInput("Symbol name cannot be empty".into()));
        }
        Ok(())
    }

    fn latest(&self, symbol: &str) -> StoreResult<Option<VersionDoc>> {
        self.store
            .find_version(&self.library, symbol, VersionSelector::Latest)
    }

    /// Latest version unless it is a tombstone
    fn latest_live(&self, symbol: &str) -> StoreResult<Option<VersionDoc>> {
        Ok(self.latest(symbol)?.filter(|v| !v.deleted))
    }

    /// Resolve a selector to a live version
    fn resolve(&self, symbol: &str, options: &ReadOptions) -> StoreResult<VersionDoc> {
        let doc = self.store.read_version(
            &self.library,
            symbol,
            options.version,
            options.snapshot.as_deref(),
            options.as_of,
        )?;
        if doc.deleted {
            return Err(StoreError::not_found(format!(
                "symbol '{}' in library '{}' is deleted",
                symbol, self.library
            )));
        }
        Ok(doc)
    }

    /// Fail when the library is already over its byte budget
    fn enforce_quota(&self) -> StoreResult<()> {
        let status = self.check_quota()?;
        if let (true, Some(quota)) = (status.is_over(), status.quota) {
            tracing::warn!(
                library = %self.library,
                used = status.used,
                quota,
                "Write rejected: quota exceeded"
            );
            return Err(StoreError::QuotaExceeded {
                library: self.library.clone(),
                used: status.used,
                quota,
            });
        }
        Ok(())
    }

    fn write_context<'a>(
        &'a self,
        symbol: &'a str,
        id: VersionId,
        previous: Option<&'a VersionDoc>,
        options: &'a WriteOptions,
    ) -> WriteContext<'a> {
        WriteContext {
            library: &self.library,
            symbol,
            version_id: id,
            previous,
            options,
            config: &self.config,
        }
    }

    /// Allocate a number and insert the version document
    ///
    /// Nothing is visible to readers until this succeeds. With a `base` the
    /// insert only lands while `base` is still the newest version. On failure
    /// the chunks written for this version are detached again.
    fn insert_version(
        &self,
        symbol: &str,
        id: VersionId,
        handler: &str,
        metadata: Option<Value>,
        output: HandlerOutput,
        base: Option<u64>,
    ) -> StoreResult<VersionDoc> {
        let version = match self.store.next_version_number(&self.library, symbol) {
            Ok(version) => version,
            Err(err) => {
                self.discard_chunks(symbol, id, &output.chunk_refs);
                return Err(err);
            }
        };
        let doc = VersionDoc {
            id,
            symbol: symbol.to_string(),
            version,
            created_at: Utc::now(),
            metadata,
            handler: handler.to_string(),
            deleted: false,
            chunk_refs: output.chunk_refs,
            parent_snapshots: BTreeSet::new(),
            layout: output.layout,
        };
        let inserted = match base {
            Some(base) => self.store.write_version_after(&self.library, &doc, base),
            None => self.store.write_version(&self.library, &doc),
        };
        if let Err(err) = inserted {
            self.discard_chunks(symbol, id, &doc.chunk_refs);
            return Err(err);
        }
        Ok(doc)
    }

    /// Best-effort undo of the chunk writes of a version that never landed
    fn discard_chunks(&self, symbol: &str, id: VersionId, chunk_refs: &[String]) {
        for chunk_id in chunk_refs {
            if let Err(err) = self.store.remove_chunk_parent(&self.library, chunk_id, id) {
                // fsck removes whatever is left behind
                tracing::warn!(symbol, chunk = %chunk_id, error = %err, "Failed to detach chunk");
            }
        }
    }

    fn finish_write(&self, doc: &VersionDoc, options: &WriteOptions) -> StoreResult<VersionedItem> {
        if options.prune_previous_version {
            self.prune_previous_versions(&doc.symbol, self.config.prune_keep_mins)?;
        }
        Ok(VersionedItem::from_doc(&self.library, doc, None))
    }

    /// Write a new version of `symbol`
    ///
    /// Returns the new version's metadata; the data is not echoed back.
    pub fn write(
        &self,
        symbol: &str,
        data: impl Into<Data>,
        metadata: Option<Value>,
        options: &WriteOptions,
    ) -> StoreResult<VersionedItem> {
        Self::validate_symbol(symbol)?;
        let data = data.into();
        self.enforce_quota()?;

        let previous = self.latest(symbol)?;
        let handler = self
            .registry
            .write_handler(previous.as_ref(), symbol, &data, options);
        let id = new_version_id();
        let ctx = self.write_context(symbol, id, previous.as_ref(), options);
        let output = handler.write(self.store.as_ref(), &ctx, &data)?;
        let doc = self.insert_version(symbol, id, handler.name(), metadata, output, None)?;

        tracing::debug!(
            library = %self.library,
            symbol,
            version = doc.version,
            handler = handler.name(),
            chunks = doc.chunk_refs.len(),
            "Wrote version"
        );
        self.finish_write(&doc, options)
    }

    /// Append rows to the latest version
    ///
    /// A missing (or deleted) symbol is written from scratch when
    /// `options.upsert` is set. Metadata defaults to the previous version's.
    /// Fails with a retryable `WriteConflict` if another version of the
    /// symbol lands between the read and the insert.
    pub fn append(
        &self,
        symbol: &str,
        data: impl Into<Data>,
        metadata: Option<Value>,
        options: &WriteOptions,
    ) -> StoreResult<VersionedItem> {
        self.modify(symbol, data.into(), metadata, options, None)
    }

    /// Overwrite the rows of the latest version that fall in `range`
    ///
    /// Without a range the span of the incoming dates is replaced.
    pub fn update(
        &self,
        symbol: &str,
        data: impl Into<Data>,
        range: Option<DateRange>,
        metadata: Option<Value>,
        options: &WriteOptions,
    ) -> StoreResult<VersionedItem> {
        self.modify(symbol, data.into(), metadata, options, Some(range))
    }

    /// Shared path of append (`update == None`) and update
    fn modify(
        &self,
        symbol: &str,
        data: Data,
        metadata: Option<Value>,
        options: &WriteOptions,
        update: Option<Option<DateRange>>,
    ) -> StoreResult<VersionedItem> {
        Self::validate_symbol(symbol)?;
        let previous = match self.latest_live(symbol)? {
            Some(previous) => previous,
            None if options.upsert => return self.write(symbol, data, metadata, options),
            None => {
                return Err(StoreError::not_found(format!(
                    "symbol '{}' in library '{}'",
                    symbol, self.library
                )))
            }
        };
        self.enforce_quota()?;

        let handler = self.registry.read_handler(&previous)?;
        if !handler.can_write(Some(&previous), symbol, &data, options) {
            return Err(StoreError::SchemaMismatch(format!(
                "cannot add {} data to '{}' written by the {} handler",
                data.kind(),
                symbol,
                handler.name()
            )));
        }

        let id = new_version_id();
        let ctx = self.write_context(symbol, id, Some(&previous), options);
        let output = match update {
            None => handler.append(self.store.as_ref(), &ctx, &data)?,
            Some(range) => handler.update(self.store.as_ref(), &ctx, &data, range)?,
        };
        let metadata = metadata.or_else(|| previous.metadata.clone());
        let base = Some(previous.version);
        let doc = self.insert_version(symbol, id, handler.name(), metadata, output, base)?;

        tracing::debug!(
            library = %self.library,
            symbol,
            version = doc.version,
            previous = previous.version,
            op = if update.is_some() { "update" } else { "append" },
            "Wrote version"
        );
        self.finish_write(&doc, options)
    }

    /// Read a version with its data
    pub fn read(&self, symbol: &str, options: &ReadOptions) -> StoreResult<VersionedItem> {
        let doc = self.resolve(symbol, options)?;
        let handler = self.registry.read_handler(&doc)?;
        let data = match &options.columns {
            Some(columns) => {
                handler.read_columns(self.store.as_ref(), &self.library, &doc, options.range, columns)?
            }
            None => handler.read(self.store.as_ref(), &self.library, &doc, options.range)?,
        };
        tracing::debug!(
            library = %self.library,
            symbol,
            version = doc.version,
            "Read version"
        );
        Ok(VersionedItem::from_doc(&self.library, &doc, Some(data)))
    }

    /// Resolve a version without touching its chunks
    pub fn read_metadata(&self, symbol: &str, options: &ReadOptions) -> StoreResult<VersionedItem> {
        let doc = self.resolve(symbol, options)?;
        Ok(VersionedItem::from_doc(&self.library, &doc, None))
    }

    /// New version pointing at `source`'s chunks
    fn copy_version(
        &self,
        source: &VersionDoc,
        metadata: Option<Value>,
        base: Option<u64>,
    ) -> StoreResult<VersionDoc> {
        let id = new_version_id();
        for chunk_id in &source.chunk_refs {
            self.store.add_chunk_parent(&self.library, chunk_id, id)?;
        }
        let output = HandlerOutput {
            chunk_refs: source.chunk_refs.clone(),
            layout: source.layout.clone(),
        };
        self.insert_version(&source.symbol, id, &source.handler, metadata, output, base)
    }

    /// Replace the metadata of the latest version, sharing its data
    pub fn write_metadata(&self, symbol: &str, metadata: Option<Value>) -> StoreResult<VersionedItem> {
        let previous = self.latest_live(symbol)?.ok_or_else(|| {
            StoreError::not_found(format!("symbol '{}' in library '{}'", symbol, self.library))
        })?;
        let doc = self.copy_version(&previous, metadata, Some(previous.version))?;
        tracing::debug!(symbol, version = doc.version, "Wrote metadata");
        Ok(VersionedItem::from_doc(&self.library, &doc, None))
    }

    /// Make a historical version the latest again
    ///
    /// History is not rewritten: the restored state becomes a new version.
    pub fn restore_version(&self, symbol: &str, from: &ReadOptions) -> StoreResult<VersionedItem> {
        let source = self.resolve(symbol, from)?;
        let doc = self.copy_version(&source, source.metadata.clone(), None)?;
        tracing::info!(
            library = %self.library,
            symbol,
            from = source.version,
            to = doc.version,
            "Restored version"
        );
        Ok(VersionedItem::from_doc(&self.library, &doc, None))
    }

    /// Detach versions from their chunks; returns how many chunks went away
    fn detach_chunks(&self, versions: &[VersionDoc]) -> StoreResult<usize> {
        let mut deleted = 0;
        for version in versions {
            for chunk_id in &version.chunk_refs {
                if self
                    .store
                    .remove_chunk_parent(&self.library, chunk_id, version.id)?
                {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    /// Delete a symbol
    ///
    /// Versions pinned by a snapshot survive; when any do, a tombstone
    /// becomes the latest version so plain reads report the symbol missing.
    /// Returns the number of versions removed.
    pub fn delete(&self, symbol: &str) -> StoreResult<usize> {
        let removed = self.store.delete_symbol(&self.library, symbol)?;
        let chunks = self.detach_chunks(&removed)?;

        let remaining = self.store.list_versions(&self.library, Some(symbol))?;
        if remaining.last().map_or(false, |v| !v.deleted) {
            let tombstone = self.tombstone(symbol)?;
            self.store.write_version(&self.library, &tombstone)?;
        }

        tracing::info!(
            library = %self.library,
            symbol,
            versions = removed.len(),
            chunks,
            kept = remaining.len(),
            "Deleted symbol"
        );
        Ok(removed.len())
    }

    /// Tombstone document with a fresh number, not yet inserted
    fn tombstone(&self, symbol: &str) -> StoreResult<VersionDoc> {
        Ok(VersionDoc {
            id: new_version_id(),
            symbol: symbol.to_string(),
            version: self.store.next_version_number(&self.library, symbol)?,
            created_at: Utc::now(),
            metadata: None,
            handler: "default".to_string(),
            deleted: true,
            chunk_refs: Vec::new(),
            parent_snapshots: BTreeSet::new(),
            layout: Layout::Empty,
        })
    }

    /// Remove superseded versions older than `keep_mins`
    ///
    /// The latest version and every snapshot-pinned version are kept.
    /// Returns the number of versions removed.
    pub fn prune_previous_versions(&self, symbol: &str, keep_mins: u64) -> StoreResult<usize> {
        let versions = self.store.list_versions(&self.library, Some(symbol))?;
        let Some(latest) = versions.last().map(|v| v.version) else {
            return Ok(0);
        };
        let cutoff = Utc::now() - Duration::minutes(keep_mins as i64);
        let pinned: HashSet<u64> = self
            .store
            .list_snapshots(&self.library)?
            .iter()
            .filter_map(|s| s.versions.get(symbol).copied())
            .collect();

        let doomed: Vec<VersionDoc> = versions
            .into_iter()
            .filter(|v| {
                v.version != latest
                    && v.created_at < cutoff
                    && !v.is_pinned()
                    && !pinned.contains(&v.version)
            })
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let ids: Vec<VersionId> = doomed.iter().map(|v| v.id).collect();
        let removed = self.store.delete_versions(&self.library, &ids)?;
        let chunks = self.detach_chunks(&doomed)?;
        tracing::info!(
            library = %self.library,
            symbol,
            versions = removed,
            chunks,
            "Pruned previous versions"
        );
        Ok(removed)
    }

    /// Pin the current version of every symbol under `name`
    ///
    /// `versions` overrides the version number per symbol; symbols in
    /// `skip_symbols` and deleted symbols are left out.
    pub fn snapshot(
        &self,
        name: &str,
        metadata: Option<Value>,
        skip_symbols: &[String],
        versions: Option<&HashMap<String, u64>>,
    ) -> StoreResult<SnapshotDoc> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidInput("Snapshot name cannot be empty".into()));
        }
        if self.store.read_snapshot(&self.library, name)?.is_some() {
            return Err(StoreError::DuplicateSnapshot(name.to_string()));
        }

        let symbols = self.store.list_symbols(&self.library)?;
        if let Some(explicit) = versions {
            if let Some(missing) = explicit.keys().find(|s| !symbols.contains(s)) {
                return Err(StoreError::not_found(format!(
                    "symbol '{}' in library '{}'",
                    missing, self.library
                )));
            }
        }

        let mut mapping = BTreeMap::new();
        let mut pinned = Vec::new();
        for symbol in symbols.iter().filter(|s| !skip_symbols.contains(s)) {
            let doc = match versions.and_then(|v| v.get(symbol)) {
                Some(&number) => Some(self.store.read_version(
                    &self.library,
                    symbol,
                    Some(number),
                    None,
                    None,
                )?),
                None => self.latest_live(symbol)?,
            };
            if let Some(doc) = doc.filter(|d| !d.deleted) {
                mapping.insert(symbol.clone(), doc.version);
                pinned.push(doc.id);
            }
        }

        let snapshot = SnapshotDoc {
            name: name.to_string(),
            created_at: Utc::now(),
            metadata,
            versions: mapping,
        };
        self.store.create_snapshot(&self.library, &snapshot)?;
        for id in pinned {
            self.store.add_version_snapshot(&self.library, id, name)?;
        }

        tracing::info!(
            library = %self.library,
            snapshot = name,
            symbols = snapshot.versions.len(),
            "Created snapshot"
        );
        Ok(snapshot)
    }

    /// Drop a snapshot and its back-references
    ///
    /// Versions it pinned become prunable again; nothing is deleted here.
    pub fn delete_snapshot(&self, name: &str) -> StoreResult<()> {
        let snapshot = self
            .store
            .read_snapshot(&self.library, name)?
            .ok_or_else(|| StoreError::not_found(format!("snapshot '{}'", name)))?;

        for (symbol, &number) in &snapshot.versions {
            if let Some(doc) =
                self.store
                    .find_version(&self.library, symbol, VersionSelector::Number(number))?
            {
                self.store.remove_version_snapshot(&self.library, doc.id, name)?;
            }
        }
        self.store.delete_snapshot(&self.library, name)?;

        tracing::info!(library = %self.library, snapshot = name, "Deleted snapshot");
        Ok(())
    }

    pub fn list_snapshots(&self) -> StoreResult<Vec<SnapshotDoc>> {
        self.store.list_snapshots(&self.library)
    }

    /// Whether the symbol has a live latest version
    pub fn has_symbol(&self, symbol: &str) -> StoreResult<bool> {
        Ok(self.latest_live(symbol)?.is_some())
    }

    /// Live symbols, or the symbols of a snapshot, optionally matching `pattern`
    pub fn list_symbols(&self, pattern: Option<&str>, snapshot: Option<&str>) -> StoreResult<Vec<String>> {
        let regex = pattern.map(Regex::new).transpose()?;
        let symbols: Vec<String> = match snapshot {
            Some(name) => self
                .store
                .read_snapshot(&self.library, name)?
                .ok_or_else(|| StoreError::not_found(format!("snapshot '{}'", name)))?
                .versions
                .into_keys()
                .collect(),
            None => {
                let mut live = Vec::new();
                for symbol in self.store.list_symbols(&self.library)? {
                    if self.has_symbol(&symbol)? {
                        live.push(symbol);
                    }
                }
                live
            }
        };
        Ok(symbols
            .into_iter()
            .filter(|s| regex.as_ref().map_or(true, |r| r.is_match(s)))
            .collect())
    }

    /// Versions newest first, optionally restricted to one symbol or snapshot
    pub fn list_versions(
        &self,
        symbol: Option<&str>,
        snapshot: Option<&str>,
        latest_only: bool,
    ) -> StoreResult<Vec<VersionInfo>> {
        let mut versions = self.store.list_versions(&self.library, symbol)?;
        if let Some(name) = snapshot {
            versions.retain(|v| v.parent_snapshots.contains(name));
        }
        if latest_only {
            let mut newest: BTreeMap<String, VersionDoc> = BTreeMap::new();
            for v in versions {
                newest.insert(v.symbol.clone(), v);
            }
            versions = newest.into_values().collect();
        }

        let mut infos: Vec<VersionInfo> = versions.iter().map(VersionInfo::from).collect();
        infos.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(b.version.cmp(&a.version)));
        Ok(infos)
    }

    /// Handler-level description of a version
    pub fn get_info(&self, symbol: &str, options: &ReadOptions) -> StoreResult<Value> {
        let doc = self.resolve(symbol, options)?;
        let handler = self.registry.read_handler(&doc)?;
        let mut info = handler.get_info(&doc);
        if let Value::Object(map) = &mut info {
            map.insert("symbol".into(), json!(doc.symbol));
            map.insert("version".into(), json!(doc.version));
            map.insert("created_at".into(), json!(doc.created_at));
            map.insert("metadata".into(), doc.metadata.clone().unwrap_or(Value::Null));
            map.insert("snapshots".into(), json!(doc.parent_snapshots));
        }
        Ok(info)
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats {
            library: self.library.clone(),
            symbols: self.list_symbols(None, None)?.len(),
            versions: self.store.list_versions(&self.library, None)?.len(),
            chunks: self.store.list_chunks(&self.library, None)?.len(),
            snapshots: self.store.list_snapshots(&self.library)?.len(),
            stored_bytes: self.store.library_size(&self.library)?,
            quota: self.store.get_quota(&self.library)?,
        })
    }

    /// Set or clear the library's byte budget
    pub fn set_quota(&self, quota: Option<u64>) -> StoreResult<()> {
        self.store.set_quota(&self.library, quota)?;
        tracing::info!(library = %self.library, ?quota, "Set quota");
        Ok(())
    }

    pub fn get_quota(&self) -> StoreResult<Option<u64>> {
        self.store.get_quota(&self.library)
    }

    /// Current usage against the budget
    pub fn check_quota(&self) -> StoreResult<QuotaStatus> {
        let quota = self.store.get_quota(&self.library)?;
        let used = match quota {
            Some(_) => self.store.library_size(&self.library)?,
            None => 0,
        };
        Ok(QuotaStatus { used, quota })
    }

    /// Repair orphaned chunks and stale snapshot references
    pub fn fsck(&self, dry_run: bool) -> StoreResult<FsckReport> {
        fsck::run(self.store.as_ref(), &self.library, &self.config, dry_run)
    }
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("backend", &self.store.name())
            .field("library", &self.library)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteStore;
    use crate::chunker::{ChunkerSpec, Frequency};
    use crate::codec::{Array, ArrayData, Column, Table};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn memory_store() -> VersionStore {
        VersionStore::new(Arc::new(InMemoryStore::new()), "test")
    }

    fn day(m: u32, d: u32) -> i64 {
        Utc.with_ymd_and_hms(2024, m, d, 0, 0, 0).unwrap().timestamp_millis()
    }

    fn prices(dates: &[i64], px: &[f64]) -> Table {
        Table::new(vec![
            Column::new("date", Array::timestamps(dates.to_vec())),
            Column::new("px", Array::from_f64(px.to_vec())),
        ])
        .unwrap()
        .set_index(&["date"])
        .unwrap()
    }

    fn read_table(store: &VersionStore, symbol: &str, options: &ReadOptions) -> Table {
        store
            .read(symbol, options)
            .unwrap()
            .data
            .unwrap()
            .into_table()
            .unwrap()
    }

    fn version_doc(store: &VersionStore, symbol: &str, number: u64) -> VersionDoc {
        store
            .backing_store()
            .find_version(store.library(), symbol, VersionSelector::Number(number))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_write_and_read_latest() {
        let store = memory_store();
        let opts = WriteOptions::default();

        let v1 = store
            .write("px", prices(&[day(1, 2)], &[1.0]), Some(json!({"src": "a"})), &opts)
            .unwrap();
        assert_eq!(v1.version, 1);
        assert!(v1.data.is_none());

        let v2 = store.write("px", prices(&[day(1, 3)], &[2.0]), None, &opts).unwrap();
        assert_eq!(v2.version, 2);

        let latest = store.read("px", &ReadOptions::new()).unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.data, Some(Data::Table(prices(&[day(1, 3)], &[2.0]))));

        let first = read_table(&store, "px", &ReadOptions::new().version(1));
        assert_eq!(first, prices(&[day(1, 2)], &[1.0]));
    }

    #[test]
    fn test_versions_are_sequential() {
        let store = memory_store();
        let opts = WriteOptions::default();
        let numbers: Vec<u64> = (0..20)
            .map(|i| store.write("s", json!(i), None, &opts).unwrap().version)
            .collect();
        assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_read_missing_symbol() {
        let store = memory_store();
        let err = store.read("nope", &ReadOptions::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!store.has_symbol("nope").unwrap());
    }

    #[test]
    fn test_empty_symbol_is_rejected() {
        let store = memory_store();
        let err = store
            .write(" ", json!(1), None, &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn test_as_of_read() {
        let store = memory_store();
        let opts = WriteOptions::default();

        store.write("s", Array::from_i64(vec![1]), None, &opts).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let between = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(20));
        store.write("s", Array::from_i64(vec![2]), None, &opts).unwrap();

        let old = store.read("s", &ReadOptions::new().as_of(between)).unwrap();
        assert_eq!(old.version, 1);
        assert_eq!(old.data, Some(Data::Array(Array::from_i64(vec![1]))));

        let latest = store.read("s", &ReadOptions::new()).unwrap();
        assert_eq!(latest.data, Some(Data::Array(Array::from_i64(vec![2]))));
    }

    #[test]
    fn test_read_metadata_skips_chunks() {
        let store = memory_store();
        store
            .write("s", Array::from_i64(vec![1, 2, 3]), Some(json!({"k": 1})), &WriteOptions::default())
            .unwrap();

        // remove the payload behind the store's back
        let doc = version_doc(&store, "s", 1);
        for id in &doc.chunk_refs {
            store.backing_store().delete_chunk("test", id).unwrap();
        }

        let meta = store.read_metadata("s", &ReadOptions::new()).unwrap();
        assert_eq!(meta.metadata, Some(json!({"k": 1})));
        assert!(meta.data.is_none());

        let err = store.read("s", &ReadOptions::new()).unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
    }

    #[test]
    fn test_append_dedups_leading_chunks() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store
            .write("arr", Array::from_i64((0..100).collect()), None, &opts)
            .unwrap();
        let v1 = version_doc(&store, "arr", 1);
        let before: Vec<_> = store.backing_store().list_chunks("test", Some("arr")).unwrap();

        store
            .append("arr", Array::from_i64((100..150).collect()), None, &opts)
            .unwrap();
        let v2 = version_doc(&store, "arr", 2);

        assert_eq!(v2.chunk_refs[..v1.chunk_refs.len()], v1.chunk_refs[..]);
        let after = store.backing_store().list_chunks("test", Some("arr")).unwrap();
        for original in &before {
            let now = after.iter().find(|c| c.id == original.id).unwrap();
            assert_eq!(now.size, original.size);
            assert!(now.parents.contains(&v1.id) && now.parents.contains(&v2.id));
        }
        assert_eq!(after.len(), before.len() + 1);

        let data = store.read("arr", &ReadOptions::new()).unwrap().data.unwrap();
        assert_eq!(data, Data::Array(Array::from_i64((0..150).collect())));
    }

    #[test]
    fn test_append_upsert_and_missing() {
        let store = memory_store();
        let item = store
            .append("new", Array::from_f64(vec![1.0]), None, &WriteOptions::default())
            .unwrap();
        assert_eq!(item.version, 1);

        let err = store
            .append("other", Array::from_f64(vec![1.0]), None, &WriteOptions::new().upsert(false))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_append_different_kind_is_rejected() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store.write("s", Array::from_i64(vec![1]), None, &opts).unwrap();
        let err = store
            .append("s", prices(&[day(1, 1)], &[1.0]), None, &opts)
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch(_)));
    }

    #[test]
    fn test_append_keeps_metadata() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store
            .write("s", Array::from_i64(vec![1]), Some(json!({"unit": "usd"})), &opts)
            .unwrap();
        let item = store.append("s", Array::from_i64(vec![2]), None, &opts).unwrap();
        assert_eq!(item.metadata, Some(json!({"unit": "usd"})));
    }

    #[test]
    fn test_identical_rewrite_shares_chunks() {
        let store = memory_store();
        let opts = WriteOptions::default();
        let data = prices(&[day(1, 2), day(1, 3)], &[1.0, 2.0]);
        store.write("px", data.clone(), None, &opts).unwrap();
        store.write("px", data, None, &opts).unwrap();

        let chunks = store.backing_store().list_chunks("test", Some("px")).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].parents.len(), 2);
    }

    #[test]
    fn test_read_selected_columns() {
        let store = memory_store();
        let monthly = WriteOptions::default().chunker(ChunkerSpec::date(Frequency::Month));
        let book = |dates: Vec<i64>, px: Vec<f64>, qty: Vec<i64>| {
            Table::new(vec![
                Column::new("date", Array::timestamps(dates)),
                Column::new("px", Array::from_f64(px)),
                Column::new("qty", Array::from_i64(qty)),
            ])
            .unwrap()
        };
        let data = book(vec![day(1, 5), day(2, 5)], vec![1.0, 2.0], vec![10, 20]);
        store
            .write("indexed", data.clone().set_index(&["date"]).unwrap(), None, &monthly)
            .unwrap();
        store.write("flat", data, None, &monthly).unwrap();

        let qty = read_table(&store, "indexed", &ReadOptions::new().columns(["qty"]));
        assert_eq!(qty.index_names(), vec!["date"]);
        assert_eq!(qty.column_names(), vec!["qty"]);
        assert_eq!(qty.num_rows(), 2);

        // the date column is only decoded to apply the range
        let feb = ReadOptions::new()
            .columns(["px"])
            .range(DateRange::between(day(2, 1), day(3, 1)));
        let px = read_table(&store, "flat", &feb);
        assert_eq!(px, Table::new(vec![Column::new("px", Array::from_f64(vec![2.0]))]).unwrap());

        let err = store
            .read("indexed", &ReadOptions::new().columns(["px", "venue"]))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref m) if m.contains("venue")));

        store.write("blob", json!({"a": 1}), None, &WriteOptions::default()).unwrap();
        let err = store.read("blob", &ReadOptions::new().columns(["a"])).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_date_range_read_and_update() {
        let store = memory_store();
        let opts = WriteOptions::default().chunker(ChunkerSpec::date(Frequency::Month));
        let data = prices(
            &[day(1, 10), day(2, 10), day(3, 10), day(4, 10)],
            &[1.0, 2.0, 3.0, 4.0],
        );
        store.write("px", data, None, &opts).unwrap();

        let range = DateRange::between(day(2, 1), day(4, 1));
        let mid = read_table(&store, "px", &ReadOptions::new().range(range));
        assert_eq!(mid, prices(&[day(2, 10), day(3, 10)], &[2.0, 3.0]));

        let patch = prices(&[day(3, 10), day(3, 20)], &[30.0, 31.0]);
        store
            .update("px", patch, Some(DateRange::between(day(3, 1), day(4, 1))), None, &opts)
            .unwrap();

        let all = read_table(&store, "px", &ReadOptions::new());
        assert_eq!(
            all,
            prices(
                &[day(1, 10), day(2, 10), day(3, 10), day(3, 20), day(4, 10)],
                &[1.0, 2.0, 30.0, 31.0, 4.0]
            )
        );
        // the untouched months are still the original chunks
        let v1 = version_doc(&store, "px", 1);
        let v2 = version_doc(&store, "px", 2);
        assert_eq!(v2.chunk_refs[0], v1.chunk_refs[0]);
        assert_eq!(v2.chunk_refs[3], v1.chunk_refs[3]);
    }

    #[test]
    fn test_unsupported_column_type() {
        let store = memory_store();
        let table = Table::new(vec![Column::new(
            "mixed",
            Array::objects(vec![json!("a"), json!(1)]),
        )])
        .unwrap();
        let err = store
            .write("bad", table, None, &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedType(_)));
        // a failed write leaves no version behind
        assert!(store.backing_store().list_versions("test", Some("bad")).unwrap().is_empty());
    }

    #[test]
    fn test_write_metadata_shares_data() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store.write("s", Array::from_i64(vec![1, 2]), None, &opts).unwrap();
        let item = store.write_metadata("s", Some(json!({"note": "checked"}))).unwrap();
        assert_eq!(item.version, 2);

        let v1 = version_doc(&store, "s", 1);
        let v2 = version_doc(&store, "s", 2);
        assert_eq!(v1.chunk_refs, v2.chunk_refs);
        let read = store.read("s", &ReadOptions::new()).unwrap();
        assert_eq!(read.metadata, Some(json!({"note": "checked"})));
        assert_eq!(read.data, Some(Data::Array(Array::from_i64(vec![1, 2]))));
    }

    #[test]
    fn test_restore_version() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store.write("s", json!({"v": 1}), None, &opts).unwrap();
        store.write("s", json!({"v": 2}), None, &opts).unwrap();

        let restored = store.restore_version("s", &ReadOptions::new().version(1)).unwrap();
        assert_eq!(restored.version, 3);
        let read = store.read("s", &ReadOptions::new()).unwrap();
        assert_eq!(read.data, Some(Data::Object(json!({"v": 1}))));
        assert_eq!(store.list_versions(Some("s"), None, false).unwrap().len(), 3);
    }

    #[test]
    fn test_snapshot_pins_version() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store.write("s", Array::from_i64(vec![1]), None, &opts).unwrap();
        store.snapshot("snap", None, &[], None).unwrap();
        store.write("s", Array::from_i64(vec![2]), None, &opts).unwrap();
        store.write("s", Array::from_i64(vec![3]), None, &opts).unwrap();

        assert_eq!(store.prune_previous_versions("s", 0).unwrap(), 1);
        let numbers: Vec<u64> = store
            .list_versions(Some("s"), None, false)
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(numbers, vec![3, 1]);

        let snap = ReadOptions::new().snapshot("snap");
        let pinned = store.read("s", &snap).unwrap();
        assert_eq!(pinned.version, 1);

        store.delete("s").unwrap();
        let err = store.read("s", &ReadOptions::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!store.has_symbol("s").unwrap());

        let pinned = store.read("s", &snap).unwrap();
        assert_eq!(pinned.data, Some(Data::Array(Array::from_i64(vec![1]))));
        assert_eq!(store.list_symbols(None, Some("snap")).unwrap(), vec!["s"]);
    }

    #[test]
    fn test_delete_without_snapshots_removes_everything() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store.write("s", Array::from_i64(vec![1]), None, &opts).unwrap();
        store.write("s", Array::from_i64(vec![2]), None, &opts).unwrap();

        assert_eq!(store.delete("s").unwrap(), 2);
        assert!(store.backing_store().list_versions("test", Some("s")).unwrap().is_empty());
        assert!(store.backing_store().list_chunks("test", None).unwrap().is_empty());
        assert!(store.list_symbols(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_snapshot_is_rejected() {
        let store = memory_store();
        store.write("s", json!(1), None, &WriteOptions::default()).unwrap();
        store.snapshot("eod", Some(json!({"day": 1})), &[], None).unwrap();
        let err = store.snapshot("eod", None, &[], None).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSnapshot(_)));
    }

    #[test]
    fn test_snapshot_skip_and_explicit_versions() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store.write("a", json!(1), None, &opts).unwrap();
        store.write("a", json!(2), None, &opts).unwrap();
        store.write("b", json!(1), None, &opts).unwrap();

        let explicit = HashMap::from([("a".to_string(), 1)]);
        let snap = store
            .snapshot("s1", None, &["b".to_string()], Some(&explicit))
            .unwrap();
        assert_eq!(snap.versions, BTreeMap::from([("a".to_string(), 1)]));

        let missing = HashMap::from([("zzz".to_string(), 1)]);
        let err = store.snapshot("s2", None, &[], Some(&missing)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_delete_snapshot_unpins() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store.write("s", json!(1), None, &opts).unwrap();
        store.snapshot("snap", None, &[], None).unwrap();
        store.write("s", json!(2), None, &opts).unwrap();

        assert_eq!(store.prune_previous_versions("s", 0).unwrap(), 0);
        store.delete_snapshot("snap").unwrap();
        assert!(store.list_snapshots().unwrap().is_empty());
        assert!(version_doc(&store, "s", 1).parent_snapshots.is_empty());
        assert_eq!(store.prune_previous_versions("s", 0).unwrap(), 1);

        let err = store.delete_snapshot("snap").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_prune_respects_keep_window() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store.write("s", json!(1), None, &opts).unwrap();
        store.write("s", json!(2), None, &opts.clone().prune(true)).unwrap();
        // the default keep window is two hours
        assert_eq!(store.list_versions(Some("s"), None, false).unwrap().len(), 2);
        assert_eq!(store.prune_previous_versions("s", 0).unwrap(), 1);
    }

    #[test]
    fn test_quota_rejects_writes_when_over() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store.set_quota(Some(100)).unwrap();
        assert_eq!(store.get_quota().unwrap(), Some(100));

        let big = Array::from_f64((0..1000).map(f64::from).collect());
        store.write("big", big.clone(), None, &opts).unwrap();

        let err = store.write("big", big, None, &opts).unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
        assert_eq!(store.list_versions(Some("big"), None, false).unwrap().len(), 1);

        let status = store.check_quota().unwrap();
        assert!(status.is_over());

        store.set_quota(None).unwrap();
        assert!(!store.check_quota().unwrap().is_over());
    }

    #[test]
    fn test_list_symbols_with_pattern() {
        let store = memory_store();
        let opts = WriteOptions::default();
        for s in ["eq.aapl", "eq.msft", "fx.eurusd"] {
            store.write(s, json!(1), None, &opts).unwrap();
        }
        assert_eq!(
            store.list_symbols(Some(r"^eq\."), None).unwrap(),
            vec!["eq.aapl", "eq.msft"]
        );
        let err = store.list_symbols(Some("("), None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn test_list_versions_latest_only() {
        let store = memory_store();
        let opts = WriteOptions::default();
        store.write("a", json!(1), None, &opts).unwrap();
        store.write("a", json!(2), None, &opts).unwrap();
        store.write("b", json!(1), None, &opts).unwrap();

        let latest = store.list_versions(None, None, true).unwrap();
        let pairs: Vec<(String, u64)> = latest.into_iter().map(|v| (v.symbol, v.version)).collect();
        assert_eq!(pairs, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    }

    #[test]
    fn test_get_info_and_stats() {
        let store = memory_store();
        store
            .write("px", prices(&[day(1, 2)], &[1.0]), None, &WriteOptions::default())
            .unwrap();

        let info = store.get_info("px", &ReadOptions::new()).unwrap();
        assert_eq!(info["handler"], json!("table"));
        assert_eq!(info["rows"], json!(1));
        assert_eq!(info["version"], json!(1));

        let stats = store.stats().unwrap();
        assert_eq!(stats.symbols, 1);
        assert_eq!(stats.versions, 1);
        assert_eq!(stats.chunks, 1);
        assert!(stats.stored_bytes > 0);
    }

    #[test]
    fn test_custom_handler_list() {
        let store = memory_store().with_handlers(HandlerRegistry::with_handlers(Vec::new()));
        store
            .write("arr", Array::from_i64(vec![1, 2]), None, &WriteOptions::default())
            .unwrap();
        assert_eq!(version_doc(&store, "arr", 1).handler, "default");
        let read = store.read("arr", &ReadOptions::new()).unwrap();
        assert_eq!(read.data, Some(Data::Array(Array::from_i64(vec![1, 2]))));
    }

    #[test]
    fn test_sqlite_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strata.db");
        let opts = WriteOptions::default().chunker(ChunkerSpec::date(Frequency::Day));

        {
            let backend = SqliteStore::open(&path, std::time::Duration::from_secs(5)).unwrap();
            let store = VersionStore::new(Arc::new(backend), "lib");
            store
                .write("px", prices(&[day(1, 2), day(1, 3)], &[1.0, 2.0]), None, &opts)
                .unwrap();
        }

        let backend = SqliteStore::open(&path, std::time::Duration::from_secs(5)).unwrap();
        let store = VersionStore::new(Arc::new(backend), "lib");
        let table = read_table(&store, "px", &ReadOptions::new());
        assert_eq!(table, prices(&[day(1, 2), day(1, 3)], &[1.0, 2.0]));
        assert_eq!(version_doc(&store, "px", 1).chunk_refs.len(), 2);
    }

    #[test]
    fn test_open_from_config() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.store.path = dir.path().join("nested").join("db.sqlite").to_string_lossy().to_string();
        config.store.library = "research".into();

        let store = VersionStore::open(&config).unwrap();
        assert_eq!(store.library(), "research");
        assert_eq!(store.backing_store().name(), "sqlite");

        config.store.backend = "mongo".into();
        assert!(matches!(
            VersionStore::open(&config).unwrap_err(),
            StoreError::InvalidInput(_)
        ));
    }

    /// Re-run `op` until it stops failing with a write conflict
    fn retry<T>(mut op: impl FnMut() -> StoreResult<T>) -> (T, usize) {
        let mut conflicts = 0;
        loop {
            match op() {
                Ok(value) => return (value, conflicts),
                Err(err) if err.is_retryable() => conflicts += 1,
                Err(err) => panic!("unexpected error: {}", err),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_appends_keep_every_row() {
        let store = Arc::new(memory_store());
        let opts = WriteOptions::default();
        store.write("arr", Array::from_i64(vec![0]), None, &opts).unwrap();

        let mut handles = Vec::new();
        for writer in 1..=8i64 {
            let store = Arc::clone(&store);
            handles.push(tokio::task::spawn_blocking(move || {
                let opts = WriteOptions::default();
                (0..50)
                    .map(|_| retry(|| store.append("arr", Array::from_i64(vec![writer]), None, &opts)).1)
                    .sum::<usize>()
            }));
        }
        let mut conflicts = 0;
        for handle in handles {
            conflicts += handle.await.unwrap();
        }

        let latest = store.read("arr", &ReadOptions::new()).unwrap();
        let values = match latest.data.and_then(Data::into_array).map(|a| a.data().clone()) {
            Some(ArrayData::Int64(values)) => values,
            other => panic!("expected an int array, got {:?}", other),
        };
        assert_eq!(values.len(), 401, "{} conflicts were retried", conflicts);
        for writer in 1..=8i64 {
            assert_eq!(values.iter().filter(|&&v| v == writer).count(), 50);
        }

        // losing writers leave no parents behind
        let backend = store.backing_store();
        let versions = backend.list_versions(store.library(), Some("arr")).unwrap();
        assert_eq!(versions.len(), 401);
        let ids: HashSet<VersionId> = versions.iter().map(|v| v.id).collect();
        for chunk in backend.list_chunks(store.library(), Some("arr")).unwrap() {
            assert!(chunk.parents.iter().all(|p| ids.contains(p)), "orphan parent on {}", chunk.id);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_updates_keep_every_period() {
        let store = Arc::new(memory_store());
        let monthly = WriteOptions::default().chunker(ChunkerSpec::date(Frequency::Month));
        let dates: Vec<i64> = (1..=8).map(|d| day(1, d)).collect();
        store.write("px", prices(&dates, &[0.0; 8]), None, &monthly).unwrap();

        let mut handles = Vec::new();
        for writer in 0..8u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::task::spawn_blocking(move || {
                let opts = WriteOptions::default();
                let range = DateRange::between(day(1, writer + 1), day(1, writer + 2));
                for i in 0..20 {
                    let px = (writer * 100 + i) as f64;
                    let patch = prices(&[day(1, writer + 1)], &[px]);
                    retry(|| store.update("px", patch.clone(), Some(range), None, &opts));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let expected: Vec<f64> = (0..8).map(|w| (w * 100 + 19) as f64).collect();
        assert_eq!(read_table(&store, "px", &ReadOptions::new()), prices(&dates, &expected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_writers_get_unique_versions() {
        let store = Arc::new(memory_store());
        let mut handles = Vec::new();

        for writer in 0..64u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::task::spawn_blocking(move || {
                let opts = WriteOptions::default();
                (0..100u64)
                    .map(|i| {
                        let item = store
                            .write("shared", json!({"writer": writer, "i": i}), None, &opts)
                            .unwrap();
                        (item.version, writer, i)
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let mut written = Vec::new();
        for handle in handles {
            written.extend(handle.await.unwrap());
        }

        let mut numbers: Vec<u64> = written.iter().map(|(v, _, _)| *v).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=6400).collect::<Vec<_>>());

        for (version, writer, i) in written {
            let item = store.read("shared", &ReadOptions::new().version(version)).unwrap();
            assert_eq!(item.data, Some(Data::Object(json!({"writer": writer, "i": i}))));
        }
    }
}
