//! SQLite backing store
//!
//! One database file can be shared by many processes. Each handle owns a
//! single connection; cross-process coordination comes from SQLite itself:
//!
//! - WAL journal, so readers never block the writer
//! - `BEGIN IMMEDIATE` for read-modify-write operations
//! - `UNIQUE(library, symbol, version)` to detect racing version inserts
//! - `chunk_parents` rows inserted with `INSERT OR IGNORE`
//!
//! Version and snapshot documents are stored as JSON next to the columns
//! they are queried by. Chunk payloads are stored as blobs with a CRC32
//! that is checked on every read.

use crate::backend::{
    BackingStore, ChunkDoc, ChunkQuery, ChunkStream, ChunkSummary, SnapshotDoc, VersionDoc,
    VersionId, VersionSelector,
};
use crate::chunker::SegmentFilter;
use crate::storage::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS versions (
        library TEXT NOT NULL,
        symbol TEXT NOT NULL,
        version INTEGER NOT NULL,
        id TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL,
        doc TEXT NOT NULL,
        UNIQUE (library, symbol, version)
    );
    CREATE INDEX IF NOT EXISTS idx_versions_created ON versions(library, symbol, created_at);

    CREATE TABLE IF NOT EXISTS version_counters (
        library TEXT NOT NULL,
        symbol TEXT NOT NULL,
        n INTEGER NOT NULL,
        PRIMARY KEY (library, symbol)
    );

    CREATE TABLE IF NOT EXISTS chunks (
        library TEXT NOT NULL,
        id TEXT NOT NULL,
        symbol TEXT NOT NULL,
        segment_start INTEGER,
        segment_end INTEGER,
        content_hash TEXT NOT NULL,
        rows INTEGER NOT NULL,
        payload BLOB NOT NULL,
        crc INTEGER NOT NULL,
        PRIMARY KEY (library, id)
    );
    CREATE INDEX IF NOT EXISTS idx_chunks_symbol ON chunks(library, symbol, segment_start);

    CREATE TABLE IF NOT EXISTS chunk_parents (
        library TEXT NOT NULL,
        chunk_id TEXT NOT NULL,
        version_id TEXT NOT NULL,
        PRIMARY KEY (library, chunk_id, version_id)
    );
    CREATE INDEX IF NOT EXISTS idx_chunk_parents_version ON chunk_parents(library, version_id);

    CREATE TABLE IF NOT EXISTS snapshots (
        library TEXT NOT NULL,
        name TEXT NOT NULL,
        doc TEXT NOT NULL,
        PRIMARY KEY (library, name)
    );

    CREATE TABLE IF NOT EXISTS quotas (
        library TEXT PRIMARY KEY,
        quota INTEGER
    );
";

fn to_nanos(t: &DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn parse_uuid(s: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corruption(format!("Bad version id {}: {}", s, e)))
}

/// Backing store in a SQLite database file
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create a store
    ///
    /// `timeout` bounds how long any statement waits on another writer;
    /// it also bounds schema setup, so an unreachable file fails fast.
    pub fn open(path: impl AsRef<Path>, timeout: Duration) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::StoreUnavailable(format!("{}: {}", path.display(), e)))?;

        Self::init(conn, path, timeout)
    }

    /// Private, non-shared store for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, PathBuf::from(":memory:"), Duration::from_secs(5))
    }

    fn init(conn: Connection, path: PathBuf, timeout: Duration) -> StoreResult<Self> {
        conn.busy_timeout(timeout)?;

        // Configure for concurrent access
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = OFF;
            ",
        )
        .map_err(|e| StoreError::StoreUnavailable(format!("{}: {}", path.display(), e)))?;

        conn.execute_batch(SCHEMA)?;

        tracing::debug!("Opened SQLite store at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn version_doc(conn: &Connection, library: &str, id: &VersionId) -> StoreResult<Option<VersionDoc>> {
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM versions WHERE library = ?1 AND id = ?2",
                params![library, id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    fn update_version_snapshots(
        &self,
        library: &str,
        id: VersionId,
        edit: impl FnOnce(&mut BTreeSet<String>),
        missing_ok: bool,
    ) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut doc) = Self::version_doc(&tx, library, &id)? else {
            if missing_ok {
                return Ok(());
            }
            return Err(StoreError::not_found(format!("version {}", id)));
        };
        edit(&mut doc.parent_snapshots);
        tx.execute(
            "UPDATE versions SET doc = ?3 WHERE library = ?1 AND id = ?2",
            params![library, id.to_string(), serde_json::to_string(&doc)?],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Insert a version row and raise the symbol's counter to match
fn insert_version_row(conn: &Connection, library: &str, doc: &VersionDoc, json: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO versions (library, symbol, version, id, created_at, doc)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            library,
            doc.symbol,
            doc.version as i64,
            doc.id.to_string(),
            to_nanos(&doc.created_at),
            json
        ],
    )
    .map_err(|e| match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::WriteConflict {
            symbol: doc.symbol.clone(),
            reason: format!("version {} already exists", doc.version),
        },
        _ => e.into(),
    })?;

    conn.execute(
        "INSERT INTO version_counters (library, symbol, n) VALUES (?1, ?2, ?3)
         ON CONFLICT (library, symbol) DO UPDATE SET n = max(n, excluded.n)",
        params![library, doc.symbol, doc.version as i64],
    )?;
    Ok(())
}

/// Load one chunk with its parents, verifying the payload checksum
fn load_chunk(conn: &Connection, library: &str, id: &str) -> StoreResult<ChunkDoc> {
    let row = conn
        .query_row(
            "SELECT symbol, segment_start, segment_end, content_hash, rows, payload, crc
             FROM chunks WHERE library = ?1 AND id = ?2",
            params![library, id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("chunk {}", id)))?;
    let (symbol, segment_start, segment_end, content_hash, rows, payload, crc) = row;

    let computed = crc32fast::hash(&payload);
    if computed as i64 != crc {
        return Err(StoreError::Corruption(format!(
            "Chunk {} checksum mismatch: stored={:08x}, computed={:08x}",
            id, crc, computed
        )));
    }

    let mut stmt = conn.prepare_cached(
        "SELECT version_id FROM chunk_parents WHERE library = ?1 AND chunk_id = ?2",
    )?;
    let parents = stmt
        .query_map(params![library, id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .map(|s| parse_uuid(s))
        .collect::<StoreResult<BTreeSet<_>>>()?;

    Ok(ChunkDoc {
        id: id.to_string(),
        symbol,
        segment_start,
        segment_end,
        content_hash,
        rows: rows as u64,
        payload,
        parents,
    })
}

/// Fetches payloads one at a time as the caller iterates
struct ChunkCursor {
    conn: Arc<Mutex<Connection>>,
    library: String,
    ids: std::vec::IntoIter<String>,
}

impl Iterator for ChunkCursor {
    type Item = StoreResult<ChunkDoc>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.next()?;
        Some(
            self.conn
                .lock()
                .map_err(|e| StoreError::Lock(e.to_string()))
                .and_then(|conn| load_chunk(&conn, &self.library, &id)),
        )
    }
}

impl BackingStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn next_version_number(&self, library: &str, symbol: &str) -> StoreResult<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "INSERT INTO version_counters (library, symbol, n) VALUES (?1, ?2, 1)
             ON CONFLICT (library, symbol) DO UPDATE SET n = n + 1
             RETURNING n",
            params![library, symbol],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn find_version(
        &self,
        library: &str,
        symbol: &str,
        selector: VersionSelector,
    ) -> StoreResult<Option<VersionDoc>> {
        let conn = self.lock()?;
        let doc: Option<String> = match selector {
            VersionSelector::Latest => conn
                .query_row(
                    "SELECT doc FROM versions WHERE library = ?1 AND symbol = ?2
                     ORDER BY version DESC LIMIT 1",
                    params![library, symbol],
                    |row| row.get(0),
                )
                .optional()?,
            VersionSelector::Number(n) => conn
                .query_row(
                    "SELECT doc FROM versions WHERE library = ?1 AND symbol = ?2 AND version = ?3",
                    params![library, symbol, n as i64],
                    |row| row.get(0),
                )
                .optional()?,
            VersionSelector::AsOf(instant) => conn
                .query_row(
                    "SELECT doc FROM versions WHERE library = ?1 AND symbol = ?2 AND created_at <= ?3
                     ORDER BY version DESC LIMIT 1",
                    params![library, symbol, to_nanos(&instant)],
                    |row| row.get(0),
                )
                .optional()?,
        };
        doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    fn write_version(&self, library: &str, doc: &VersionDoc) -> StoreResult<()> {
        let json = serde_json::to_string(doc)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        insert_version_row(&tx, library, doc, &json)?;
        tx.commit()?;
        Ok(())
    }

    fn write_version_after(&self, library: &str, doc: &VersionDoc, base: u64) -> StoreResult<()> {
        let json = serde_json::to_string(doc)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let newest: Option<i64> = tx.query_row(
            "SELECT max(version) FROM versions WHERE library = ?1 AND symbol = ?2",
            params![library, doc.symbol],
            |row| row.get(0),
        )?;
        if newest != Some(base as i64) {
            return Err(StoreError::WriteConflict {
                symbol: doc.symbol.clone(),
                reason: format!("built on version {}, newest is now {:?}", base, newest),
            });
        }
        insert_version_row(&tx, library, doc, &json)?;
        tx.commit()?;
        Ok(())
    }

    fn list_versions(&self, library: &str, symbol: Option<&str>) -> StoreResult<Vec<VersionDoc>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT doc FROM versions WHERE library = ?1 AND (?2 IS NULL OR symbol = ?2)
             ORDER BY symbol, version",
        )?;
        let docs = stmt
            .query_map(params![library, symbol], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        docs.iter()
            .map(|d| serde_json::from_str(d).map_err(StoreError::from))
            .collect()
    }

    fn delete_versions(&self, library: &str, ids: &[VersionId]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut removed = 0;
        for id in ids {
            removed += tx.execute(
                "DELETE FROM versions WHERE library = ?1 AND id = ?2",
                params![library, id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn add_version_snapshot(&self, library: &str, id: VersionId, snapshot: &str) -> StoreResult<()> {
        self.update_version_snapshots(
            library,
            id,
            |set| {
                set.insert(snapshot.to_string());
            },
            false,
        )
    }

    fn remove_version_snapshot(&self, library: &str, id: VersionId, snapshot: &str) -> StoreResult<()> {
        self.update_version_snapshots(
            library,
            id,
            |set| {
                set.remove(snapshot);
            },
            true,
        )
    }

    fn read_chunks(&self, library: &str, query: &ChunkQuery) -> StoreResult<ChunkStream> {
        let (start, end) = match query.segment {
            SegmentFilter::Any => (None, None),
            SegmentFilter::Overlapping { start, end } => (start, end),
        };
        let ids = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare_cached(
                "SELECT c.id FROM chunks c
                 WHERE c.library = ?1 AND c.symbol = ?2
                   AND (?3 IS NULL OR EXISTS (
                        SELECT 1 FROM chunk_parents p
                        WHERE p.library = c.library AND p.chunk_id = c.id AND p.version_id = ?3))
                   AND (?5 IS NULL OR c.segment_start IS NULL OR c.segment_start < ?5)
                   AND (?4 IS NULL OR c.segment_end IS NULL OR c.segment_end > ?4)
                 ORDER BY c.segment_start",
            )?;
            let ids = stmt
                .query_map(
                    params![
                        library,
                        query.symbol,
                        query.parent.map(|p| p.to_string()),
                        start,
                        end
                    ],
                    |row| row.get::<_, String>(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        Ok(Box::new(ChunkCursor {
            conn: self.conn.clone(),
            library: library.to_string(),
            ids: ids.into_iter(),
        }))
    }

    fn write_chunk(&self, library: &str, chunk: &ChunkDoc, parent: VersionId) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO chunks
             (library, id, symbol, segment_start, segment_end, content_hash, rows, payload, crc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                library,
                chunk.id,
                chunk.symbol,
                chunk.segment_start,
                chunk.segment_end,
                chunk.content_hash,
                chunk.rows as i64,
                chunk.payload,
                crc32fast::hash(&chunk.payload) as i64
            ],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO chunk_parents (library, chunk_id, version_id) VALUES (?1, ?2, ?3)",
            params![library, chunk.id, parent.to_string()],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    fn add_chunk_parent(&self, library: &str, chunk_id: &str, parent: VersionId) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM chunks WHERE library = ?1 AND id = ?2",
                params![library, chunk_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::not_found(format!("chunk {}", chunk_id)));
        }
        tx.execute(
            "INSERT OR IGNORE INTO chunk_parents (library, chunk_id, version_id) VALUES (?1, ?2, ?3)",
            params![library, chunk_id, parent.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn remove_chunk_parent(&self, library: &str, chunk_id: &str, parent: VersionId) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM chunk_parents WHERE library = ?1 AND chunk_id = ?2 AND version_id = ?3",
            params![library, chunk_id, parent.to_string()],
        )?;
        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM chunk_parents WHERE library = ?1 AND chunk_id = ?2",
            params![library, chunk_id],
            |row| row.get(0),
        )?;
        let deleted = if remaining == 0 {
            tx.execute(
                "DELETE FROM chunks WHERE library = ?1 AND id = ?2",
                params![library, chunk_id],
            )? > 0
        } else {
            false
        };
        tx.commit()?;
        Ok(deleted)
    }

    fn list_chunks(&self, library: &str, symbol: Option<&str>) -> StoreResult<Vec<ChunkSummary>> {
        let conn = self.lock()?;

        let mut parents: HashMap<String, BTreeSet<VersionId>> = HashMap::new();
        {
            let mut stmt = conn.prepare_cached(
                "SELECT chunk_id, version_id FROM chunk_parents WHERE library = ?1",
            )?;
            let rows = stmt
                .query_map(params![library], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (chunk, version) in rows {
                parents.entry(chunk).or_default().insert(parse_uuid(&version)?);
            }
        }

        let mut stmt = conn.prepare_cached(
            "SELECT id, symbol, segment_start, segment_end, length(payload) FROM chunks
             WHERE library = ?1 AND (?2 IS NULL OR symbol = ?2)
             ORDER BY symbol, segment_start",
        )?;
        let rows = stmt
            .query_map(params![library, symbol], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(id, symbol, segment_start, segment_end, size)| ChunkSummary {
                parents: parents.remove(&id).unwrap_or_default(),
                id,
                symbol,
                segment_start,
                segment_end,
                size: size as u64,
            })
            .collect())
    }

    fn delete_chunk(&self, library: &str, chunk_id: &str) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM chunk_parents WHERE library = ?1 AND chunk_id = ?2",
            params![library, chunk_id],
        )?;
        tx.execute(
            "DELETE FROM chunks WHERE library = ?1 AND id = ?2",
            params![library, chunk_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn list_symbols(&self, library: &str) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT symbol FROM versions WHERE library = ?1 ORDER BY symbol",
        )?;
        let symbols = stmt
            .query_map(params![library], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(symbols)
    }

    fn create_snapshot(&self, library: &str, snapshot: &SnapshotDoc) -> StoreResult<()> {
        let json = serde_json::to_string(snapshot)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO snapshots (library, name, doc) VALUES (?1, ?2, ?3)",
            params![library, snapshot.name, json],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => StoreError::DuplicateSnapshot(snapshot.name.clone()),
            _ => e.into(),
        })?;
        Ok(())
    }

    fn read_snapshot(&self, library: &str, name: &str) -> StoreResult<Option<SnapshotDoc>> {
        let conn = self.lock()?;
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM snapshots WHERE library = ?1 AND name = ?2",
                params![library, name],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    fn delete_snapshot(&self, library: &str, name: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM snapshots WHERE library = ?1 AND name = ?2",
            params![library, name],
        )?;
        Ok(removed > 0)
    }

    fn list_snapshots(&self, library: &str) -> StoreResult<Vec<SnapshotDoc>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached("SELECT doc FROM snapshots WHERE library = ?1 ORDER BY name")?;
        let docs = stmt
            .query_map(params![library], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        docs.iter()
            .map(|d| serde_json::from_str(d).map_err(StoreError::from))
            .collect()
    }

    fn get_quota(&self, library: &str) -> StoreResult<Option<u64>> {
        let conn = self.lock()?;
        let quota: Option<Option<i64>> = conn
            .query_row(
                "SELECT quota FROM quotas WHERE library = ?1",
                params![library],
                |row| row.get(0),
            )
            .optional()?;
        Ok(quota.flatten().map(|q| q as u64))
    }

    fn set_quota(&self, library: &str, quota: Option<u64>) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO quotas (library, quota) VALUES (?1, ?2)
             ON CONFLICT (library) DO UPDATE SET quota = excluded.quota",
            params![library, quota.map(|q| q as i64)],
        )?;
        Ok(())
    }

    fn library_size(&self, library: &str) -> StoreResult<u64> {
        let conn = self.lock()?;
        let chunks: i64 = conn.query_row(
            "SELECT COALESCE(SUM(length(payload)), 0) FROM chunks WHERE library = ?1",
            params![library],
            |row| row.get(0),
        )?;
        let docs: i64 = conn.query_row(
            "SELECT COALESCE(SUM(length(doc)), 0) FROM versions WHERE library = ?1",
            params![library],
            |row| row.get(0),
        )?;
        Ok((chunks + docs) as u64)
    }
}
