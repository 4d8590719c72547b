//! Handler for tables
//!
//! The table is split by its chunker and every segment is encoded as one
//! [`SerializedTable`] chunk. Appends and range updates only rewrite the
//! segments they touch:
//!
//! ```text
//! previous:  [Jan] [Feb] [Mar]
//! append:                  Mar rows + Apr rows
//! new:       [Jan] [Feb] [Mar'] [Apr]
//!             └─reused─┘   └─re-encoded─┘
//! ```
//!
//! With the date chunker the unit of rewriting is the calendar period: a
//! period split into several sub-chunks is always rewritten as a whole so
//! the new segments never overlap the ones kept.

use crate::backend::{BackingStore, ChunkDoc, ChunkQuery, ChunkSummary, Layout, VersionDoc};
use crate::chunker::{Chunker, ChunkerSpec, RangeToken, SegmentFilter};
use crate::codec::{decode_tables, encode_table, open, seal, Array, Column, DType, SerializedTable, Table};
use crate::handlers::{
    fetch_chunks, reuse_chunk, store_chunk, HandlerOutput, TypeHandler, WriteContext,
};
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::types::{Data, DateRange, WriteOptions};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Copy, Default)]
pub struct TableHandler;

/// Shape of a stored table as recorded in its version
struct StoredTable<'a> {
    columns: &'a [String],
    dtypes: &'a [String],
    index: &'a [String],
    rows: u64,
    chunker: &'a ChunkerSpec,
}

impl<'a> StoredTable<'a> {
    fn of(version: &'a VersionDoc) -> StoreResult<Self> {
        match &version.layout {
            Layout::Table {
                columns,
                dtypes,
                index,
                rows,
                chunker,
            } => Ok(Self {
                columns,
                dtypes,
                index,
                rows: *rows,
                chunker,
            }),
            other => Err(StoreError::SchemaMismatch(format!(
                "version {} of '{}' is not a table: {:?}",
                version.version, version.symbol, other
            ))),
        }
    }

    /// Zero-row table with the recorded columns, index and dtypes
    fn empty(&self) -> StoreResult<Table> {
        let names: Vec<&String> = self.index.iter().chain(self.columns).collect();
        if names.len() != self.dtypes.len() {
            return Err(StoreError::Corruption(format!(
                "table layout lists {} columns but {} dtypes",
                names.len(),
                self.dtypes.len()
            )));
        }
        let columns = names
            .into_iter()
            .zip(self.dtypes)
            .map(|(name, tag)| Ok(Column::new(name.clone(), Array::empty(DType::parse(tag)?))))
            .collect::<StoreResult<Vec<_>>>()?;
        let index: Vec<&str> = self.index.iter().map(String::as_str).collect();
        Table::new(columns)?.set_index(&index)
    }

    fn check_shape(&self, symbol: &str, incoming: &Table) -> StoreResult<()> {
        if incoming.column_names() != self.columns || incoming.index_names() != self.index {
            return Err(StoreError::SchemaMismatch(format!(
                "'{}' has columns {:?} and index {:?}, got {:?} and {:?}",
                symbol,
                self.columns,
                self.index,
                incoming.column_names(),
                incoming.index_names()
            )));
        }
        if self.dtypes.is_empty() {
            return Ok(());
        }
        let names = self.index.iter().chain(self.columns);
        let columns = incoming.index().iter().chain(incoming.columns());
        for ((name, tag), column) in names.zip(self.dtypes).zip(columns) {
            let stored = DType::parse(tag)?;
            let got = column.values.dtype();
            if !stored.compatible_with(&got) {
                return Err(StoreError::SchemaMismatch(format!(
                    "'{}' column {} is {}, got {}",
                    symbol, name, stored, got
                )));
            }
        }
        Ok(())
    }
}

/// Dtype tags of the index columns followed by the data columns
fn column_dtypes(table: &Table) -> Vec<String> {
    table
        .index()
        .iter()
        .chain(table.columns())
        .map(|c| c.values.dtype().tag())
        .collect()
}

/// Recorded dtypes with text widths grown to fit `table`
fn widen_dtypes(recorded: &[String], table: &Table) -> StoreResult<Vec<String>> {
    recorded
        .iter()
        .zip(table.index().iter().chain(table.columns()))
        .map(|(tag, column)| -> StoreResult<String> {
            Ok(match (DType::parse(tag)?, column.values.dtype()) {
                (DType::Text(a), DType::Text(b)) => DType::Text(a.max(b)).tag(),
                (dtype, _) => dtype.tag(),
            })
        })
        .collect()
}

fn expect_table<'a>(data: &'a Data, symbol: &str) -> StoreResult<&'a Table> {
    data.as_table().ok_or_else(|| {
        StoreError::SchemaMismatch(format!("'{}' holds a table, got {}", symbol, data.kind()))
    })
}

fn max_rows(ctx: &WriteContext<'_>) -> usize {
    ctx.options.chunk_size.unwrap_or(ctx.config.max_chunk_rows).max(1)
}

/// Encode and store every chunk of `table`; returns `(segment start, id)` pairs
fn write_table_chunks(
    store: &dyn BackingStore,
    ctx: &WriteContext<'_>,
    chunker: &dyn Chunker,
    table: &Table,
) -> StoreResult<Vec<(Option<i64>, String)>> {
    let mut refs = Vec::new();
    for chunk in chunker.to_chunks(table, max_rows(ctx)) {
        let chunk = chunk?;
        let (frame, hash) = encode_table(&chunk.data)?;
        let rows = frame.num_rows();
        let id = store_chunk(store, ctx, (chunk.start, chunk.end), hash, rows, seal(&frame)?)?;
        refs.push((chunk.start, id));
    }
    Ok(refs)
}

fn decode_chunks(chunks: &[ChunkDoc], columns: Option<&[String]>) -> StoreResult<Option<Table>> {
    if chunks.is_empty() {
        return Ok(None);
    }
    let frames = chunks
        .iter()
        .map(|c| {
            let frame = open::<SerializedTable>(&c.payload)?;
            match columns {
                Some(columns) => frame.select(columns),
                None => Ok(frame),
            }
        })
        .collect::<StoreResult<Vec<_>>>()?;
    decode_tables(&frames).map(Some)
}

enum Rewrite {
    Append,
    Update(RangeToken),
}

impl TableHandler {
    fn chunker_spec(ctx: &WriteContext<'_>) -> StoreResult<ChunkerSpec> {
        match &ctx.options.chunker {
            Some(spec) => Ok(spec.clone()),
            None => ctx.config.default_chunker_spec(),
        }
    }

    /// Period starts touched by a rewrite; `None` means every chunk
    fn affected_periods(
        spec: &ChunkerSpec,
        chunker: &dyn Chunker,
        incoming: &Table,
        previous_chunks: &[ChunkSummary],
        mode: &Rewrite,
    ) -> StoreResult<Option<BTreeSet<i64>>> {
        let (frequency, column) = match spec {
            ChunkerSpec::Passthrough => return Ok(None),
            ChunkerSpec::Date { frequency, column } => (frequency, column),
        };

        let mut periods = BTreeSet::new();
        if !incoming.is_empty() {
            for &ts in incoming.timestamps(column)? {
                periods.insert(frequency.period_start(ts)?);
            }
        }
        if let Rewrite::Update(token) = mode {
            let predicate = chunker.to_query_predicate(token);
            for chunk in previous_chunks {
                if !predicate.matches(chunk.segment_start, chunk.segment_end) {
                    continue;
                }
                match chunk.segment_start {
                    Some(start) => {
                        periods.insert(frequency.period_start(start)?);
                    }
                    None => return Ok(None),
                }
            }
        }
        Ok(Some(periods))
    }

    /// Rewrite the touched segments of the previous version
    fn rewrite(
        &self,
        store: &dyn BackingStore,
        ctx: &WriteContext<'_>,
        data: &Data,
        mode: Rewrite,
    ) -> StoreResult<HandlerOutput> {
        let previous = ctx.require_previous()?;
        let stored = StoredTable::of(previous)?;
        let incoming = expect_table(data, ctx.symbol)?;
        stored.check_shape(ctx.symbol, incoming)?;

        let chunker = stored.chunker.build();
        let incoming = match &mode {
            Rewrite::Update(token) => chunker.filter(incoming, token)?,
            Rewrite::Append => incoming.clone(),
        };

        let previous_chunks: Vec<ChunkSummary> = store
            .list_chunks(ctx.library, Some(ctx.symbol))?
            .into_iter()
            .filter(|c| c.parents.contains(&previous.id))
            .collect();
        let periods = Self::affected_periods(
            stored.chunker,
            chunker.as_ref(),
            &incoming,
            &previous_chunks,
            &mode,
        )?;

        // Load the touched chunks, one query per period
        let touched = match (&periods, stored.chunker) {
            (Some(starts), ChunkerSpec::Date { frequency, .. }) => {
                let mut chunks = Vec::new();
                for &start in starts {
                    let query = ChunkQuery::for_version(
                        previous,
                        SegmentFilter::Overlapping {
                            start: Some(start),
                            end: Some(frequency.period_end(start)?),
                        },
                    );
                    for chunk in store.read_chunks(ctx.library, &query)? {
                        chunks.push(chunk?);
                    }
                }
                chunks
            }
            _ => fetch_chunks(store, ctx.library, previous, SegmentFilter::Any)?,
        };
        let touched_ids: HashSet<&str> = touched.iter().map(|c| c.id.as_str()).collect();

        let existing = decode_chunks(&touched, None)?;
        let replaced_rows = existing.as_ref().map_or(0, |t| t.num_rows() as u64);
        let existing = match (&mode, existing) {
            (Rewrite::Update(token), Some(t)) => Some(chunker.exclude(&t, token)?),
            (_, existing) => existing,
        };

        let mut parts: Vec<Table> = existing.into_iter().filter(|t| !t.is_empty()).collect();
        if !incoming.is_empty() {
            parts.push(incoming);
        }
        let merged = match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Table::concat(&parts)?),
        };

        let mut refs = match &merged {
            Some(table) => write_table_chunks(store, ctx, chunker.as_ref(), table)?,
            None => Vec::new(),
        };
        let mut reused = 0;
        for chunk in &previous_chunks {
            if !touched_ids.contains(chunk.id.as_str()) {
                reuse_chunk(store, ctx, &chunk.id)?;
                refs.push((chunk.segment_start, chunk.id.clone()));
                reused += 1;
            }
        }
        refs.sort_by_key(|(start, _)| *start);

        let merged_rows = merged.as_ref().map_or(0, |t| t.num_rows() as u64);
        tracing::debug!(
            symbol = ctx.symbol,
            reused,
            rewritten = touched.len(),
            written = refs.len() - reused,
            "rewrote table segments"
        );

        let dtypes = match &merged {
            Some(table) if stored.dtypes.is_empty() => column_dtypes(table),
            Some(table) => widen_dtypes(stored.dtypes, table)?,
            None => stored.dtypes.to_vec(),
        };

        Ok(HandlerOutput {
            chunk_refs: refs.into_iter().map(|(_, id)| id).collect(),
            layout: Layout::Table {
                columns: stored.columns.to_vec(),
                dtypes,
                index: stored.index.to_vec(),
                rows: stored.rows - replaced_rows + merged_rows,
                chunker: stored.chunker.clone(),
            },
        })
    }

    /// Decode the chunks overlapping `range`, optionally narrowed to `columns`
    fn load(
        &self,
        store: &dyn BackingStore,
        library: &str,
        version: &VersionDoc,
        range: Option<DateRange>,
        columns: Option<&[String]>,
    ) -> StoreResult<Table> {
        let stored = StoredTable::of(version)?;
        let chunker = stored.chunker.build();
        let token = match range {
            Some(r) => chunker.to_range(r.start, r.end),
            None => RangeToken::Whole,
        };

        // the date column must survive decoding for the range filter
        let decoded: Option<Vec<String>> = columns.map(|cols| {
            let mut keep = cols.to_vec();
            if let ChunkerSpec::Date { column, .. } = stored.chunker {
                keep.push(column.clone());
            }
            keep
        });

        let chunks = fetch_chunks(store, library, version, chunker.to_query_predicate(&token))?;
        let table = match decode_chunks(&chunks, decoded.as_deref())? {
            Some(table) => chunker.filter(&table, &token)?,
            None => stored.empty()?,
        };
        let table = match columns {
            Some(cols) => table.select(cols)?,
            None => table,
        };

        tracing::debug!(
            symbol = %version.symbol,
            version = version.version,
            chunks = chunks.len(),
            rows = table.num_rows(),
            "read table"
        );
        Ok(table)
    }
}

impl TypeHandler for TableHandler {
    fn name(&self) -> &'static str {
        "table"
    }

    fn can_write(
        &self,
        _previous: Option<&VersionDoc>,
        _symbol: &str,
        data: &Data,
        _options: &WriteOptions,
    ) -> bool {
        matches!(data, Data::Table(_))
    }

    fn write(
        &self,
        store: &dyn BackingStore,
        ctx: &WriteContext<'_>,
        data: &Data,
    ) -> StoreResult<HandlerOutput> {
        let table = expect_table(data, ctx.symbol)?;
        let spec = Self::chunker_spec(ctx)?;
        let chunker = spec.build();

        let refs = write_table_chunks(store, ctx, chunker.as_ref(), table)?;
        tracing::debug!(
            symbol = ctx.symbol,
            rows = table.num_rows(),
            chunks = refs.len(),
            chunker = %spec,
            "wrote table"
        );

        Ok(HandlerOutput {
            chunk_refs: refs.into_iter().map(|(_, id)| id).collect(),
            layout: Layout::Table {
                columns: table.column_names(),
                dtypes: column_dtypes(table),
                index: table.index_names(),
                rows: table.num_rows() as u64,
                chunker: spec,
            },
        })
    }

    fn append(
        &self,
        store: &dyn BackingStore,
        ctx: &WriteContext<'_>,
        data: &Data,
    ) -> StoreResult<HandlerOutput> {
        self.rewrite(store, ctx, data, Rewrite::Append)
    }

    /// Without a range the update covers the span of the incoming dates
    fn update(
        &self,
        store: &dyn BackingStore,
        ctx: &WriteContext<'_>,
        data: &Data,
        range: Option<DateRange>,
    ) -> StoreResult<HandlerOutput> {
        let previous = ctx.require_previous()?;
        let stored = StoredTable::of(previous)?;
        let chunker = stored.chunker.build();

        let range = match (range, stored.chunker) {
            (Some(r), _) => r,
            (None, ChunkerSpec::Date { column, .. }) => {
                let incoming = expect_table(data, ctx.symbol)?;
                let ts = if incoming.is_empty() {
                    &[][..]
                } else {
                    incoming.timestamps(column)?
                };
                match (ts.iter().min(), ts.iter().max()) {
                    (Some(&lo), Some(&hi)) => DateRange::between(lo, hi + 1),
                    // nothing to overwrite
                    _ => DateRange::between(0, 0),
                }
            }
            (None, ChunkerSpec::Passthrough) => DateRange::default(),
        };

        let token = chunker.to_range(range.start, range.end);
        self.rewrite(store, ctx, data, Rewrite::Update(token))
    }

    fn read(
        &self,
        store: &dyn BackingStore,
        library: &str,
        version: &VersionDoc,
        range: Option<DateRange>,
    ) -> StoreResult<Data> {
        self.load(store, library, version, range, None).map(Data::from)
    }

    fn read_columns(
        &self,
        store: &dyn BackingStore,
        library: &str,
        version: &VersionDoc,
        range: Option<DateRange>,
        columns: &[String],
    ) -> StoreResult<Data> {
        let stored = StoredTable::of(version)?;
        if let Some(missing) = columns
            .iter()
            .find(|c| !stored.columns.contains(c) && !stored.index.contains(c))
        {
            return Err(StoreError::not_found(format!(
                "column '{}' in version {} of '{}'",
                missing, version.version, version.symbol
            )));
        }
        self.load(store, library, version, range, Some(columns))
            .map(Data::from)
    }

    fn get_info(&self, version: &VersionDoc) -> Value {
        match StoredTable::of(version) {
            Ok(stored) => json!({
                "handler": self.name(),
                "columns": stored.columns,
                "dtypes": stored.dtypes,
                "index": stored.index,
                "rows": stored.rows,
                "chunker": stored.chunker.to_string(),
                "chunks": version.chunk_refs.len(),
            }),
            Err(_) => json!({ "handler": self.name() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{new_version_id, InMemoryStore, VersionId};
    use crate::chunker::Frequency;
    use crate::config::EngineConfig;
    use chrono::{TimeZone, Utc};

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

    struct Harness {
        store: InMemoryStore,
        config: EngineConfig,
        options: WriteOptions,
    }

    impl Harness {
        fn new(options: WriteOptions) -> Self {
            Self {
                store: InMemoryStore::new(),
                config: EngineConfig::default(),
                options,
            }
        }

        fn monthly() -> Self {
            Self::new(WriteOptions::default().chunker(ChunkerSpec::date(Frequency::Month)))
        }

        fn run(
            &self,
            previous: Option<&VersionDoc>,
            number: u64,
            op: impl FnOnce(&WriteContext<'_>) -> StoreResult<HandlerOutput>,
        ) -> VersionDoc {
            let id: VersionId = new_version_id();
            let ctx = WriteContext {
                library: "lib",
                symbol: "px",
                version_id: id,
                previous,
                options: &self.options,
                config: &self.config,
            };
            let out = op(&ctx).unwrap();
            VersionDoc {
                id,
                symbol: "px".into(),
                version: number,
                created_at: Utc::now(),
                metadata: None,
                handler: "table".into(),
                deleted: false,
                chunk_refs: out.chunk_refs,
                parent_snapshots: BTreeSet::new(),
                layout: out.layout,
            }
        }

        fn read(&self, version: &VersionDoc, range: Option<DateRange>) -> Table {
            TableHandler
                .read(&self.store, "lib", version, range)
                .unwrap()
                .into_table()
                .unwrap()
        }
    }

    #[test]
    fn test_write_and_read_with_index() {
        let h = Harness::new(WriteOptions::default());
        let data = prices(&[day(1, 2), day(1, 3)], &[1.0, 2.0]);
        let v1 = h.run(None, 1, |ctx| TableHandler.write(&h.store, ctx, &data.clone().into()));

        assert_eq!(v1.chunk_refs.len(), 1);
        assert_eq!(h.read(&v1, None), data);
        assert_eq!(TableHandler.get_info(&v1)["chunker"], json!("passthru"));
    }

    #[test]
    fn test_monthly_chunks_and_range_read() {
        let h = Harness::monthly();
        let data = prices(&[day(1, 5), day(2, 5), day(3, 5)], &[1.0, 2.0, 3.0]);
        let v1 = h.run(None, 1, |ctx| TableHandler.write(&h.store, ctx, &data.into()));
        assert_eq!(v1.chunk_refs.len(), 3);

        let feb = h.read(&v1, Some(DateRange::between(day(2, 1), day(3, 1))));
        assert_eq!(feb, prices(&[day(2, 5)], &[2.0]));
    }

    #[test]
    fn test_append_rewrites_only_touched_periods() {
        let h = Harness::monthly();
        let data = prices(&[day(1, 5), day(2, 5)], &[1.0, 2.0]);
        let v1 = h.run(None, 1, |ctx| TableHandler.write(&h.store, ctx, &data.into()));

        let extra = prices(&[day(2, 20), day(3, 1)], &[2.5, 3.0]);
        let v2 = h.run(Some(&v1), 2, |ctx| {
            TableHandler.append(&h.store, ctx, &extra.into())
        });

        // January is shared, February was re-encoded, March is new
        assert_eq!(v2.chunk_refs.len(), 3);
        assert_eq!(v2.chunk_refs[0], v1.chunk_refs[0]);
        assert_ne!(v2.chunk_refs[1], v1.chunk_refs[1]);
        assert_eq!(v2.layout.rows(), 4);

        assert_eq!(
            h.read(&v2, None),
            prices(&[day(1, 5), day(2, 5), day(2, 20), day(3, 1)], &[1.0, 2.0, 2.5, 3.0])
        );
        assert_eq!(h.read(&v1, None).num_rows(), 2);
    }

    #[test]
    fn test_update_replaces_rows_in_range() {
        let h = Harness::monthly();
        let data = prices(&[day(1, 5), day(1, 6), day(2, 5)], &[1.0, 1.5, 2.0]);
        let v1 = h.run(None, 1, |ctx| TableHandler.write(&h.store, ctx, &data.into()));

        let patch = prices(&[day(1, 6), day(1, 7)], &[9.0, 9.5]);
        let range = DateRange::between(day(1, 6), day(1, 8));
        let v2 = h.run(Some(&v1), 2, |ctx| {
            TableHandler.update(&h.store, ctx, &patch.into(), Some(range))
        });

        assert_eq!(
            h.read(&v2, None),
            prices(&[day(1, 5), day(1, 6), day(1, 7), day(2, 5)], &[1.0, 9.0, 9.5, 2.0])
        );
        assert_eq!(v2.chunk_refs[1], v1.chunk_refs[1]);
        assert_eq!(v2.layout.rows(), 4);
    }

    #[test]
    fn test_append_with_other_columns_is_rejected() {
        let h = Harness::monthly();
        let data = prices(&[day(1, 5)], &[1.0]);
        let v1 = h.run(None, 1, |ctx| TableHandler.write(&h.store, ctx, &data.into()));

        let other = Table::new(vec![Column::new("qty", Array::from_i64(vec![1]))]).unwrap();
        let options = WriteOptions::default();
        let ctx = WriteContext {
            library: "lib",
            symbol: "px",
            version_id: new_version_id(),
            previous: Some(&v1),
            options: &options,
            config: &h.config,
        };
        let err = TableHandler.append(&h.store, &ctx, &other.into()).unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch(_)));
    }

    #[test]
    fn test_append_with_other_dtype_is_rejected() {
        let h = Harness::monthly();
        let data = prices(&[day(1, 5)], &[1.0]);
        let v1 = h.run(None, 1, |ctx| TableHandler.write(&h.store, ctx, &data.into()));

        // lands in an untouched month, so no existing chunk is decoded
        let ints = Table::new(vec![
            Column::new("date", Array::timestamps(vec![day(3, 5)])),
            Column::new("px", Array::from_i64(vec![7])),
        ])
        .unwrap()
        .set_index(&["date"])
        .unwrap();
        let ctx = WriteContext {
            library: "lib",
            symbol: "px",
            version_id: new_version_id(),
            previous: Some(&v1),
            options: &h.options,
            config: &h.config,
        };

        let err = TableHandler.append(&h.store, &ctx, &ints.clone().into()).unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch(ref m) if m.contains("px")));

        let range = Some(DateRange::between(day(3, 1), day(4, 1)));
        let err = TableHandler.update(&h.store, &ctx, &ints.into(), range).unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch(_)));
        assert_eq!(h.store.list_chunks("lib", Some("px")).unwrap().len(), 1);
    }

    #[test]
    fn test_append_widens_text_dtype() {
        let h = Harness::new(WriteOptions::default());
        let names = |v: Vec<&str>| Table::new(vec![Column::new("name", Array::from_strings(v))]).unwrap();
        let v1 = h.run(None, 1, |ctx| TableHandler.write(&h.store, ctx, &names(vec!["ab"]).into()));
        let v2 = h.run(Some(&v1), 2, |ctx| {
            TableHandler.append(&h.store, ctx, &names(vec!["abcdef"]).into())
        });

        assert_eq!(TableHandler.get_info(&v2)["dtypes"], json!(["U6"]));
        assert_eq!(h.read(&v2, None), names(vec!["ab", "abcdef"]));
    }

    #[test]
    fn test_empty_table_keeps_its_shape() {
        let h = Harness::new(WriteOptions::default());
        let empty = prices(&[], &[]);
        let v1 = h.run(None, 1, |ctx| TableHandler.write(&h.store, ctx, &empty.clone().into()));

        assert!(v1.chunk_refs.is_empty());
        assert_eq!(h.read(&v1, None), empty);
    }

    #[test]
    fn test_passthrough_append_concatenates() {
        let h = Harness::new(WriteOptions::default());
        let data = prices(&[day(1, 1)], &[1.0]);
        let v1 = h.run(None, 1, |ctx| TableHandler.write(&h.store, ctx, &data.into()));
        let more = prices(&[day(1, 2)], &[2.0]);
        let v2 = h.run(Some(&v1), 2, |ctx| TableHandler.append(&h.store, ctx, &more.into()));

        assert_eq!(h.read(&v2, None), prices(&[day(1, 1), day(1, 2)], &[1.0, 2.0]));
    }
}
