//! CSV Import and Export
//!
//! Turns CSV files into [`Table`]s for the command line, and tables back
//! into CSV. Column types are inferred per column: integers, then floats,
//! then booleans, falling back to text. Columns whose header mentions a
//! date or time are parsed as timestamps. Empty cells become nulls.

use crate::codec::{Array, ArrayData, Column, Table};
use crate::storage::error::{StoreError, StoreResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use std::io::{Read, Write};
use std::path::Path;

/// Formats tried after the configured one
const FALLBACK_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
];

/// CSV reader with configurable column handling
#[derive(Debug, Clone)]
pub struct CsvImporter {
    /// Format string tried first when parsing timestamps
    timestamp_format: String,
    /// Columns parsed as timestamps; detected from headers when empty
    timestamp_columns: Vec<String>,
    /// Column moved into the table index
    index_column: Option<String>,
    delimiter: u8,
}

/// Result of a CSV import
#[derive(Debug)]
pub struct CsvImportResult {
    pub table: Table,
    pub rows_processed: usize,
    pub rows_failed: usize,
    pub errors: Vec<String>,
}

impl Default for CsvImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvImporter {
    pub fn new() -> Self {
        Self {
            timestamp_format: "%Y-%m-%d".to_string(),
            timestamp_columns: Vec::new(),
            index_column: None,
            delimiter: b',',
        }
    }

    /// Set the timestamp format string
    pub fn with_timestamp_format(mut self, format: &str) -> Self {
        self.timestamp_format = format.to_string();
        self
    }

    /// Parse a column as timestamps, disabling header detection
    pub fn with_timestamp_column(mut self, name: &str) -> Self {
        self.timestamp_columns.push(name.to_string());
        self
    }

    /// Move a column into the table index
    pub fn with_index(mut self, name: &str) -> Self {
        self.index_column = Some(name.to_string());
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn is_timestamp_column(&self, header: &str) -> bool {
        if !self.timestamp_columns.is_empty() {
            return self.timestamp_columns.iter().any(|c| c == header);
        }
        let lower = header.to_lowercase();
        lower.contains("date") || lower.contains("time")
    }

    /// Parse a timestamp string to epoch milliseconds
    ///
    /// Bare dates resolve to midnight UTC.
    fn parse_timestamp(&self, ts_str: &str) -> StoreResult<i64> {
        let formats = std::iter::once(self.timestamp_format.as_str()).chain(FALLBACK_FORMATS);
        for fmt in formats {
            if let Ok(dt) = NaiveDateTime::parse_from_str(ts_str, fmt) {
                return Ok(dt.and_utc().timestamp_millis());
            }
            if let Ok(date) = NaiveDate::parse_from_str(ts_str, fmt) {
                return Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis());
            }
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(ts_str) {
            return Ok(dt.with_timezone(&Utc).timestamp_millis());
        }

        Err(StoreError::InvalidInput(format!(
            "Could not parse timestamp: {}",
            ts_str
        )))
    }

    /// Import a CSV file
    pub fn import(&self, path: &Path) -> StoreResult<CsvImportResult> {
        let file = std::fs::File::open(path)?;
        self.import_reader(file)
    }

    /// Import from a CSV string
    pub fn import_str(&self, csv_data: &str) -> StoreResult<CsvImportResult> {
        self.import_reader(csv_data.as_bytes())
    }

    pub fn import_reader<R: Read>(&self, reader: R) -> StoreResult<CsvImportResult> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        if headers.is_empty() {
            return Err(StoreError::InvalidInput("CSV has no header row".into()));
        }
        let is_ts: Vec<bool> = headers.iter().map(|h| self.is_timestamp_column(h)).collect();

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        let mut timestamps: Vec<Vec<Option<i64>>> = vec![Vec::new(); headers.len()];
        let mut rows_processed = 0;
        let mut rows_failed = 0;
        let mut errors = Vec::new();

        for (line_num, result) in reader.records().enumerate() {
            let actual_line = line_num + 2;

            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    errors.push(format!("Line {}: {}", actual_line, e));
                    rows_failed += 1;
                    continue;
                }
            };

            // Parse every timestamp first so a bad row leaves no partial values
            let mut parsed = Vec::with_capacity(headers.len());
            let mut failure = None;
            for (idx, &ts) in is_ts.iter().enumerate() {
                let raw = record.get(idx).unwrap_or("").trim();
                if !ts || raw.is_empty() {
                    parsed.push(None);
                    continue;
                }
                match self.parse_timestamp(raw) {
                    Ok(ms) => parsed.push(Some(ms)),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = failure {
                errors.push(format!("Line {}: {}", actual_line, e));
                rows_failed += 1;
                continue;
            }

            for (idx, ms) in parsed.into_iter().enumerate() {
                if is_ts[idx] {
                    timestamps[idx].push(ms);
                } else {
                    cells[idx].push(record.get(idx).unwrap_or("").trim().to_string());
                }
            }
            rows_processed += 1;
        }

        // Truncate errors if too many
        if errors.len() > 100 {
            let total = errors.len();
            errors.truncate(100);
            errors.push(format!("... and {} more errors", total - 100));
        }

        let columns = headers
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let values = if is_ts[idx] {
                    timestamp_array(std::mem::take(&mut timestamps[idx]))
                } else {
                    infer_array(std::mem::take(&mut cells[idx]))
                };
                values.map(|v| Column::new(name, v))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let mut table = Table::new(columns)?;
        if let Some(index) = &self.index_column {
            table = table.set_index(&[index.as_str()])?;
        }

        tracing::debug!(rows = rows_processed, failed = rows_failed, "Imported CSV");
        Ok(CsvImportResult {
            table,
            rows_processed,
            rows_failed,
            errors,
        })
    }
}

fn timestamp_array(values: Vec<Option<i64>>) -> StoreResult<Array> {
    let mask: Vec<bool> = values.iter().map(Option::is_none).collect();
    Array::timestamps(values.into_iter().map(|v| v.unwrap_or(0)).collect()).with_mask(mask)
}

/// Narrowest type every non-empty cell parses as
fn infer_array(cells: Vec<String>) -> StoreResult<Array> {
    let present = || cells.iter().filter(|c| !c.is_empty());

    if present().all(|c| c.parse::<i64>().is_ok()) && present().next().is_some() {
        return Ok(Array::nullable_i64(
            cells.iter().map(|c| c.parse().ok()).collect(),
        ));
    }
    if present().all(|c| c.parse::<f64>().is_ok()) && present().next().is_some() {
        return Ok(Array::nullable_f64(
            cells.iter().map(|c| c.parse().ok()).collect(),
        ));
    }
    if present().all(|c| parse_bool(c).is_some()) && present().next().is_some() {
        let mask: Vec<bool> = cells.iter().map(String::is_empty).collect();
        let values = cells.iter().map(|c| parse_bool(c).unwrap_or(false)).collect();
        return Array::from_bool(values).with_mask(mask);
    }

    let mask: Vec<bool> = cells.iter().map(String::is_empty).collect();
    Array::from_strings(cells).with_mask(mask)
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Write a table as CSV, index columns first
///
/// Timestamps are written as RFC 3339; nulls as empty cells.
pub fn write_csv<W: Write>(table: &Table, writer: W) -> StoreResult<()> {
    let mut out = csv::Writer::from_writer(writer);
    let columns: Vec<&Column> = table.index().iter().chain(table.columns()).collect();

    out.write_record(columns.iter().map(|c| c.name.as_str()))?;
    for row in 0..table.num_rows() {
        out.write_record(columns.iter().map(|c| format_cell(&c.values, row)))?;
    }
    out.flush()?;
    Ok(())
}

/// Text form of one cell, empty for nulls
pub fn format_cell(array: &Array, row: usize) -> String {
    if array.is_null(row) {
        return String::new();
    }
    match array.data() {
        ArrayData::Bool(v) => v[row].to_string(),
        ArrayData::Int64(v) => v[row].to_string(),
        ArrayData::Float64(v) => v[row].to_string(),
        ArrayData::Timestamp(v) => Utc
            .timestamp_millis_opt(v[row])
            .single()
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .unwrap_or_else(|| v[row].to_string()),
        ArrayData::Text(v) => v[row].clone(),
        ArrayData::Object(v) => v[row].to_string(),
    }
}
