//! Calendar-period chunking over a timestamp column
//!
//! Rows are stably sorted by the date column, then cut at period
//! boundaries. Each chunk covers `[period_start, period_end)` in epoch
//! milliseconds. A period with more rows than the size limit is split
//! further, but only where the timestamp changes, so equal timestamps never
//! straddle two chunks:
//!
//! ```text
//! Month chunks, limit 2 rows:
//!   Jan: 01-03 01-03 | 01-09 01-20   → [Jan 1, Jan 9) [Jan 9, Feb 1)
//!   Feb: 02-14                       → [Feb 1, Mar 1)
//! ```

use crate::chunker::{ChunkIter, Chunker, ChunkerSpec, RangeToken, SegmentFilter, TableChunk};
use crate::codec::Table;
use crate::storage::error::{StoreError, StoreResult};
use chrono::{DateTime, Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Column used when none is configured
pub const DEFAULT_COLUMN: &str = "date";

/// Calendar period of a date chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Day,
    Month,
    Year,
}

impl Frequency {
    pub fn code(&self) -> &'static str {
        match self {
            Frequency::Day => "D",
            Frequency::Month => "M",
            Frequency::Year => "Y",
        }
    }

    pub fn from_code(code: &str) -> StoreResult<Self> {
        match code {
            "D" | "d" => Ok(Frequency::Day),
            "M" | "m" => Ok(Frequency::Month),
            "Y" | "y" | "A" => Ok(Frequency::Year),
            _ => Err(StoreError::InvalidInput(format!(
                "Unknown chunk frequency: {}",
                code
            ))),
        }
    }

    /// Start of the period containing `ts`
    pub fn period_start(&self, ts: i64) -> StoreResult<i64> {
        let date = DateTime::from_timestamp_millis(ts)
            .ok_or_else(|| out_of_range(ts))?
            .date_naive();
        let start = match self {
            Frequency::Day => Some(date),
            Frequency::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
            Frequency::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
        };
        start.map(to_millis).ok_or_else(|| out_of_range(ts))
    }

    /// Start of the period following the one beginning at `start`
    pub fn period_end(&self, start: i64) -> StoreResult<i64> {
        let date = DateTime::from_timestamp_millis(start)
            .ok_or_else(|| out_of_range(start))?
            .date_naive();
        let next = match self {
            Frequency::Day => date.checked_add_signed(Duration::days(1)),
            Frequency::Month if date.month() == 12 => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
            Frequency::Month => NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1),
            Frequency::Year => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
        };
        next.map(to_millis).ok_or_else(|| out_of_range(start))
    }
}

fn to_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

fn out_of_range(ts: i64) -> StoreError {
    StoreError::InvalidInput(format!("Timestamp {} is outside the supported date range", ts))
}

/// Splits tables by calendar period of a timestamp column
#[derive(Debug, Clone)]
pub struct DateChunker {
    frequency: Frequency,
    column: String,
}

impl DateChunker {
    pub fn new(frequency: Frequency, column: impl Into<String>) -> Self {
        Self {
            frequency,
            column: column.into(),
        }
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Row positions whose timestamp satisfies `keep`
    fn select(&self, data: &Table, keep: impl Fn(i64) -> bool) -> StoreResult<Table> {
        let ts = data.timestamps(&self.column)?;
        let rows: Vec<usize> = ts
            .iter()
            .enumerate()
            .filter(|(_, &t)| keep(t))
            .map(|(i, _)| i)
            .collect();
        if rows.len() == ts.len() {
            return Ok(data.clone());
        }
        Ok(data.take(&rows))
    }
}

impl Chunker for DateChunker {
    fn kind(&self) -> &'static str {
        "date"
    }

    fn spec(&self) -> ChunkerSpec {
        ChunkerSpec::Date {
            frequency: self.frequency,
            column: self.column.clone(),
        }
    }

    fn to_chunks<'a>(&self, data: &'a Table, max_chunk_size: usize) -> ChunkIter<'a> {
        if data.is_empty() {
            return Box::new(std::iter::empty());
        }
        match PeriodChunks::new(data, &self.column, self.frequency, max_chunk_size) {
            Ok(iter) => Box::new(iter),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn to_range(&self, start: Option<i64>, end: Option<i64>) -> RangeToken {
        RangeToken::Bounded { start, end }
    }

    fn to_query_predicate(&self, range: &RangeToken) -> SegmentFilter {
        match *range {
            RangeToken::Whole => SegmentFilter::Any,
            RangeToken::Bounded { start, end } => SegmentFilter::Overlapping { start, end },
        }
    }

    fn filter(&self, data: &Table, range: &RangeToken) -> StoreResult<Table> {
        match range {
            RangeToken::Whole => Ok(data.clone()),
            bounded => self.select(data, |t| bounded.contains(t)),
        }
    }

    fn exclude(&self, data: &Table, range: &RangeToken) -> StoreResult<Table> {
        match range {
            RangeToken::Whole => Ok(data.empty_like()),
            bounded => self.select(data, |t| !bounded.contains(t)),
        }
    }
}

/// Lazy period splitter over a sorted copy of the input
struct PeriodChunks {
    table: Table,
    ts: Vec<i64>,
    frequency: Frequency,
    max_rows: usize,
    pos: usize,
    /// (end row, period end) of the period being emitted
    period: Option<(usize, i64)>,
    /// Lower bound of the next chunk
    bound: i64,
}

impl PeriodChunks {
    fn new(data: &Table, column: &str, frequency: Frequency, max_rows: usize) -> StoreResult<Self> {
        let table = data.sort_by_timestamp(column)?;
        let ts = table.timestamps(column)?.to_vec();
        Ok(Self {
            table,
            ts,
            frequency,
            max_rows: max_rows.max(1),
            pos: 0,
            period: None,
            bound: 0,
        })
    }

    fn next_chunk(&mut self) -> StoreResult<Option<TableChunk>> {
        if self.pos >= self.ts.len() {
            return Ok(None);
        }

        let (period_rows, period_end) = match self.period {
            Some(p) => p,
            None => {
                let start = self.frequency.period_start(self.ts[self.pos])?;
                let end = self.frequency.period_end(start)?;
                let rows = self.pos + self.ts[self.pos..].partition_point(|&t| t < end);
                self.bound = start;
                self.period = Some((rows, end));
                (rows, end)
            }
        };

        let start_row = self.pos;
        let mut cut = start_row.saturating_add(self.max_rows);
        if cut >= period_rows {
            cut = period_rows;
        } else {
            while cut > start_row && self.ts[cut] == self.ts[cut - 1] {
                cut -= 1;
            }
            if cut == start_row {
                // a single timestamp holds more rows than the limit
                let first = self.ts[start_row];
                cut = start_row + self.ts[start_row..period_rows].partition_point(|&t| t == first);
            }
        }

        let lower = self.bound;
        let upper = if cut == period_rows {
            self.period = None;
            period_end
        } else {
            self.ts[cut]
        };
        self.bound = upper;
        self.pos = cut;

        Ok(Some(TableChunk {
            start: Some(lower),
            end: Some(upper),
            data: self.table.slice(start_row, cut),
        }))
    }
}

impl Iterator for PeriodChunks {
    type Item = StoreResult<TableChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_chunk() {
            Ok(chunk) => chunk.map(Ok),
            Err(e) => {
                self.pos = self.ts.len();
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Array, Column};

    const DAY: i64 = 86_400_000;

    fn ms(y: i32, m: u32, d: u32) -> i64 {
        to_millis(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn table(dates: Vec<i64>) -> Table {
        let n = dates.len() as i64;
        Table::new(vec![
            Column::new("date", Array::timestamps(dates)),
            Column::new("v", Array::from_i64((0..n).collect())),
        ])
        .unwrap()
        .set_index(&["date"])
        .unwrap()
    }

    fn chunks(c: &DateChunker, t: &Table, max: usize) -> Vec<TableChunk> {
        c.to_chunks(t, max).collect::<StoreResult<_>>().unwrap()
    }

    #[test]
    fn test_period_math() {
        let f = Frequency::Month;
        let mid = ms(2024, 12, 17) + 5_000;
        assert_eq!(f.period_start(mid).unwrap(), ms(2024, 12, 1));
        assert_eq!(f.period_end(ms(2024, 12, 1)).unwrap(), ms(2025, 1, 1));
        assert_eq!(Frequency::Year.period_start(mid).unwrap(), ms(2024, 1, 1));
        assert_eq!(Frequency::Day.period_end(ms(2024, 2, 28)).unwrap(), ms(2024, 2, 29));
        assert_eq!(Frequency::Day.period_start(-1).unwrap(), -DAY);
    }

    #[test]
    fn test_daily_chunks_are_sorted_and_bounded() {
        let c = DateChunker::new(Frequency::Day, "date");
        let t = table(vec![2 * DAY + 5, 10, DAY, 20]);
        let out = chunks(&c, &t, 100);

        assert_eq!(out.len(), 3);
        assert_eq!((out[0].start, out[0].end), (Some(0), Some(DAY)));
        assert_eq!(out[0].data.num_rows(), 2);
        assert_eq!((out[2].start, out[2].end), (Some(2 * DAY), Some(3 * DAY)));
        assert_eq!(out[0].data.column("v").unwrap(), &Array::from_i64(vec![1, 3]));
    }

    #[test]
    fn test_oversized_period_splits_at_timestamp_changes() {
        let c = DateChunker::new(Frequency::Month, "date");
        let jan = ms(2024, 1, 1);
        let t = table(vec![jan + 2 * DAY, jan + 2 * DAY, jan + 8 * DAY, jan + 19 * DAY]);
        let out = chunks(&c, &t, 2);

        let bounds: Vec<_> = out.iter().map(|c| (c.start.unwrap(), c.end.unwrap())).collect();
        assert_eq!(
            bounds,
            vec![(jan, jan + 8 * DAY), (jan + 8 * DAY, ms(2024, 2, 1))]
        );
        assert!(out.iter().all(|c| c.data.num_rows() <= 2));
    }

    #[test]
    fn test_equal_timestamps_never_split() {
        let c = DateChunker::new(Frequency::Day, "date");
        let t = table(vec![5, 5, 5, 7]);
        let out = chunks(&c, &t, 2);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].data.num_rows(), 3);
        assert_eq!(out[0].end, Some(7));
        assert_eq!(out[1].end, Some(DAY));
    }

    #[test]
    fn test_empty_and_single_row() {
        let c = DateChunker::new(Frequency::Day, "date");
        assert_eq!(c.to_chunks(&table(vec![]), 10).count(), 0);
        assert_eq!(c.to_chunks(&table(vec![42]), 10).count(), 1);
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let c = DateChunker::new(Frequency::Day, "when");
        let results: Vec<_> = c.to_chunks(&table(vec![1, 2]), 10).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(StoreError::InvalidInput(_))));
    }

    #[test]
    fn test_filter_and_exclude_partition_the_rows() {
        let c = DateChunker::new(Frequency::Day, "date");
        let t = table((0..10).map(|i| i * DAY).collect());
        let range = c.to_range(Some(3 * DAY), Some(6 * DAY));

        let inside = c.filter(&t, &range).unwrap();
        let outside = c.exclude(&t, &range).unwrap();

        assert_eq!(inside.num_rows(), 3);
        assert_eq!(outside.num_rows(), 7);
        let mut all: Vec<i64> = inside
            .timestamps("date")
            .unwrap()
            .iter()
            .chain(outside.timestamps("date").unwrap())
            .copied()
            .collect();
        all.sort();
        assert_eq!(all, t.timestamps("date").unwrap());
        assert!(inside
            .timestamps("date")
            .unwrap()
            .iter()
            .all(|ts| !outside.timestamps("date").unwrap().contains(ts)));
    }

    #[test]
    fn test_query_predicate_selects_overlapping_chunks() {
        let c = DateChunker::new(Frequency::Day, "date");
        let pred = c.to_query_predicate(&c.to_range(Some(DAY + 1), None));
        assert!(!pred.matches(Some(0), Some(DAY)));
        assert!(pred.matches(Some(DAY), Some(2 * DAY)));
        assert_eq!(c.to_query_predicate(&RangeToken::Whole), SegmentFilter::Any);
    }
}
