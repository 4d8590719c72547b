//! Multi-column tables and their framing
//!
//! A [`Table`] holds ordered data columns and zero or more named index
//! columns. On the wire the index is flattened into ordinary leading
//! columns and its names are recorded separately:
//!
//! ```text
//! SerializedTable {
//!   columns: ["date", "price", "volume"],
//!   data:    [<array>, <array>, <array>],
//!   index:   Some(["date"]),
//! }
//! ```
//!
//! Decoding several chunk frames concatenates the flat frames first and
//! restores the index once, at the end.

use crate::codec::array::{encode_array_into, decode_array, Array, SerializedArray};
use crate::storage::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One named column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Array,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Array) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Ordered columns of equal length, with an optional row index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
    index: Vec<Column>,
}

impl Table {
    /// Build a table from data columns
    pub fn new(columns: Vec<Column>) -> StoreResult<Self> {
        let table = Self {
            columns,
            index: Vec::new(),
        };
        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> StoreResult<()> {
        let mut seen = HashSet::new();
        let rows = self.num_rows();
        for col in self.index.iter().chain(&self.columns) {
            if !seen.insert(col.name.as_str()) {
                return Err(StoreError::InvalidInput(format!(
                    "Duplicate column name: {}",
                    col.name
                )));
            }
            if col.values.len() != rows {
                return Err(StoreError::InvalidInput(format!(
                    "Column {} has {} rows, expected {}",
                    col.name,
                    col.values.len(),
                    rows
                )));
            }
        }
        Ok(())
    }

    /// Move the named data columns into the index, in the given order
    pub fn set_index(mut self, names: &[&str]) -> StoreResult<Self> {
        for name in names {
            let pos = self
                .columns
                .iter()
                .position(|c| c.name == *name)
                .ok_or_else(|| StoreError::InvalidInput(format!("No column named {}", name)))?;
            let col = self.columns.remove(pos);
            self.index.push(col);
        }
        Ok(self)
    }

    /// Materialize the index as leading data columns
    pub fn reset_index(mut self) -> Self {
        if !self.index.is_empty() {
            let mut columns = std::mem::take(&mut self.index);
            columns.append(&mut self.columns);
            self.columns = columns;
        }
        self
    }

    pub fn num_rows(&self) -> usize {
        self.index
            .first()
            .or_else(|| self.columns.first())
            .map(|c| c.values.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn index(&self) -> &[Column] {
        &self.index
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.index.iter().map(|c| c.name.clone()).collect()
    }

    /// Keep the index and the named data columns, in the order given
    pub fn select(&self, names: &[String]) -> StoreResult<Table> {
        let mut columns: Vec<Column> = Vec::with_capacity(names.len());
        for name in names {
            if self.index.iter().any(|c| &c.name == name) || columns.iter().any(|c| &c.name == name) {
                continue;
            }
            let col = self
                .columns
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| StoreError::not_found(format!("column '{}'", name)))?;
            columns.push(col.clone());
        }
        Ok(Table {
            columns,
            index: self.index.clone(),
        })
    }

    /// Look up a column by name, index columns first
    pub fn column(&self, name: &str) -> Option<&Array> {
        self.index
            .iter()
            .chain(&self.columns)
            .find(|c| c.name == name)
            .map(|c| &c.values)
    }

    /// Epoch-millisecond values of a timestamp column
    pub fn timestamps(&self, name: &str) -> StoreResult<&[i64]> {
        let col = self
            .column(name)
            .ok_or_else(|| StoreError::InvalidInput(format!("No date column named {}", name)))?;
        if col.null_count() > 0 {
            return Err(StoreError::InvalidInput(format!(
                "Date column {} contains nulls",
                name
            )));
        }
        col.as_timestamps().ok_or_else(|| {
            StoreError::InvalidInput(format!("Column {} is {}, not a timestamp", name, col.dtype()))
        })
    }

    fn map_columns(&self, f: impl Fn(&Array) -> Array) -> Self {
        let apply = |cols: &[Column]| {
            cols.iter()
                .map(|c| Column::new(c.name.clone(), f(&c.values)))
                .collect()
        };
        Self {
            columns: apply(&self.columns),
            index: apply(&self.index),
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> Self {
        self.map_columns(|a| a.slice(start, end))
    }

    /// Gather rows by position
    pub fn take(&self, rows: &[usize]) -> Self {
        self.map_columns(|a| a.take(rows))
    }

    /// Zero-row table with the same columns and index
    pub fn empty_like(&self) -> Self {
        self.map_columns(Array::empty_like)
    }

    /// Stable sort on a timestamp column
    pub fn sort_by_timestamp(&self, name: &str) -> StoreResult<Self> {
        let ts = self.timestamps(name)?;
        if ts.windows(2).all(|w| w[0] <= w[1]) {
            return Ok(self.clone());
        }
        let mut order: Vec<usize> = (0..ts.len()).collect();
        order.sort_by_key(|&i| ts[i]);
        Ok(self.take(&order))
    }

    /// Concatenate tables with identical column layout
    pub fn concat(parts: &[Table]) -> StoreResult<Table> {
        let first = parts
            .first()
            .ok_or_else(|| StoreError::InvalidInput("Cannot concatenate zero tables".into()))?;

        for part in &parts[1..] {
            if part.column_names() != first.column_names() || part.index_names() != first.index_names() {
                return Err(StoreError::SchemaMismatch(format!(
                    "Columns {:?} do not match {:?}",
                    part.column_names(),
                    first.column_names()
                )));
            }
        }

        let join = |pick: fn(&Table) -> &[Column]| -> StoreResult<Vec<Column>> {
            pick(first)
                .iter()
                .enumerate()
                .map(|(i, col)| {
                    let arrays: Vec<Array> = parts.iter().map(|p| pick(p)[i].values.clone()).collect();
                    Array::concat(&arrays)
                        .map(|values| Column::new(col.name.clone(), values))
                        .map_err(|e| match e {
                            StoreError::SchemaMismatch(msg) => {
                                StoreError::SchemaMismatch(format!("column {}: {}", col.name, msg))
                            }
                            other => other,
                        })
                })
                .collect()
        };

        Ok(Table {
            columns: join(Table::columns)?,
            index: join(Table::index)?,
        })
    }

    /// Estimated in-memory size in bytes
    pub fn estimated_size(&self) -> usize {
        self.index
            .iter()
            .chain(&self.columns)
            .map(|c| c.values.estimated_size())
            .sum()
    }
}

/// Wire form of one table chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedTable {
    /// Column names, index columns first
    pub columns: Vec<String>,
    /// One frame per column, same order as `columns`
    pub data: Vec<SerializedArray>,
    /// Names of the columns to restore as the index
    #[serde(default)]
    pub index: Option<Vec<String>>,
}

impl SerializedTable {
    pub fn num_rows(&self) -> u64 {
        self.data.first().map(|a| a.length).unwrap_or(0)
    }

    /// Frame holding only the index columns and `columns`
    ///
    /// The other column frames are dropped undecoded.
    pub fn select(&self, columns: &[String]) -> StoreResult<SerializedTable> {
        let index = self.index.clone().unwrap_or_default();
        let mut names: Vec<String> = Vec::new();
        let mut data = Vec::new();
        for name in index.iter().chain(columns) {
            if names.contains(name) {
                continue;
            }
            let frame = self
                .columns
                .iter()
                .position(|c| c == name)
                .and_then(|pos| self.data.get(pos))
                .ok_or_else(|| StoreError::not_found(format!("column '{}' in table frame", name)))?;
            names.push(name.clone());
            data.push(frame.clone());
        }
        Ok(SerializedTable {
            columns: names,
            data,
            index: self.index.clone(),
        })
    }

    /// Stored size in bytes
    pub fn stored_size(&self) -> usize {
        self.data.iter().map(SerializedArray::stored_size).sum()
    }
}

/// Encode a table, returning the frame and its hex content hash
pub fn encode_table(table: &Table) -> StoreResult<(SerializedTable, String)> {
    let index_names = table.index_names();
    let flat = table.clone().reset_index();
    let mut hasher = blake3::Hasher::new();

    let mut names = Vec::with_capacity(flat.columns.len());
    let mut data = Vec::with_capacity(flat.columns.len());
    for col in &flat.columns {
        hasher.update(col.name.as_bytes());
        let frame = encode_array_into(&col.values, &mut hasher).map_err(|e| match e {
            StoreError::UnsupportedType(msg) => {
                StoreError::UnsupportedType(format!("column {}: {}", col.name, msg))
            }
            other => other,
        })?;
        names.push(col.name.clone());
        data.push(frame);
    }

    let index = (!index_names.is_empty()).then(|| index_names.clone());
    if let Some(ref idx) = index {
        for name in idx {
            hasher.update(b"index");
            hasher.update(name.as_bytes());
        }
    }

    let frame = SerializedTable {
        columns: names,
        data,
        index,
    };
    Ok((frame, hasher.finalize().to_hex().to_string()))
}

fn decode_flat(frame: &SerializedTable) -> StoreResult<Table> {
    if frame.columns.len() != frame.data.len() {
        return Err(StoreError::Corruption(format!(
            "Table frame names {} columns but carries {}",
            frame.columns.len(),
            frame.data.len()
        )));
    }
    let columns = frame
        .columns
        .iter()
        .zip(&frame.data)
        .map(|(name, arr)| Ok(Column::new(name.clone(), decode_array(arr)?)))
        .collect::<StoreResult<Vec<_>>>()?;
    Table::new(columns).map_err(|e| StoreError::Corruption(e.to_string()))
}

fn restore_index(table: Table, index: Option<&Vec<String>>) -> StoreResult<Table> {
    match index {
        Some(names) => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            table.set_index(&names)
        }
        None => Ok(table),
    }
}

/// Decode a single table frame
pub fn decode_table(frame: &SerializedTable) -> StoreResult<Table> {
    restore_index(decode_flat(frame)?, frame.index.as_ref())
}

/// Decode chunk frames in order into one table
///
/// The index recorded on the first frame is applied after concatenation.
pub fn decode_tables(frames: &[SerializedTable]) -> StoreResult<Table> {
    let first = frames
        .first()
        .ok_or_else(|| StoreError::InvalidInput("No table frames to decode".into()))?;
    let mut flat: Vec<Table> = frames.iter().map(decode_flat).collect::<StoreResult<_>>()?;
    let table = if flat.len() == 1 {
        flat.remove(0)
    } else {
        Table::concat(&flat)?
    };
    restore_index(table, first.index.as_ref())
}
