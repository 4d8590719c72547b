//! Typed arrays and their binary encoding
//!
//! An [`Array`] is one column of homogeneous values plus an optional null
//! mask. Encoding produces a [`SerializedArray`]:
//!
//! ```text
//! {
//!   dtype:  "i8"            // see DType tags below
//!   length: 20              // number of rows
//!   values: <lz4 block>     // fixed-width little-endian values
//!   mask:   <lz4 block>?    // one byte per row, 1 = null
//! }
//! ```
//!
//! Heterogeneous (`Object`) columns are narrowed before encoding: nulls are
//! masked and replaced with an empty string, and the remainder must be
//! uniformly textual. Anything else is rejected with `UnsupportedType`.

use crate::codec::compression::{compress, decompress};
use crate::storage::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Element type of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// `b1`: one byte per element
    Bool,
    /// `i8`: 64-bit signed integer
    Int64,
    /// `f8`: 64-bit float
    Float64,
    /// `M8[ms]`: epoch milliseconds
    Timestamp,
    /// `U{n}`: fixed-width UTF-8, NUL padded to `n` bytes
    Text(usize),
    /// `O`: heterogeneous values, never stored as-is
    Object,
}

impl DType {
    /// Wire tag for this dtype
    pub fn tag(&self) -> String {
        match self {
            DType::Bool => "b1".to_string(),
            DType::Int64 => "i8".to_string(),
            DType::Float64 => "f8".to_string(),
            DType::Timestamp => "M8[ms]".to_string(),
            DType::Text(width) => format!("U{}", width),
            DType::Object => "O".to_string(),
        }
    }

    /// Parse a wire tag
    pub fn parse(tag: &str) -> StoreResult<Self> {
        match tag {
            "b1" => Ok(DType::Bool),
            "i8" => Ok(DType::Int64),
            "f8" => Ok(DType::Float64),
            "M8[ms]" => Ok(DType::Timestamp),
            "O" => Ok(DType::Object),
            _ => tag
                .strip_prefix('U')
                .and_then(|w| w.parse::<usize>().ok())
                .filter(|w| *w > 0)
                .map(DType::Text)
                .ok_or_else(|| StoreError::Corruption(format!("Unknown dtype tag: {}", tag))),
        }
    }

    /// Bytes per element on the wire
    pub fn itemsize(&self) -> usize {
        match self {
            DType::Bool => 1,
            DType::Int64 | DType::Float64 | DType::Timestamp => 8,
            DType::Text(width) => *width,
            DType::Object => 0,
        }
    }

    /// Whether two dtypes can live in the same stored column
    ///
    /// Text widths differ from chunk to chunk; they are compatible.
    pub fn compatible_with(&self, other: &DType) -> bool {
        match (self, other) {
            (DType::Text(_), DType::Text(_)) => true,
            (DType::Text(_), DType::Object) | (DType::Object, DType::Text(_)) => true,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Column values, one variant per supported element type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Timestamp(Vec<i64>),
    Text(Vec<String>),
    Object(Vec<Value>),
}

impl ArrayData {
    fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::Float64(v) => v.len(),
            ArrayData::Timestamp(v) => v.len(),
            ArrayData::Text(v) => v.len(),
            ArrayData::Object(v) => v.len(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ArrayData::Bool(_) => "bool",
            ArrayData::Int64(_) => "int64",
            ArrayData::Float64(_) => "float64",
            ArrayData::Timestamp(_) => "timestamp",
            ArrayData::Text(_) => "text",
            ArrayData::Object(_) => "object",
        }
    }

    fn take(&self, rows: &[usize]) -> Self {
        fn pick<T: Clone>(v: &[T], rows: &[usize]) -> Vec<T> {
            rows.iter().map(|&i| v[i].clone()).collect()
        }
        match self {
            ArrayData::Bool(v) => ArrayData::Bool(pick(v, rows)),
            ArrayData::Int64(v) => ArrayData::Int64(pick(v, rows)),
            ArrayData::Float64(v) => ArrayData::Float64(pick(v, rows)),
            ArrayData::Timestamp(v) => ArrayData::Timestamp(pick(v, rows)),
            ArrayData::Text(v) => ArrayData::Text(pick(v, rows)),
            ArrayData::Object(v) => ArrayData::Object(pick(v, rows)),
        }
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        match self {
            ArrayData::Bool(v) => ArrayData::Bool(v[start..end].to_vec()),
            ArrayData::Int64(v) => ArrayData::Int64(v[start..end].to_vec()),
            ArrayData::Float64(v) => ArrayData::Float64(v[start..end].to_vec()),
            ArrayData::Timestamp(v) => ArrayData::Timestamp(v[start..end].to_vec()),
            ArrayData::Text(v) => ArrayData::Text(v[start..end].to_vec()),
            ArrayData::Object(v) => ArrayData::Object(v[start..end].to_vec()),
        }
    }

    /// Reset a slot to the type's zero value
    fn clear(&mut self, idx: usize) {
        match self {
            ArrayData::Bool(v) => v[idx] = false,
            ArrayData::Int64(v) | ArrayData::Timestamp(v) => v[idx] = 0,
            ArrayData::Float64(v) => v[idx] = 0.0,
            ArrayData::Text(v) => v[idx].clear(),
            ArrayData::Object(v) => v[idx] = Value::Null,
        }
    }

    fn empty_like(&self) -> Self {
        match self {
            ArrayData::Bool(_) => ArrayData::Bool(Vec::new()),
            ArrayData::Int64(_) => ArrayData::Int64(Vec::new()),
            ArrayData::Float64(_) => ArrayData::Float64(Vec::new()),
            ArrayData::Timestamp(_) => ArrayData::Timestamp(Vec::new()),
            ArrayData::Text(_) => ArrayData::Text(Vec::new()),
            ArrayData::Object(_) => ArrayData::Object(Vec::new()),
        }
    }
}

/// A typed column with an optional null mask (`true` = null)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array {
    data: ArrayData,
    mask: Option<Vec<bool>>,
}

impl Array {
    pub fn new(data: ArrayData) -> Self {
        Self { data, mask: None }
    }

    pub fn from_bool(values: Vec<bool>) -> Self {
        Self::new(ArrayData::Bool(values))
    }

    pub fn from_i64(values: Vec<i64>) -> Self {
        Self::new(ArrayData::Int64(values))
    }

    pub fn from_f64(values: Vec<f64>) -> Self {
        Self::new(ArrayData::Float64(values))
    }

    pub fn timestamps(values: Vec<i64>) -> Self {
        Self::new(ArrayData::Timestamp(values))
    }

    pub fn from_strings<S: Into<String>>(values: Vec<S>) -> Self {
        Self::new(ArrayData::Text(values.into_iter().map(Into::into).collect()))
    }

    pub fn objects(values: Vec<Value>) -> Self {
        Self::new(ArrayData::Object(values))
    }

    /// Zero-length array of a dtype
    pub fn empty(dtype: DType) -> Self {
        Self::new(match dtype {
            DType::Bool => ArrayData::Bool(Vec::new()),
            DType::Int64 => ArrayData::Int64(Vec::new()),
            DType::Float64 => ArrayData::Float64(Vec::new()),
            DType::Timestamp => ArrayData::Timestamp(Vec::new()),
            DType::Text(_) => ArrayData::Text(Vec::new()),
            DType::Object => ArrayData::Object(Vec::new()),
        })
    }

    /// Nullable float column; `None` becomes a masked slot
    pub fn nullable_f64(values: Vec<Option<f64>>) -> Self {
        let mask: Vec<bool> = values.iter().map(Option::is_none).collect();
        let data = values.into_iter().map(|v| v.unwrap_or(0.0)).collect();
        Self::from_parts(ArrayData::Float64(data), Some(mask))
    }

    /// Nullable integer column; `None` becomes a masked slot
    pub fn nullable_i64(values: Vec<Option<i64>>) -> Self {
        let mask: Vec<bool> = values.iter().map(Option::is_none).collect();
        let data = values.into_iter().map(|v| v.unwrap_or(0)).collect();
        Self::from_parts(ArrayData::Int64(data), Some(mask))
    }

    /// Attach a null mask
    ///
    /// Masked slots are reset to the zero value of the type so two arrays
    /// with the same visible values compare equal.
    pub fn with_mask(self, mask: Vec<bool>) -> StoreResult<Self> {
        if mask.len() != self.len() {
            return Err(StoreError::InvalidInput(format!(
                "Mask length {} does not match array length {}",
                mask.len(),
                self.len()
            )));
        }
        Ok(Self::from_parts(self.data, Some(mask)))
    }

    fn from_parts(mut data: ArrayData, mask: Option<Vec<bool>>) -> Self {
        let mask = mask.filter(|m| m.iter().any(|&null| null));
        if let Some(ref m) = mask {
            for (idx, _) in m.iter().enumerate().filter(|(_, &null)| null) {
                data.clear(idx);
            }
        }
        Self { data, mask }
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn mask(&self) -> Option<&[bool]> {
        self.mask.as_deref()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self, idx: usize) -> bool {
        self.mask.as_ref().map(|m| m[idx]).unwrap_or(false)
    }

    pub fn null_count(&self) -> usize {
        self.mask
            .as_ref()
            .map(|m| m.iter().filter(|&&null| null).count())
            .unwrap_or(0)
    }

    /// Logical dtype; text width is the longest value in bytes
    pub fn dtype(&self) -> DType {
        match &self.data {
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::Int64(_) => DType::Int64,
            ArrayData::Float64(_) => DType::Float64,
            ArrayData::Timestamp(_) => DType::Timestamp,
            ArrayData::Text(v) => DType::Text(v.iter().map(String::len).max().unwrap_or(0).max(1)),
            ArrayData::Object(_) => DType::Object,
        }
    }

    /// Epoch-millisecond values, if this is a timestamp column
    pub fn as_timestamps(&self) -> Option<&[i64]> {
        match &self.data {
            ArrayData::Timestamp(v) => Some(v),
            _ => None,
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let start = start.min(end);
        Self::from_parts(
            self.data.slice(start, end),
            self.mask.as_ref().map(|m| m[start..end].to_vec()),
        )
    }

    /// Gather rows by position
    pub fn take(&self, rows: &[usize]) -> Self {
        Self::from_parts(
            self.data.take(rows),
            self.mask
                .as_ref()
                .map(|m| rows.iter().map(|&i| m[i]).collect()),
        )
    }

    /// Zero-length array of the same type
    pub fn empty_like(&self) -> Self {
        Self::new(self.data.empty_like())
    }

    /// View a text column as objects, nulls becoming JSON null
    fn to_objects(&self) -> Array {
        match &self.data {
            ArrayData::Text(v) => {
                let values = v
                    .iter()
                    .enumerate()
                    .map(|(i, s)| if self.is_null(i) { Value::Null } else { Value::String(s.clone()) })
                    .collect();
                Array::objects(values)
            }
            _ => self.clone(),
        }
    }

    /// Concatenate arrays of compatible types, in order
    ///
    /// Text and object parts mix; the result is then an object column.
    pub fn concat(parts: &[Array]) -> StoreResult<Array> {
        let has_objects = parts.iter().any(|p| matches!(p.data, ArrayData::Object(_)));
        let has_text = parts.iter().any(|p| matches!(p.data, ArrayData::Text(_)));
        if has_objects && has_text {
            let coerced: Vec<Array> = parts.iter().map(Array::to_objects).collect();
            return Array::concat(&coerced);
        }

        let first = parts
            .first()
            .ok_or_else(|| StoreError::InvalidInput("Cannot concatenate zero arrays".into()))?;

        let mut data = first.data.empty_like();
        let mut mask = Vec::new();
        let any_mask = parts.iter().any(|p| p.mask.is_some());

        for part in parts {
            match (&mut data, &part.data) {
                (ArrayData::Bool(out), ArrayData::Bool(v)) => out.extend_from_slice(v),
                (ArrayData::Int64(out), ArrayData::Int64(v)) => out.extend_from_slice(v),
                (ArrayData::Float64(out), ArrayData::Float64(v)) => out.extend_from_slice(v),
                (ArrayData::Timestamp(out), ArrayData::Timestamp(v)) => out.extend_from_slice(v),
                (ArrayData::Text(out), ArrayData::Text(v)) => out.extend_from_slice(v),
                (ArrayData::Object(out), ArrayData::Object(v)) => out.extend_from_slice(v),
                (out, other) => {
                    return Err(StoreError::SchemaMismatch(format!(
                        "Cannot concatenate {} with {}",
                        out.kind(),
                        other.kind()
                    )))
                }
            }
            if any_mask {
                match &part.mask {
                    Some(m) => mask.extend_from_slice(m),
                    None => mask.extend(std::iter::repeat(false).take(part.len())),
                }
            }
        }

        Ok(Self::from_parts(data, any_mask.then_some(mask)))
    }

    /// Estimated in-memory size in bytes
    pub fn estimated_size(&self) -> usize {
        let values = match &self.data {
            ArrayData::Text(v) => v.iter().map(|s| s.len() + 24).sum(),
            ArrayData::Object(v) => v.len() * 32,
            other => other.len() * self.dtype().itemsize(),
        };
        values + self.mask.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// Wire form of one array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedArray {
    /// dtype tag, e.g. `i8` or `U12`
    pub dtype: String,
    /// Number of rows
    pub length: u64,
    /// Compressed value bytes
    pub values: Vec<u8>,
    /// Compressed null mask, present only when some row is null
    #[serde(default)]
    pub mask: Option<Vec<u8>>,
}

impl SerializedArray {
    /// Stored size in bytes
    pub fn stored_size(&self) -> usize {
        self.values.len() + self.mask.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// Narrow object columns to text, masking nulls
///
/// Returns the storable data together with the effective null mask.
fn convert_types(array: &Array) -> StoreResult<(ArrayData, Option<Vec<bool>>)> {
    let values = match &array.data {
        ArrayData::Object(values) => values,
        other => return Ok((other.clone(), array.mask.clone())),
    };

    if values.is_empty() {
        return Ok((ArrayData::Text(Vec::new()), None));
    }

    let mut mask: Vec<bool> = values.iter().map(Value::is_null).collect();
    if let Some(existing) = &array.mask {
        for (m, e) in mask.iter_mut().zip(existing) {
            *m |= *e;
        }
    }

    let mut text = Vec::with_capacity(values.len());
    let mut kinds = std::collections::BTreeSet::new();
    for (value, &null) in values.iter().zip(&mask) {
        match value {
            _ if null => text.push(String::new()),
            Value::String(s) => {
                kinds.insert("string");
                text.push(s.clone());
            }
            other => {
                kinds.insert(json_kind(other));
            }
        }
    }

    if kinds.iter().any(|k| *k != "string") {
        let inferred = match kinds.len() {
            1 => kinds.into_iter().next().unwrap_or("mixed"),
            _ => "mixed",
        };
        return Err(StoreError::UnsupportedType(format!(
            "Cannot store arrays with {} dtype",
            inferred
        )));
    }

    let mask = mask.iter().any(|&null| null).then_some(mask);
    Ok((ArrayData::Text(text), mask))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "floating",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

fn raw_bytes(data: &ArrayData, dtype: DType) -> Vec<u8> {
    match data {
        ArrayData::Bool(v) => v.iter().map(|&b| b as u8).collect(),
        ArrayData::Int64(v) | ArrayData::Timestamp(v) => {
            v.iter().flat_map(|x| x.to_le_bytes()).collect()
        }
        ArrayData::Float64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        ArrayData::Text(v) => {
            let width = dtype.itemsize();
            let mut buf = Vec::with_capacity(v.len() * width);
            for s in v {
                buf.extend_from_slice(s.as_bytes());
                buf.extend(std::iter::repeat(0u8).take(width - s.len()));
            }
            buf
        }
        // convert_types never yields objects
        ArrayData::Object(_) => Vec::new(),
    }
}

/// Encode an array, feeding its uncompressed bytes into `hasher`
pub(crate) fn encode_array_into(
    array: &Array,
    hasher: &mut blake3::Hasher,
) -> StoreResult<SerializedArray> {
    let (data, mask) = convert_types(array)?;
    // Text cells are NUL padded, so a trailing NUL would be lost on decode
    if let ArrayData::Text(values) = &data {
        if values.iter().any(|s| s.ends_with('\0')) {
            return Err(StoreError::UnsupportedType(
                "Text values ending in NUL cannot be stored".into(),
            ));
        }
    }
    let dtype = Array::new(data.clone()).dtype();
    let raw = raw_bytes(&data, dtype);
    let length = data.len() as u64;
    let tag = dtype.tag();

    hasher.update(tag.as_bytes());
    hasher.update(&length.to_le_bytes());
    hasher.update(&raw);

    let mask = mask.map(|m| {
        let bytes: Vec<u8> = m.iter().map(|&null| null as u8).collect();
        hasher.update(b"mask");
        hasher.update(&bytes);
        compress(&bytes)
    });

    Ok(SerializedArray {
        dtype: tag,
        length,
        values: compress(&raw),
        mask,
    })
}

/// Encode an array, returning the frame and its hex content hash
pub fn encode_array(array: &Array) -> StoreResult<(SerializedArray, String)> {
    let mut hasher = blake3::Hasher::new();
    let frame = encode_array_into(array, &mut hasher)?;
    Ok((frame, hasher.finalize().to_hex().to_string()))
}

/// Decode a frame produced by [`encode_array`]
pub fn decode_array(frame: &SerializedArray) -> StoreResult<Array> {
    let dtype = DType::parse(&frame.dtype)?;
    let length = frame.length as usize;
    let raw = decompress(&frame.values)?;

    let expected = length.checked_mul(dtype.itemsize()).ok_or_else(|| {
        StoreError::Corruption(format!("Array length {} of {} overflows", length, dtype))
    })?;
    if raw.len() != expected {
        return Err(StoreError::Corruption(format!(
            "Array payload is {} bytes, expected {} rows of {}",
            raw.len(),
            length,
            dtype
        )));
    }

    let data = match dtype {
        DType::Bool => ArrayData::Bool(raw.iter().map(|&b| b != 0).collect()),
        DType::Int64 => ArrayData::Int64(raw.chunks_exact(8).map(le_i64).collect()),
        DType::Timestamp => ArrayData::Timestamp(raw.chunks_exact(8).map(le_i64).collect()),
        DType::Float64 => ArrayData::Float64(
            raw.chunks_exact(8)
                .map(|c| f64::from_bits(le_i64(c) as u64))
                .collect(),
        ),
        DType::Text(width) => {
            let mut values = Vec::with_capacity(length);
            for cell in raw.chunks_exact(width) {
                let end = cell.iter().rposition(|&b| b != 0).map(|p| p + 1).unwrap_or(0);
                let s = std::str::from_utf8(&cell[..end])
                    .map_err(|e| StoreError::Corruption(format!("Invalid UTF-8 in text column: {}", e)))?;
                values.push(s.to_string());
            }
            ArrayData::Text(values)
        }
        DType::Object => {
            return Err(StoreError::Corruption("Object arrays are never stored".into()))
        }
    };

    let mask = match &frame.mask {
        Some(block) => {
            let bytes = decompress(block)?;
            if bytes.len() != length {
                return Err(StoreError::Corruption(format!(
                    "Mask has {} entries for {} rows",
                    bytes.len(),
                    length
                )));
            }
            Some(bytes.into_iter().map(|b| b != 0).collect())
        }
        None => None,
    };

    Ok(Array::from_parts(data, mask))
}

fn le_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    i64::from_le_bytes(buf)
}
