//! `ColumnarReader` — the capability boundary over the columnar storage
//! format, which this crate treats as an external concern: it only consumes
//! `DataFrame`-shaped row groups. This module defines the trait plus one
//! concrete reference reader; production formats plug in by implementing
//! the trait.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{BloomdexError, Result};
use crate::filter::DType;

/// One column's worth of raw string values (nulls as `None`) plus its
/// declared dtype, as read from a shard.
pub struct ColumnData {
    pub dtype: DType,
    pub values: Vec<Option<String>>,
}

/// Abstraction over "read one shard's columns" that the indexer builds
/// filters from. The actual columnar file format is external to this crate.
pub trait ColumnarReader {
    /// Reads every column of the shard at `path`, keyed by column name.
    fn read_shard(&self, path: &Path) -> Result<BTreeMap<String, ColumnData>>;
}

/// A reference `ColumnarReader` over newline-delimited JSON row objects,
/// one JSON object per line, each key a column name. Used by tests and the
/// indexer CLI's default path; not a production format.
pub struct JsonlColumnarReader;

impl ColumnarReader for JsonlColumnarReader {
    fn read_shard(&self, path: &Path) -> Result<BTreeMap<String, ColumnData>> {
        let text = std::fs::read_to_string(path).map_err(BloomdexError::Io)?;
        let mut columns: BTreeMap<String, Vec<Option<String>>> = BTreeMap::new();
        let mut dtypes: BTreeMap<String, DType> = BTreeMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let row: serde_json::Value = serde_json::from_str(line).map_err(|e| {
                BloomdexError::ShardReadFailure {
                    shard_id: path.display().to_string(),
                    reason: format!("invalid JSONL row: {e}"),
                }
            })?;
            let obj = row.as_object().ok_or_else(|| BloomdexError::ShardReadFailure {
                shard_id: path.display().to_string(),
                reason: "row is not a JSON object".to_string(),
            })?;
            for (key, value) in obj {
                let entry = columns.entry(key.clone()).or_default();
                let (dtype, string_value) = classify(value);
                dtypes.entry(key.clone()).or_insert(dtype);
                entry.push(string_value);
            }
        }

        Ok(columns
            .into_iter()
            .map(|(name, values)| {
                let dtype = dtypes.get(&name).copied().unwrap_or(DType::Text);
                (name, ColumnData { dtype, values })
            })
            .collect())
    }
}

fn classify(value: &serde_json::Value) -> (DType, Option<String>) {
    match value {
        serde_json::Value::Null => (DType::Text, None),
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => {
            (DType::Integer, Some(n.to_string()))
        }
        serde_json::Value::Number(n) => (DType::Floating, Some(n.to_string())),
        serde_json::Value::String(s) => (DType::Text, Some(s.clone())),
        other => (DType::Text, Some(other.to_string())),
    }
}
