//! Offline index builder: reads each shard through a `ColumnarReader`, picks
//! a filter per column, and writes artifacts atomically. Also the discovery
//! loader used at server startup.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::IndexerConfig;
use crate::error::{BloomdexError, Result};
use crate::filter::{numeric_value, BloomFilter, DType, Filter, RangeFilter};
use crate::reader::ColumnarReader;
use crate::trie::IndexStore;

/// The legacy artifact suffix, carried over from the format this index
/// replaced.
pub const ARTIFACT_SUFFIX: &str = "pickle";

/// Builds the filter for one column per the construction policy above.
fn build_column_filter(dtype: DType, values: &[Option<String>], config: &IndexerConfig) -> Filter {
    let non_null: Vec<&str> = values.iter().filter_map(|v| v.as_deref()).collect();

    if dtype.is_range_eligible() {
        let mut distinct = HashSet::new();
        let mut min: Option<f64> = None;
        let mut max: Option<f64> = None;
        for raw in &non_null {
            if let Some(n) = numeric_value(dtype, raw) {
                distinct.insert(raw.to_string());
                min = Some(min.map_or(n, |m: f64| m.min(n)));
                max = Some(max.map_or(n, |m: f64| m.max(n)));
            }
        }
        if distinct.len() as u64 > config.range_filter_threshold {
            return match (min, max) {
                (Some(lo), Some(hi)) => Filter::Range(RangeFilter::new(lo, hi, dtype)),
                // All values were null (or unparsable): matches nothing.
                _ => Filter::Range(RangeFilter::empty(dtype)),
            };
        }
    }

    let mut bloom = BloomFilter::new(non_null.len() as u64, config.error_rate, dtype);
    for raw in &non_null {
        bloom.insert(raw);
    }
    Filter::Bloom(bloom)
}

/// Writes `filter` to `<output_dir>/<shard_id>/<column_lower>.<suffix>`
/// atomically: write to a temp file in the same directory, then rename, so
/// no partial artifacts are ever visible to a concurrent loader.
fn write_artifact_atomic(output_dir: &Path, shard_id: &str, column: &str, filter: &Filter) -> Result<PathBuf> {
    let shard_dir = output_dir.join(shard_id);
    std::fs::create_dir_all(&shard_dir)?;
    let final_path = shard_dir.join(format!("{}.{ARTIFACT_SUFFIX}", column.to_lowercase()));
    let tmp_path = shard_dir.join(format!(".{}.tmp-{}", column.to_lowercase(), Uuid::new_v4()));

    let write = || -> std::io::Result<()> {
        std::fs::write(&tmp_path, filter.serialize())?;
        std::fs::rename(&tmp_path, &final_path)
    };
    write().map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        BloomdexError::ArtifactWriteFailure { path: final_path.clone(), reason: e.to_string() }
    })?;
    Ok(final_path)
}

/// Builds all column filters for one shard file and writes them to disk.
pub fn build_shard(
    reader: &dyn ColumnarReader,
    shard_path: &Path,
    shard_id: &str,
    output_dir: &Path,
    config: &IndexerConfig,
) -> Result<usize> {
    let columns = reader.read_shard(shard_path).map_err(|e| BloomdexError::ShardReadFailure {
        shard_id: shard_id.to_string(),
        reason: e.to_string(),
    })?;

    let mut written = 0;
    for (column, data) in &columns {
        let filter = build_column_filter(data.dtype, &data.values, config);
        write_artifact_atomic(output_dir, shard_id, column, &filter)?;
        written += 1;
    }
    Ok(written)
}

/// Derives a shard id deterministically from a shard file's stem.
fn shard_id_from_path(path: &Path) -> String {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string()
}

/// Iterates every shard file in `input_dir`, building and writing its
/// filters. Per-shard failures are logged and skipped; the indexer keeps
/// going rather than aborting the whole run.
pub fn index_directory(
    reader: &dyn ColumnarReader,
    input_dir: &Path,
    output_dir: &Path,
    config: &IndexerConfig,
) -> Result<usize> {
    let entries = std::fs::read_dir(input_dir)?;
    let mut shards_indexed = 0;
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to read directory entry, skipping");
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let shard_id = shard_id_from_path(&path);
        match build_shard(reader, &path, &shard_id, output_dir, config) {
            Ok(columns) => {
                info!(shard = shard_id.as_str(), columns, "indexed shard");
                shards_indexed += 1;
            }
            Err(e) => {
                warn!(shard = shard_id.as_str(), error = %e, "failed to index shard, continuing");
            }
        }
    }
    Ok(shards_indexed)
}

/// Walks `index_root` and inserts every artifact found into `store`, keyed
/// `[source_name, shard_id, column_file]`. A missing directory is logged and
/// the store is left empty — not fatal.
pub fn load_index(index_root: &Path, source_name: &str, store: &IndexStore) {
    if !index_root.is_dir() {
        warn!(root = %index_root.display(), "index root missing, starting with empty store");
        return;
    }

    let mut inserted = 0;
    let shard_dirs = match std::fs::read_dir(index_root) {
        Ok(d) => d,
        Err(e) => {
            warn!(root = %index_root.display(), error = %e, "failed to read index root");
            return;
        }
    };

    for shard_entry in shard_dirs.flatten() {
        let shard_path = shard_entry.path();
        if !shard_path.is_dir() {
            continue;
        }
        let shard_id = match shard_path.file_name().and_then(|n| n.to_str()) {
            Some(s) => s.to_string(),
            None => continue,
        };
        let files = match std::fs::read_dir(&shard_path) {
            Ok(f) => f,
            Err(e) => {
                warn!(shard = shard_id.as_str(), error = %e, "failed to read shard directory");
                continue;
            }
        };
        for file_entry in files.flatten() {
            let file_path = file_entry.path();
            let matches_suffix = file_path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == ARTIFACT_SUFFIX)
                .unwrap_or(false);
            if !matches_suffix {
                continue;
            }
            let column_file = match file_path.file_name().and_then(|n| n.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            store.insert(
                &[source_name.to_string(), shard_id.clone(), column_file],
                file_path,
            );
            inserted += 1;
        }
    }
    info!(root = %index_root.display(), artifacts = inserted, "index discovery complete");
}

/// Reusable by tests and the indexer CLI: a discovered tree as a plain map,
/// for assertions that don't need the full `IndexStore`.
pub fn discover_tree(index_root: &Path) -> BTreeMap<String, Vec<String>> {
    let mut tree = BTreeMap::new();
    let Ok(shard_dirs) = std::fs::read_dir(index_root) else {
        return tree;
    };
    for shard_entry in shard_dirs.flatten() {
        let shard_path = shard_entry.path();
        if !shard_path.is_dir() {
            continue;
        }
        let shard_id = shard_path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_string();
        let mut columns = Vec::new();
        if let Ok(files) = std::fs::read_dir(&shard_path) {
            for file_entry in files.flatten() {
                if let Some(name) = file_entry.path().file_name().and_then(|n| n.to_str()) {
                    columns.push(name.to_string());
                }
            }
        }
        tree.insert(shard_id, columns);
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::JsonlColumnarReader;

    fn write_shard(dir: &tempfile::TempDir, name: &str, rows: &[&str]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, rows.join("\n")).unwrap();
        path
    }

    #[test]
    fn range_filter_chosen_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<String> = (0..1500).map(|i| format!("{{\"balance\": {i}}}")).collect();
        let row_refs: Vec<&str> = rows.iter().map(|s| s.as_str()).collect();
        let shard = write_shard(&dir, "S1.jsonl", &row_refs);

        let out = tempfile::tempdir().unwrap();
        let config = IndexerConfig::default();
        build_shard(&JsonlColumnarReader, &shard, "S1", out.path(), &config).unwrap();

        let artifact_path = out.path().join("S1").join("balance.pickle");
        let bytes = std::fs::read(&artifact_path).unwrap();
        let filter = Filter::deserialize(&bytes, &artifact_path).unwrap();
        assert!(filter.contains("750"));
        assert!(!filter.contains("999999"));
    }

    #[test]
    fn bloom_filter_chosen_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let shard = write_shard(
            &dir,
            "S1.jsonl",
            &["{\"status\": \"Active\"}", "{\"status\": \"Inactive\"}"],
        );
        let out = tempfile::tempdir().unwrap();
        let config = IndexerConfig::default();
        build_shard(&JsonlColumnarReader, &shard, "S1", out.path(), &config).unwrap();

        let artifact_path = out.path().join("S1").join("status.pickle");
        let bytes = std::fs::read(&artifact_path).unwrap();
        let filter = Filter::deserialize(&bytes, &artifact_path).unwrap();
        assert!(filter.contains("Active"));
    }

    #[tokio::test]
    async fn discovery_loader_round_trips_into_store() {
        let dir = tempfile::tempdir().unwrap();
        let shard = write_shard(&dir, "S1.jsonl", &["{\"status\": \"Active\"}"]);
        let out = tempfile::tempdir().unwrap();
        build_shard(&JsonlColumnarReader, &shard, "S1", out.path(), &IndexerConfig::default()).unwrap();

        let store = IndexStore::new();
        load_index(out.path(), "bloom", &store);

        let hits = store.search(&["bloom".into(), "S1".into(), "status.pickle".into()]).await;
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn missing_index_root_is_not_fatal() {
        let store = IndexStore::new();
        load_index(Path::new("/nonexistent/path/xyz"), "bloom", &store);
        assert_eq!(store.size(), 1); // just the root node
    }

    #[test]
    fn per_shard_failure_does_not_abort_directory_walk() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(&dir, "good.jsonl", &["{\"status\": \"Active\"}"]);
        write_shard(&dir, "bad.jsonl", &["not json at all"]);

        let out = tempfile::tempdir().unwrap();
        let indexed = index_directory(&JsonlColumnarReader, dir.path(), out.path(), &IndexerConfig::default())
            .unwrap();
        assert_eq!(indexed, 1, "only the good shard should be indexed");
    }
}
