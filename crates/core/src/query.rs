//! Recursive AND/OR query evaluator over the `IndexStore`.

use std::collections::HashSet;

use async_recursion::async_recursion;
use serde::{Deserialize, Serialize};

use crate::trie::IndexStore;

/// Boolean combinator for an internal query node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Op {
    And,
    Or,
}

/// A query tree node: either an internal AND/OR combinator over child
/// queries, or a `{column, value}` leaf predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Query {
    Internal {
        #[serde(rename = "condition")]
        op: Op,
        #[serde(rename = "rules")]
        children: Vec<Query>,
    },
    Leaf {
        column: String,
        value: String,
    },
}

/// A full search request: the trie's first two path segments plus a query tree.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub source: String,
    pub files: String,
    pub query: Query,
}

/// Evaluates `query` against `store` scoped to `(source, files)`, returning
/// the set of matched shard identifiers.
#[async_recursion]
pub async fn eval(store: &IndexStore, source: &str, files: &str, query: &Query) -> HashSet<String> {
    match query {
        Query::Leaf { column, value } => eval_leaf(store, source, files, column, value).await,
        Query::Internal { op: Op::And, children } => {
            if children.is_empty() {
                return HashSet::new();
            }
            let mut iter = children.iter();
            // `children` is non-empty, so `next()` always succeeds here.
            let first = iter.next().unwrap();
            let mut acc = eval(store, source, files, first).await;
            for child in iter {
                let next = eval(store, source, files, child).await;
                acc.retain(|s| next.contains(s));
                if acc.is_empty() {
                    break;
                }
            }
            acc
        }
        Query::Internal { op: Op::Or, children } => {
            let mut acc = HashSet::new();
            for child in children {
                acc.extend(eval(store, source, files, child).await);
            }
            acc
        }
    }
}

async fn eval_leaf(
    store: &IndexStore,
    source: &str,
    files: &str,
    column: &str,
    value: &str,
) -> HashSet<String> {
    // Case-folding applies only to the column segment, not the literal
    // ".pickle" suffix.
    let column_segment = format!("{}*.pickle", column.to_lowercase());
    let pattern = vec![source.to_string(), files.to_string(), column_segment];

    let hits = store.search(&pattern).await;
    let mut shard_ids = HashSet::new();
    for (path, filter) in hits {
        if filter.contains(value) {
            if let Some(shard_id) = shard_id_from_path(&path) {
                shard_ids.insert(shard_id);
            }
        }
    }
    shard_ids
}

/// The shard id is the directory portion of the matched path up to but
/// excluding the column artifact segment.
fn shard_id_from_path(path: &[String]) -> Option<String> {
    if path.len() < 2 {
        return None;
    }
    Some(path[path.len() - 2].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{BloomFilter, Filter, RangeFilter, DType};
    use std::io::Write;

    fn write_filter(dir: &tempfile::TempDir, name: &str, filter: Filter) -> std::path::PathBuf {
        let bytes = filter.serialize();
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&bytes).unwrap();
        path
    }

    async fn build_store() -> (tempfile::TempDir, IndexStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new();

        let mut s1 = BloomFilter::new(10, 0.1, DType::Text);
        s1.insert("Active");
        s1.insert("Inactive");
        let p1 = write_filter(&dir, "s1_status.pickle", Filter::Bloom(s1));
        store.insert(&["bloom".into(), "S1".into(), "account_status.pickle".into()], p1);

        let mut s2 = BloomFilter::new(10, 0.1, DType::Text);
        s2.insert("Active");
        let p2 = write_filter(&dir, "s2_status.pickle", Filter::Bloom(s2));
        store.insert(&["bloom".into(), "S2".into(), "account_status.pickle".into()], p2);

        (dir, store)
    }

    #[tokio::test]
    async fn s1_single_bloom_leaf_hit() {
        let (_dir, store) = build_store().await;
        let q = Query::Leaf { column: "account_status".into(), value: "Inactive".into() };
        let result = eval(&store, "bloom", "*", &q).await;
        assert_eq!(result, ["S1".to_string()].into_iter().collect());
    }

    #[tokio::test]
    async fn s5_unknown_column_yields_empty_and_is_neutral_under_and_or() {
        let (_dir, store) = build_store().await;
        let unknown = Query::Leaf { column: "nonexistent".into(), value: "x".into() };
        let known = Query::Leaf { column: "account_status".into(), value: "Active".into() };

        let r = eval(&store, "bloom", "*", &unknown).await;
        assert!(r.is_empty());

        let and_q = Query::Internal { op: Op::And, children: vec![unknown.clone(), known.clone()] };
        assert!(eval(&store, "bloom", "*", &and_q).await.is_empty());

        let or_q = Query::Internal { op: Op::Or, children: vec![unknown, known] };
        let or_result = eval(&store, "bloom", "*", &or_q).await;
        assert_eq!(or_result, ["S1".to_string(), "S2".to_string()].into_iter().collect());
    }

    #[tokio::test]
    async fn s3_range_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new();
        let a = write_filter(&dir, "a.pickle", Filter::Range(RangeFilter::new(0.0, 1000.0, DType::Integer)));
        let b = write_filter(&dir, "b.pickle", Filter::Range(RangeFilter::new(2000.0, 5000.0, DType::Integer)));
        store.insert(&["bloom".into(), "A".into(), "account_balance.pickle".into()], a);
        store.insert(&["bloom".into(), "B".into(), "account_balance.pickle".into()], b);

        let q = Query::Leaf { column: "account_balance".into(), value: "1500".into() };
        let result = eval(&store, "bloom", "*", &q).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn empty_internal_children_is_empty_set() {
        let (_dir, store) = build_store().await;
        let q = Query::Internal { op: Op::And, children: vec![] };
        assert!(eval(&store, "bloom", "*", &q).await.is_empty());
        let q = Query::Internal { op: Op::Or, children: vec![] };
        assert!(eval(&store, "bloom", "*", &q).await.is_empty());
    }

    #[test]
    fn query_json_shape_parses() {
        let json = serde_json::json!({
            "condition": "AND",
            "rules": [
                {"column": "account_status", "value": "Inactive"},
                {"column": "account_type", "value": "Savings"}
            ]
        });
        let q: Query = serde_json::from_value(json).unwrap();
        match q {
            Query::Internal { op: Op::And, children } => assert_eq!(children.len(), 2),
            _ => panic!("expected internal AND node"),
        }
    }
}
