//! `IndexStore` — an in-memory trie keyed by path segments
//! `[source, shard_id, column_file]`, with shell-style glob search per
//! segment and lazy, at-most-once filter materialization.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use globset::{Glob, GlobMatcher};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::filter::Filter;

/// Outcome of the one-shot lazy load: success carries the parsed filter,
/// failure quarantines the node — a load failure leaves the node marked
/// unloadable and excluded from future results.
#[derive(Clone)]
enum LoadOutcome {
    Loaded(Arc<Filter>),
    Unloadable,
}

struct IndexNode {
    children: DashMap<String, IndexNode>,
    terminal: bool,
    artifact_location: Option<PathBuf>,
    artifact: OnceCell<LoadOutcome>,
}

impl IndexNode {
    fn new() -> Self {
        Self {
            children: DashMap::new(),
            terminal: false,
            artifact_location: None,
            artifact: OnceCell::new(),
        }
    }
}

/// The process-wide path-addressable index; the server holds exactly one
/// store instance shared across handlers. Cheap to clone — internally an
/// `Arc`.
#[derive(Clone)]
pub struct IndexStore {
    root: Arc<IndexNode>,
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexStore {
    pub fn new() -> Self {
        Self { root: Arc::new(IndexNode::new()) }
    }

    /// Inserts `path` into the trie, recording `artifact_location` on the
    /// terminal node. The artifact itself is not loaded here.
    pub fn insert(&self, path: &[String], artifact_location: PathBuf) {
        fn walk(children: &DashMap<String, IndexNode>, path: &[String], artifact_location: PathBuf) {
            let (head, rest) = match path.split_first() {
                Some(x) => x,
                None => return,
            };
            if !children.contains_key(head) {
                children.insert(head.clone(), IndexNode::new());
            }
            if rest.is_empty() {
                let mut entry = children.get_mut(head).unwrap();
                entry.terminal = true;
                entry.artifact_location = Some(artifact_location);
            } else {
                let entry = children.get(head).unwrap();
                walk(&entry.children, rest, artifact_location);
            }
        }
        walk(&self.root.children, path, artifact_location);
    }

    /// Depth-first glob search. `*`, `?`, `[...]` match within one segment
    /// and never cross a `/`-equivalent boundary, since matching is
    /// performed per-segment rather than on a joined string.
    pub async fn search(&self, pattern: &[String]) -> Vec<(Vec<String>, Arc<Filter>)> {
        let mut results = Vec::new();
        self.search_node(&self.root, pattern, &mut Vec::new(), &mut results).await;
        results
    }

    fn search_node<'a>(
        &'a self,
        node: &'a IndexNode,
        pattern: &'a [String],
        prefix: &'a mut Vec<String>,
        results: &'a mut Vec<(Vec<String>, Arc<Filter>)>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + 'a>> {
        Box::pin(async move {
            if pattern.is_empty() {
                if node.terminal {
                    if let Some(filter) = self.load(node, prefix).await {
                        results.push((prefix.clone(), filter));
                    }
                }
                return;
            }
            let matcher = match compile_glob(&pattern[0]) {
                Some(m) => m,
                None => {
                    warn!(pattern = pattern[0].as_str(), "invalid glob segment, skipping");
                    return;
                }
            };
            for entry in node.children.iter() {
                if matcher.is_match(entry.key()) {
                    prefix.push(entry.key().clone());
                    self.search_node(entry.value(), &pattern[1..], prefix, results).await;
                    prefix.pop();
                }
            }
        })
    }

    async fn load(&self, node: &IndexNode, path: &[String]) -> Option<Arc<Filter>> {
        let Some(location) = &node.artifact_location else {
            warn!(path = ?path, "terminal node missing artifact_location");
            return None;
        };
        let location = location.clone();
        let outcome = node
            .artifact
            .get_or_init(|| async move {
                match std::fs::read(&location) {
                    Ok(bytes) => match Filter::deserialize(&bytes, &location) {
                        Ok(f) => LoadOutcome::Loaded(Arc::new(f)),
                        Err(e) => {
                            warn!(path = %location.display(), error = %e, "corrupt artifact, quarantining node");
                            LoadOutcome::Unloadable
                        }
                    },
                    Err(e) => {
                        warn!(path = %location.display(), error = %e, "failed to read artifact, quarantining node");
                        LoadOutcome::Unloadable
                    }
                }
            })
            .await;
        match outcome {
            LoadOutcome::Loaded(f) => Some(Arc::clone(f)),
            LoadOutcome::Unloadable => None,
        }
    }

    /// Total node count, for diagnostics.
    pub fn size(&self) -> usize {
        fn count(node: &IndexNode) -> usize {
            1 + node.children.iter().map(|e| count(e.value())).sum::<usize>()
        }
        count(&self.root)
    }

    /// Debugging traversal: every path currently reachable in the trie.
    pub fn discover(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        fn walk(node: &IndexNode, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
            if node.terminal {
                out.push(prefix.clone());
            }
            for entry in node.children.iter() {
                prefix.push(entry.key().clone());
                walk(entry.value(), prefix, out);
                prefix.pop();
            }
        }
        walk(&self.root, &mut Vec::new(), &mut out);
        debug!(paths = out.len(), "discover traversal complete");
        out
    }
}

fn compile_glob(pattern: &str) -> Option<GlobMatcher> {
    Glob::new(pattern).ok().map(|g| g.compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{BloomFilter, DType, Filter};
    use std::io::Write;

    fn write_artifact(dir: &tempfile::TempDir, name: &str, mut bloom: BloomFilter, value: &str) -> PathBuf {
        bloom.insert(value);
        let bytes = Filter::Bloom(bloom).serialize();
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn insert_then_exact_search_hits() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(&dir, "a.pickle", BloomFilter::new(10, 0.1, DType::Text), "Active");

        let store = IndexStore::new();
        store.insert(
            &["bloom".into(), "S1".into(), "status.pickle".into()],
            path,
        );

        let hits = store
            .search(&["bloom".into(), "S1".into(), "status.pickle".into()])
            .await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].1.contains("Active"));
    }

    #[tokio::test]
    async fn glob_star_matches_single_segment_only() {
        let dir = tempfile::tempdir().unwrap();
        let path1 = write_artifact(&dir, "a.pickle", BloomFilter::new(10, 0.1, DType::Text), "x");
        let path2 = write_artifact(&dir, "b.pickle", BloomFilter::new(10, 0.1, DType::Text), "x");

        let store = IndexStore::new();
        store.insert(&["src".into(), "S1".into(), "col.pickle".into()], path1);
        store.insert(&["src".into(), "S2".into(), "col.pickle".into()], path2);
        store.insert(
            &["src".into(), "S3".into(), "sub".into(), "col.pickle".into()],
            dir.path().join("a.pickle"),
        );

        let hits = store.search(&["src".into(), "*".into(), "col.pickle".into()]).await;
        assert_eq!(hits.len(), 2, "glob '*' must not cross segment boundaries");
    }

    #[tokio::test]
    async fn insertion_order_independent() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = write_artifact(&dir, "a.pickle", BloomFilter::new(10, 0.1, DType::Text), "x");
        let p2 = write_artifact(&dir, "b.pickle", BloomFilter::new(10, 0.1, DType::Text), "x");

        let store_a = IndexStore::new();
        store_a.insert(&["s".into(), "1".into(), "a.pickle".into()], p1.clone());
        store_a.insert(&["s".into(), "2".into(), "b.pickle".into()], p2.clone());

        let store_b = IndexStore::new();
        store_b.insert(&["s".into(), "2".into(), "b.pickle".into()], p2);
        store_b.insert(&["s".into(), "1".into(), "a.pickle".into()], p1);

        assert_eq!(store_a.size(), store_b.size());
        assert_eq!(store_a.discover().len(), store_b.discover().len());
    }

    #[tokio::test]
    async fn corrupt_artifact_quarantines_node_not_crash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pickle");
        std::fs::write(&path, b"not a valid artifact").unwrap();

        let store = IndexStore::new();
        store.insert(&["s".into(), "1".into(), "bad.pickle".into()], path);

        let hits = store.search(&["s".into(), "1".into(), "bad.pickle".into()]).await;
        assert!(hits.is_empty());
    }
}
