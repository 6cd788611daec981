//! Construction-policy knobs for filter selection during indexing.

/// Distinct-value threshold above which a range filter is preferred over a
/// Bloom filter for numeric/temporal columns.
pub const DEFAULT_RANGE_FILTER_THRESHOLD: u64 = 1000;

/// Default Bloom filter false-positive rate.
pub const DEFAULT_ERROR_RATE: f64 = 0.1;

/// Tunables for the indexer's filter-selection policy.
#[derive(Debug, Clone, Copy)]
pub struct IndexerConfig {
    pub range_filter_threshold: u64,
    pub error_rate: f64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            range_filter_threshold: DEFAULT_RANGE_FILTER_THRESHOLD,
            error_rate: DEFAULT_ERROR_RATE,
        }
    }
}
