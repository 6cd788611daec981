//! bloomdex-core — the index model: filter artifacts, the path-addressable
//! trie, the recursive query evaluator, and the offline indexer.
//!
//! No networking and no CLI parsing live here; see the `server` and
//! `bloomdex-indexer` crates for those.

pub mod config;
pub mod error;
pub mod filter;
pub mod hash;
pub mod indexer;
pub mod query;
pub mod reader;
pub mod trie;

pub use error::{BloomdexError, Result};
pub use filter::{DType, Filter};
pub use query::{eval, Op, Query, SearchRequest};
pub use trie::IndexStore;
