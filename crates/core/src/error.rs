//! Error kinds for the index model: one variant per failure mode callers
//! need to branch on. Protocol- and frame-level failures stay as
//! connection-local `tracing` calls and are not represented here.

use std::fmt;
use std::path::PathBuf;

/// Errors surfaced by the filter, trie, and indexer layers.
#[derive(Debug)]
pub enum BloomdexError {
    /// The configured index root does not exist at startup.
    MissingIndexRoot(PathBuf),
    /// An artifact file failed magic/version/checksum validation on load.
    CorruptArtifact { path: PathBuf, reason: String },
    /// The indexer could not open or read a shard through its `ColumnarReader`.
    ShardReadFailure { shard_id: String, reason: String },
    /// Writing an artifact (temp file, rename, fsync) failed.
    ArtifactWriteFailure { path: PathBuf, reason: String },
    /// Underlying I/O error with no more specific classification.
    Io(std::io::Error),
}

impl fmt::Display for BloomdexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingIndexRoot(p) => write!(f, "index root not found: {}", p.display()),
            Self::CorruptArtifact { path, reason } => {
                write!(f, "corrupt artifact {}: {reason}", path.display())
            }
            Self::ShardReadFailure { shard_id, reason } => {
                write!(f, "failed to read shard '{shard_id}': {reason}")
            }
            Self::ArtifactWriteFailure { path, reason } => {
                write!(f, "failed to write artifact {}: {reason}", path.display())
            }
            Self::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for BloomdexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BloomdexError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, BloomdexError>;
