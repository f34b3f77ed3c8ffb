use rollcall_core::DimensionMismatch;
use thiserror::Error;

/// Result alias for similarity index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors surfaced by every index backend.
///
/// A failed query is always an error, never an empty hit list.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("invalid identity id: {0:?}")]
    InvalidId(String),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt record {identity_id}: {reason}")]
    Corrupt { identity_id: String, reason: String },
    #[error("index lock poisoned")]
    LockPoisoned,
}
