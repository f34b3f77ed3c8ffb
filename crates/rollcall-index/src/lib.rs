//! rollcall-index — Similarity index over enrolled identities.
//!
//! One reference embedding per identity, nearest-neighbour queries by cosine
//! similarity, and a closed set of backing stores selected by configuration.
//! Every backend reports raw cosine in [-1, 1]; see [`similarity`].

pub mod backend;
pub mod error;
pub mod memory;
pub mod record;
pub mod similarity;
pub mod sqlite;

pub use backend::{AnyIndex, IndexConfig};
pub use error::{IndexError, Result};
pub use memory::MemoryIndex;
pub use record::{stored_id, IdentityMetadata, IndexStats, QueryHit, SearchParams, StoredIdentity};
pub use similarity::NativeMetric;
pub use sqlite::SqliteIndex;

use rollcall_core::Embedding;

/// Contract shared by every backing store.
///
/// Mutations are atomic with respect to concurrent queries on the same
/// index: a query observes either the old or the new record, never a
/// partially written one.
pub trait SimilarityIndex: Send + Sync {
    /// Scale this store computes natively. Results are converted from it.
    fn native_metric(&self) -> NativeMetric;

    /// Insert or fully overwrite the reference for `identity_id`. Clears a
    /// tombstone if one exists. Returns the stored document id.
    fn upsert(&self, identity_id: &str, embedding: &Embedding, metadata: IdentityMetadata) -> Result<String>;

    /// Ranked nearest neighbours of `embedding` among active records.
    fn search(&self, embedding: &Embedding, params: &SearchParams<'_>) -> Result<Vec<QueryHit>>;

    /// [`search`](Self::search) over the whole index.
    fn query(&self, embedding: &Embedding, top_k: usize, min_similarity: f32) -> Result<Vec<QueryHit>> {
        self.search(embedding, &SearchParams::new(top_k, min_similarity))
    }

    /// Tombstone `identity_id`. Returns whether an active record existed.
    fn remove(&self, identity_id: &str) -> Result<bool>;

    /// Active record for `identity_id`, if any.
    fn fetch(&self, identity_id: &str) -> Result<Option<StoredIdentity>>;

    fn stats(&self) -> Result<IndexStats>;

    /// Active identity ids, sorted.
    fn identities(&self) -> Result<Vec<String>>;
}
