//! Backend selection.
//!
//! The set of stores is closed: configuration names one variant and
//! [`AnyIndex`] dispatches to it.

use crate::error::Result;
use crate::memory::MemoryIndex;
use crate::record::{IdentityMetadata, IndexStats, QueryHit, SearchParams, StoredIdentity};
use crate::similarity::NativeMetric;
use crate::sqlite::SqliteIndex;
use crate::SimilarityIndex;
use rollcall_core::Embedding;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IndexConfig {
    /// In-process index, persisted as JSON when `path` is set.
    Memory {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// SQLite document store.
    Sqlite { path: PathBuf },
}

impl IndexConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            IndexConfig::Memory { .. } => "memory",
            IndexConfig::Sqlite { .. } => "sqlite",
        }
    }
}

pub enum AnyIndex {
    Memory(MemoryIndex),
    Sqlite(SqliteIndex),
}

impl AnyIndex {
    pub fn open(config: &IndexConfig) -> Result<Self> {
        let index = match config {
            IndexConfig::Memory { path: None } => AnyIndex::Memory(MemoryIndex::new()),
            IndexConfig::Memory { path: Some(path) } => AnyIndex::Memory(MemoryIndex::open(path)?),
            IndexConfig::Sqlite { path } => AnyIndex::Sqlite(SqliteIndex::open(path)?),
        };
        tracing::debug!(backend = index.backend_name(), metric = index.native_metric().as_str(), "index ready");
        Ok(index)
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            AnyIndex::Memory(_) => "memory",
            AnyIndex::Sqlite(_) => "sqlite",
        }
    }

    /// Hard-delete one identity. Not part of the shared contract; each store
    /// implements it natively.
    pub fn purge(&self, identity_id: &str) -> Result<bool> {
        match self {
            AnyIndex::Memory(index) => index.purge(identity_id),
            AnyIndex::Sqlite(index) => index.purge(identity_id),
        }
    }

    /// Remove every record and release the dimension lock.
    pub fn reset(&self) -> Result<usize> {
        match self {
            AnyIndex::Memory(index) => index.reset(),
            AnyIndex::Sqlite(index) => index.reset(),
        }
    }

    fn inner(&self) -> &dyn SimilarityIndex {
        match self {
            AnyIndex::Memory(index) => index,
            AnyIndex::Sqlite(index) => index,
        }
    }
}

impl SimilarityIndex for AnyIndex {
    fn native_metric(&self) -> NativeMetric {
        self.inner().native_metric()
    }

    fn upsert(&self, identity_id: &str, embedding: &Embedding, metadata: IdentityMetadata) -> Result<String> {
        self.inner().upsert(identity_id, embedding, metadata)
    }

    fn search(&self, embedding: &Embedding, params: &SearchParams<'_>) -> Result<Vec<QueryHit>> {
        self.inner().search(embedding, params)
    }

    fn remove(&self, identity_id: &str) -> Result<bool> {
        self.inner().remove(identity_id)
    }

    fn fetch(&self, identity_id: &str) -> Result<Option<StoredIdentity>> {
        self.inner().fetch(identity_id)
    }

    fn stats(&self) -> Result<IndexStats> {
        self.inner().stats()
    }

    fn identities(&self) -> Result<Vec<String>> {
        self.inner().identities()
    }
}
