use crate::error::{IndexError, Result};
use chrono::{DateTime, Utc};
use rollcall_core::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Free-form metadata stored next to a reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    pub enrolled_at: DateTime<Utc>,
    pub source_image_count: usize,
    pub dimension: usize,
    #[serde(default)]
    pub model_tag: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl IdentityMetadata {
    /// Metadata for a reference built now from `source_image_count` samples.
    pub fn new(embedding: &Embedding, source_image_count: usize) -> Self {
        Self {
            display_name: None,
            contact: None,
            enrolled_at: Utc::now(),
            source_image_count,
            dimension: embedding.dimension(),
            model_tag: embedding.model_version.clone(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }
}

/// One ranked query result. `similarity` is raw cosine in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    pub identity_id: String,
    pub similarity: f32,
    pub metadata: IdentityMetadata,
}

/// An active record as returned by `fetch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredIdentity {
    pub identity_id: String,
    pub stored_id: String,
    pub embedding: Embedding,
    pub metadata: IdentityMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexStats {
    /// Active (non-tombstoned) records.
    pub count: usize,
    /// Locked dimension, if any record exists.
    pub dimension: Option<usize>,
    pub tombstoned: usize,
}

/// Query parameters shared by every backend.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams<'a> {
    pub top_k: usize,
    /// Inclusive lower bound on raw cosine similarity.
    pub min_similarity: f32,
    /// Only consider these identities when set.
    pub restrict_to: Option<&'a HashSet<String>>,
}

impl<'a> SearchParams<'a> {
    pub fn new(top_k: usize, min_similarity: f32) -> Self {
        Self {
            top_k,
            min_similarity,
            restrict_to: None,
        }
    }

    pub fn restricted_to(mut self, ids: &'a HashSet<String>) -> Self {
        self.restrict_to = Some(ids);
        self
    }

    pub fn admits(&self, identity_id: &str) -> bool {
        self.restrict_to.map_or(true, |ids| ids.contains(identity_id))
    }
}

/// Document id under which `identity_id` is stored.
pub fn stored_id(identity_id: &str) -> String {
    format!("identity_{identity_id}")
}

pub(crate) fn validate_id(identity_id: &str) -> Result<()> {
    if identity_id.trim().is_empty() || identity_id.chars().any(char::is_control) {
        return Err(IndexError::InvalidId(identity_id.to_string()));
    }
    Ok(())
}

/// Check an embedding and return a unit-norm copy of it.
pub(crate) fn unit_copy(embedding: &Embedding) -> Result<Embedding> {
    if embedding.values.is_empty() {
        return Err(IndexError::InvalidEmbedding("embedding is empty".into()));
    }
    if embedding.values.iter().any(|v| !v.is_finite()) {
        return Err(IndexError::InvalidEmbedding("embedding contains non-finite values".into()));
    }
    let unit = Embedding::normalized(embedding.values.clone(), embedding.model_version.clone());
    if unit.norm() == 0.0 {
        return Err(IndexError::InvalidEmbedding("embedding has zero norm".into()));
    }
    Ok(unit)
}
