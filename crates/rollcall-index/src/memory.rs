//! In-process index with optional JSON file persistence.
//!
//! Records live in a `BTreeMap` behind a `RwLock`. When a path is set, every
//! mutation is written to a temporary file and renamed over the index file
//! while the write lock is held, so readers never observe a half-applied
//! change and a failed write leaves memory untouched.

use crate::error::{IndexError, Result};
use crate::record::{stored_id, unit_copy, validate_id, IdentityMetadata, IndexStats, QueryHit, SearchParams, StoredIdentity};
use crate::similarity::{dot, rank, NativeMetric};
use crate::SimilarityIndex;
use chrono::{DateTime, Utc};
use rollcall_core::{DimensionMismatch, Embedding};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    stored_id: String,
    embedding: Embedding,
    metadata: IdentityMetadata,
    #[serde(default)]
    removed_at: Option<DateTime<Utc>>,
}

impl Record {
    fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }
}

type Records = BTreeMap<String, Record>;

pub struct MemoryIndex {
    records: RwLock<Records>,
    path: Option<PathBuf>,
}

impl MemoryIndex {
    /// Empty, purely in-memory index.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records::new()),
            path: None,
        }
    }

    /// Index persisted to `path`, loading existing records if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let records: Records = if path.exists() {
            let bytes = std::fs::read(path)?;
            serde_json::from_slice(&bytes)?
        } else {
            Records::new()
        };

        if let Some((id, bad)) = records.iter().find(|(_, r)| r.embedding.dimension() != r.metadata.dimension) {
            return Err(IndexError::Corrupt {
                identity_id: id.clone(),
                reason: format!(
                    "stored vector has {} values, metadata says {}",
                    bad.embedding.dimension(),
                    bad.metadata.dimension
                ),
            });
        }
        if let Some(expected) = locked_dimension(&records) {
            if let Some((id, bad)) = records.iter().find(|(_, r)| r.embedding.dimension() != expected) {
                return Err(IndexError::Corrupt {
                    identity_id: id.clone(),
                    reason: format!(
                        "stored vector has {} values, index holds {expected}-dimensional vectors",
                        bad.embedding.dimension()
                    ),
                });
            }
        }

        tracing::info!(path = %path.display(), records = records.len(), "memory index opened");
        Ok(Self {
            records: RwLock::new(records),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Hard-delete `identity_id`, active or tombstoned.
    pub fn purge(&self, identity_id: &str) -> Result<bool> {
        let mut records = self.write()?;
        let Some(old) = records.remove(identity_id) else {
            return Ok(false);
        };
        if let Err(err) = self.persist(&records) {
            records.insert(identity_id.to_string(), old);
            return Err(err);
        }
        tracing::info!(identity_id, "identity purged");
        Ok(true)
    }

    /// Drop every record and release the dimension lock. Returns the number
    /// of records removed.
    pub fn reset(&self) -> Result<usize> {
        let mut records = self.write()?;
        let old = std::mem::take(&mut *records);
        if let Err(err) = self.persist(&records) {
            *records = old;
            return Err(err);
        }
        tracing::warn!(records = old.len(), "memory index reset");
        Ok(old.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Records>> {
        self.records.read().map_err(|_| IndexError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Records>> {
        self.records.write().map_err(|_| IndexError::LockPoisoned)
    }

    fn persist(&self, records: &Records) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(records)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Dimension every record in `records` shares, tombstones included.
fn locked_dimension(records: &Records) -> Option<usize> {
    records.values().next().map(|r| r.embedding.dimension())
}

fn check_dimension(records: &Records, actual: usize) -> Result<()> {
    match locked_dimension(records) {
        Some(expected) if expected != actual => Err(DimensionMismatch { expected, actual }.into()),
        _ => Ok(()),
    }
}

impl SimilarityIndex for MemoryIndex {
    fn native_metric(&self) -> NativeMetric {
        NativeMetric::InnerProduct
    }

    fn upsert(&self, identity_id: &str, embedding: &Embedding, mut metadata: IdentityMetadata) -> Result<String> {
        validate_id(identity_id)?;
        let unit = unit_copy(embedding)?;
        metadata.dimension = unit.dimension();

        let mut records = self.write()?;
        check_dimension(&records, unit.dimension())?;

        let record = Record {
            stored_id: stored_id(identity_id),
            embedding: unit,
            metadata,
            removed_at: None,
        };
        let doc_id = record.stored_id.clone();
        let old = records.insert(identity_id.to_string(), record);
        if let Err(err) = self.persist(&records) {
            match old {
                Some(old) => records.insert(identity_id.to_string(), old),
                None => records.remove(identity_id),
            };
            return Err(err);
        }

        tracing::debug!(identity_id, replaced = old.is_some(), "identity upserted");
        Ok(doc_id)
    }

    fn search(&self, embedding: &Embedding, params: &SearchParams<'_>) -> Result<Vec<QueryHit>> {
        let records = self.read()?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        check_dimension(&records, embedding.dimension())?;
        let query = unit_copy(embedding)?;

        let scored = records
            .iter()
            .filter(|(id, r)| r.is_active() && params.admits(id))
            .map(|(id, r)| Ok((id.clone(), dot(&query.values, &r.embedding.values)?, r.metadata.clone())))
            .collect::<Result<Vec<_>>>()?;

        Ok(rank(scored, self.native_metric(), params))
    }

    fn remove(&self, identity_id: &str) -> Result<bool> {
        let mut records = self.write()?;
        let Some(record) = records.get_mut(identity_id).filter(|r| r.is_active()) else {
            return Ok(false);
        };
        record.removed_at = Some(Utc::now());
        if let Err(err) = self.persist(&records) {
            if let Some(record) = records.get_mut(identity_id) {
                record.removed_at = None;
            }
            return Err(err);
        }
        tracing::info!(identity_id, "identity removed");
        Ok(true)
    }

    fn fetch(&self, identity_id: &str) -> Result<Option<StoredIdentity>> {
        let records = self.read()?;
        Ok(records.get(identity_id).filter(|r| r.is_active()).map(|r| StoredIdentity {
            identity_id: identity_id.to_string(),
            stored_id: r.stored_id.clone(),
            embedding: r.embedding.clone(),
            metadata: r.metadata.clone(),
        }))
    }

    fn stats(&self) -> Result<IndexStats> {
        let records = self.read()?;
        let count = records.values().filter(|r| r.is_active()).count();
        Ok(IndexStats {
            count,
            dimension: locked_dimension(&records),
            tombstoned: records.len() - count,
        })
    }

    fn identities(&self) -> Result<Vec<String>> {
        let records = self.read()?;
        Ok(records
            .iter()
            .filter(|(_, r)| r.is_active())
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding::normalized(values, Some("w600k_r50".into()))
    }

    fn meta(e: &Embedding) -> IdentityMetadata {
        IdentityMetadata::new(e, 5)
    }

    fn seeded() -> MemoryIndex {
        let index = MemoryIndex::new();
        for (id, v) in [("alice", vec![1.0, 0.0, 0.0]), ("bob", vec![0.0, 1.0, 0.0]), ("carol", vec![0.7, 0.7, 0.1])] {
            let e = emb(v);
            index.upsert(id, &e, meta(&e)).unwrap();
        }
        index
    }

    #[test]
    fn test_self_similarity_ranks_first() {
        let index = seeded();
        let alice = index.fetch("alice").unwrap().unwrap().embedding;
        let hits = index.query(&alice, 1, 0.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].identity_id, "alice");
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_query_descending_and_thresholded() {
        let index = seeded();
        let hits = index.query(&emb(vec![0.9, 0.4, 0.0]), 5, 0.3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.identity_id.as_str()).collect();
        assert_eq!(ids, vec!["carol", "alice", "bob"]);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));

        let strict = index.query(&emb(vec![0.9, 0.4, 0.0]), 5, 0.95).unwrap();
        assert!(strict.iter().all(|h| h.similarity >= 0.95));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let index = MemoryIndex::new();
        let e = emb(vec![0.2, 0.4, 0.9]);
        let first = index.upsert("s1", &e, meta(&e)).unwrap();
        let second = index.upsert("s1", &e, meta(&e)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "identity_s1");
        assert_eq!(index.stats().unwrap().count, 1);
    }

    #[test]
    fn test_upsert_overwrites_instead_of_merging() {
        let index = MemoryIndex::new();
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        index.upsert("s1", &a, meta(&a)).unwrap();
        index.upsert("s1", &b, meta(&b)).unwrap();
        assert_eq!(index.fetch("s1").unwrap().unwrap().embedding.values, b.values);
    }

    #[test]
    fn test_upsert_renormalizes() {
        let index = MemoryIndex::new();
        let raw = Embedding { values: vec![3.0, 4.0], model_version: None };
        index.upsert("s1", &raw, meta(&raw)).unwrap();
        let stored = index.fetch("s1").unwrap().unwrap().embedding;
        assert!((stored.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_remove_tombstones() {
        let index = seeded();
        assert!(index.remove("bob").unwrap());
        assert!(!index.remove("bob").unwrap());
        assert!(!index.remove("nobody").unwrap());
        assert!(index.fetch("bob").unwrap().is_none());

        let hits = index.query(&emb(vec![0.0, 1.0, 0.0]), 5, -1.0).unwrap();
        assert!(hits.iter().all(|h| h.identity_id != "bob"));

        let stats = index.stats().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.tombstoned, 1);
        assert_eq!(index.identities().unwrap(), vec!["alice", "carol"]);
    }

    #[test]
    fn test_reupsert_clears_tombstone() {
        let index = seeded();
        index.remove("bob").unwrap();
        let e = emb(vec![0.0, 1.0, 0.0]);
        index.upsert("bob", &e, meta(&e)).unwrap();
        assert!(index.fetch("bob").unwrap().is_some());
        assert_eq!(index.stats().unwrap().tombstoned, 0);
    }

    #[test]
    fn test_dimension_lock() {
        let index = seeded();
        let wide = emb(vec![1.0; 512]);
        assert!(matches!(
            index.upsert("dave", &wide, meta(&wide)),
            Err(IndexError::DimensionMismatch(DimensionMismatch { expected: 3, actual: 512 }))
        ));
        assert!(matches!(index.query(&wide, 5, 0.0), Err(IndexError::DimensionMismatch(_))));

        // A tombstone keeps the lock; a purge of everything releases it.
        for id in ["alice", "bob", "carol"] {
            index.remove(id).unwrap();
        }
        assert!(index.upsert("dave", &wide, meta(&wide)).is_err());
        for id in ["alice", "bob", "carol"] {
            assert!(index.purge(id).unwrap());
        }
        assert_eq!(index.stats().unwrap().dimension, None);
        index.upsert("dave", &wide, meta(&wide)).unwrap();
        assert_eq!(index.stats().unwrap().dimension, Some(512));
    }

    #[test]
    fn test_restricted_search() {
        let index = seeded();
        let roster: std::collections::HashSet<String> = ["bob".to_string()].into_iter().collect();
        let params = SearchParams::new(5, -1.0).restricted_to(&roster);
        let hits = index.search(&emb(vec![1.0, 0.0, 0.0]), &params).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].identity_id, "bob");
    }

    #[test]
    fn test_empty_index_queries_cleanly() {
        let index = MemoryIndex::new();
        assert!(index.query(&emb(vec![1.0; 128]), 5, 0.0).unwrap().is_empty());
        assert_eq!(index.stats().unwrap(), IndexStats::default());
    }

    #[test]
    fn test_file_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let e = emb(vec![0.12, -0.5, 0.33, 0.8]);
        {
            let index = MemoryIndex::open(&path).unwrap();
            index.upsert("s1", &e, meta(&e).with_display_name("Ana")).unwrap();
            index.upsert("s2", &emb(vec![1.0, 0.0, 0.0, 0.0]), meta(&e)).unwrap();
            index.remove("s2").unwrap();
        }
        let index = MemoryIndex::open(&path).unwrap();
        let stored = index.fetch("s1").unwrap().unwrap();
        assert!((stored.embedding.similarity(&e).unwrap() - 1.0).abs() < 1e-5);
        assert_eq!(stored.metadata.display_name.as_deref(), Some("Ana"));
        assert!(index.fetch("s2").unwrap().is_none());
        assert_eq!(index.stats().unwrap().tombstoned, 1);

        assert_eq!(index.reset().unwrap(), 2);
        assert_eq!(MemoryIndex::open(&path).unwrap().stats().unwrap(), IndexStats::default());
    }

    #[test]
    fn test_open_rejects_mixed_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let mut records = Records::new();
        for (id, values) in [("a", vec![1.0, 0.0, 0.0]), ("b", vec![1.0, 0.0])] {
            let e = emb(values);
            records.insert(
                id.to_string(),
                Record {
                    stored_id: stored_id(id),
                    metadata: meta(&e),
                    embedding: e,
                    removed_at: None,
                },
            );
        }
        std::fs::write(&path, serde_json::to_vec(&records).unwrap()).unwrap();

        let err = MemoryIndex::open(&path).err().unwrap();
        assert!(matches!(err, IndexError::Corrupt { ref identity_id, .. } if identity_id == "b"), "{err}");

        // Scoring never truncates the longer vector, even if such records get in.
        let index = MemoryIndex {
            records: RwLock::new(records),
            path: None,
        };
        assert!(matches!(
            index.query(&emb(vec![1.0, 0.0, 0.0]), 5, -1.0),
            Err(IndexError::DimensionMismatch(DimensionMismatch { expected: 3, actual: 2 }))
        ));
    }

    #[test]
    fn test_queries_see_whole_records_during_overwrites() {
        let index = seeded();
        let first = emb(vec![1.0, 0.0, 0.0]);
        let second = emb(vec![0.0, 1.0, 0.0]);
        let query = emb(vec![0.8, 0.6, 0.0]);
        let restricted: std::collections::HashSet<String> = ["alice".to_string()].into_iter().collect();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0..200 {
                    let e = if round % 2 == 0 { &second } else { &first };
                    index.upsert("alice", e, meta(e)).unwrap();
                    if round % 7 == 0 {
                        index.remove("alice").unwrap();
                    }
                }
            });
            for _ in 0..4 {
                scope.spawn(|| {
                    let params = SearchParams::new(5, -1.0).restricted_to(&restricted);
                    for _ in 0..200 {
                        let hits = index.search(&query, &params).unwrap();
                        assert!(hits.len() <= 1);
                        if let Some(hit) = hits.first() {
                            let s = hit.similarity;
                            assert!((s - 0.8).abs() < 1e-5 || (s - 0.6).abs() < 1e-5, "similarity {s}");
                        }
                        if let Some(stored) = index.fetch("alice").unwrap() {
                            let v = &stored.embedding.values;
                            assert!(*v == first.values || *v == second.values, "{v:?}");
                        }
                    }
                });
            }
        });
    }
}
