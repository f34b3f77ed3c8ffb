//! Document-store index backed by SQLite.
//!
//! One row per identity, keyed by identity id, with the reference vector
//! stored as a little-endian f32 blob and metadata as JSON. Queries scan the
//! active rows and score them as cosine distance, the scale document stores
//! usually expose; [`rank`] converts back to raw cosine.

use crate::error::{IndexError, Result};
use crate::record::{stored_id, unit_copy, validate_id, IdentityMetadata, IndexStats, QueryHit, SearchParams, StoredIdentity};
use crate::similarity::{dot, rank, NativeMetric};
use crate::SimilarityIndex;
use chrono::Utc;
use rollcall_core::{DimensionMismatch, Embedding};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS identities (
    identity_id   TEXT PRIMARY KEY,
    doc_id        TEXT NOT NULL,
    dimension     INTEGER NOT NULL,
    model_version TEXT,
    embedding     BLOB NOT NULL,
    metadata      TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    removed_at    TEXT
);
CREATE INDEX IF NOT EXISTS identities_active ON identities(removed_at);
";

pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Open or create the index database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let index = Self::with_connection(conn)?;
        tracing::info!(path = %path.display(), "sqlite index opened");
        Ok(index)
    }

    /// Transient database, gone when dropped.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Hard-delete `identity_id`, active or tombstoned.
    pub fn purge(&self, identity_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM identities WHERE identity_id = ?1", params![identity_id])?;
        if deleted > 0 {
            tracing::info!(identity_id, "identity purged");
        }
        Ok(deleted > 0)
    }

    /// Drop every row and release the dimension lock. Returns the number of
    /// rows removed.
    pub fn reset(&self) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM identities", [])?;
        tracing::warn!(records = deleted, "sqlite index reset");
        Ok(deleted)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| IndexError::LockPoisoned)
    }
}

fn locked_dimension(conn: &Connection) -> Result<Option<usize>> {
    let dimension: Option<i64> = conn
        .query_row("SELECT dimension FROM identities LIMIT 1", [], |row| row.get(0))
        .optional()?;
    Ok(dimension.map(|d| d as usize))
}

fn check_dimension(conn: &Connection, actual: usize) -> Result<Option<usize>> {
    let locked = locked_dimension(conn)?;
    match locked {
        Some(expected) if expected != actual => Err(DimensionMismatch { expected, actual }.into()),
        _ => Ok(locked),
    }
}

fn encode_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_blob(identity_id: &str, blob: &[u8], dimension: i64) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(IndexError::Corrupt {
            identity_id: identity_id.to_string(),
            reason: format!("embedding blob length {} is not a multiple of 4", blob.len()),
        });
    }
    let values: Vec<f32> = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if values.len() as i64 != dimension {
        return Err(IndexError::Corrupt {
            identity_id: identity_id.to_string(),
            reason: format!("blob holds {} values, row says {dimension}", values.len()),
        });
    }
    Ok(values)
}

impl SimilarityIndex for SqliteIndex {
    fn native_metric(&self) -> NativeMetric {
        NativeMetric::CosineDistance
    }

    fn upsert(&self, identity_id: &str, embedding: &Embedding, mut metadata: IdentityMetadata) -> Result<String> {
        validate_id(identity_id)?;
        let unit = unit_copy(embedding)?;
        metadata.dimension = unit.dimension();
        let doc_id = stored_id(identity_id);
        let metadata_json = serde_json::to_string(&metadata)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        check_dimension(&tx, unit.dimension())?;
        tx.execute(
            "INSERT INTO identities (
                identity_id, doc_id, dimension, model_version, embedding, metadata, updated_at, removed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)
             ON CONFLICT(identity_id) DO UPDATE SET
                doc_id = excluded.doc_id,
                dimension = excluded.dimension,
                model_version = excluded.model_version,
                embedding = excluded.embedding,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at,
                removed_at = NULL",
            params![
                identity_id,
                doc_id,
                unit.dimension() as i64,
                unit.model_version,
                encode_blob(&unit.values),
                metadata_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        tracing::debug!(identity_id, dimension = unit.dimension(), "identity upserted");
        Ok(doc_id)
    }

    fn search(&self, embedding: &Embedding, params: &SearchParams<'_>) -> Result<Vec<QueryHit>> {
        let conn = self.lock()?;
        if check_dimension(&conn, embedding.dimension())?.is_none() {
            return Ok(Vec::new());
        }
        let query = unit_copy(embedding)?;

        let mut stmt = conn.prepare(
            "SELECT identity_id, dimension, embedding, metadata FROM identities WHERE removed_at IS NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (identity_id, dimension, blob, metadata) = row?;
            if !params.admits(&identity_id) {
                continue;
            }
            let values = decode_blob(&identity_id, &blob, dimension)?;
            let distance = 1.0 - dot(&query.values, &values)?;
            let metadata: IdentityMetadata = serde_json::from_str(&metadata)?;
            scored.push((identity_id, distance, metadata));
        }

        Ok(rank(scored, self.native_metric(), params))
    }

    fn remove(&self, identity_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE identities SET removed_at = ?2 WHERE identity_id = ?1 AND removed_at IS NULL",
            params![identity_id, Utc::now().to_rfc3339()],
        )?;
        if updated > 0 {
            tracing::info!(identity_id, "identity removed");
        }
        Ok(updated > 0)
    }

    fn fetch(&self, identity_id: &str) -> Result<Option<StoredIdentity>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT doc_id, dimension, model_version, embedding, metadata
                 FROM identities WHERE identity_id = ?1 AND removed_at IS NULL",
                params![identity_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((doc_id, dimension, model_version, blob, metadata)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredIdentity {
            identity_id: identity_id.to_string(),
            stored_id: doc_id,
            embedding: Embedding {
                values: decode_blob(identity_id, &blob, dimension)?,
                model_version,
            },
            metadata: serde_json::from_str(&metadata)?,
        }))
    }

    fn stats(&self) -> Result<IndexStats> {
        let conn = self.lock()?;
        let (active, tombstoned): (i64, i64) = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN removed_at IS NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN removed_at IS NULL THEN 0 ELSE 1 END), 0)
             FROM identities",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(IndexStats {
            count: active as usize,
            dimension: locked_dimension(&conn)?,
            tombstoned: tombstoned as usize,
        })
    }

    fn identities(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT identity_id FROM identities WHERE removed_at IS NULL ORDER BY identity_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
