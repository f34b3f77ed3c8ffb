//! Combine several enrollment embeddings into one reference vector.
//!
//! The arithmetic mean of unit vectors, re-normalized, approximates their
//! centroid direction on the hypersphere. Inputs are accumulated in a
//! canonical order in f64 so the result does not depend on input order.

use crate::types::{DimensionMismatch, Embedding, Orientation};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error("no embeddings to aggregate")]
    InsufficientSamples,
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("embeddings come from different models: {expected:?} vs {actual:?}")]
    ModelMismatch {
        expected: Option<String>,
        actual: Option<String>,
    },
    #[error("embeddings cancel out; mean vector has zero length")]
    Degenerate,
}

/// Mean of `embeddings`, re-normalized to unit length.
///
/// A single embedding is returned unchanged.
pub fn aggregate(embeddings: &[Embedding]) -> Result<Embedding, AggregateError> {
    let first = embeddings.first().ok_or(AggregateError::InsufficientSamples)?;
    check_compatible(first, embeddings)?;

    if embeddings.len() == 1 {
        return Ok(first.clone());
    }

    let mut ordered: Vec<&Embedding> = embeddings.iter().collect();
    ordered.sort_by(|a, b| {
        a.values
            .iter()
            .zip(b.values.iter())
            .map(|(x, y)| x.total_cmp(y))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut sum = vec![0.0f64; first.dimension()];
    for e in ordered {
        for (acc, v) in sum.iter_mut().zip(e.values.iter()) {
            *acc += *v as f64;
        }
    }

    let norm = sum.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm <= f64::EPSILON {
        return Err(AggregateError::Degenerate);
    }
    let values = sum.iter().map(|v| (v / norm) as f32).collect();

    tracing::debug!(samples = embeddings.len(), dimension = first.dimension(), "embeddings aggregated");

    Ok(Embedding {
        values,
        model_version: first.model_version.clone(),
    })
}

/// Pose-balanced aggregate of orientation-labeled samples.
///
/// Samples are bucketed by orientation (unlabeled samples form their own
/// bucket), each bucket is averaged independently, then the bucket centroids
/// are averaged with equal weight, so an over-represented pose cannot
/// dominate the reference.
pub fn aggregate_by_orientation(
    samples: &[(Option<Orientation>, Embedding)],
) -> Result<Embedding, AggregateError> {
    let mut buckets: BTreeMap<Option<Orientation>, Vec<Embedding>> = BTreeMap::new();
    for (orientation, embedding) in samples {
        buckets.entry(*orientation).or_default().push(embedding.clone());
    }

    let centroids = buckets
        .iter()
        .map(|(orientation, bucket)| {
            let centroid = aggregate(bucket)?;
            tracing::debug!(
                orientation = orientation.map(Orientation::as_str).unwrap_or("unlabeled"),
                samples = bucket.len(),
                "orientation bucket aggregated"
            );
            Ok(centroid)
        })
        .collect::<Result<Vec<_>, AggregateError>>()?;

    aggregate(&centroids)
}

fn check_compatible(first: &Embedding, embeddings: &[Embedding]) -> Result<(), AggregateError> {
    for e in embeddings {
        if e.dimension() != first.dimension() {
            return Err(DimensionMismatch {
                expected: first.dimension(),
                actual: e.dimension(),
            }
            .into());
        }
        if e.model_version != first.model_version {
            return Err(AggregateError::ModelMismatch {
                expected: first.model_version.clone(),
                actual: e.model_version.clone(),
            });
        }
    }
    Ok(())
}
