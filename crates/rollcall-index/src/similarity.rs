//! The one similarity convention every backend reports in.
//!
//! Public results are raw cosine similarity in [-1, 1]. Each backend declares
//! the scale its storage computes natively and hands native scores to
//! [`rank`], which converts, filters and orders them. Thresholds therefore
//! mean the same thing whichever backend is configured.

use crate::record::{IdentityMetadata, QueryHit, SearchParams};
use rollcall_core::DimensionMismatch;

/// Native score scale of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeMetric {
    /// Dot product of unit vectors, equal to cosine.
    InnerProduct,
    /// `1 - cosine`, in [0, 2]; lower is closer.
    CosineDistance,
}

impl NativeMetric {
    /// Convert a native score to raw cosine similarity.
    pub fn to_cosine(self, native: f32) -> f32 {
        let cosine = match self {
            NativeMetric::InnerProduct => native,
            NativeMetric::CosineDistance => 1.0 - native,
        };
        cosine.clamp(-1.0, 1.0)
    }

    /// Convert raw cosine similarity to this backend's native score.
    pub fn from_cosine(self, cosine: f32) -> f32 {
        match self {
            NativeMetric::InnerProduct => cosine,
            NativeMetric::CosineDistance => 1.0 - cosine,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NativeMetric::InnerProduct => "inner_product",
            NativeMetric::CosineDistance => "cosine_distance",
        }
    }
}

/// Dot product of two slices. Slices of different lengths are an error,
/// never a truncated score.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> Result<f32, DimensionMismatch> {
    if a.len() != b.len() {
        return Err(DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// Turn native scores into the public ranked hit list.
///
/// Hits below `min_similarity` are dropped, the rest are sorted by similarity
/// descending (ties by identity id) and cut to `top_k`.
pub(crate) fn rank<I>(scored: I, metric: NativeMetric, params: &SearchParams<'_>) -> Vec<QueryHit>
where
    I: IntoIterator<Item = (String, f32, IdentityMetadata)>,
{
    if params.top_k == 0 {
        return Vec::new();
    }

    let mut hits: Vec<QueryHit> = scored
        .into_iter()
        .map(|(identity_id, native, metadata)| QueryHit {
            identity_id,
            similarity: metric.to_cosine(native),
            metadata,
        })
        .filter(|hit| hit.similarity >= params.min_similarity)
        .collect();

    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.identity_id.cmp(&b.identity_id))
    });
    hits.truncate(params.top_k);
    hits
}
