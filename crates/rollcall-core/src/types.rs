use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Two embeddings of different lengths were compared or combined.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("embedding dimension mismatch: expected {expected}, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Bounding box for a detected face in source-image pixels, with optional landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Face embedding vector, unit-normalized at rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Build an embedding, L2-normalizing `values`.
    ///
    /// A zero vector is kept as-is; callers that need unit norm must check
    /// [`norm`](Self::norm).
    pub fn normalized(mut values: Vec<f32>, model_version: Option<String>) -> Self {
        l2_normalize(&mut values);
        Self {
            values,
            model_version,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Fails rather than truncating when the dimensions differ. A zero vector
    /// has similarity 0.0 to everything.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, DimensionMismatch> {
        cosine_similarity(&self.values, &other.values)
    }
}

/// Cosine similarity of two raw vectors, in [-1, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, DimensionMismatch> {
    if a.len() != b.len() {
        return Err(DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        Ok((dot / denom).clamp(-1.0, 1.0))
    } else {
        Ok(0.0)
    }
}

/// Scale `v` to unit L2 norm in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// One face found in one image. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    /// Position in the detector's output order for this image (0-based).
    pub sequence: usize,
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

impl DetectedFace {
    /// Detection confidence reported by the detector.
    pub fn score(&self) -> f32 {
        self.bbox.confidence
    }
}

/// Head pose label attached to an enrollment capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Front,
    Left,
    Right,
    Up,
    Down,
}

impl Orientation {
    pub const ALL: [Orientation; 5] = [
        Orientation::Front,
        Orientation::Left,
        Orientation::Right,
        Orientation::Up,
        Orientation::Down,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Front => "front",
            Orientation::Left => "left",
            Orientation::Right => "right",
            Orientation::Up => "up",
            Orientation::Down => "down",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Orientation::ALL
            .into_iter()
            .find(|o| o.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown orientation {s:?} (expected front/left/right/up/down)"))
    }
}

/// Embedding model family. Embeddings from different families are never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// SFace, 128-dimensional. Lower accuracy, lighter detector.
    Legacy,
    /// ArcFace w600k_r50, 512-dimensional.
    Arcface,
}

impl ModelFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelFamily::Legacy => "legacy",
            ModelFamily::Arcface => "arcface",
        }
    }

    /// Families to try, in order, when `self` is the configured choice.
    pub fn fallback_chain(self) -> &'static [ModelFamily] {
        match self {
            ModelFamily::Arcface => &[ModelFamily::Arcface, ModelFamily::Legacy],
            ModelFamily::Legacy => &[ModelFamily::Legacy],
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arcface" => Ok(ModelFamily::Arcface),
            "legacy" => Ok(ModelFamily::Legacy),
            other => Err(format!("unknown model family {other:?} (expected arcface/legacy)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: None }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!(a.similarity(&b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![-1.0, 0.0]);
        assert!((a.similarity(&b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(vec![0.0, 0.0]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b).unwrap(), 0.0);
    }

    #[test]
    fn test_similarity_rejects_dimension_mismatch() {
        let legacy = emb(vec![0.1; 128]);
        let arcface = emb(vec![0.1; 512]);
        let err = legacy.similarity(&arcface).unwrap_err();
        assert_eq!(err, DimensionMismatch { expected: 128, actual: 512 });
    }

    #[test]
    fn test_normalized_has_unit_norm() {
        let e = Embedding::normalized(vec![3.0, 4.0], Some("m".into()));
        assert!((e.norm() - 1.0).abs() < 1e-6);
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert_eq!(e.model_version.as_deref(), Some("m"));
    }

    #[test]
    fn test_normalized_keeps_zero_vector() {
        let e = Embedding::normalized(vec![0.0; 4], None);
        assert_eq!(e.values, vec![0.0; 4]);
    }

    #[test]
    fn test_bbox_area_clamps_inverted_boxes() {
        let b = BoundingBox { x1: 10.0, y1: 10.0, x2: 5.0, y2: 30.0, confidence: 0.9, landmarks: None };
        assert_eq!(b.area(), 0.0);
        let b = BoundingBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 20.0, confidence: 0.9, landmarks: None };
        assert_eq!(b.area(), 200.0);
    }

    #[test]
    fn test_orientation_parse_and_serde() {
        assert_eq!("Left".parse::<Orientation>().unwrap(), Orientation::Left);
        assert!("sideways".parse::<Orientation>().is_err());
        let json = serde_json::to_string(&Orientation::Down).unwrap();
        assert_eq!(json, "\"down\"");
    }

    #[test]
    fn test_model_family_fallback_chain() {
        assert_eq!(ModelFamily::Arcface.fallback_chain(), &[ModelFamily::Arcface, ModelFamily::Legacy]);
        assert_eq!(ModelFamily::Legacy.fallback_chain(), &[ModelFamily::Legacy]);
        assert_eq!("ARCFACE".parse::<ModelFamily>().unwrap(), ModelFamily::Arcface);
    }
}
