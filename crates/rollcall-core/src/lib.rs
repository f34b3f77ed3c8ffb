//! rollcall-core — Face normalization, detection, embedding and aggregation.
//!
//! Uses SCRFD for face detection and ArcFace (or the legacy SFace model) for
//! recognition, both running via ONNX Runtime for CPU inference.

pub mod aggregator;
pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod normalizer;
pub mod recognizer;
pub mod types;

pub use aggregator::{aggregate, aggregate_by_orientation, AggregateError};
pub use embedder::{select_primary_face, ActiveModel, EmbedError, FaceEmbedder, OnnxFaceEmbedder};
pub use normalizer::{ImageSource, InvalidImage, NormalizedImage};
pub use types::{
    cosine_similarity, BoundingBox, DetectedFace, DimensionMismatch, Embedding, ModelFamily, Orientation,
};

use std::path::PathBuf;

/// Base data directory: `$XDG_DATA_HOME/rollcall`, or `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Directory holding the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
