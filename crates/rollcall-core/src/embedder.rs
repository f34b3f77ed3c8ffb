//! Detect-and-embed service.
//!
//! [`FaceEmbedder`] is the seam the rest of the system depends on.
//! [`OnnxFaceEmbedder`] is the production implementation. It loads the SCRFD
//! detector and recognizer at most once, on first use, falling back to the
//! legacy model family when the configured family cannot be loaded.
//!
//! ONNX Runtime sessions need `&mut` access to run, so each session sits
//! behind its own mutex and inference on one embedder is serialized. Build
//! several embedders if parallel inference is needed.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{DetectedFace, ModelFamily};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("no embedding model available: {0}")]
    ModelUnavailable(String),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("model lock poisoned")]
    LockPoisoned,
}

/// The model family an embedder is producing, with its output dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveModel {
    pub family: ModelFamily,
    pub dimension: usize,
    pub model_version: &'static str,
}

impl From<ModelFamily> for ActiveModel {
    fn from(family: ModelFamily) -> Self {
        Self {
            family,
            dimension: family.dimension(),
            model_version: family.model_version(),
        }
    }
}

/// Locates faces in a photo and embeds each of them.
pub trait FaceEmbedder: Send + Sync {
    /// Detect every face and return one unit-norm embedding per face, in
    /// detector order. A photo without faces yields an empty list.
    fn detect_and_embed(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, EmbedError>;

    /// Model family currently producing embeddings. May trigger model loading.
    fn active_model(&self) -> Result<ActiveModel, EmbedError>;
}

/// Pick the enrollment subject among several detected faces: the largest by
/// box area.
///
/// This is a size heuristic, not a subject detector; a bystander closer to
/// the camera wins.
pub fn select_primary_face(faces: Vec<DetectedFace>) -> Option<DetectedFace> {
    if faces.len() > 1 {
        tracing::warn!(faces = faces.len(), "multiple faces detected, using largest face");
    }
    faces
        .into_iter()
        .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()).then(b.sequence.cmp(&a.sequence)))
}

/// Loaded detector + recognizer for one model family.
struct Pipeline {
    family: ModelFamily,
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl Pipeline {
    fn load(model_dir: &Path, family: ModelFamily) -> Result<Self, EmbedError> {
        let spec = family.spec();
        let detector = FaceDetector::load(&model_dir.join(spec.detector_file))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(spec.model_file), family)?;
        Ok(Self {
            family,
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }
}

/// ONNX Runtime embedder with lazy, one-time model initialization.
pub struct OnnxFaceEmbedder {
    model_dir: PathBuf,
    preferred: ModelFamily,
    pipeline: OnceLock<Result<Pipeline, String>>,
}

impl OnnxFaceEmbedder {
    /// Create an embedder. No model is loaded until the first call.
    pub fn new(model_dir: impl Into<PathBuf>, preferred: ModelFamily) -> Self {
        Self {
            model_dir: model_dir.into(),
            preferred,
            pipeline: OnceLock::new(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    fn pipeline(&self) -> Result<&Pipeline, EmbedError> {
        self.pipeline
            .get_or_init(|| self.initialize())
            .as_ref()
            .map_err(|reason| EmbedError::ModelUnavailable(reason.clone()))
    }

    fn initialize(&self) -> Result<Pipeline, String> {
        let mut failures = Vec::new();
        for &family in self.preferred.fallback_chain() {
            match Pipeline::load(&self.model_dir, family) {
                Ok(pipeline) => {
                    if family != self.preferred {
                        tracing::warn!(
                            preferred = %self.preferred,
                            active = %family,
                            dimension = family.dimension(),
                            "preferred model family unavailable; using fallback"
                        );
                    } else {
                        tracing::info!(family = %family, dimension = family.dimension(), "embedding models ready");
                    }
                    return Ok(pipeline);
                }
                Err(err) => {
                    tracing::error!(family = %family, error = %err, "failed to load embedding models");
                    failures.push(format!("{family}: {err}"));
                }
            }
        }
        Err(failures.join("; "))
    }
}

impl FaceEmbedder for OnnxFaceEmbedder {
    fn detect_and_embed(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, EmbedError> {
        let pipeline = self.pipeline()?;

        let boxes = {
            let mut detector = pipeline.detector.lock().map_err(|_| EmbedError::LockPoisoned)?;
            detector.detect(image)?
        };
        if boxes.is_empty() {
            tracing::debug!("no face detected");
            return Ok(Vec::new());
        }

        let mut recognizer = pipeline.recognizer.lock().map_err(|_| EmbedError::LockPoisoned)?;
        let faces = boxes
            .into_iter()
            .enumerate()
            .map(|(sequence, bbox)| {
                let embedding = recognizer.extract(image, &bbox)?;
                Ok(DetectedFace {
                    sequence,
                    bbox,
                    embedding,
                })
            })
            .collect::<Result<Vec<_>, EmbedError>>()?;

        tracing::debug!(faces = faces.len(), family = %pipeline.family, "faces embedded");
        Ok(faces)
    }

    fn active_model(&self) -> Result<ActiveModel, EmbedError> {
        Ok(self.pipeline()?.family.into())
    }
}
