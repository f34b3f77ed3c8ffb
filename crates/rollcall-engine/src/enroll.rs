//! Enrollment: several photos of one person in, one reference embedding out.
//!
//! Each sample is normalized, detected and embedded on its own. A sample
//! that cannot be decoded, holds no face or fails inference is recorded and
//! skipped; only an unavailable model aborts the whole enrollment. If enough
//! samples survive, they are aggregated and the reference is upserted,
//! replacing any previous one.

use crate::config::Config;
use crate::error::EngineError;
use rollcall_core::{
    aggregate, aggregate_by_orientation, normalizer, select_primary_face, DimensionMismatch, EmbedError, Embedding,
    FaceEmbedder, ImageSource, Orientation,
};
use rollcall_index::{IdentityMetadata, SimilarityIndex};
use serde::{Deserialize, Serialize};

/// One enrollment photo, optionally labeled with the head pose it shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentImage {
    pub image: ImageSource,
    #[serde(default)]
    pub orientation: Option<Orientation>,
}

impl EnrollmentImage {
    pub fn new(image: ImageSource) -> Self {
        Self {
            image,
            orientation: None,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = Some(orientation);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    pub identity_id: String,
    pub images: Vec<EnrollmentImage>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollmentPolicy {
    pub min_usable_samples: usize,
    pub max_images: usize,
}

impl From<&Config> for EnrollmentPolicy {
    fn from(config: &Config) -> Self {
        Self {
            min_usable_samples: config.min_usable_samples,
            max_images: config.max_enrollment_images,
        }
    }
}

/// What happened to one enrollment sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SampleStatus {
    Usable { detection_score: f32, faces_detected: usize },
    InvalidImage { reason: String },
    NoFace,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    /// Position of the sample in the request.
    pub index: usize,
    pub orientation: Option<Orientation>,
    #[serde(flatten)]
    pub status: SampleStatus,
}

impl SampleOutcome {
    pub fn is_usable(&self) -> bool {
        matches!(self.status, SampleStatus::Usable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentReport {
    pub identity_id: String,
    pub stored_id: String,
    pub usable: usize,
    pub total: usize,
    pub dimension: usize,
    pub model_tag: Option<String>,
    pub samples: Vec<SampleOutcome>,
}

pub struct Enroller<'a> {
    embedder: &'a dyn FaceEmbedder,
    index: &'a dyn SimilarityIndex,
    policy: EnrollmentPolicy,
}

impl<'a> Enroller<'a> {
    pub fn new(embedder: &'a dyn FaceEmbedder, index: &'a dyn SimilarityIndex, policy: EnrollmentPolicy) -> Self {
        Self {
            embedder,
            index,
            policy,
        }
    }

    pub fn enroll(&self, request: &EnrollmentRequest) -> Result<EnrollmentReport, EngineError> {
        let identity_id = request.identity_id.trim();
        if identity_id.is_empty() {
            return Err(EngineError::InvalidRequest("identity_id is empty".into()));
        }
        let total = request.images.len();
        if total == 0 || total > self.policy.max_images {
            return Err(EngineError::InvalidRequest(format!(
                "expected 1 to {} enrollment images, got {total}",
                self.policy.max_images
            )));
        }

        // Fail before any inference if the index holds another model's vectors.
        let active = self.embedder.active_model()?;
        if let Some(expected) = self.index.stats()?.dimension {
            if expected != active.dimension {
                return Err(DimensionMismatch {
                    expected,
                    actual: active.dimension,
                }
                .into());
            }
        }

        let mut samples = Vec::with_capacity(total);
        let mut usable: Vec<(Option<Orientation>, Embedding)> = Vec::new();
        for (index, image) in request.images.iter().enumerate() {
            let (status, embedding) = self.process_sample(image)?;
            tracing::debug!(identity_id, sample = index, status = ?status, "enrollment sample processed");
            if let Some(embedding) = embedding {
                usable.push((image.orientation, embedding));
            }
            samples.push(SampleOutcome {
                index,
                orientation: image.orientation,
                status,
            });
        }

        if usable.len() < self.policy.min_usable_samples {
            tracing::warn!(
                identity_id,
                usable = usable.len(),
                total,
                required = self.policy.min_usable_samples,
                "enrollment rejected: not enough usable samples"
            );
            return Err(EngineError::InsufficientSamples {
                usable: usable.len(),
                total,
                required: self.policy.min_usable_samples,
                samples,
            });
        }

        let reference = if usable.iter().any(|(orientation, _)| orientation.is_some()) {
            aggregate_by_orientation(&usable)?
        } else {
            let embeddings: Vec<Embedding> = usable.iter().map(|(_, e)| e.clone()).collect();
            aggregate(&embeddings)?
        };

        let mut metadata = IdentityMetadata::new(&reference, usable.len());
        metadata.display_name = request.display_name.clone();
        metadata.contact = request.contact.clone();
        let stored_id = self.index.upsert(identity_id, &reference, metadata)?;

        tracing::info!(
            identity_id,
            usable = usable.len(),
            total,
            dimension = reference.dimension(),
            "identity enrolled"
        );

        Ok(EnrollmentReport {
            identity_id: identity_id.to_string(),
            stored_id,
            usable: usable.len(),
            total,
            dimension: reference.dimension(),
            model_tag: reference.model_version.clone(),
            samples,
        })
    }

    /// Outcome of one sample and its embedding when usable. Only an
    /// unavailable model is returned as an error.
    fn process_sample(&self, image: &EnrollmentImage) -> Result<(SampleStatus, Option<Embedding>), EngineError> {
        let normalized = match normalizer::prepare(&image.image) {
            Ok(normalized) => normalized,
            Err(err) => {
                return Ok((SampleStatus::InvalidImage { reason: err.to_string() }, None));
            }
        };

        let faces = match self.embedder.detect_and_embed(&normalized.image) {
            Ok(faces) => faces,
            Err(err @ EmbedError::ModelUnavailable(_)) => return Err(err.into()),
            Err(err) => return Ok((SampleStatus::Failed { reason: err.to_string() }, None)),
        };

        let faces_detected = faces.len();
        Ok(match select_primary_face(faces) {
            None => (SampleStatus::NoFace, None),
            Some(face) => (
                SampleStatus::Usable {
                    detection_score: face.score(),
                    faces_detected,
                },
                Some(face.embedding),
            ),
        })
    }
}
