//! The assembled pipeline: one embedder, one index, the configured policies.

use crate::config::Config;
use crate::enroll::{Enroller, EnrollmentPolicy, EnrollmentReport, EnrollmentRequest};
use crate::error::EngineError;
use crate::recognize::{Assignment, GreedyAssignment, RecognitionParams, RecognitionRequest, RecognitionResult, Recognizer};
use crate::roster::Roster;
use rollcall_core::{normalizer, FaceEmbedder, ModelFamily, OnnxFaceEmbedder};
use rollcall_index::{AnyIndex, IndexStats, SimilarityIndex};
use serde::{Deserialize, Serialize};

/// Snapshot for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub model_family: Option<ModelFamily>,
    pub model_version: Option<String>,
    pub dimension: Option<usize>,
    /// Why no model is active, if none is.
    pub model_error: Option<String>,
    pub index_metric: String,
    pub index: IndexStats,
}

pub struct Attendance<I: SimilarityIndex = AnyIndex> {
    embedder: Box<dyn FaceEmbedder>,
    index: I,
    enrollment: EnrollmentPolicy,
    recognition: RecognitionParams,
    assignment: Box<dyn Assignment>,
}

impl Attendance<AnyIndex> {
    /// Open the configured index and prepare the ONNX embedder. Models load
    /// on first use, not here.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let index = AnyIndex::open(&config.index)?;
        let embedder = OnnxFaceEmbedder::new(&config.model_dir, config.model_family);
        Self::new(Box::new(embedder), index, config)
    }
}

impl<I: SimilarityIndex> Attendance<I> {
    pub fn new(embedder: Box<dyn FaceEmbedder>, index: I, config: &Config) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            embedder,
            index,
            enrollment: EnrollmentPolicy::from(config),
            recognition: RecognitionParams::from_config(config)?,
            assignment: Box::new(GreedyAssignment),
        })
    }

    /// Replace the face-to-identity resolution strategy.
    pub fn with_assignment(mut self, assignment: Box<dyn Assignment>) -> Self {
        self.assignment = assignment;
        self
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn embedder(&self) -> &dyn FaceEmbedder {
        self.embedder.as_ref()
    }

    pub fn enroll(&self, request: &EnrollmentRequest) -> Result<EnrollmentReport, EngineError> {
        Enroller::new(self.embedder.as_ref(), &self.index, self.enrollment).enroll(request)
    }

    pub fn recognize(&self, request: &RecognitionRequest) -> Result<RecognitionResult, EngineError> {
        let params = RecognitionParams::new(
            request.threshold.unwrap_or(self.recognition.threshold()),
            request.top_k.unwrap_or(self.recognition.top_k()),
        )?;
        let roster = match &request.roster {
            Some(ids) => Roster::resolve(&self.index, ids)?,
            None => Roster::all(&self.index)?,
        };
        let photo = normalizer::prepare(&request.image)?;
        Recognizer::new(self.embedder.as_ref(), &self.index, self.assignment.as_ref()).recognize(
            &photo.image,
            &roster,
            &params,
        )
    }

    /// Tombstone an identity's reference.
    pub fn remove(&self, identity_id: &str) -> Result<bool, EngineError> {
        Ok(self.index.remove(identity_id)?)
    }

    /// Current model and index state. Triggers model loading if needed;
    /// a model failure is reported in the status rather than as an error.
    pub fn status(&self) -> Result<EngineStatus, EngineError> {
        let (model, model_error) = match self.embedder.active_model() {
            Ok(active) => (Some(active), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Ok(EngineStatus {
            model_family: model.map(|m| m.family),
            model_version: model.map(|m| m.model_version.to_string()),
            dimension: model.map(|m| m.dimension),
            model_error,
            index_metric: self.index.native_metric().as_str().to_string(),
            index: self.index.stats()?,
        })
    }
}
