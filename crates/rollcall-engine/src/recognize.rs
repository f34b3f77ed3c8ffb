//! Classroom recognition: every face in one photo against one roster.

use crate::config::{validate_threshold, Config, ConfigError};
use crate::error::EngineError;
use crate::roster::Roster;
use rollcall_core::{BoundingBox, DimensionMismatch, FaceEmbedder, ImageSource};
use rollcall_index::{QueryHit, SearchParams, SimilarityIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Threshold and candidate count for one recognition call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionParams {
    threshold: f32,
    top_k: usize,
}

impl RecognitionParams {
    /// Validated parameters. The threshold must be inside the safe range.
    pub fn new(threshold: f32, top_k: usize) -> Result<Self, ConfigError> {
        if top_k == 0 {
            return Err(ConfigError::InvalidTopK);
        }
        Ok(Self {
            threshold: validate_threshold(threshold)?,
            top_k,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(config.recognition_threshold, config.top_k)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }
}

/// Recognition call as received over the service boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionRequest {
    pub image: ImageSource,
    /// Identities eligible for matching. `None` means everyone enrolled.
    #[serde(default)]
    pub roster: Option<Vec<String>>,
    /// Overrides the configured threshold for this call.
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub identity_id: String,
    /// Raw cosine similarity.
    pub similarity: f32,
    /// Detector-order index of the face that matched.
    pub face_sequence: usize,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub faces_detected: usize,
    /// At most one match per identity and per face, best similarity first.
    pub matches: Vec<Match>,
    pub unmatched_face_count: usize,
    /// Set when the roster had no enrolled identity to match against.
    pub roster_empty: bool,
    pub roster_size: usize,
    pub threshold: f32,
    /// Roster members that have no reference embedding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unenrolled: Vec<String>,
}

/// Resolves competing candidates into at most one identity per face and one
/// face per identity.
pub trait Assignment: Send + Sync {
    /// `candidates[i]` holds the thresholded hits for face `i` in detector
    /// order, best first. Returns the chosen hit index per face.
    ///
    /// A pick that names an identity an earlier face already took is
    /// dropped by the recognizer.
    fn assign(&self, candidates: &[Vec<QueryHit>]) -> Vec<Option<usize>>;
}

/// First come, first served in detector order: each face takes its best
/// candidate that an earlier face has not already claimed.
///
/// Not globally optimal. An early face with a weaker claim can take an
/// identity a later face matches better.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyAssignment;

impl Assignment for GreedyAssignment {
    fn assign(&self, candidates: &[Vec<QueryHit>]) -> Vec<Option<usize>> {
        let mut claimed: HashSet<&str> = HashSet::new();
        candidates
            .iter()
            .map(|hits| {
                let pick = hits.iter().position(|hit| !claimed.contains(hit.identity_id.as_str()))?;
                claimed.insert(hits[pick].identity_id.as_str());
                Some(pick)
            })
            .collect()
    }
}

pub struct Recognizer<'a> {
    embedder: &'a dyn FaceEmbedder,
    index: &'a dyn SimilarityIndex,
    assignment: &'a dyn Assignment,
}

impl<'a> Recognizer<'a> {
    pub fn new(
        embedder: &'a dyn FaceEmbedder,
        index: &'a dyn SimilarityIndex,
        assignment: &'a dyn Assignment,
    ) -> Self {
        Self {
            embedder,
            index,
            assignment,
        }
    }

    /// Detect every face in `image` and match each against `roster`.
    pub fn recognize(
        &self,
        image: &image::RgbImage,
        roster: &Roster,
        params: &RecognitionParams,
    ) -> Result<RecognitionResult, EngineError> {
        let faces = self.embedder.detect_and_embed(image)?;
        let mut result = RecognitionResult {
            faces_detected: faces.len(),
            matches: Vec::new(),
            unmatched_face_count: faces.len(),
            roster_empty: roster.is_empty(),
            roster_size: roster.len(),
            threshold: params.threshold(),
            unenrolled: roster.unenrolled().to_vec(),
        };

        if faces.is_empty() {
            tracing::info!(faces = 0, roster = roster.len(), "no faces in photo");
            return Ok(result);
        }
        if roster.is_empty() {
            tracing::info!(faces = faces.len(), "roster empty; nothing to match");
            return Ok(result);
        }
        if let Some(expected) = roster.dimension() {
            if let Some(face) = faces.iter().find(|f| f.embedding.dimension() != expected) {
                return Err(DimensionMismatch {
                    expected,
                    actual: face.embedding.dimension(),
                }
                .into());
            }
        }

        let search = SearchParams::new(params.top_k(), params.threshold()).restricted_to(roster.members());
        let candidates = faces
            .iter()
            .map(|face| self.index.search(&face.embedding, &search))
            .collect::<Result<Vec<_>, _>>()?;

        let picks = self.assignment.assign(&candidates);
        for ((face, hits), pick) in faces.iter().zip(candidates.iter()).zip(picks) {
            let Some(hit) = pick.and_then(|i| hits.get(i)) else {
                tracing::debug!(face = face.sequence, candidates = hits.len(), "face unmatched");
                continue;
            };
            if result.matches.iter().any(|m| m.identity_id == hit.identity_id) {
                tracing::warn!(
                    face = face.sequence,
                    identity_id = %hit.identity_id,
                    "assignment reused an identity; face left unmatched"
                );
                continue;
            }
            tracing::debug!(
                face = face.sequence,
                identity_id = %hit.identity_id,
                similarity = hit.similarity,
                "face matched"
            );
            result.matches.push(Match {
                identity_id: hit.identity_id.clone(),
                similarity: hit.similarity,
                face_sequence: face.sequence,
                bbox: face.bbox.clone(),
                display_name: hit.metadata.display_name.clone(),
            });
        }

        result.matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.face_sequence.cmp(&b.face_sequence))
        });
        result.unmatched_face_count = result.faces_detected - result.matches.len();

        tracing::info!(
            faces = result.faces_detected,
            matched = result.matches.len(),
            unmatched = result.unmatched_face_count,
            roster = roster.len(),
            threshold = params.threshold(),
            "recognition complete"
        );
        Ok(result)
    }
}
