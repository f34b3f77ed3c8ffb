//! Face recognizer via ONNX Runtime.
//!
//! Turns an aligned 112×112 face chip into an L2-normalized embedding. The
//! same code drives both model families; they differ only in input
//! normalization, output dimension and file name.

use crate::alignment;
use crate::types::{BoundingBox, Embedding, ModelFamily};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Per-family recognizer parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognizerSpec {
    pub detector_file: &'static str,
    pub model_file: &'static str,
    pub model_version: &'static str,
    pub input_size: u32,
    pub mean: f32,
    pub std: f32,
    pub dimension: usize,
}

const ARCFACE_SPEC: RecognizerSpec = RecognizerSpec {
    detector_file: "det_10g.onnx",
    model_file: "w600k_r50.onnx",
    model_version: "w600k_r50",
    input_size: 112,
    mean: 127.5,
    std: 127.5, // not 128.0; ArcFace normalization is symmetric
    dimension: 512,
};

// SFace takes raw 0–255 RGB.
const LEGACY_SPEC: RecognizerSpec = RecognizerSpec {
    detector_file: "det_500m.onnx",
    model_file: "face_recognition_sface_2021dec.onnx",
    model_version: "sface_2021dec",
    input_size: 112,
    mean: 0.0,
    std: 1.0,
    dimension: 128,
};

impl ModelFamily {
    pub fn spec(self) -> &'static RecognizerSpec {
        match self {
            ModelFamily::Arcface => &ARCFACE_SPEC,
            ModelFamily::Legacy => &LEGACY_SPEC,
        }
    }

    /// Embedding dimension produced by this family.
    pub fn dimension(self) -> usize {
        self.spec().dimension
    }

    /// Tag stored alongside embeddings from this family.
    pub fn model_version(self) -> &'static str {
        self.spec().model_version
    }
}

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Embedding extractor for one model family.
pub struct FaceRecognizer {
    session: Session,
    spec: &'static RecognizerSpec,
}

impl FaceRecognizer {
    /// Load the recognition model for `family` from `model_path`.
    pub fn load(model_path: &Path, family: ModelFamily) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            family = %family,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self {
            session,
            spec: family.spec(),
        })
    }

    /// Extract a unit-norm embedding for one detected face.
    pub fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let chip = alignment::face_chip(image, face);
        let input = preprocess(&chip, self.spec);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        finish_embedding(raw_data.to_vec(), self.spec)
    }
}

/// Validate raw model output and re-normalize it.
///
/// Models are expected to emit unit vectors already; the output is
/// normalized again regardless.
fn finish_embedding(raw: Vec<f32>, spec: &RecognizerSpec) -> Result<Embedding, RecognizerError> {
    if raw.len() != spec.dimension {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {}-dim embedding, got {}",
            spec.dimension,
            raw.len()
        )));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(RecognizerError::InferenceFailed("embedding contains non-finite values".into()));
    }

    let embedding = Embedding::normalized(raw, Some(spec.model_version.to_string()));
    if embedding.norm() == 0.0 {
        return Err(RecognizerError::InferenceFailed("model returned a zero embedding".into()));
    }
    Ok(embedding)
}

/// Convert a face chip into a NCHW float tensor, resizing if needed.
fn preprocess(chip: &RgbImage, spec: &RecognizerSpec) -> Array4<f32> {
    let size = spec.input_size;
    let resized;
    let chip = if chip.dimensions() == (size, size) {
        chip
    } else {
        resized = image::imageops::resize(chip, size, size, image::imageops::FilterType::Triangle);
        &resized
    };

    let n = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, pixel) in chip.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - spec.mean) / spec.std;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_family_dimensions() {
        assert_eq!(ModelFamily::Arcface.dimension(), 512);
        assert_eq!(ModelFamily::Legacy.dimension(), 128);
        assert_ne!(ModelFamily::Arcface.model_version(), ModelFamily::Legacy.model_version());
    }

    #[test]
    fn test_preprocess_output_shape() {
        let chip = RgbImage::from_pixel(112, 112, Rgb([128, 128, 128]));
        let tensor = preprocess(&chip, &ARCFACE_SPEC);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_resizes_odd_chips() {
        let chip = RgbImage::from_pixel(60, 90, Rgb([10, 20, 30]));
        let tensor = preprocess(&chip, &LEGACY_SPEC);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 2, 50, 50]] - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_arcface_normalization() {
        let chip = RgbImage::from_pixel(112, 112, Rgb([255, 0, 128]));
        let tensor = preprocess(&chip, &ARCFACE_SPEC);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] + 1.0).abs() < 1e-6);
        let expected = (128.0 - ARCFACE_SPEC.mean) / ARCFACE_SPEC.std;
        assert!((tensor[[0, 2, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_finish_embedding_renormalizes() {
        let raw = vec![2.0; 512];
        let e = finish_embedding(raw, &ARCFACE_SPEC).unwrap();
        assert!((e.norm() - 1.0).abs() < 1e-4);
        assert_eq!(e.model_version.as_deref(), Some("w600k_r50"));
    }

    #[test]
    fn test_finish_embedding_rejects_wrong_dimension() {
        let err = finish_embedding(vec![0.5; 128], &ARCFACE_SPEC).unwrap_err();
        assert!(matches!(err, RecognizerError::InferenceFailed(_)));
    }

    #[test]
    fn test_finish_embedding_rejects_degenerate_output() {
        assert!(finish_embedding(vec![0.0; 128], &LEGACY_SPEC).is_err());
        let mut nan = vec![0.1; 128];
        nan[3] = f32::NAN;
        assert!(finish_embedding(nan, &LEGACY_SPEC).is_err());
    }
}
