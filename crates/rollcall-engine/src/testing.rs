//! Test doubles: a scripted embedder keyed by image width, and photo helpers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{Rgb, RgbImage};
use rand::Rng;
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::{
    ActiveModel, BoundingBox, DetectedFace, EmbedError, Embedding, FaceEmbedder, ImageSource, ModelFamily,
};
use std::collections::HashMap;
use std::io::Cursor;

enum Script {
    Faces(Vec<(Vec<f32>, f32)>),
    Fail,
}

/// Returns pre-set faces for each image, looked up by image width.
/// Normalization changes pixel values but never dimensions, so the width
/// survives the trip through the pipeline.
pub struct ScriptedEmbedder {
    family: Option<ModelFamily>,
    scripts: HashMap<u32, Script>,
}

impl ScriptedEmbedder {
    pub fn new(family: ModelFamily) -> Self {
        Self {
            family: Some(family),
            scripts: HashMap::new(),
        }
    }

    /// An embedder whose models never load.
    pub fn unavailable() -> Self {
        Self {
            family: None,
            scripts: HashMap::new(),
        }
    }

    pub fn face(self, width: u32, values: Vec<f32>) -> Self {
        self.faces(width, vec![(values, 100.0)])
    }

    /// Several faces, each with the side length of its square box.
    pub fn faces(mut self, width: u32, faces: Vec<(Vec<f32>, f32)>) -> Self {
        self.scripts.insert(width, Script::Faces(faces));
        self
    }

    pub fn no_face(self, width: u32) -> Self {
        self.faces(width, Vec::new())
    }

    pub fn failing(mut self, width: u32) -> Self {
        self.scripts.insert(width, Script::Fail);
        self
    }
}

impl FaceEmbedder for ScriptedEmbedder {
    fn detect_and_embed(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, EmbedError> {
        let family = self.active_model()?.family;
        match self.scripts.get(&image.width()) {
            None => Ok(Vec::new()),
            Some(Script::Fail) => Err(RecognizerError::InferenceFailed("scripted failure".into()).into()),
            Some(Script::Faces(faces)) => Ok(faces
                .iter()
                .enumerate()
                .map(|(sequence, (values, side))| {
                    let x1 = sequence as f32 * 10.0;
                    DetectedFace {
                        sequence,
                        bbox: BoundingBox {
                            x1,
                            y1: 0.0,
                            x2: x1 + side,
                            y2: *side,
                            confidence: 0.9,
                            landmarks: None,
                        },
                        embedding: Embedding::normalized(values.clone(), Some(family.model_version().to_string())),
                    }
                })
                .collect()),
        }
    }

    /// Reports the dimension of the scripted vectors, so short test vectors
    /// pass the enrollment dimension check.
    fn active_model(&self) -> Result<ActiveModel, EmbedError> {
        let mut active = self
            .family
            .map(ActiveModel::from)
            .ok_or_else(|| EmbedError::ModelUnavailable("no model files".into()))?;
        let scripted = self.scripts.values().find_map(|script| match script {
            Script::Faces(faces) => faces.first().map(|(values, _)| values.len()),
            Script::Fail => None,
        });
        if let Some(dimension) = scripted {
            active.dimension = dimension;
        }
        Ok(active)
    }
}

pub fn png_image(width: u32) -> RgbImage {
    RgbImage::from_fn(width, 120, |x, y| Rgb([(x * 2) as u8, (y * 2) as u8, 128]))
}

/// A PNG of the given width as a base64 image source.
pub fn png_source(width: u32) -> ImageSource {
    let mut bytes = Vec::new();
    png_image(width)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    ImageSource::Base64(STANDARD.encode(bytes))
}

/// Unit vector at cosine `similarity` from `base` in a random direction.
pub fn noisy(base: &[f32], similarity: f32, rng: &mut impl Rng) -> Vec<f32> {
    let base = Embedding::normalized(base.to_vec(), None).values;
    let mut noise: Vec<f32> = (0..base.len()).map(|_| gaussian(rng)).collect();
    let along: f32 = noise.iter().zip(&base).map(|(n, b)| n * b).sum();
    for (n, b) in noise.iter_mut().zip(&base) {
        *n -= along * b;
    }
    let noise = Embedding::normalized(noise, None).values;
    let orthogonal = (1.0 - similarity * similarity).sqrt();
    base.iter()
        .zip(&noise)
        .map(|(b, n)| similarity * b + orthogonal * n)
        .collect()
}

/// Box-Muller standard normal sample.
fn gaussian(rng: &mut impl Rng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}
