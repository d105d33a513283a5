//! Embedding extraction.
//!
//! [`ArcFaceEmbedder`] runs the w600k_r50 ArcFace model via ONNX Runtime.
//! [`EmbeddingExtractor`] wraps whichever backend is available and turns every
//! failure into "this face contributes nothing".

use crate::types::{Embedding, EMBEDDING_DIM};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Embedding backend. Returns the raw, unnormalized vector.
pub trait Embedder {
    fn name(&self) -> &'static str;
    fn embed(&mut self, crop: &RgbImage) -> Result<Vec<f32>, EmbedderError>;
}

/// ArcFace-based embedder.
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model (e.g. `w600k_r50.onnx`).
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Resize an RGB crop to 112×112 and pack it as a normalized NCHW tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as u32;
        let resized;
        let face = if crop.dimensions() == (size, size) {
            crop
        } else {
            resized = imageops::resize(crop, size, size, FilterType::Triangle);
            &resized
        };

        Array4::from_shape_fn((1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE), |(_, c, y, x)| {
            (face.get_pixel(x as u32, y as u32)[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD
        })
    }
}

impl Embedder for ArcFaceEmbedder {
    fn name(&self) -> &'static str {
        "arcface"
    }

    fn embed(&mut self, crop: &RgbImage) -> Result<Vec<f32>, EmbedderError> {
        let input = Self::preprocess(crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(raw.to_vec())
    }
}

/// The single designated extraction strategy, possibly absent.
pub struct EmbeddingExtractor {
    backend: Option<Box<dyn Embedder>>,
}

impl EmbeddingExtractor {
    pub fn new(backend: Box<dyn Embedder>) -> Self {
        Self { backend: Some(backend) }
    }

    /// Extractor with no backend; every extraction yields `None`.
    pub fn unavailable() -> Self {
        Self { backend: None }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Raw embedding for one face crop, or `None` if the backend is missing or fails.
    ///
    /// Never retries. Normalize the result before storing or comparing it.
    pub fn extract(&mut self, crop: &RgbImage) -> Option<Embedding> {
        let Some(backend) = self.backend.as_mut() else {
            tracing::warn!("embedding backend not available");
            return None;
        };

        match backend.embed(crop) {
            Ok(values) if values.is_empty() => {
                tracing::warn!(
                    backend = backend.name(),
                    "embedding backend returned an empty vector"
                );
                None
            }
            Ok(values) => Some(Embedding::new(values)),
            Err(e) => {
                tracing::warn!(backend = backend.name(), error = %e, "embedding extraction failed");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Embeds a crop as its mean colour padded with a fixed tail, so distinct
    /// colours give distinct directions.
    pub struct ColorEmbedder {
        pub dim: usize,
        pub calls: Arc<AtomicUsize>,
    }

    impl ColorEmbedder {
        pub fn new(dim: usize) -> Self {
            Self { dim, calls: Arc::new(AtomicUsize::new(0)) }
        }
    }

    pub fn color_embedding(rgb: [u8; 3], dim: usize) -> Vec<f32> {
        let mut v = vec![0.01f32; dim];
        for c in 0..3 {
            v[c] = rgb[c] as f32 / 255.0;
        }
        v
    }

    impl Embedder for ColorEmbedder {
        fn name(&self) -> &'static str {
            "color"
        }

        fn embed(&mut self, crop: &RgbImage) -> Result<Vec<f32>, EmbedderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let p = crop.get_pixel(crop.width() / 2, crop.height() / 2);
            Ok(color_embedding(p.0, self.dim))
        }
    }

    /// Fails for crops whose centre pixel is pure black.
    pub struct BlackFailsEmbedder(pub ColorEmbedder);

    impl Embedder for BlackFailsEmbedder {
        fn name(&self) -> &'static str {
            "black-fails"
        }

        fn embed(&mut self, crop: &RgbImage) -> Result<Vec<f32>, EmbedderError> {
            let p = crop.get_pixel(crop.width() / 2, crop.height() / 2);
            if p.0 == [0, 0, 0] {
                return Err(EmbedderError::InferenceFailed("black crop".into()));
            }
            self.0.embed(crop)
        }
    }
}
