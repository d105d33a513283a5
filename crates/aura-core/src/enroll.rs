//! Enrollment: reduce a batch of training photos of one person to a single embedding.

use crate::decode::decode_image;
use crate::detector::FacePipeline;
use crate::recognizer::EmbeddingExtractor;
use crate::types::Embedding;
use std::fmt;
use thiserror::Error;

/// Fewest images accepted, and fewest usable faces required.
pub const MIN_ENROLL_FACES: usize = 3;

/// Images beyond this many are ignored.
pub const MAX_ENROLL_IMAGES: usize = 50;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnrollError {
    #[error("need at least {required} images, got {got}")]
    TooFewImages { required: usize, got: usize },
    #[error("need at least {required} valid faces, got {got}")]
    InsufficientFaces { required: usize, got: usize },
}

/// Why one training image contributed nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Decode(String),
    NoFace,
    NoEmbedding,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Decode(e) => write!(f, "decode failed: {e}"),
            SkipReason::NoFace => f.write_str("no face detected"),
            SkipReason::NoEmbedding => f.write_str("embedding unavailable"),
        }
    }
}

/// A representative embedding for one identity.
#[derive(Debug, Clone)]
pub struct Enrollment {
    /// Normalized mean of the per-image normalized embeddings.
    pub embedding: Embedding,
    /// Images that yielded a usable face.
    pub faces_processed: usize,
}

/// Build one representative embedding from `images` (encoded payloads).
///
/// Images are processed one at a time in order. Only the first located face of
/// each image is used. Images that cannot be decoded, contain no face, or
/// produce no embedding are skipped and do not count toward the minimum.
pub fn enroll(
    identity_id: &str,
    images: &[String],
    pipeline: &mut FacePipeline,
    extractor: &mut EmbeddingExtractor,
) -> Result<Enrollment, EnrollError> {
    if images.len() < MIN_ENROLL_FACES {
        return Err(EnrollError::TooFewImages { required: MIN_ENROLL_FACES, got: images.len() });
    }

    let batch = &images[..images.len().min(MAX_ENROLL_IMAGES)];
    if batch.len() < images.len() {
        tracing::info!(
            identity = identity_id,
            supplied = images.len(),
            used = batch.len(),
            "enrollment batch truncated"
        );
    }

    let mut embeddings = Vec::with_capacity(batch.len());
    for (index, payload) in batch.iter().enumerate() {
        match embed_first_face(payload, pipeline, extractor) {
            Ok(embedding) => embeddings.push(embedding),
            Err(reason) => {
                tracing::debug!(
                    identity = identity_id,
                    image = index,
                    %reason,
                    "training image skipped"
                );
            }
        }
    }

    let got = embeddings.len();
    if got < MIN_ENROLL_FACES {
        tracing::info!(identity = identity_id, faces = got, "enrollment rejected");
        return Err(EnrollError::InsufficientFaces { required: MIN_ENROLL_FACES, got });
    }

    let embedding = mean_embedding(&embeddings);
    tracing::info!(
        identity = identity_id,
        faces = got,
        dim = embedding.dim(),
        "enrollment complete"
    );

    Ok(Enrollment { embedding, faces_processed: got })
}

fn embed_first_face(
    payload: &str,
    pipeline: &mut FacePipeline,
    extractor: &mut EmbeddingExtractor,
) -> Result<Embedding, SkipReason> {
    let image = decode_image(payload).map_err(|e| SkipReason::Decode(e.to_string()))?;
    let face = pipeline.locate(&image).into_iter().next().ok_or(SkipReason::NoFace)?;
    let embedding = extractor.extract(&face.crop).ok_or(SkipReason::NoEmbedding)?;
    Ok(embedding.normalize())
}

/// Element-wise mean, then L2-normalized. Vectors are truncated to the shortest dimension.
fn mean_embedding(embeddings: &[Embedding]) -> Embedding {
    let dim = embeddings.iter().map(Embedding::dim).min().unwrap_or(0);
    let mut sum = vec![0.0f32; dim];
    for e in embeddings {
        for (acc, v) in sum.iter_mut().zip(&e.values) {
            *acc += v;
        }
    }

    let n = embeddings.len().max(1) as f32;
    Embedding::new(sum.into_iter().map(|v| v / n).collect()).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::solid_payload;
    use crate::detector::fakes::FixedDetector;
    use crate::recognizer::fakes::{color_embedding, BlackFailsEmbedder, ColorEmbedder};
    use crate::types::{BoundingBox, EMBEDDING_DIM};
    use std::sync::atomic::Ordering;

    fn pipeline() -> FacePipeline {
        // Images smaller than 20px fall outside the box and have no face.
        FacePipeline::new(vec![Box::new(FixedDetector::new(
            "fixed",
            vec![BoundingBox::rect(20.0, 20.0, 24.0, 24.0, 1.0)],
        ))])
    }

    fn extractor() -> EmbeddingExtractor {
        EmbeddingExtractor::new(Box::new(BlackFailsEmbedder(ColorEmbedder::new(EMBEDDING_DIM))))
    }

    fn face(rgb: [u8; 3]) -> String {
        solid_payload(64, 64, rgb)
    }

    #[test]
    fn test_mean_of_normalized_embeddings() {
        let colors = [[255, 0, 0], [0, 255, 0], [40, 40, 200]];
        let images: Vec<String> = colors.iter().map(|c| face(*c)).collect();

        let result = enroll("s1", &images, &mut pipeline(), &mut extractor()).unwrap();
        assert_eq!(result.faces_processed, 3);
        assert_eq!(result.embedding.dim(), EMBEDDING_DIM);

        let per_image: Vec<Embedding> = colors
            .iter()
            .map(|c| Embedding::new(color_embedding(*c, EMBEDDING_DIM)).normalize())
            .collect();
        let mut expected = vec![0.0f32; EMBEDDING_DIM];
        for e in &per_image {
            for (acc, v) in expected.iter_mut().zip(&e.values) {
                *acc += v / 3.0;
            }
        }
        let expected = Embedding::new(expected).normalize();

        for (a, b) in result.embedding.values.iter().zip(&expected.values) {
            assert!((a - b).abs() < 1e-5, "component {a} vs {b}");
        }
        assert!((result.embedding.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_two_valid_faces_is_insufficient() {
        let images = vec![
            face([200, 10, 10]),
            "not an image".to_string(),
            solid_payload(8, 8, [50, 50, 50]), // no face
            face([0, 0, 0]),                   // embedding fails
            face([10, 200, 10]),
        ];

        let err = enroll("s1", &images, &mut pipeline(), &mut extractor()).unwrap_err();
        assert_eq!(err, EnrollError::InsufficientFaces { required: 3, got: 2 });
        assert_eq!(err.to_string(), "need at least 3 valid faces, got 2");
    }

    #[test]
    fn test_fewer_than_three_images_rejected_up_front() {
        let embedder = ColorEmbedder::new(EMBEDDING_DIM);
        let calls = embedder.calls.clone();
        let mut extractor = EmbeddingExtractor::new(Box::new(embedder));

        let images = vec![face([1, 2, 3]), face([4, 5, 6])];
        let err = enroll("s1", &images, &mut pipeline(), &mut extractor).unwrap_err();
        assert_eq!(err, EnrollError::TooFewImages { required: 3, got: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_batch_capped_at_max() {
        let embedder = ColorEmbedder::new(EMBEDDING_DIM);
        let calls = embedder.calls.clone();
        let mut extractor = EmbeddingExtractor::new(Box::new(embedder));

        let images: Vec<String> = (0..60u8).map(|i| face([i + 10, 100, 100])).collect();
        let result = enroll("s1", &images, &mut pipeline(), &mut extractor).unwrap();
        assert_eq!(result.faces_processed, MAX_ENROLL_IMAGES);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ENROLL_IMAGES);
    }

    #[test]
    fn test_only_first_face_used() {
        let detector = FixedDetector::new(
            "two-faces",
            vec![
                BoundingBox::rect(0.0, 0.0, 10.0, 10.0, 1.0),
                BoundingBox::rect(30.0, 30.0, 10.0, 10.0, 1.0),
            ],
        );
        let mut pipeline = FacePipeline::new(vec![Box::new(detector)]);
        let embedder = ColorEmbedder::new(EMBEDDING_DIM);
        let calls = embedder.calls.clone();
        let mut extractor = EmbeddingExtractor::new(Box::new(embedder));

        let images: Vec<String> = (0..3).map(|_| face([90, 90, 90])).collect();
        enroll("s1", &images, &mut pipeline, &mut extractor).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unavailable_extractor_fails_with_zero() {
        let images: Vec<String> = (0..4).map(|_| face([90, 90, 90])).collect();
        let mut extractor = EmbeddingExtractor::unavailable();
        let err = enroll("s1", &images, &mut pipeline(), &mut extractor).unwrap_err();
        assert_eq!(err.to_string(), "need at least 3 valid faces, got 0");
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(SkipReason::NoFace.to_string(), "no face detected");
        assert!(SkipReason::Decode("bad".into()).to_string().contains("bad"));
    }
}
