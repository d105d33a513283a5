//! Recognition service: the operations exposed to a transport.
//!
//! `FaceService` owns the models and is driven from one thread. The gallery is
//! shared by handle so loads and status reads never wait behind inference.

use crate::decode::{decode_image, DecodeError};
use crate::detector::FacePipeline;
use crate::enroll::{enroll, EnrollError};
use crate::gallery::GalleryStore;
use crate::recognizer::EmbeddingExtractor;
use crate::types::{CosineMatcher, MatchResult, Matcher, EMBEDDING_DIM};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Reported in place of a name when no identity matched.
pub const UNKNOWN_NAME: &str = "Unknown";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
}

/// One evaluated face in a recognition response.
#[derive(Debug, Clone, Serialize)]
pub struct FaceMatch {
    pub display_name: String,
    pub external_id: String,
    pub similarity: f32,
    pub distance: f32,
    pub recognized: bool,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]`
    #[serde(rename = "box")]
    pub bbox: [i32; 4],
}

impl From<&MatchResult> for FaceMatch {
    fn from(result: &MatchResult) -> Self {
        let (display_name, external_id) = match &result.identity {
            Some(identity) => (identity.display_name.clone(), identity.external_id.clone()),
            None => (UNKNOWN_NAME.to_string(), String::new()),
        };
        Self {
            display_name,
            external_id,
            similarity: result.similarity,
            distance: result.distance(),
            recognized: result.recognized,
            confidence: result.confidence(),
            bbox: result.bbox.corners(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecognizeReport {
    pub faces: Vec<FaceMatch>,
    /// Size of the gallery snapshot the faces were matched against.
    pub loaded_identity_count: usize,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollReport {
    pub external_id: String,
    pub embedding: Vec<f32>,
    pub faces_processed: usize,
    pub embedding_dimension: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedBox {
    pub index: usize,
    #[serde(rename = "box")]
    pub bbox: [i32; 4],
    /// `"<w>x<h>px"`
    pub size: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub faces_detected: usize,
    pub faces: Vec<DetectedBox>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub model_available: bool,
    pub embedding_dimension: usize,
    pub loaded_identity_count: usize,
    pub detectors: Vec<&'static str>,
    pub threshold: f32,
}

/// Static facts about a service, readable without access to its models.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub model_available: bool,
    pub detectors: Vec<&'static str>,
    pub threshold: f32,
}

impl ServiceInfo {
    pub fn health(&self, gallery: &GalleryStore) -> HealthStatus {
        HealthStatus {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
            model_available: self.model_available,
            embedding_dimension: EMBEDDING_DIM,
            loaded_identity_count: gallery.len(),
            detectors: self.detectors.clone(),
            threshold: self.threshold,
        }
    }
}

pub struct FaceService {
    pipeline: FacePipeline,
    extractor: EmbeddingExtractor,
    gallery: Arc<GalleryStore>,
    matcher: CosineMatcher,
    threshold: f32,
}

impl FaceService {
    pub fn new(
        pipeline: FacePipeline,
        extractor: EmbeddingExtractor,
        gallery: Arc<GalleryStore>,
        threshold: f32,
    ) -> Self {
        Self { pipeline, extractor, gallery, matcher: CosineMatcher, threshold }
    }

    pub fn gallery(&self) -> Arc<GalleryStore> {
        Arc::clone(&self.gallery)
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            model_available: self.extractor.is_available(),
            detectors: self.pipeline.strategy_names(),
            threshold: self.threshold,
        }
    }

    /// Identify every face in an image against one snapshot of the gallery.
    ///
    /// An empty gallery returns immediately without decoding the image.
    /// Faces whose embedding cannot be extracted are left out of the result.
    pub fn recognize(&mut self, payload: &str) -> Result<RecognizeReport, ServiceError> {
        let gallery = self.gallery.snapshot();
        if gallery.is_empty() {
            tracing::info!("recognize: no identities loaded");
            return Ok(report(Vec::new(), 0, Some("No identities loaded")));
        }

        let image = decode_image(payload)?;
        let regions = self.pipeline.locate(&image);
        if regions.is_empty() {
            tracing::info!(identities = gallery.len(), "recognize: no faces detected");
            return Ok(report(Vec::new(), gallery.len(), Some("No faces detected in image")));
        }

        let mut faces = Vec::with_capacity(regions.len());
        for (index, region) in regions.into_iter().enumerate() {
            let Some(embedding) = self.extractor.extract(&region.crop) else {
                tracing::debug!(face = index, "recognize: face skipped, no embedding");
                continue;
            };
            let probe = embedding.normalize();
            let decision = self.matcher.compare(&probe, &gallery, self.threshold);

            let result = MatchResult {
                identity: decision
                    .best_index
                    .filter(|_| decision.recognized)
                    .map(|i| gallery[i].clone()),
                similarity: decision.similarity,
                recognized: decision.recognized,
                bbox: region.bbox,
            };
            tracing::debug!(
                face = index,
                similarity = result.similarity,
                recognized = result.recognized,
                "recognize: face evaluated"
            );
            faces.push(FaceMatch::from(&result));
        }

        tracing::info!(
            faces = faces.len(),
            recognized = faces.iter().filter(|f| f.recognized).count(),
            identities = gallery.len(),
            "recognize complete"
        );
        Ok(report(faces, gallery.len(), None))
    }

    /// Derive a representative embedding for `external_id`. Does not touch the gallery.
    pub fn enroll_identity(
        &mut self,
        external_id: &str,
        images: &[String],
    ) -> Result<EnrollReport, ServiceError> {
        let enrollment = enroll(external_id, images, &mut self.pipeline, &mut self.extractor)?;
        Ok(EnrollReport {
            external_id: external_id.to_string(),
            embedding_dimension: enrollment.embedding.dim(),
            faces_processed: enrollment.faces_processed,
            embedding: enrollment.embedding.values,
        })
    }

    /// Run face location only, for diagnostics.
    pub fn test_detection(&mut self, payload: &str) -> Result<DetectionReport, ServiceError> {
        let image = decode_image(payload)?;
        let faces: Vec<DetectedBox> = self
            .pipeline
            .locate(&image)
            .iter()
            .enumerate()
            .map(|(index, region)| DetectedBox {
                index,
                bbox: region.bbox.corners(),
                size: format!("{}x{}px", region.bbox.width as i32, region.bbox.height as i32),
            })
            .collect();

        let message = if faces.is_empty() {
            "No faces detected".to_string()
        } else {
            format!("Detected {} face(s)", faces.len())
        };
        tracing::info!(faces = faces.len(), "detection test complete");

        Ok(DetectionReport { faces_detected: faces.len(), faces, message })
    }
}

fn report(
    faces: Vec<FaceMatch>,
    loaded_identity_count: usize,
    note: Option<&str>,
) -> RecognizeReport {
    RecognizeReport {
        faces,
        loaded_identity_count,
        timestamp: chrono::Utc::now().to_rfc3339(),
        note: note.map(str::to_string),
    }
}
