//! Classical cascade fallback detector (SeetaFace funnel cascade via `rustface`).
//!
//! Runs on a grayscale derivation of the image with permissive parameters,
//! trading precision for recall. Crops are cut from the colour image.

use crate::detector::{crop_box, DetectedFace, DetectorError, FaceDetector, RawCrop};
use crate::types::BoundingBox;
use image::imageops;
use image::RgbImage;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Detection parameters for the cascade.
#[derive(Debug, Clone, Copy)]
pub struct CascadeParams {
    /// Growth factor between pyramid levels (> 1). Smaller finds more sizes.
    pub scale_factor: f32,
    /// Smallest face side, in pixels.
    pub min_face_size: u32,
    /// Minimum classifier score for a window to count as a face.
    pub score_threshold: f64,
    /// Sliding window step, in pixels.
    pub window_step: u32,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.05,
            min_face_size: 20,
            score_threshold: 2.0,
            window_step: 4,
        }
    }
}

impl CascadeParams {
    /// rustface shrinks the image by this factor per pyramid level.
    fn pyramid_scale(&self) -> f32 {
        (1.0 / self.scale_factor).clamp(0.01, 0.99)
    }
}

/// Fallback strategy backed by a SeetaFace frontal model.
pub struct CascadeDetector {
    model: rustface::Model,
    params: CascadeParams,
}

impl CascadeDetector {
    /// Load a SeetaFace model file (e.g. `seeta_fd_frontal_v1.0.bin`).
    pub fn load(model_path: &Path, params: CascadeParams) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let file = File::open(model_path).map_err(|e| DetectorError::ModelLoad(e.to_string()))?;
        let model = rustface::read_model(BufReader::new(file))
            .map_err(|e| DetectorError::ModelLoad(e.to_string()))?;

        tracing::info!(path = %model_path.display(), ?params, "loaded cascade model");
        Ok(Self { model, params })
    }
}

impl FaceDetector for CascadeDetector {
    fn name(&self) -> &'static str {
        "cascade"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        let gray = imageops::grayscale(image);
        let (width, height) = gray.dimensions();

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.params.min_face_size);
        detector.set_score_thresh(self.params.score_threshold);
        detector.set_pyramid_scale_factor(self.params.pyramid_scale());
        detector.set_slide_window_step(self.params.window_step, self.params.window_step);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));

        let detected: Vec<DetectedFace> = faces
            .iter()
            .filter_map(|face| {
                let rect = face.bbox();
                let bbox = BoundingBox::rect(
                    rect.x() as f32,
                    rect.y() as f32,
                    rect.width() as f32,
                    rect.height() as f32,
                    face.score() as f32,
                );
                crop_box(image, &bbox).map(|crop| DetectedFace { bbox, crop: RawCrop::Rgb8(crop) })
            })
            .collect();

        if !detected.is_empty() {
            tracing::info!(faces = detected.len(), "cascade detected faces");
        }
        Ok(detected)
    }
}
