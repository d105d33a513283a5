//! Face location: the detection strategy interface and the ordered fallback pipeline.
//!
//! Strategies are consulted in order and the first one that produces at least
//! one usable face wins. Results are never merged across strategies.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{Rgb, Rgb32FImage, RgbImage};
use thiserror::Error;

/// Side length of the square crop handed to the embedding extractor.
pub const FACE_CROP_SIZE: u32 = 224;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face crop as produced by a strategy, before size normalisation.
pub enum RawCrop {
    Rgb8(RgbImage),
    /// Floating-point pixels in [0, 1].
    Unit(Rgb32FImage),
}

impl RawCrop {
    fn is_empty(&self) -> bool {
        let (w, h) = match self {
            RawCrop::Rgb8(img) => img.dimensions(),
            RawCrop::Unit(img) => img.dimensions(),
        };
        w == 0 || h == 0
    }

    /// 8-bit pixels; unit-range floats are rescaled to [0, 255].
    pub fn into_rgb8(self) -> RgbImage {
        match self {
            RawCrop::Rgb8(img) => img,
            RawCrop::Unit(img) => RgbImage::from_fn(img.width(), img.height(), |x, y| {
                let p = img.get_pixel(x, y);
                Rgb(p.0.map(|c| (c * 255.0).clamp(0.0, 255.0) as u8))
            }),
        }
    }
}

/// One face reported by a strategy.
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub crop: RawCrop,
}

/// A located face: its box in the source image and a `FACE_CROP_SIZE` square crop.
pub struct FaceRegion {
    pub bbox: BoundingBox,
    pub crop: RgbImage,
}

/// One detection strategy.
pub trait FaceDetector {
    fn name(&self) -> &'static str;

    /// Detect faces in an RGB image. Finding nothing is `Ok(vec![])`, never an error.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError>;
}

/// Ordered list of detection strategies.
pub struct FacePipeline {
    strategies: Vec<Box<dyn FaceDetector>>,
    crop_size: u32,
}

impl FacePipeline {
    pub fn new(strategies: Vec<Box<dyn FaceDetector>>) -> Self {
        Self { strategies, crop_size: FACE_CROP_SIZE }
    }

    /// Names of the loaded strategies, in consultation order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Locate faces, returning them in the winning strategy's output order.
    ///
    /// A strategy that errors is treated like one that found nothing.
    /// An empty result is a normal outcome.
    pub fn locate(&mut self, image: &RgbImage) -> Vec<FaceRegion> {
        for strategy in &mut self.strategies {
            let faces = match strategy.detect(image) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        error = %e,
                        "detection strategy failed"
                    );
                    continue;
                }
            };

            let regions: Vec<FaceRegion> = faces
                .into_iter()
                .filter(|face| !face.crop.is_empty())
                .map(|face| FaceRegion {
                    bbox: face.bbox,
                    crop: normalize_crop(face.crop, self.crop_size),
                })
                .collect();

            if !regions.is_empty() {
                tracing::debug!(strategy = strategy.name(), faces = regions.len(), "faces located");
                return regions;
            }
        }

        tracing::debug!("no faces detected by any strategy");
        Vec::new()
    }
}

fn normalize_crop(crop: RawCrop, size: u32) -> RgbImage {
    let rgb = crop.into_rgb8();
    if rgb.dimensions() == (size, size) {
        return rgb;
    }
    imageops::resize(&rgb, size, size, FilterType::Triangle)
}

/// Cut `bbox` out of `image`, clipped to the image bounds. `None` if nothing remains.
pub(crate) fn crop_box(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let x0 = bbox.x.max(0.0) as u32;
    let y0 = bbox.y.max(0.0) as u32;
    let x1 = ((bbox.x + bbox.width).max(0.0) as u32).min(image.width());
    let y1 = ((bbox.y + bbox.height).max(0.0) as u32).min(image.height());
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image())
}


#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use image::Rgb32FImage;
    use std::sync::atomic::Ordering;

    fn gray(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([90, 90, 90]))
    }

    fn square(origin: f32, side: f32) -> BoundingBox {
        BoundingBox::rect(origin, origin, side, side, 0.9)
    }

    #[test]
    fn test_first_non_empty_strategy_wins() {
        let primary = FixedDetector::new("primary", vec![square(0.0, 10.0)]);
        let fallback = FixedDetector::new("fallback", vec![square(5.0, 10.0)]);
        let fallback_calls = fallback.calls.clone();

        let mut pipeline = FacePipeline::new(vec![Box::new(primary), Box::new(fallback)]);
        let regions = pipeline.locate(&gray(64, 64));

        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox.x, 0.0);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0, "fallback must not be consulted");
    }

    #[test]
    fn test_falls_back_when_primary_empty() {
        let primary = FixedDetector::new("primary", vec![]);
        let fallback = FixedDetector::new(
            "fallback",
            vec![
                BoundingBox::rect(0.0, 0.0, 20.0, 20.0, 1.0),
                BoundingBox::rect(30.0, 30.0, 20.0, 20.0, 1.0),
            ],
        );

        let mut pipeline = FacePipeline::new(vec![Box::new(primary), Box::new(fallback)]);
        let regions = pipeline.locate(&gray(64, 64));

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[1].bbox.x, 30.0);
    }

    #[test]
    fn test_falls_back_when_primary_errors() {
        let fallback = FixedDetector::new("fallback", vec![square(0.0, 8.0)]);
        let mut pipeline = FacePipeline::new(vec![Box::new(FailingDetector), Box::new(fallback)]);
        assert_eq!(pipeline.locate(&gray(16, 16)).len(), 1);
    }

    #[test]
    fn test_no_faces_is_empty_not_error() {
        let mut pipeline = FacePipeline::new(vec![
            Box::new(FixedDetector::new("a", vec![])),
            Box::new(FixedDetector::new("b", vec![])),
        ]);
        assert!(pipeline.locate(&gray(16, 16)).is_empty());
    }

    #[test]
    fn test_crops_resized_to_fixed_square() {
        let primary =
            FixedDetector::new("primary", vec![BoundingBox::rect(2.0, 3.0, 17.0, 29.0, 1.0)]);
        let mut pipeline = FacePipeline::new(vec![Box::new(primary)]);
        let regions = pipeline.locate(&gray(64, 64));
        assert_eq!(regions[0].crop.dimensions(), (FACE_CROP_SIZE, FACE_CROP_SIZE));
        assert_eq!(regions[0].crop.get_pixel(100, 100), &Rgb([90, 90, 90]));
    }

    #[test]
    fn test_unit_float_crop_rescaled() {
        let crop = RawCrop::Unit(Rgb32FImage::from_pixel(2, 2, image::Rgb([1.0, 0.5, 0.0])));
        let rgb = crop.into_rgb8();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 127, 0]));
    }

    #[test]
    fn test_crop_box_clips_to_image() {
        let image = gray(20, 20);
        let crop = crop_box(&image, &BoundingBox::rect(-5.0, 15.0, 10.0, 10.0, 1.0)).unwrap();
        assert_eq!(crop.dimensions(), (5, 5));
        assert!(crop_box(&image, &BoundingBox::rect(30.0, 30.0, 5.0, 5.0, 1.0)).is_none());
    }

    #[test]
    fn test_strategy_names_in_order() {
        let pipeline = FacePipeline::new(vec![
            Box::new(FixedDetector::new("scrfd", vec![])),
            Box::new(FixedDetector::new("cascade", vec![])),
        ]);
        assert_eq!(pipeline.strategy_names(), vec!["scrfd", "cascade"]);
    }
}
