//! Multi-Scale Detection Fusion
//!
//! Detects small, densely clustered objects (straw mushrooms in trays) by
//! running an external detector at several image scales and fusing the
//! per-scale results into one deduplicated set of boxes.
//!
//! ## Pipeline
//!
//! Strictly sequential, per image:
//! 1. **Scale selection**: an edge-density complexity metric picks the scale
//!    set; busy frames get finer scales.
//! 2. **Detector invocation**: the detector runs once per scale on a resized
//!    copy of the image.
//! 3. **Normalization**: per-scale detections are rescaled into the original
//!    frame and tagged with their source scale.
//! 4. **Cross-scale deduplication**: adaptive greedy suppression over the
//!    merged set.
//! 5. **Confidence compensation**: small boxes get a boost, large ones a
//!    floor.
//! 6. **Calibration**: pluggable geometric correction, identity by default.
//! 7. **Final suppression**: a second adaptive greedy pass over the
//!    compensated set.
//! 8. **Filtering**: projection to plain pixel boxes, dropping any with a
//!    zero field.
//!
//! ## Example
//!
//! ```rust
//! use harvest_common::{Detector, RawDetection, Result};
//! use harvest_fusion::{FusionConfig, FusionPipeline};
//! use image::RgbImage;
//!
//! struct NoDetections;
//!
//! impl Detector for NoDetections {
//!     fn detect(&self, _image: &RgbImage) -> Result<Vec<RawDetection>> {
//!         Ok(vec![])
//!     }
//! }
//!
//! let pipeline = FusionPipeline::new(FusionConfig::default()).unwrap();
//! let image = RgbImage::new(64, 64);
//! let result = pipeline.run(&image, &NoDetections).unwrap();
//! assert!(result.boxes.is_empty());
//! ```

use harvest_common::{Detection, Detector, FrameSize, PixelBox, RawDetection, Scale, VisionError};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod calibrate;

pub use calibrate::{Calibrator, IdentityCalibrator, OffsetCalibrator};

/// Fusion errors
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Detector error: {0}")]
    Detector(#[from] VisionError),
}

impl From<FusionError> for VisionError {
    fn from(err: FusionError) -> Self {
        match err {
            FusionError::Detector(e) => e,
            other => VisionError::Other(other.to_string()),
        }
    }
}

/// Configuration for the fusion pipeline
///
/// All tunables of the pipeline live here; stages take the config rather
/// than hard-coding constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Scale set for ordinary frames
    pub base_scales: Vec<Scale>,
    /// Scale set for visually dense frames, biased toward finer scales
    pub dense_scales: Vec<Scale>,
    /// Edge complexity above which the dense scale set is selected
    pub complexity_threshold: f64,
    /// Canny low threshold for the complexity metric
    pub canny_low: f32,
    /// Canny high threshold for the complexity metric
    pub canny_high: f32,
    /// Longer-side cutoff below which a box counts as small during suppression
    pub small_box_cutoff: i32,
    /// IoU threshold applied to small boxes
    pub small_iou_threshold: f64,
    /// IoU threshold applied to large boxes
    pub large_iou_threshold: f64,
    /// Longer-side cutoff below which a box gets the confidence boost
    pub boost_size_cutoff: i32,
    /// Confidence added to small boxes, result capped at 1.0
    pub confidence_boost: f32,
    /// Minimum confidence assigned to larger boxes
    pub confidence_floor: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            base_scales: vec![
                Scale::new(640, 640),
                Scale::new(960, 960),
                Scale::new(1280, 1280),
            ],
            dense_scales: vec![
                Scale::new(320, 320),
                Scale::new(640, 640),
                Scale::new(960, 960),
            ],
            complexity_threshold: 100.0,
            canny_low: 50.0,
            canny_high: 150.0,
            small_box_cutoff: 50,
            small_iou_threshold: 0.3, // Dense clusters overlap legitimately
            large_iou_threshold: 0.5,
            boost_size_cutoff: 30,
            confidence_boost: 0.1,
            confidence_floor: 0.3,
        }
    }
}

impl FusionConfig {
    /// Check that the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a scale set is empty, a scale has a zero
    /// dimension, or an IoU threshold falls outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), FusionError> {
        if self.base_scales.is_empty() || self.dense_scales.is_empty() {
            return Err(FusionError::InvalidConfig(
                "scale sets must not be empty".to_string(),
            ));
        }
        if self
            .base_scales
            .iter()
            .chain(self.dense_scales.iter())
            .any(|s| s.width == 0 || s.height == 0)
        {
            return Err(FusionError::InvalidConfig(
                "scales must have non-zero dimensions".to_string(),
            ));
        }
        for (name, value) in [
            ("small_iou_threshold", self.small_iou_threshold),
            ("large_iou_threshold", self.large_iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FusionError::InvalidConfig(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Edge-density complexity of an image
///
/// Mean Canny edge response per pixel, in `[0, 255]`. Trays packed with
/// mushroom caps produce heavy edge content, which is what pushes scale
/// selection toward finer scales.
pub fn edge_complexity(image: &RgbImage, config: &FusionConfig) -> f64 {
    let gray = image::imageops::grayscale(image);
    let edges = imageproc::edges::canny(&gray, config.canny_low, config.canny_high);
    let (width, height) = edges.dimensions();
    let pixels = u64::from(width) * u64::from(height);
    if pixels == 0 {
        return 0.0;
    }
    let sum: u64 = edges.pixels().map(|p| u64::from(p[0])).sum();
    sum as f64 / pixels as f64
}

/// Pick the detector scale set for a given complexity score
pub fn select_scales(config: &FusionConfig, complexity: f64) -> &[Scale] {
    if complexity > config.complexity_threshold {
        &config.dense_scales
    } else {
        &config.base_scales
    }
}

/// Rescale raw detections from one detector scale into the original frame
///
/// Coordinates map as `floor(v * frame / scale)` and are clamped into the
/// frame. Detections with non-positive dimensions, before or after
/// clamping, are dropped with a warning. Each survivor is tagged with the
/// scale it came from; the tag is provenance only and is never used to
/// rescale again.
pub fn normalize_detections(raw: &[RawDetection], scale: Scale, frame: FrameSize) -> Vec<Detection> {
    if frame.width == 0 || frame.height == 0 {
        return Vec::new();
    }
    let fw = i64::from(frame.width);
    let fh = i64::from(frame.height);
    let sw = i64::from(scale.width);
    let sh = i64::from(scale.height);

    let mut out = Vec::with_capacity(raw.len());
    for r in raw {
        if r.w <= 0 || r.h <= 0 {
            warn!(
                "Dropping detection with non-positive size {}x{} from scale {}",
                r.w, r.h, scale
            );
            continue;
        }

        let x = (i64::from(r.x) * fw / sw).clamp(0, fw - 1);
        let y = (i64::from(r.y) * fh / sh).clamp(0, fh - 1);
        let w = (i64::from(r.w) * fw / sw).min(fw - x);
        let h = (i64::from(r.h) * fh / sh).min(fh - y);

        if w <= 0 || h <= 0 {
            warn!(
                "Dropping detection that degenerates at {}x{} after rescaling from scale {}",
                w, h, scale
            );
            continue;
        }

        out.push(Detection {
            x: x as i32,
            y: y as i32,
            w: w as i32,
            h: h as i32,
            confidence: r.confidence,
            class_id: r.class_id,
            source_scale: scale,
        });
    }
    out
}

/// Adaptive greedy suppression
///
/// Candidates are visited in descending confidence order, ties going to the
/// finer source scale. A candidate is kept unless its IoU with some
/// already-kept box strictly exceeds the candidate's size-dependent
/// threshold: boxes with a longer side under `small_box_cutoff` use
/// `small_iou_threshold`, the rest `large_iou_threshold`.
pub fn suppress(mut detections: Vec<Detection>, config: &FusionConfig) -> Vec<Detection> {
    let total = detections.len();
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source_scale.width.cmp(&b.source_scale.width))
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(total);
    for candidate in detections {
        let threshold = if candidate.max_side() < config.small_box_cutoff {
            config.small_iou_threshold
        } else {
            config.large_iou_threshold
        };
        if kept.iter().all(|k| candidate.iou(k) <= threshold) {
            kept.push(candidate);
        }
    }

    debug!("Suppression kept {} of {} detections", kept.len(), total);
    kept
}

/// Size-conditioned confidence compensation
///
/// Boxes with a longer side under `boost_size_cutoff` gain
/// `confidence_boost`, capped at 1.0. Everything else is floored at
/// `confidence_floor`. Order preserving.
pub fn compensate(mut detections: Vec<Detection>, config: &FusionConfig) -> Vec<Detection> {
    for d in &mut detections {
        if d.max_side() < config.boost_size_cutoff {
            d.confidence = (d.confidence + config.confidence_boost).min(1.0);
        } else {
            d.confidence = d.confidence.max(config.confidence_floor);
        }
    }
    detections
}

/// Project kept detections to output boxes, dropping any record with a
/// zero field
///
/// The zero check is literal: a box whose x or y sits exactly on the frame
/// origin is discarded along with zero-sized ones.
pub fn filter_boxes(detections: &[Detection]) -> Vec<PixelBox> {
    detections
        .iter()
        .map(|d| PixelBox {
            x: d.x,
            y: d.y,
            w: d.w,
            h: d.h,
        })
        .filter(|b| b.x != 0 && b.y != 0 && b.w != 0 && b.h != 0)
        .collect()
}

/// Result of one fusion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResult {
    /// Frame the detections are expressed in
    pub frame: FrameSize,
    /// Edge complexity of the input
    pub complexity: f64,
    /// Scales the detector ran at
    pub scales: Vec<Scale>,
    /// Detections surviving the final suppression pass
    pub detections: Vec<Detection>,
    /// Output boxes after the zero filter
    pub boxes: Vec<PixelBox>,
}

/// The multi-scale fusion pipeline
///
/// Owns the configuration and the calibrator; the detector is passed per
/// run so one pipeline can serve any detector, and runs on different
/// images are independent.
pub struct FusionPipeline {
    config: FusionConfig,
    calibrator: Box<dyn Calibrator>,
}

impl FusionPipeline {
    /// Build a pipeline with the identity calibrator
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration fails validation.
    pub fn new(config: FusionConfig) -> Result<Self, FusionError> {
        Self::with_calibrator(config, Box::new(IdentityCalibrator))
    }

    /// Build a pipeline with a custom calibrator
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration fails validation.
    pub fn with_calibrator(
        config: FusionConfig,
        calibrator: Box<dyn Calibrator>,
    ) -> Result<Self, FusionError> {
        config.validate()?;
        Ok(Self { config, calibrator })
    }

    #[must_use]
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Run the detector at every selected scale and fuse the results
    ///
    /// # Errors
    ///
    /// Propagates detector failures; no fusion stage fails on its own.
    pub fn run(
        &self,
        image: &RgbImage,
        detector: &dyn Detector,
    ) -> Result<FusionResult, FusionError> {
        let frame = FrameSize::of(image);
        let complexity = edge_complexity(image, &self.config);
        let scales = select_scales(&self.config, complexity).to_vec();
        debug!(
            "Complexity {:.1} selected {} scales for {}x{} frame",
            complexity,
            scales.len(),
            frame.width,
            frame.height
        );

        let mut merged: Vec<Detection> = Vec::new();
        for &scale in &scales {
            let resized = image::imageops::resize(
                image,
                scale.width,
                scale.height,
                image::imageops::FilterType::Triangle,
            );
            let raw = detector.detect(&resized)?;
            debug!("Scale {}: {} raw detections", scale, raw.len());
            merged.extend(normalize_detections(&raw, scale, frame));
        }

        let deduped = suppress(merged, &self.config);
        let compensated = compensate(deduped, &self.config);
        let calibrated = self.calibrator.calibrate(compensated, frame);
        let detections = suppress(calibrated, &self.config);
        let boxes = filter_boxes(&detections);

        info!(
            "Fused {} scales into {} boxes (complexity {:.1})",
            scales.len(),
            boxes.len(),
            complexity
        );

        Ok(FusionResult {
            frame,
            complexity,
            scales,
            detections,
            boxes,
        })
    }
}
