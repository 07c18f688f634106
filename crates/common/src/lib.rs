//! Common types shared across the harvest vision stack
//!
//! Holds the detection data model, the `Detector` capability trait, the
//! workspace-wide error type, and image file I/O.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod image_io;

/// Vision pipeline errors
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Failed to load image {path}: {reason}")]
    ImageLoad { path: String, reason: String },

    #[error("Failed to save image {path}: {reason}")]
    ImageSave { path: String, reason: String },

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for vision operations
pub type Result<T> = std::result::Result<T, VisionError>;

/// Pixel dimensions of one detector input scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scale {
    pub width: u32,
    pub height: u32,
}

impl Scale {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel dimensions of the frame all fused detections are expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Frame size of an in-memory image
    #[must_use]
    pub fn of(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }
}

/// A detection in the pixel frame of the image handed to the detector,
/// before any cross-scale normalization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub confidence: f32,
    pub class_id: u32,
}

/// A detection normalized into the original frame and tagged with the
/// scale it came from
///
/// After normalization `source_scale` is only a provenance tag (used as a
/// tie-break key when suppressing); it is never used to rescale again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub confidence: f32,
    pub class_id: u32,
    pub source_scale: Scale,
}

impl Detection {
    /// Longer side of the box in pixels
    #[must_use]
    pub fn max_side(&self) -> i32 {
        self.w.max(self.h)
    }

    /// Box area in pixels
    #[must_use]
    pub fn area(&self) -> i64 {
        i64::from(self.w) * i64::from(self.h)
    }

    /// Intersection over union with another box
    ///
    /// Disjoint boxes and degenerate (zero-area) unions yield 0.0.
    #[must_use]
    pub fn iou(&self, other: &Detection) -> f64 {
        let ix1 = i64::from(self.x.max(other.x));
        let iy1 = i64::from(self.y.max(other.y));
        let ix2 = i64::from((self.x + self.w).min(other.x + other.w));
        let iy2 = i64::from((self.y + self.h).min(other.y + other.h));

        let iw = (ix2 - ix1).max(0);
        let ih = (iy2 - iy1).max(0);
        let intersection = iw * ih;

        let union = self.area() + other.area() - intersection;
        if union <= 0 {
            return 0.0;
        }

        intersection as f64 / union as f64
    }
}

/// Final output record: a kept detection projected to plain pixel geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl PixelBox {
    /// Box center in pixel coordinates
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            f64::from(self.x) + f64::from(self.w) / 2.0,
            f64::from(self.y) + f64::from(self.h) / 2.0,
        )
    }
}

/// Capability interface for an object detector
///
/// Implementations return detections in the pixel frame of the image they
/// were handed, with no ordering guarantee. The fusion pipeline calls
/// `detect` once per selected scale, and callers may share one detector
/// across threads, so implementations must be `Send + Sync`.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>>;
}
