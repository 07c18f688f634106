//! Geometric calibration applied between confidence compensation and the
//! final suppression pass

use harvest_common::{Detection, FrameSize};
use serde::{Deserialize, Serialize};

/// Post-compensation geometric correction
///
/// A calibrator sees the whole detection list and the frame it lives in,
/// and returns the corrected list. The default pipeline uses
/// [`IdentityCalibrator`].
pub trait Calibrator: Send + Sync {
    fn calibrate(&self, detections: Vec<Detection>, frame: FrameSize) -> Vec<Detection>;
}

/// Leaves detections untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCalibrator;

impl Calibrator for IdentityCalibrator {
    fn calibrate(&self, detections: Vec<Detection>, _frame: FrameSize) -> Vec<Detection> {
        detections
    }
}

/// Fixed fractional correction for a detector that systematically trails
/// its targets
///
/// Shifts each box right and up by a fraction of its own size and expands
/// it, clamping the result into the frame. Measured against trays where
/// boxes sat low and left of the mushroom caps; not part of the default
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetCalibrator {
    /// Rightward shift as a fraction of box width
    pub shift_right: f64,
    /// Upward shift as a fraction of box height
    pub shift_up: f64,
    /// Width expansion as a fraction of box width
    pub width_expand: f64,
    /// Height expansion as a fraction of box height
    pub height_expand: f64,
}

impl Default for OffsetCalibrator {
    fn default() -> Self {
        Self {
            shift_right: 0.14,
            shift_up: 0.12,
            width_expand: 0.24,
            height_expand: 0.05,
        }
    }
}

impl Calibrator for OffsetCalibrator {
    fn calibrate(&self, mut detections: Vec<Detection>, frame: FrameSize) -> Vec<Detection> {
        let fw = frame.width as i32;
        let fh = frame.height as i32;
        for d in &mut detections {
            let dx = (self.shift_right * f64::from(d.w)) as i32;
            d.x = (d.x + dx).max(0);

            let dy = (self.shift_up * f64::from(d.h)) as i32;
            d.y = (d.y - dy).max(0);

            let dw = (self.width_expand * f64::from(d.w)) as i32;
            d.w = (d.w + dw).min(fw - d.x).max(0);

            let dh = (self.height_expand * f64::from(d.h)) as i32;
            d.h = (d.h + dh).min(fh - d.y).max(0);
        }
        detections
    }
}
