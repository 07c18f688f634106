//! Image enhancement ahead of detection
//!
//! Mushroom caps are pale and low-contrast against the growing substrate,
//! so frames are preconditioned before the detector sees them:
//!
//! 1. **Saturation boost**: colors are pushed apart in HSV space so caps
//!    separate from the substrate.
//! 2. **Small-image upscale**: frames whose longer side is under a cutoff
//!    are resized up with cubic filtering, giving the detector more pixels
//!    per cap.
//! 3. **Local contrast (CLAHE)**: contrast-limited adaptive histogram
//!    equalization on the luminance channel lifts detail in dim tray
//!    corners without blowing out the rest of the frame.
//!
//! Every step is a pure `RgbImage -> RgbImage` transform; the output frame
//! is what the rest of the pipeline treats as the original image.
//!
//! # Example
//! ```rust
//! use harvest_enhancer::{enhance, EnhancerConfig};
//! use image::RgbImage;
//!
//! let frame = RgbImage::new(320, 240);
//! let out = enhance(&frame, &EnhancerConfig::default());
//! // 320x240 is under the upscale cutoff, so the output is doubled
//! assert_eq!(out.dimensions(), (640, 480));
//! ```

use image::{imageops::FilterType, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod clahe;

/// Configuration for image enhancement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    /// Multiplier applied to HSV saturation, result clamped to 1.0
    pub saturation_gain: f32,
    /// Upscale frames whose longer side is below this many pixels
    pub upscale_below: u32,
    /// Integral upscale factor for small frames
    pub upscale_factor: u32,
    /// CLAHE clip limit (multiples of the uniform histogram level)
    pub clahe_clip_limit: f64,
    /// CLAHE tile grid as (columns, rows)
    pub clahe_tiles: (u32, u32),
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            saturation_gain: 1.5,
            upscale_below: 400,
            upscale_factor: 2,
            clahe_clip_limit: 3.0,
            clahe_tiles: (8, 8),
        }
    }
}

/// Run the full enhancement chain on a frame
pub fn enhance(image: &RgbImage, config: &EnhancerConfig) -> RgbImage {
    let saturated = boost_saturation(image, config.saturation_gain);
    let upscaled = upscale_if_small(&saturated, config.upscale_below, config.upscale_factor);
    clahe::equalize(
        &upscaled,
        config.clahe_clip_limit,
        config.clahe_tiles.0,
        config.clahe_tiles.1,
    )
}

/// Scale the HSV saturation of every pixel, clamped to full saturation
pub fn boost_saturation(image: &RgbImage, gain: f32) -> RgbImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(pixel[0], pixel[1], pixel[2]);
        let (r, g, b) = hsv_to_rgb(h, (s * gain).min(1.0), v);
        *pixel = Rgb([r, g, b]);
    }
    out
}

/// Upscale frames whose longer side is under the cutoff
///
/// Uses Catmull-Rom (cubic) filtering. Frames at or above the cutoff, or a
/// factor under 2, pass through unchanged.
pub fn upscale_if_small(image: &RgbImage, cutoff: u32, factor: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if factor < 2 || width.max(height) >= cutoff || width == 0 || height == 0 {
        return image.clone();
    }
    debug!("Upscaling {}x{} frame by {}", width, height, factor);
    image::imageops::resize(image, width * factor, height * factor, FilterType::CatmullRom)
}

fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = f32::from(r) / 255.0;
    let g = f32::from(g) / 255.0;
    let b = f32::from(b) / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    (to_channel(r1 + m), to_channel(g1 + m), to_channel(b1 + m))
}

fn to_channel(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}
