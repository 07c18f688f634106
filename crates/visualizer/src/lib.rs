//! Detection overlay rendering
//!
//! Draws fused detections back onto tray images for visual inspection.
//! Box color is keyed by the scale a detection survived from, so the
//! multi-scale origin of each box is visible at a glance.
//!
//! # Example
//! ```
//! use harvest_common::{Detection, Scale};
//! use harvest_visualizer::annotate;
//! use image::RgbImage;
//!
//! let img = RgbImage::new(200, 200);
//! let detections = vec![Detection {
//!     x: 40,
//!     y: 40,
//!     w: 60,
//!     h: 50,
//!     confidence: 0.9,
//!     class_id: 32,
//!     source_scale: Scale::new(640, 640),
//! }];
//! let annotated = annotate(&img, &detections);
//! assert_eq!(annotated.dimensions(), (200, 200));
//! ```

use harvest_common::image_io::save_image;
use harvest_common::{Detection, Result, Scale};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Border thickness of drawn boxes, in pixels
const LINE_THICKNESS: u32 = 2;

/// One color per pyramid scale, finest first
const PALETTE: &[Rgb<u8>] = &[
    Rgb([66, 135, 245]),  // 320 blue
    Rgb([76, 175, 80]),   // 640 green
    Rgb([255, 193, 7]),   // 960 yellow
    Rgb([244, 67, 54]),   // 1280 red
];

/// Color for a detection's source scale
#[must_use]
pub fn scale_color(scale: Scale) -> Rgb<u8> {
    let slot = (scale.width / 320).saturating_sub(1) as usize;
    PALETTE[slot % PALETTE.len()]
}

/// Draw hollow rectangles for each detection onto a copy of the image
///
/// Boxes are clamped to the image bounds. Detections that fall entirely
/// outside the image are skipped.
#[must_use]
pub fn annotate(image: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut out = image.clone();
    let (img_w, img_h) = out.dimensions();

    for detection in detections {
        let color = scale_color(detection.source_scale);

        let x = detection.x.max(0) as u32;
        let y = detection.y.max(0) as u32;
        if x >= img_w || y >= img_h {
            continue;
        }
        let w = (detection.w.max(0) as u32).min(img_w - x);
        let h = (detection.h.max(0) as u32).min(img_h - y);
        if w == 0 || h == 0 {
            continue;
        }

        for t in 0..LINE_THICKNESS {
            let inner_w = w.saturating_sub(2 * t);
            let inner_h = h.saturating_sub(2 * t);
            if inner_w > 0 && inner_h > 0 {
                let rect = Rect::at((x + t) as i32, (y + t) as i32).of_size(inner_w, inner_h);
                draw_hollow_rect_mut(&mut out, rect, color);
            }
        }
    }

    debug!("Annotated image with {} boxes", detections.len());
    out
}

/// Output path for an annotated copy of `image_path` inside `out_dir`
#[must_use]
pub fn annotated_path(image_path: &Path, out_dir: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map_or_else(|| "image".into(), |s| s.to_string_lossy().into_owned());
    out_dir.join(format!("{stem}_annotated.jpg"))
}

/// Draw the detections onto `image` and save the copy into `out_dir`
///
/// `source_path` only contributes the file stem; the output lands at
/// `<out_dir>/<stem>_annotated.jpg`. Pass the exact image the detections
/// were produced on so the boxes line up. Returns the written path.
///
/// # Errors
///
/// Returns an error if the output directory or file cannot be written.
pub fn save_annotated(
    image: &RgbImage,
    detections: &[Detection],
    source_path: &Path,
    out_dir: &Path,
) -> Result<PathBuf> {
    let annotated = annotate(image, detections);

    std::fs::create_dir_all(out_dir)?;
    let out_path = annotated_path(source_path, out_dir);
    save_image(&annotated, &out_path)?;

    info!("Saved annotated image to {:?}", out_path);
    Ok(out_path)
}
