//! Image loading and saving built on the `image` crate
//!
//! Format is detected from the file extension on save and from the file
//! contents on load. Everything is surfaced as RGB8.

use crate::{Result, VisionError};
use image::RgbImage;
use std::path::Path;

/// Load an image as RGB, decoding any format the `image` crate supports
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|e| VisionError::ImageLoad {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(img.to_rgb8())
}

/// Save an RGB image, format chosen from the file extension
pub fn save_image<P: AsRef<Path>>(image: &RgbImage, path: P) -> Result<()> {
    let path = path.as_ref();
    image.save(path).map_err(|e| VisionError::ImageSave {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
