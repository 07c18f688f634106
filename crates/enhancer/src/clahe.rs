//! Contrast-limited adaptive histogram equalization
//!
//! The frame is split into a tile grid. Each tile gets its own clipped and
//! equalized histogram mapping, and every pixel is remapped by bilinear
//! interpolation between the four surrounding tile mappings, so tile seams
//! stay invisible. The mapping runs on the luminance channel; color is
//! carried along by scaling each pixel toward its remapped luminance.

use image::{Rgb, RgbImage};

/// Equalize local contrast
///
/// `clip_limit` is expressed in multiples of the uniform histogram level,
/// `tiles_x`/`tiles_y` give the tile grid. Grids larger than the image are
/// clamped so every tile holds at least one pixel.
pub fn equalize(image: &RgbImage, clip_limit: f64, tiles_x: u32, tiles_y: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || tiles_x == 0 || tiles_y == 0 {
        return image.clone();
    }
    let tiles_x = tiles_x.min(width);
    let tiles_y = tiles_y.min(height);

    let luma: Vec<u8> = image
        .pixels()
        .map(|p| luminance(p[0], p[1], p[2]))
        .collect();

    // Tile boundaries spread the remainder so no tile is empty
    let x_bounds = axis_bounds(width, tiles_x);
    let y_bounds = axis_bounds(height, tiles_y);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for (ty, &(y0, y1)) in y_bounds.iter().enumerate() {
        for (tx, &(x0, x1)) in x_bounds.iter().enumerate() {
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[luma[(y * width + x) as usize] as usize] += 1;
                }
            }
            let count = (x1 - x0) * (y1 - y0);
            luts[ty * tiles_x as usize + tx] = clipped_lut(&hist, count, clip_limit);
        }
    }

    let x_interp = axis_interp(&x_bounds, width);
    let y_interp = axis_interp(&y_bounds, height);

    let mut out = RgbImage::new(width, height);
    for y in 0..height {
        let iy = &y_interp[y as usize];
        for x in 0..width {
            let ix = &x_interp[x as usize];
            let v = luma[(y * width + x) as usize] as usize;

            let tl = f64::from(luts[iy.lo * tiles_x as usize + ix.lo][v]);
            let tr = f64::from(luts[iy.lo * tiles_x as usize + ix.hi][v]);
            let bl = f64::from(luts[iy.hi * tiles_x as usize + ix.lo][v]);
            let br = f64::from(luts[iy.hi * tiles_x as usize + ix.hi][v]);

            let top = tl + (tr - tl) * ix.frac;
            let bottom = bl + (br - bl) * ix.frac;
            let mapped = top + (bottom - top) * iy.frac;

            let src = image.get_pixel(x, y);
            out.put_pixel(x, y, relight(*src, v as u8, mapped));
        }
    }
    out
}

struct AxisInterp {
    lo: usize,
    hi: usize,
    frac: f64,
}

fn axis_bounds(len: u32, tiles: u32) -> Vec<(u32, u32)> {
    (0..tiles)
        .map(|t| (t * len / tiles, (t + 1) * len / tiles))
        .collect()
}

fn axis_interp(bounds: &[(u32, u32)], len: u32) -> Vec<AxisInterp> {
    let centers: Vec<f64> = bounds
        .iter()
        .map(|&(a, b)| (f64::from(a) + f64::from(b)) / 2.0)
        .collect();
    let last = centers.len() - 1;

    (0..len)
        .map(|v| {
            let p = f64::from(v) + 0.5;
            if p <= centers[0] {
                AxisInterp {
                    lo: 0,
                    hi: 0,
                    frac: 0.0,
                }
            } else if p >= centers[last] {
                AxisInterp {
                    lo: last,
                    hi: last,
                    frac: 0.0,
                }
            } else {
                let mut lo = 0;
                while centers[lo + 1] <= p {
                    lo += 1;
                }
                AxisInterp {
                    lo,
                    hi: lo + 1,
                    frac: (p - centers[lo]) / (centers[lo + 1] - centers[lo]),
                }
            }
        })
        .collect()
}

/// Clip a tile histogram and turn it into an equalization mapping
///
/// Excess above the clip limit is redistributed across the full range, so
/// flat regions keep their level instead of being stretched to white.
fn clipped_lut(hist: &[u32; 256], count: u32, clip_limit: f64) -> [u8; 256] {
    let mut hist = *hist;
    let limit = ((clip_limit * f64::from(count) / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let bonus = excess / 256;
    let mut remainder = excess % 256;
    if bonus > 0 {
        for bin in hist.iter_mut() {
            *bin += bonus;
        }
    }
    if remainder > 0 {
        let step = (256 / remainder).max(1) as usize;
        let mut i = 0;
        while i < 256 && remainder > 0 {
            hist[i] += 1;
            remainder -= 1;
            i += step;
        }
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u64;
    for (i, &bin) in hist.iter().enumerate() {
        cdf += u64::from(bin);
        lut[i] = ((cdf * 255) / u64::from(count.max(1))) as u8;
    }
    lut
}

fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)).round() as u8
}

/// Scale a pixel so its luminance matches the remapped value
fn relight(pixel: Rgb<u8>, old_luma: u8, new_luma: f64) -> Rgb<u8> {
    if old_luma == 0 {
        let v = new_luma.round().clamp(0.0, 255.0) as u8;
        return Rgb([v, v, v]);
    }
    let ratio = new_luma / f64::from(old_luma);
    Rgb([
        scale_channel(pixel[0], ratio),
        scale_channel(pixel[1], ratio),
        scale_channel(pixel[2], ratio),
    ])
}

fn scale_channel(c: u8, ratio: f64) -> u8 {
    (f64::from(c) * ratio).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn luma_range(image: &RgbImage) -> (u8, u8) {
        let mut min = u8::MAX;
        let mut max = u8::MIN;
        for p in image.pixels() {
            let l = luminance(p[0], p[1], p[2]);
            min = min.min(l);
            max = max.max(l);
        }
        (min, max)
    }

    #[test]
    fn test_equalize_preserves_dimensions() {
        let image = RgbImage::new(100, 60);
        let out = equalize(&image, 3.0, 8, 8);
        assert_eq!(out.dimensions(), (100, 60));
    }

    #[test]
    fn test_equalize_widens_narrow_contrast() {
        // Horizontal gradient compressed into a 40-level band
        let image = RgbImage::from_fn(128, 64, |x, _| {
            let v = 100 + (x * 40 / 128) as u8;
            Rgb([v, v, v])
        });
        let (min_before, max_before) = luma_range(&image);
        let out = equalize(&image, 3.0, 8, 8);
        let (min_after, max_after) = luma_range(&out);
        assert!(
            u32::from(max_after - min_after) > u32::from(max_before - min_before),
            "contrast did not widen: {}..{} -> {}..{}",
            min_before,
            max_before,
            min_after,
            max_after
        );
    }

    #[test]
    fn test_equalize_keeps_flat_field_flat() {
        let image = RgbImage::from_pixel(64, 64, Rgb([128, 128, 128]));
        let out = equalize(&image, 3.0, 8, 8);
        let (min, max) = luma_range(&out);
        // Clipping redistributes the spike, so a flat field stays within a
        // narrow band instead of snapping to white
        assert!(max - min < 16, "flat field spread to {min}..{max}");
        assert!(min > 64 && max < 224, "flat field drifted to {min}..{max}");
    }

    #[test]
    fn test_equalize_handles_tiny_image() {
        let image = RgbImage::from_pixel(3, 2, Rgb([10, 200, 30]));
        let out = equalize(&image, 3.0, 8, 8);
        assert_eq!(out.dimensions(), (3, 2));
    }

    #[test]
    fn test_equalize_zero_tiles_passthrough() {
        let image = RgbImage::from_pixel(16, 16, Rgb([50, 60, 70]));
        let out = equalize(&image, 3.0, 0, 8);
        assert_eq!(out, image);
    }
}
