//! Frame preprocessing before encoding.
//!
//! Mirrors camera frames, keeps the central band of rows where the signer's
//! hands and torso usually are, and equalises the luma histogram so that
//! lighting differences between reference material and live frames matter
//! less.

use image::{imageops, DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

use crate::error::Result;

/// Preprocessing switches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessOptions {
    /// Flip horizontally (selfie camera frames)
    pub mirror: bool,
    /// Fraction of rows kept around the vertical centre; `1.0` keeps all
    pub crop_fraction: f32,
    /// Equalise the luma histogram
    pub equalize: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            mirror: false,
            crop_fraction: 0.6,
            equalize: true,
        }
    }
}

impl PreprocessOptions {
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }
}

/// Decode, transform and re-encode an image as PNG.
pub fn preprocess_image(bytes: &[u8], options: &PreprocessOptions) -> Result<Vec<u8>> {
    let mut rgb = image::load_from_memory(bytes)?.to_rgb8();

    if options.mirror {
        imageops::flip_horizontal_in_place(&mut rgb);
    }

    if options.crop_fraction > 0.0 && options.crop_fraction < 1.0 {
        rgb = crop_center_rows(&rgb, options.crop_fraction);
    }

    if options.equalize {
        equalize_luma(&mut rgb);
    }

    let mut out = Vec::new();
    DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

/// Keep `fraction` of the rows, centred vertically.
fn crop_center_rows(image: &RgbImage, fraction: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    let crop_height = ((height as f32 * fraction) as u32).max(1);
    let start_y = (height - crop_height) / 2;
    imageops::crop_imm(image, 0, start_y, width, crop_height).to_image()
}

/// Histogram-equalise BT.601 luma in place, leaving chroma untouched.
///
/// Shifting Y by `d` in YCbCr shifts every RGB channel by `d`, so the
/// adjustment is applied directly to the channels.
fn equalize_luma(image: &mut RgbImage) {
    let total = (image.width() as u64) * (image.height() as u64);
    if total == 0 {
        return;
    }

    let luma = |p: &image::Rgb<u8>| -> u8 {
        let [r, g, b] = p.0;
        (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
            .round()
            .clamp(0.0, 255.0) as u8
    };

    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[luma(pixel) as usize] += 1;
    }

    let mut cdf = [0u64; 256];
    let mut running = 0u64;
    for (i, count) in histogram.iter().enumerate() {
        running += count;
        cdf[i] = running;
    }

    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if total == cdf_min {
        // Single luma level: nothing to stretch.
        return;
    }

    let mut lut = [0u8; 256];
    let denom = (total - cdf_min) as f64;
    for (i, entry) in lut.iter_mut().enumerate() {
        let scaled = (cdf[i].saturating_sub(cdf_min)) as f64 / denom * 255.0;
        *entry = scaled.round().clamp(0.0, 255.0) as u8;
    }

    for pixel in image.pixels_mut() {
        let y = luma(pixel);
        let delta = lut[y as usize] as i16 - y as i16;
        for channel in pixel.0.iter_mut() {
            *channel = (*channel as i16 + delta).clamp(0, 255) as u8;
        }
    }
}
