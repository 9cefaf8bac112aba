//! PNG renderings of rasters and masks.

use std::path::Path;

use image::{ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::map::map_colors;
use ndarray::prelude::*;

use crate::errors::{GeoSegError, Result};
use crate::mask::Mask;
use crate::model::bands_to_rgb;

/// Alpha of the segmentation overlay (half transparent).
pub const OVERLAY_ALPHA: u8 = 128;

/// Viridis control points, evenly spaced over `[0, 1]`.
const VIRIDIS: [[u8; 3]; 9] = [
    [68, 1, 84],
    [71, 44, 122],
    [59, 81, 139],
    [44, 113, 142],
    [33, 144, 141],
    [39, 173, 129],
    [92, 200, 99],
    [170, 220, 50],
    [253, 231, 37],
];

/// Maps `t` in `[0, 1]` onto the viridis colormap.
pub fn viridis(t: f32) -> [u8; 3] {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = t * (VIRIDIS.len() - 1) as f32;
    let lower = (scaled.floor() as usize).min(VIRIDIS.len() - 1);
    let upper = (lower + 1).min(VIRIDIS.len() - 1);
    let frac = scaled - lower as f32;
    let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * frac).round() as u8;
    [
        mix(VIRIDIS[lower][0], VIRIDIS[upper][0]),
        mix(VIRIDIS[lower][1], VIRIDIS[upper][1]),
        mix(VIRIDIS[lower][2], VIRIDIS[upper][2]),
    ]
}

/// Colors the mask with viridis at [`OVERLAY_ALPHA`].
pub fn render_overlay(mask: &Mask) -> RgbaImage {
    let normalized: ImageBuffer<Luma<f32>, Vec<f32>> = mask.normalized();
    map_colors(&normalized, |Luma([t])| {
        let [r, g, b] = viridis(t);
        Rgba([r, g, b, OVERLAY_ALPHA])
    })
}

/// 8-bit RGB preview of the raster's display bands.
pub fn render_preview(bands: ArrayView3<f32>) -> Result<RgbImage> {
    let rgb = bands_to_rgb(bands)?;
    Ok(map_colors(&rgb, |Rgb([r, g, b])| {
        Rgb([to_u8(r), to_u8(g), to_u8(b)])
    }))
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Saves `image` as PNG, creating the parent directory.
pub fn save_png<P, C>(image: &ImageBuffer<P, C>, path: &Path) -> Result<()>
where
    P: image::PixelWithColorType,
    [P::Subpixel]: image::EncodableLayout,
    C: std::ops::Deref<Target = [P::Subpixel]>,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GeoSegError::FileSystem {
            path: parent.to_path_buf(),
            operation: "create output directory".to_string(),
            source: e,
        })?;
    }
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| GeoSegError::ImageProcessing {
            path: path.display().to_string(),
            operation: "save png".to_string(),
            source: Box::new(e),
        })
}
