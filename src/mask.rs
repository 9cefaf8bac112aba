//! Segmentation masks.

use image::{ImageBuffer, Luma};
use ndarray::prelude::*;

/// Default cut-off between background and segment for mask logits.
pub const DEFAULT_THRESHOLD: f32 = 0.0;

/// A per-pixel score for one detected region, shaped `(row, col)` like the
/// raster's first band.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    scores: Array2<f32>,
}

impl Mask {
    pub fn new(scores: Array2<f32>) -> Self {
        Self { scores }
    }

    pub fn from_bool(mask: ArrayView2<bool>) -> Self {
        Self::new(mask.mapv(|v| if v { 1.0 } else { 0.0 }))
    }

    pub fn scores(&self) -> ArrayView2<'_, f32> {
        self.scores.view()
    }

    /// `(height, width)`.
    pub fn shape(&self) -> (usize, usize) {
        self.scores.dim()
    }

    pub fn binary(&self, threshold: f32) -> Array2<bool> {
        self.scores.mapv(|v| v > threshold)
    }

    /// Number of pixels above `threshold`.
    pub fn area(&self, threshold: f32) -> usize {
        self.scores.iter().filter(|&&v| v > threshold).count()
    }

    /// Scores mapped to `[0, 1]` by min/max, constant masks become all zero.
    pub fn normalized(&self) -> ImageBuffer<Luma<f32>, Vec<f32>> {
        let (height, width) = self.shape();
        let (min, max) = self
            .scores
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;
        let pixels = self
            .scores
            .iter()
            .map(|&v| if range > 0.0 { (v - min) / range } else { 0.0 })
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixels)
            .unwrap_or_else(|| ImageBuffer::new(width as u32, height as u32))
    }
}
