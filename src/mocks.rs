use crate::errors::{GeoSegError, Result};
use crate::mask::Mask;
use crate::traits::SegmentationModel;
use ndarray::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Mock segmentation model for tests.
///
/// Produces `mask_count` masks; mask `i` marks every pixel whose column is
/// at least `i`. Calls are counted so tests can check whether the model was
/// reached at all.
#[derive(Debug, Clone)]
pub struct MockSegmentationModel {
    pub image_size: u32,
    pub mask_count: usize,
    pub fail: bool,
    calls: Arc<AtomicUsize>,
}

impl MockSegmentationModel {
    pub fn new(image_size: u32) -> Self {
        Self {
            image_size,
            mask_count: 2,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_mask_count(mut self, mask_count: usize) -> Self {
        self.mask_count = mask_count;
        self
    }

    /// A model whose every call fails with a model error.
    pub fn failing(image_size: u32) -> Self {
        Self {
            fail: true,
            ..Self::new(image_size)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn segment_bands(&self, bands: ArrayView3<f32>) -> Result<Vec<Mask>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GeoSegError::model("mock inference", "mock model failure"));
        }
        let (_, height, width) = bands.dim();
        Ok((0..self.mask_count)
            .map(|i| {
                Mask::new(Array2::from_shape_fn((height, width), |(_, col)| {
                    if col >= i {
                        1.0
                    } else {
                        -1.0
                    }
                }))
            })
            .collect())
    }

    fn get_image_size(&self) -> u32 {
        self.image_size
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        // zero mask per requested output
        let shape = tensor.shape();
        Ok(Array4::<f32>::zeros((
            shape[0],
            self.mask_count,
            shape[2],
            shape[3],
        )))
    }
}

/// Factory used across the test suites.
pub fn create_mock_model() -> MockSegmentationModel {
    MockSegmentationModel::new(1024)
}
