//! Runs a segmentation model against a raster file.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::{GeoSegError, Result};
use crate::mask::Mask;
use crate::raster::{self, Raster};
use crate::traits::SegmentationModel;

/// Wraps a model so callers hand it a path instead of a tensor.
///
/// Every call decodes the file and runs inference again; nothing is cached.
pub struct Segmenter<M: SegmentationModel + ?Sized> {
    model: Arc<M>,
    max_samples: usize,
}

impl<M: SegmentationModel + ?Sized> Clone for Segmenter<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            max_samples: self.max_samples,
        }
    }
}

impl<M: SegmentationModel + ?Sized> Segmenter<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self {
            model,
            max_samples: raster::DEFAULT_MAX_SAMPLES,
        }
    }

    /// Caps the decoded raster size, in samples.
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Segments the raster at `path`.
    ///
    /// Fails with `FileNotFound` for a missing path, with `Validation` when
    /// the raster exceeds the sample budget and with `Model` when the file
    /// cannot be decoded or the model rejects it.
    pub fn segment(&self, path: &Path) -> Result<Vec<Mask>> {
        let raster = self.load(path)?;
        self.segment_raster(&raster)
    }

    /// Segments an already decoded raster.
    pub fn segment_raster(&self, raster: &Raster) -> Result<Vec<Mask>> {
        let masks = self.model.segment_bands(raster.bands.view())?;
        let expected = raster.shape();
        if let Some(bad) = masks.iter().find(|m| m.shape() != expected) {
            return Err(GeoSegError::model(
                "validate masks",
                format!(
                    "mask shape {:?} does not match raster shape {:?}",
                    bad.shape(),
                    expected
                ),
            ));
        }
        info!(masks = masks.len(), "segmentation finished");
        Ok(masks)
    }

    /// Decodes the raster, folding decode failures into model errors.
    /// Missing files and rasters over the size budget keep their own
    /// variants.
    pub fn load(&self, path: &Path) -> Result<Raster> {
        if !path.exists() {
            return Err(GeoSegError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        debug!(path = %path.display(), "reading raster for segmentation");
        raster::read_raster(path, self.max_samples).map_err(|e| match e {
            GeoSegError::FileNotFound { .. } | GeoSegError::Validation { .. } => e,
            other => GeoSegError::model(format!("read raster {}", path.display()), other),
        })
    }
}
