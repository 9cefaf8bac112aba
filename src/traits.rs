use crate::errors::Result;
use crate::mask::Mask;
use async_trait::async_trait;
use ndarray::prelude::*;

/// Abstraction over the segmentation model.
///
/// The orchestrator depends on this trait rather than on the ONNX session,
/// so tests run against a mock.
pub trait SegmentationModel: Send + Sync {
    /// Segments a raster given as `(band, row, col)` and returns one mask
    /// per detected region, each of shape `(row, col)`.
    fn segment_bands(&self, bands: ArrayView3<f32>) -> Result<Vec<Mask>>;

    /// Side length of the square model input.
    fn get_image_size(&self) -> u32;

    /// Raw tensor prediction (low-level API).
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>>;
}

/// User registration and credential checks. Backends are interchangeable
/// and chosen by configuration.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Stores a new user. Fails with `AuthError::EmailTaken` if the email is
    /// already registered.
    async fn register(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<()>;

    /// Fails with `AuthError::InvalidCredentials` for an unknown email or a
    /// wrong password.
    async fn authenticate(&self, email: &str, password: &str) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}

/// Durable storage for uploaded originals.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    fn backend_name(&self) -> &'static str;
}
