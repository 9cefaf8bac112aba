use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the segmentation web application.
///
/// Each variant carries the context of its error domain (filesystem, raster
/// decoding, model inference, storage, credentials) so callers and the HTTP
/// layer can classify failures without parsing message strings.
#[derive(Error, Debug)]
pub enum GeoSegError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {path:?}")]
    FileNotFound { path: PathBuf },

    #[error("Raster error: could not decode {path:?}")]
    Raster {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Pixel ({row}, {col}) is outside the {height}x{width} raster")]
    OutOfBounds {
        row: i64,
        col: i64,
        height: usize,
        width: usize,
    },

    #[error("Storage error: {operation} failed for {key}")]
    Storage {
        key: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Payload too large: the limit is {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Credential failures. These are shown to the user as flash messages and
/// never turn into a hard request failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Email already registered")]
    EmailTaken,

    #[error("Invalid email or password")]
    InvalidCredentials,
}

pub type Result<T> = std::result::Result<T, GeoSegError>;

impl GeoSegError {
    /// Wraps any model-side failure that has no more specific variant.
    pub fn model(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Model {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(
        key: impl Into<String>,
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Storage {
            key: key.into(),
            operation: operation.into(),
            source: source.into(),
        }
    }
}

/// Convert anyhow errors to configuration errors.
impl From<anyhow::Error> for GeoSegError {
    fn from(err: anyhow::Error) -> Self {
        GeoSegError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should construct
/// `GeoSegError::FileSystem` directly; this is the fallback for `?`.
impl From<std::io::Error> for GeoSegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Convert image crate errors to image processing errors.
impl From<image::ImageError> for GeoSegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ONNX Runtime errors to model errors.
impl From<ort::Error> for GeoSegError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors come out of tensor manipulation around inference, so they
/// are reported as model errors.
impl From<ndarray::ShapeError> for GeoSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}

impl From<reqwest::Error> for GeoSegError {
    fn from(err: reqwest::Error) -> Self {
        let key = err
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Self::storage(key, "http request", err)
    }
}

impl From<serde_json::Error> for GeoSegError {
    fn from(err: serde_json::Error) -> Self {
        Self::storage("unknown", "json decoding", err)
    }
}
