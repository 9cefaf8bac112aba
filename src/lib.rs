pub mod config;
pub mod errors;
pub mod georef;
pub mod mask;
pub mod model;
pub mod raster;
pub mod render;
pub mod segmenter;
pub mod storage;
pub mod traits;
pub mod upload;
pub mod users;
pub mod web;

pub mod mocks;

pub use config::Config;
pub use errors::{AuthError, GeoSegError, Result};
pub use georef::{pixel_to_lonlat, CrsKind, GeoTransform, Georeferencer, LatLon};
pub use mask::Mask;
pub use model::SamModel;
pub use segmenter::Segmenter;
pub use traits::*;
pub use upload::{UploadOrchestrator, UploadResult, UploadedFile};
pub use web::{router, AppState};

#[cfg(test)]
pub use mocks::*;
