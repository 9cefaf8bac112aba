//! Pixel to geographic coordinate conversion.

use serde::Serialize;

use crate::errors::{GeoSegError, Result};

/// Affine transform from pixel grid to CRS coordinates, in the usual
/// `(a, b, c, d, e, f)` order:
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Pixel coordinates map to themselves (y grows downwards).
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// Builds the transform from a GeoTIFF tiepoint `(i, j, k, x, y, z)` and
    /// pixel scale `(sx, sy, sz)`. The raster y axis points south, so the
    /// row coefficient is `-sy`.
    pub fn from_tiepoint_scale(tiepoint: &[f64], scale: &[f64]) -> Option<Self> {
        if tiepoint.len() < 6 || scale.len() < 2 {
            return None;
        }
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        let (sx, sy) = (scale[0], scale[1]);
        Some(Self::new(sx, 0.0, x - i * sx, 0.0, -sy, y + j * sy))
    }

    /// Builds the transform from a row-major 4x4 ModelTransformationTag.
    pub fn from_model_transformation(matrix: &[f64]) -> Option<Self> {
        if matrix.len() < 16 {
            return None;
        }
        Some(Self::new(
            matrix[0], matrix[1], matrix[3], matrix[4], matrix[5], matrix[7],
        ))
    }

    /// Applies the transform, returning `(x, y)`.
    pub fn apply(&self, row: f64, col: f64) -> (f64, f64) {
        let x = self.a * col + self.b * row + self.c;
        let y = self.d * col + self.e * row + self.f;
        (x, y)
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Kind of coordinate reference system declared by the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "epsg", rename_all = "snake_case")]
pub enum CrsKind {
    Geographic(Option<u32>),
    Projected(Option<u32>),
    Unknown,
}

impl CrsKind {
    /// Transform output can be read as degrees only for geographic rasters.
    pub fn is_geographic(&self) -> bool {
        matches!(self, CrsKind::Geographic(_))
    }

    pub fn description(&self) -> String {
        match self {
            CrsKind::Geographic(Some(code)) => format!("geographic (EPSG:{})", code),
            CrsKind::Geographic(None) => "geographic".to_string(),
            CrsKind::Projected(Some(code)) => format!("projected (EPSG:{})", code),
            CrsKind::Projected(None) => "projected".to_string(),
            CrsKind::Unknown => "unknown".to_string(),
        }
    }
}

/// A coordinate reported as latitude/longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// A transform bound to the raster extent it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Georeferencer {
    pub transform: GeoTransform,
    pub height: usize,
    pub width: usize,
}

impl Georeferencer {
    pub const fn new(transform: GeoTransform, height: usize, width: usize) -> Self {
        Self {
            transform,
            height,
            width,
        }
    }

    /// Converts pixel `(row, col)` to `(lat, lon)`: `y` is reported as the
    /// latitude and `x` as the longitude.
    pub fn pixel_to_lonlat(&self, row: i64, col: i64) -> Result<LatLon> {
        if !self.contains(row, col) {
            return Err(GeoSegError::OutOfBounds {
                row,
                col,
                height: self.height,
                width: self.width,
            });
        }
        let (x, y) = self.transform.apply(row as f64, col as f64);
        Ok(LatLon { lat: y, lon: x })
    }

    /// Pixel at `(height / 2, width / 2)` using integer division.
    pub fn center_pixel(&self) -> (i64, i64) {
        ((self.height / 2) as i64, (self.width / 2) as i64)
    }

    pub fn center_lonlat(&self) -> Result<LatLon> {
        let (row, col) = self.center_pixel();
        self.pixel_to_lonlat(row, col)
    }

    fn contains(&self, row: i64, col: i64) -> bool {
        row >= 0 && col >= 0 && (row as u64) < self.height as u64 && (col as u64) < self.width as u64
    }
}

/// Free-function form of [`Georeferencer::pixel_to_lonlat`].
pub fn pixel_to_lonlat(
    transform: &GeoTransform,
    height: usize,
    width: usize,
    row: i64,
    col: i64,
) -> Result<LatLon> {
    Georeferencer::new(*transform, height, width).pixel_to_lonlat(row, col)
}
