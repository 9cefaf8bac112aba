//! GeoTIFF decoding: pixel data as band-major `f32` and the georeferencing
//! tags that come with it.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use num_traits::AsPrimitive;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, warn};

use crate::errors::{GeoSegError, Result};
use crate::georef::{CrsKind, GeoTransform, Georeferencer};

const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const MODEL_TRANSFORMATION_TAG: u16 = 34264;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;

const GT_MODEL_TYPE_GEO_KEY: u32 = 1024;
const GEOGRAPHIC_TYPE_GEO_KEY: u32 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u32 = 3072;

const MODEL_TYPE_PROJECTED: u32 = 1;
const MODEL_TYPE_GEOGRAPHIC: u32 = 2;
/// GeoKey value meaning "user defined", which carries no EPSG code.
const USER_DEFINED: u32 = 32767;

/// Largest raster decoded by default, in samples (width x height x bands).
pub const DEFAULT_MAX_SAMPLES: usize = 64 * 1024 * 1024;

/// Georeferencing metadata of a raster, without the pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub width: usize,
    pub height: usize,
    pub samples_per_pixel: usize,
    pub transform: GeoTransform,
    pub crs: CrsKind,
    /// False when the file carries no transform tags and the identity
    /// transform was substituted.
    pub georeferenced: bool,
}

impl RasterInfo {
    pub fn georeferencer(&self) -> Georeferencer {
        Georeferencer::new(self.transform, self.height, self.width)
    }

    /// Number of samples a full decode produces.
    pub fn sample_count(&self) -> usize {
        self.width
            .saturating_mul(self.height)
            .saturating_mul(self.samples_per_pixel)
    }

    /// Rejects rasters whose decoded size exceeds `max_samples`. The check
    /// uses header fields only, so it runs before any strip is inflated.
    pub fn check_budget(&self, max_samples: usize) -> Result<()> {
        if self.sample_count() > max_samples {
            return Err(GeoSegError::validation(
                "image",
                format!(
                    "Raster too large: {}x{} with {} bands exceeds the limit of {} samples.",
                    self.width, self.height, self.samples_per_pixel, max_samples
                ),
            ));
        }
        Ok(())
    }
}

/// A decoded raster. `bands` has shape `(band, row, col)`.
#[derive(Debug, Clone)]
pub struct Raster {
    pub info: RasterInfo,
    pub bands: Array3<f32>,
}

impl Raster {
    pub fn band_count(&self) -> usize {
        self.bands.len_of(Axis(0))
    }

    /// `(height, width)` of the first band.
    pub fn shape(&self) -> (usize, usize) {
        (self.info.height, self.info.width)
    }
}

/// Reads only the tags, skipping the strip/tile data.
pub fn read_info(path: &Path) -> Result<RasterInfo> {
    let mut decoder = open_decoder(path)?;
    read_info_from(&mut decoder).map_err(|source| raster_error(path, source))
}

/// Reads pixel data and georeferencing of every band. Fails with
/// `Validation` before decoding when the raster holds more than
/// `max_samples` samples.
pub fn read_raster(path: &Path, max_samples: usize) -> Result<Raster> {
    let mut decoder = open_decoder(path)?;
    let info = read_info_from(&mut decoder).map_err(|source| raster_error(path, source))?;
    info.check_budget(max_samples)?;

    let planar = decoder
        .find_tag(Tag::PlanarConfiguration)
        .map_err(|source| raster_error(path, source))?
        .map(|v| v.into_u32())
        .transpose()
        .map_err(|source| raster_error(path, source))?
        .unwrap_or(1);
    if planar != 1 {
        return Err(GeoSegError::ImageProcessing {
            path: path.display().to_string(),
            operation: "decode raster".to_string(),
            source: "band-separate (planar) layout is not supported".into(),
        });
    }

    let data = decoder
        .read_image()
        .map_err(|source| raster_error(path, source))?;
    let samples = decoding_result_to_f32(data).ok_or_else(|| GeoSegError::ImageProcessing {
        path: path.display().to_string(),
        operation: "decode raster".to_string(),
        source: "unsupported sample format".into(),
    })?;

    let bands = interleaved_to_bands(samples, info.height, info.width).map_err(|e| {
        GeoSegError::ImageProcessing {
            path: path.display().to_string(),
            operation: "split bands".to_string(),
            source: Box::new(e),
        }
    })?;
    debug!(
        path = %path.display(),
        bands = bands.len_of(Axis(0)),
        height = info.height,
        width = info.width,
        "decoded raster"
    );

    Ok(Raster { info, bands })
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            GeoSegError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            GeoSegError::FileSystem {
                path: path.to_path_buf(),
                operation: "open raster".to_string(),
                source: e,
            }
        }
    })?;
    Decoder::new(BufReader::new(file))
        .map(|d| d.with_limits(Limits::default()))
        .map_err(|source| raster_error(path, source))
}

fn raster_error(path: &Path, source: tiff::TiffError) -> GeoSegError {
    GeoSegError::Raster {
        path: PathBuf::from(path),
        source,
    }
}

fn read_info_from<R: Read + Seek>(decoder: &mut Decoder<R>) -> tiff::TiffResult<RasterInfo> {
    let (width, height) = decoder.dimensions()?;
    let samples_per_pixel = decoder
        .find_tag_unsigned::<u32>(Tag::SamplesPerPixel)?
        .unwrap_or(1)
        .max(1);

    let transformation = find_f64_vec(decoder, MODEL_TRANSFORMATION_TAG)?;
    let tiepoint = find_f64_vec(decoder, MODEL_TIEPOINT_TAG)?;
    let scale = find_f64_vec(decoder, MODEL_PIXEL_SCALE_TAG)?;

    let transform = transformation
        .as_deref()
        .and_then(GeoTransform::from_model_transformation)
        .or_else(|| match (tiepoint.as_deref(), scale.as_deref()) {
            (Some(tiepoint), Some(scale)) => GeoTransform::from_tiepoint_scale(tiepoint, scale),
            _ => None,
        });

    let georeferenced = transform.is_some();
    if !georeferenced {
        warn!("raster has no georeferencing tags, using pixel coordinates");
    }

    let crs = match decoder.find_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG))? {
        Some(value) => parse_geo_keys(&value.into_u32_vec()?),
        None => CrsKind::Unknown,
    };

    Ok(RasterInfo {
        width: width as usize,
        height: height as usize,
        samples_per_pixel: samples_per_pixel as usize,
        transform: transform.unwrap_or_default(),
        crs,
        georeferenced,
    })
}

fn find_f64_vec<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    code: u16,
) -> tiff::TiffResult<Option<Vec<f64>>> {
    decoder
        .find_tag(Tag::from_u16_exhaustive(code))?
        .map(|value| value.into_f64_vec())
        .transpose()
}

/// Reads the CRS kind out of a GeoKeyDirectory.
///
/// The directory is a header `(version, revision, minor, count)` followed by
/// `count` entries of `(key, location, count, value)`. Only keys stored
/// inline (`location == 0`) are consulted.
pub fn parse_geo_keys(directory: &[u32]) -> CrsKind {
    if directory.len() < 4 {
        return CrsKind::Unknown;
    }
    let declared = directory[3] as usize;

    let mut model_type = None;
    let mut geographic_code = None;
    let mut projected_code = None;
    for entry in directory[4..].chunks_exact(4).take(declared) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key {
            GT_MODEL_TYPE_GEO_KEY => model_type = Some(value),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic_code = Some(value),
            PROJECTED_CS_TYPE_GEO_KEY => projected_code = Some(value),
            _ => {}
        }
    }

    let epsg = |code: Option<u32>| code.filter(|&c| c != 0 && c != USER_DEFINED);
    match model_type {
        Some(MODEL_TYPE_GEOGRAPHIC) => CrsKind::Geographic(epsg(geographic_code)),
        Some(MODEL_TYPE_PROJECTED) => CrsKind::Projected(epsg(projected_code)),
        _ => CrsKind::Unknown,
    }
}

fn cast_all<T: AsPrimitive<f32>>(values: Vec<T>) -> Vec<f32> {
    values.into_iter().map(|v| v.as_()).collect()
}

#[allow(unreachable_patterns)]
fn decoding_result_to_f32(data: DecodingResult) -> Option<Vec<f32>> {
    match data {
        DecodingResult::U8(v) => Some(cast_all(v)),
        DecodingResult::U16(v) => Some(cast_all(v)),
        DecodingResult::U32(v) => Some(cast_all(v)),
        DecodingResult::U64(v) => Some(cast_all(v)),
        DecodingResult::I8(v) => Some(cast_all(v)),
        DecodingResult::I16(v) => Some(cast_all(v)),
        DecodingResult::I32(v) => Some(cast_all(v)),
        DecodingResult::I64(v) => Some(cast_all(v)),
        DecodingResult::F32(v) => Some(v),
        DecodingResult::F64(v) => Some(cast_all(v)),
        _ => None,
    }
}

/// Turns pixel-interleaved samples into a `(band, row, col)` array.
fn interleaved_to_bands(
    samples: Vec<f32>,
    height: usize,
    width: usize,
) -> std::result::Result<Array3<f32>, ndarray::ShapeError> {
    let pixels = height * width;
    let band_count = if pixels == 0 { 0 } else { samples.len() / pixels };
    let interleaved = Array3::from_shape_vec((height, width, band_count), samples)?;
    Ok(interleaved
        .permuted_axes([2, 0, 1])
        .as_standard_layout()
        .into_owned())
}
