use std::path::Path;

use crate::{
    errors::{GeoSegError, Result},
    mask::Mask,
    traits::SegmentationModel,
};
use image::{imageops, imageops::FilterType, ImageBuffer, Luma, Rgb};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info};

/// ImageNet normalization used by Segment-Anything encoders.
const PIXEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const PIXEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub type Rgb32FImage = ImageBuffer<Rgb<f32>, Vec<f32>>;

/// Segment-Anything style ONNX model: one `image` input of shape
/// `[1, 3, S, S]` and one `masks` output of shape `[1, N, H, W]`.
pub struct SamModel {
    pub image_size: u32,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl SamModel {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        if !model_path.exists() {
            return Err(GeoSegError::FileNotFound {
                path: model_path.to_path_buf(),
            });
        }

        let mut session = SessionBuilder::new()
            .map_err(|e| GeoSegError::model("session builder init", e))?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| GeoSegError::model("execution provider setup", e))?
            .with_memory_pattern(true)
            .map_err(|e| GeoSegError::model("memory pattern setup", e))?
            .commit_from_file(model_path)
            .map_err(|e| {
                GeoSegError::model(format!("load model file: {}", model_path.display()), e)
            })?;

        let input = session.inputs.first().ok_or_else(|| {
            GeoSegError::model("read model inputs", "model declares no inputs")
        })?;
        let image_size = input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.get(2).copied())
            .filter(|&side| side > 0)
            .ok_or_else(|| {
                GeoSegError::model("read model input shape", "input tensor has no fixed size")
            })? as u32;
        let input_name = input.name.clone();
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| GeoSegError::model("read model outputs", "model declares no outputs"))?;

        // warm up the session
        let data = Array4::<f32>::zeros((1, 3, image_size as usize, image_size as usize));
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)
                .map_err(|e| GeoSegError::model("warm-up tensor creation", e))?])
            .map_err(|e| GeoSegError::model("warm-up run", e))?;

        info!(
            model = %model_path.display(),
            image_size,
            input = %input_name,
            output = %output_name,
            "segmentation model loaded"
        );

        Ok(Self {
            image_size,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }
}

impl SegmentationModel for SamModel {
    fn segment_bands(&self, bands: ArrayView3<f32>) -> Result<Vec<Mask>> {
        let (_, height, width) = bands.dim();
        let rgb = bands_to_rgb(bands)?;
        let (tensor, crop) = preprocess(&rgb, self.image_size)?;
        let masks = self.predict(tensor.view())?;
        debug!(masks = masks.len_of(Axis(1)), "model inference finished");
        postprocess_masks(masks, self.image_size, crop, width as u32, height as u32)
    }

    fn get_image_size(&self) -> u32 {
        self.image_size
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let data = tensor.as_standard_layout().into_owned();
        let mut binding = self.session.lock();
        let outputs = binding.run(
            ort::inputs![self.input_name.as_str() => TensorRef::from_array_view(&data)?],
        )?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

/// Picks three display bands and stretches each to `[0, 1]`.
///
/// Rasters with three or more bands use the first three; a single band is
/// replicated. Two-band rasters are rejected.
pub fn bands_to_rgb(bands: ArrayView3<f32>) -> Result<Rgb32FImage> {
    let (band_count, height, width) = bands.dim();
    let selected: [usize; 3] = match band_count {
        1 => [0, 0, 0],
        n if n >= 3 => [0, 1, 2],
        n => {
            return Err(GeoSegError::model(
                "select display bands",
                format!("unsupported band count {}", n),
            ))
        }
    };
    if height == 0 || width == 0 {
        return Err(GeoSegError::model("select display bands", "raster is empty"));
    }

    let stretched: Vec<Array2<f32>> = selected
        .iter()
        .map(|&b| stretch_band(bands.index_axis(Axis(0), b)))
        .collect();

    Ok(ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (row, col) = (y as usize, x as usize);
        Rgb([
            stretched[0][[row, col]],
            stretched[1][[row, col]],
            stretched[2][[row, col]],
        ])
    }))
}

/// Min/max stretch ignoring non-finite samples.
fn stretch_band(band: ArrayView2<f32>) -> Array2<f32> {
    let (min, max) = band
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    band.mapv(|v| {
        if !v.is_finite() || !(range > 0.0) {
            0.0
        } else {
            (v - min) / range
        }
    })
}

/// Resizes the longest side to `image_size`, normalizes, and pads the
/// bottom/right with zeros. Returns the NCHW tensor and the `[w, h]` of the
/// unpadded region.
pub fn preprocess(image: &Rgb32FImage, image_size: u32) -> Result<(Array4<f32>, [u32; 2])> {
    let (width, height) = image.dimensions();
    let scale = image_size as f32 / width.max(height) as f32;
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, image_size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, image_size);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let chw = resized.as_ndarray3();

    let side = image_size as usize;
    let tensor = Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        if y < new_h as usize && x < new_w as usize {
            (chw[[c, y, x]] - PIXEL_MEAN[c]) / PIXEL_STD[c]
        } else {
            0.0
        }
    });

    Ok((tensor, [new_w, new_h]))
}

/// Crops every mask to the unpadded region and resizes it to the raster size.
pub fn postprocess_masks(
    masks: Array4<f32>,
    image_size: u32,
    crop: [u32; 2],
    width: u32,
    height: u32,
) -> Result<Vec<Mask>> {
    let (batch, count, out_h, out_w) = masks.dim();
    if batch == 0 || out_h == 0 || out_w == 0 {
        return Ok(Vec::new());
    }
    let [crop_w, crop_h] = crop;
    // the output may be lower resolution than the input (e.g. 256 vs 1024)
    let crop_w = ((crop_w as f32 * out_w as f32 / image_size as f32).round() as u32)
        .clamp(1, out_w as u32);
    let crop_h = ((crop_h as f32 * out_h as f32 / image_size as f32).round() as u32)
        .clamp(1, out_h as u32);

    (0..count)
        .into_par_iter()
        .map(|i| -> Result<Mask> {
            let plane = masks.slice(s![0, i, .., ..]).as_standard_layout().into_owned();
            let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
                ImageBuffer::from_raw(out_w as u32, out_h as u32, plane.into_raw_vec_and_offset().0)
                    .ok_or_else(|| {
                        GeoSegError::model("mask buffer creation", "mask plane has wrong length")
                    })?;
            let cropped = imageops::crop_imm(&buffer, 0, 0, crop_w, crop_h).to_image();
            let resized = imageops::resize(&cropped, width, height, FilterType::Triangle);
            let scores =
                Array2::from_shape_vec((height as usize, width as usize), resized.into_raw())?;
            Ok(Mask::new(scores))
        })
        .collect()
}
