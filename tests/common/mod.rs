#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tiff::encoder::{colortype, compression::Deflate, TiffEncoder};
use tiff::tags::Tag;

use geoseg::config::Config;
use geoseg::mocks::MockSegmentationModel;
use geoseg::storage::LocalObjectStore;
use geoseg::{ObjectStore, SegmentationModel, UploadOrchestrator};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 32;

/// Upper-left corner and pixel size of the test scene, in degrees.
pub const ORIGIN_LON: f64 = 100.0;
pub const ORIGIN_LAT: f64 = -5.0;
pub const PIXEL_SIZE: f64 = 0.01;

/// Encodes an RGB GeoTIFF in WGS 84 with a north-up tiepoint/scale
/// georeference.
pub fn geotiff_bytes() -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scene.tif");
    write_geotiff(&path);
    std::fs::read(&path).unwrap()
}

pub fn write_geotiff(path: &Path) {
    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();
    let mut image = encoder.new_image::<colortype::RGB8>(WIDTH, HEIGHT).unwrap();

    image
        .encoder()
        .write_tag(Tag::Unknown(33550), &[PIXEL_SIZE, PIXEL_SIZE, 0.0][..])
        .unwrap();
    image
        .encoder()
        .write_tag(
            Tag::Unknown(33922),
            &[0.0, 0.0, 0.0, ORIGIN_LON, ORIGIN_LAT, 0.0][..],
        )
        .unwrap();
    // GTModelType = geographic, GeographicType = EPSG:4326
    image
        .encoder()
        .write_tag(
            Tag::Unknown(34735),
            &[1u16, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326][..],
        )
        .unwrap();

    let data: Vec<u8> = (0..WIDTH * HEIGHT)
        .flat_map(|i| {
            let v = (i % 251) as u8;
            [v, v / 2, 255 - v]
        })
        .collect();
    image.write_data(&data).unwrap();
}

/// Deflate-compressed all-zero RGB raster. Tiny on disk however large the
/// dimensions.
pub fn compressed_tiff_bytes(width: u32, height: u32) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("large.tif");
    let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
    let image = encoder
        .new_image_with_compression::<colortype::RGB8, _>(width, height, Deflate::default())
        .unwrap();
    image
        .write_data(&vec![0u8; (width * height * 3) as usize])
        .unwrap();
    std::fs::read(&path).unwrap()
}

/// Expected center coordinate: pixel (HEIGHT / 2, WIDTH / 2).
pub fn expected_center() -> (f64, f64) {
    let row = (HEIGHT / 2) as f64;
    let col = (WIDTH / 2) as f64;
    (ORIGIN_LAT - PIXEL_SIZE * row, ORIGIN_LON + PIXEL_SIZE * col)
}

pub struct Harness {
    pub temp_dir: TempDir,
    pub config: Config,
    pub model: MockSegmentationModel,
    pub store: Arc<LocalObjectStore>,
}

impl Harness {
    pub fn new(model: MockSegmentationModel) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::with_static_dir(temp_dir.path().join("static"));
        config.object_store_dir = temp_dir.path().join("bucket");
        config.ensure_directories().unwrap();
        let store = Arc::new(LocalObjectStore::new(&config.object_store_dir));
        Self {
            temp_dir,
            config,
            model,
            store,
        }
    }

    pub fn orchestrator(&self) -> UploadOrchestrator {
        let model: Arc<dyn SegmentationModel> = Arc::new(self.model.clone());
        let store: Arc<dyn ObjectStore> = self.store.clone();
        UploadOrchestrator::new(model, store, &self.config)
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.config.object_store_dir.clone()
    }
}

/// Number of regular files below `dir`, at any depth.
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

/// Number of files and directories below `dir`, at any depth.
pub fn count_entries(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                1 + count_entries(&path)
            } else {
                1
            }
        })
        .sum()
}
