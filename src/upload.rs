//! Upload orchestration: validate, persist, segment, georeference, render.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{Config, PNG_DIR, RESULTS_DIR};
use crate::errors::{GeoSegError, Result};
use crate::georef::CrsKind;
use crate::render;
use crate::segmenter::Segmenter;
use crate::traits::{ObjectStore, SegmentationModel};

const ALLOWED_EXTENSIONS: [&str; 2] = ["tif", "tiff"];
pub const FILE_FIELD: &str = "image";

/// One file part of a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Returned to the presentation layer; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub token: String,
    pub uploaded_image: String,
    pub original_image: String,
    pub result_image: String,
    pub latitude: f64,
    pub longitude: f64,
    pub crs: CrsKind,
    pub georeferenced: bool,
    pub mask_count: usize,
}

/// Checks the file part and returns the filename reduced to its final
/// path component.
pub fn validate(file: Option<&UploadedFile>) -> Result<String> {
    let file = file.ok_or_else(|| GeoSegError::validation(FILE_FIELD, "No file part"))?;
    let filename = file
        .filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if filename.is_empty() {
        return Err(GeoSegError::validation(FILE_FIELD, "No selected file"));
    }

    let path = Path::new(filename);
    let extension_ok = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    let has_stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| !s.is_empty() && !s.starts_with('.'));
    if !extension_ok || !has_stem {
        return Err(GeoSegError::validation(
            FILE_FIELD,
            "Invalid file format. Only .tif or .tiff files are allowed.",
        ));
    }
    Ok(filename.to_string())
}

/// Filename without its extension.
pub fn base_name(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}

/// Everything written on behalf of one request. Unless committed, dropping
/// it removes the local files and schedules removal of the remote object.
struct ArtifactGuard {
    store: Arc<dyn ObjectStore>,
    remote_key: Option<String>,
    local_dirs: Vec<PathBuf>,
    committed: bool,
}

impl ArtifactGuard {
    fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            remote_key: None,
            local_dirs: Vec::new(),
            committed: false,
        }
    }

    fn track_dir(&mut self, dir: PathBuf) {
        self.local_dirs.push(dir);
    }

    fn commit(mut self) {
        self.committed = true;
    }

    fn remove_local(&mut self) {
        for dir in self.local_dirs.drain(..) {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(dir = %dir.display(), error = %e, "rollback could not remove directory"),
            }
        }
    }

    async fn rollback(mut self) {
        self.remove_local();
        if let Some(key) = self.remote_key.take() {
            if let Err(e) = self.store.delete(&key).await {
                warn!(key = %key, error = %e, "rollback could not delete remote object");
            }
        }
        self.committed = true;
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.remove_local();
        if let Some(key) = self.remote_key.take() {
            let store = Arc::clone(&self.store);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = store.delete(&key).await {
                            warn!(key = %key, error = %e, "rollback could not delete remote object");
                        }
                    });
                }
                Err(_) => warn!(key = %key, "no runtime left to delete remote object"),
            }
        }
    }
}

/// Drives one upload from bytes to a [`UploadResult`].
pub struct UploadOrchestrator {
    segmenter: Segmenter<dyn SegmentationModel>,
    store: Arc<dyn ObjectStore>,
    upload_dir: PathBuf,
    png_dir: PathBuf,
    results_dir: PathBuf,
}

impl UploadOrchestrator {
    pub fn new(
        model: Arc<dyn SegmentationModel>,
        store: Arc<dyn ObjectStore>,
        config: &Config,
    ) -> Self {
        Self {
            segmenter: Segmenter::new(model).with_max_samples(config.max_raster_samples),
            store,
            upload_dir: config.upload_dir(),
            png_dir: config.png_dir(),
            results_dir: config.results_dir(),
        }
    }

    /// Runs the whole pipeline. On failure every artifact of the request
    /// is removed again.
    pub async fn process(&self, file: Option<UploadedFile>) -> Result<UploadResult> {
        let filename = validate(file.as_ref())?;
        let bytes = file.map(|f| f.bytes).unwrap_or_default();
        let token = Uuid::new_v4().simple().to_string();

        let mut guard = ArtifactGuard::new(Arc::clone(&self.store));
        match self.run(&token, &filename, &bytes, &mut guard).await {
            Ok(result) => {
                guard.commit();
                info!(
                    token = %result.token,
                    latitude = result.latitude,
                    longitude = result.longitude,
                    masks = result.mask_count,
                    "upload processed"
                );
                Ok(result)
            }
            Err(e) => {
                error!(token = %token, error = %e, "upload failed, rolling back");
                guard.rollback().await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        token: &str,
        filename: &str,
        bytes: &[u8],
        guard: &mut ArtifactGuard,
    ) -> Result<UploadResult> {
        // persist; the key is tracked first so a failed put is cleaned up too
        let key = format!("{}/{}", token, filename);
        guard.remote_key = Some(key.clone());
        self.store.put(&key, bytes).await?;

        let local_dir = self.upload_dir.join(token);
        guard.track_dir(local_dir.clone());
        tokio::fs::create_dir_all(&local_dir)
            .await
            .map_err(|e| GeoSegError::FileSystem {
                path: local_dir.clone(),
                operation: "create upload directory".to_string(),
                source: e,
            })?;
        let local_path = local_dir.join(filename);
        tokio::fs::write(&local_path, bytes)
            .await
            .map_err(|e| GeoSegError::FileSystem {
                path: local_path.clone(),
                operation: "write upload".to_string(),
                source: e,
            })?;

        let base = base_name(filename);
        let png_dir = self.png_dir.join(token);
        let results_dir = self.results_dir.join(token);
        guard.track_dir(png_dir.clone());
        guard.track_dir(results_dir.clone());
        let original_png = png_dir.join(format!("{}.png", base));
        let result_png = results_dir.join(format!("segmented_{}.png", base));

        // segment, georeference and render off the async workers
        let segmenter = self.segmenter.clone();
        let outputs = (original_png.clone(), result_png.clone());
        let processed = tokio::task::spawn_blocking(move || {
            segment_and_render(&segmenter, &local_path, &outputs.0, &outputs.1)
        })
        .await
        .map_err(|e| GeoSegError::model("segmentation task", e))??;

        let refs = ArtifactRefs::new(token, filename, &base);
        Ok(UploadResult {
            token: token.to_string(),
            uploaded_image: refs.uploaded_image,
            original_image: refs.original_image,
            result_image: refs.result_image,
            latitude: processed.latitude,
            longitude: processed.longitude,
            crs: processed.crs,
            georeferenced: processed.georeferenced,
            mask_count: processed.mask_count,
        })
    }
}

/// URL paths of the three artifacts. File names are percent-encoded so
/// `?`, `#` and spaces stay inside the path.
struct ArtifactRefs {
    uploaded_image: String,
    original_image: String,
    result_image: String,
}

impl ArtifactRefs {
    fn new(token: &str, filename: &str, base: &str) -> Self {
        Self {
            uploaded_image: format!("/images/{}/{}", token, urlencoding::encode(filename)),
            original_image: format!(
                "/static/{}/{}/{}",
                PNG_DIR,
                token,
                urlencoding::encode(&format!("{}.png", base))
            ),
            result_image: format!(
                "/static/{}/{}/{}",
                RESULTS_DIR,
                token,
                urlencoding::encode(&format!("segmented_{}.png", base))
            ),
        }
    }
}

struct Processed {
    latitude: f64,
    longitude: f64,
    crs: CrsKind,
    georeferenced: bool,
    mask_count: usize,
}

fn segment_and_render(
    segmenter: &Segmenter<dyn SegmentationModel>,
    local_path: &Path,
    original_png: &Path,
    result_png: &Path,
) -> Result<Processed> {
    let raster = segmenter.load(local_path)?;
    let masks = segmenter.segment_raster(&raster)?;

    let center = raster.info.georeferencer().center_lonlat()?;
    if !raster.info.crs.is_geographic() {
        warn!(
            crs = %raster.info.crs.description(),
            "raster CRS is not geographic, coordinates are reported unprojected"
        );
    }

    // only the first mask is rendered
    let first = masks.first().ok_or_else(|| {
        GeoSegError::model("select mask", "the model returned no masks")
    })?;
    render::save_png(&render::render_overlay(first), result_png)?;
    render::save_png(&render::render_preview(raster.bands.view())?, original_png)?;

    Ok(Processed {
        latitude: center.lat,
        longitude: center.lon,
        crs: raster.info.crs,
        georeferenced: raster.info.georeferenced,
        mask_count: masks.len(),
    })
}
