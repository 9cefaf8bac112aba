mod common;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use common::{
    compressed_tiff_bytes, count_entries, count_files, expected_center, geotiff_bytes, Harness,
};
use geoseg::mocks::MockSegmentationModel;
use geoseg::{
    CrsKind, GeoSegError, ObjectStore, Result, SegmentationModel, UploadOrchestrator,
    UploadedFile,
};

fn tiff_upload(name: &str) -> UploadedFile {
    UploadedFile {
        filename: name.to_string(),
        bytes: geotiff_bytes(),
    }
}

#[tokio::test]
async fn upload_produces_named_artifacts_and_center_coordinate() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .process(Some(tiff_upload("scene.tif")))
        .await
        .unwrap();

    assert!(result.original_image.ends_with("/scene.png"));
    assert!(result.result_image.ends_with("/segmented_scene.png"));
    assert_eq!(result.mask_count, 2);
    assert_eq!(result.crs, CrsKind::Geographic(Some(4326)));
    assert!(result.georeferenced);

    let (lat, lon) = expected_center();
    assert!((result.latitude - lat).abs() < 1e-9, "latitude {}", result.latitude);
    assert!((result.longitude - lon).abs() < 1e-9, "longitude {}", result.longitude);

    let token = &result.token;
    let png = harness.config.png_dir().join(token).join("scene.png");
    let overlay = harness
        .config
        .results_dir()
        .join(token)
        .join("segmented_scene.png");
    assert!(png.is_file());
    assert!(overlay.is_file());

    let rendered = image::open(&overlay).unwrap();
    assert_eq!((rendered.width(), rendered.height()), (common::WIDTH, common::HEIGHT));

    assert!(harness
        .config
        .upload_dir()
        .join(token)
        .join("scene.tif")
        .is_file());
    assert!(harness.bucket_dir().join(token).join("scene.tif").is_file());
    assert_eq!(harness.model.calls(), 1);
}

#[tokio::test]
async fn non_tiff_upload_never_reaches_the_model() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let orchestrator = harness.orchestrator();

    for name in ["scene.png", "scene.jpg", ""] {
        let err = orchestrator
            .process(Some(tiff_upload(name)))
            .await
            .unwrap_err();
        assert!(matches!(err, GeoSegError::Validation { .. }), "{}: {:?}", name, err);
    }
    let err = orchestrator.process(None).await.unwrap_err();
    assert!(matches!(err, GeoSegError::Validation { .. }));

    assert_eq!(harness.model.calls(), 0);
    assert_eq!(count_files(harness.temp_dir.path()), 0);
}

#[tokio::test]
async fn model_failure_rolls_back_every_artifact() {
    let harness = Harness::new(MockSegmentationModel::failing(64));
    let orchestrator = harness.orchestrator();

    let err = orchestrator
        .process(Some(tiff_upload("scene.tif")))
        .await
        .unwrap_err();
    assert!(matches!(err, GeoSegError::Model { .. }), "{:?}", err);
    assert_eq!(harness.model.calls(), 1);

    assert_eq!(count_files(&harness.config.static_dir), 0);
    // no empty token directory is left in the bucket either
    assert_eq!(count_entries(&harness.bucket_dir()), 0);
}

#[tokio::test]
async fn zero_masks_is_a_model_error() {
    let harness = Harness::new(MockSegmentationModel::new(64).with_mask_count(0));
    let orchestrator = harness.orchestrator();

    let err = orchestrator
        .process(Some(tiff_upload("scene.tiff")))
        .await
        .unwrap_err();
    assert!(matches!(err, GeoSegError::Model { .. }), "{:?}", err);
    assert_eq!(count_files(&harness.config.static_dir), 0);
}

#[tokio::test]
async fn corrupt_tiff_is_a_model_error_and_rolled_back() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let orchestrator = harness.orchestrator();

    let err = orchestrator
        .process(Some(UploadedFile {
            filename: "broken.tif".to_string(),
            bytes: b"not a tiff at all".to_vec(),
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, GeoSegError::Model { .. }), "{:?}", err);
    assert_eq!(harness.model.calls(), 0);
    assert_eq!(count_files(&harness.config.static_dir), 0);
    assert_eq!(count_files(&harness.bucket_dir()), 0);
}

#[tokio::test]
async fn concurrent_uploads_with_the_same_name_do_not_collide() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let orchestrator = harness.orchestrator();

    let (first, second) = tokio::join!(
        orchestrator.process(Some(tiff_upload("scene.tif"))),
        orchestrator.process(Some(tiff_upload("scene.tif"))),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_ne!(first.token, second.token);
    assert_ne!(first.result_image, second.result_image);
    for result in [&first, &second] {
        let overlay = harness
            .config
            .results_dir()
            .join(&result.token)
            .join("segmented_scene.png");
        assert!(overlay.is_file());
    }
    assert_eq!(harness.model.calls(), 2);
}

#[tokio::test]
async fn oversized_raster_is_rejected_before_inference() {
    let mut harness = Harness::new(MockSegmentationModel::new(64));
    harness.config.max_raster_samples = 100_000;
    let orchestrator = harness.orchestrator();

    let bytes = compressed_tiff_bytes(1024, 1024);
    assert!(bytes.len() < 64 * 1024, "fixture is {} bytes", bytes.len());

    let err = orchestrator
        .process(Some(UploadedFile {
            filename: "huge.tif".to_string(),
            bytes,
        }))
        .await
        .unwrap_err();
    match &err {
        GeoSegError::Validation { reason, .. } => assert!(reason.contains("too large"), "{}", reason),
        other => panic!("expected a validation error, got {:?}", other),
    }
    assert_eq!(harness.model.calls(), 0);
    assert_eq!(count_files(&harness.config.static_dir), 0);
    assert_eq!(count_entries(&harness.bucket_dir()), 0);

    // the normal scene still fits the same budget
    orchestrator
        .process(Some(tiff_upload("scene.tif")))
        .await
        .unwrap();
}

#[tokio::test]
async fn references_percent_encode_unusual_file_names() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let orchestrator = harness.orchestrator();

    for (name, encoded_file, encoded_base) in [
        ("a?b.tif", "a%3Fb.tif", "a%3Fb"),
        ("scan#1.tif", "scan%231.tif", "scan%231"),
        ("my scene.tif", "my%20scene.tif", "my%20scene"),
    ] {
        let result = orchestrator.process(Some(tiff_upload(name))).await.unwrap();
        let token = &result.token;
        assert_eq!(result.uploaded_image, format!("/images/{}/{}", token, encoded_file));
        assert_eq!(
            result.original_image,
            format!("/static/png/{}/{}.png", token, encoded_base)
        );
        assert_eq!(
            result.result_image,
            format!("/static/results/{}/segmented_{}.png", token, encoded_base)
        );
        // files on disk keep the plain name
        assert!(harness.config.upload_dir().join(token).join(name).is_file());
    }
}

/// Store whose uploads always fail. Records every delete it is asked for.
#[derive(Default)]
struct FailingStore {
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn put(&self, key: &str, _bytes: &[u8]) -> Result<()> {
        Err(GeoSegError::storage(key, "upload object", "bucket unavailable"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deleted.lock().push(key.to_string());
        Ok(())
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

#[tokio::test]
async fn failed_remote_put_is_still_cleaned_up() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let store = Arc::new(FailingStore::default());
    let model: Arc<dyn SegmentationModel> = Arc::new(harness.model.clone());
    let orchestrator = UploadOrchestrator::new(model, store.clone(), &harness.config);

    let err = orchestrator
        .process(Some(tiff_upload("scene.tif")))
        .await
        .unwrap_err();
    assert!(matches!(err, GeoSegError::Storage { .. }), "{:?}", err);
    assert_eq!(harness.model.calls(), 0);

    let deleted = store.deleted.lock().clone();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].ends_with("/scene.tif"), "{:?}", deleted);
    assert_eq!(count_files(&harness.config.static_dir), 0);
}
