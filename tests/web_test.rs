mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use common::{compressed_tiff_bytes, geotiff_bytes, Harness};
use geoseg::mocks::MockSegmentationModel;
use geoseg::users::InMemoryUserDirectory;
use geoseg::web::{router, AppState};

const BOUNDARY: &str = "geoseg-test-boundary";

fn app(harness: &Harness) -> Router {
    let state = AppState::new(
        harness.config.clone(),
        Arc::new(InMemoryUserDirectory::new()),
        harness.orchestrator(),
    );
    router(state)
}

fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

fn form_request(uri: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn location(response: &axum::response::Response) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn pages_render() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let app = app(&harness);

    for uri in ["/", "/index.html", "/segmentation", "/about-us", "/sign-in", "/sign-up"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
    }
}

#[tokio::test]
async fn flash_message_is_escaped() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let response = app(&harness)
        .oneshot(get("/sign-in?error=%3Cscript%3Ex%3C%2Fscript%3E"))
        .await
        .unwrap();
    let html = body_text(response).await;
    assert!(html.contains("&lt;script&gt;x&lt;/script&gt;"));
    assert!(!html.contains("<script>x</script>"));
}

#[tokio::test]
async fn non_tiff_upload_is_rejected_without_inference() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let app = app(&harness);

    for name in ["scene.png", "photo.jpg"] {
        let response = app
            .clone()
            .oneshot(upload_request(multipart_body("image", name, b"bytes")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(response).await,
            "Invalid file format. Only .tif or .tiff files are allowed."
        );
    }

    let response = app
        .clone()
        .oneshot(upload_request(multipart_body("other", "scene.tif", b"bytes")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "No file part");

    assert_eq!(harness.model.calls(), 0);
}

#[tokio::test]
async fn oversized_upload_is_413() {
    let mut harness = Harness::new(MockSegmentationModel::new(64));
    harness.config.max_upload_bytes = 1024;
    let app = app(&harness);

    let body = multipart_body("image", "scene.tif", &vec![0u8; 4096]);
    let response = app.oneshot(upload_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(harness.model.calls(), 0);
}

#[tokio::test]
async fn tiff_upload_renders_results_and_serves_artifacts() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let app = app(&harness);

    let response = app
        .clone()
        .oneshot(upload_request(multipart_body(
            "image",
            "scene.tif",
            &geotiff_bytes(),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("Latitude"));
    assert!(html.contains("/scene.png"));

    let src = html
        .split("src=\"")
        .nth(2)
        .and_then(|rest| rest.split('"').next())
        .unwrap()
        .to_string();
    assert!(src.starts_with("/static/results/"), "{}", src);
    assert!(src.ends_with("/segmented_scene.png"), "{}", src);

    let response = app.clone().oneshot(get(&src)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let token = src.split('/').nth(3).unwrap();
    let response = app
        .clone()
        .oneshot(get(&format!("/images/{}/scene.tif", token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/tiff");
}

#[tokio::test]
async fn missing_or_escaping_images_are_404() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    std::fs::write(harness.temp_dir.path().join("static").join("secret.txt"), b"x").unwrap();
    let app = app(&harness);

    for uri in ["/images/missing.tif", "/images/..%2Fsecret.txt"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn sign_up_then_sign_in() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let app = app(&harness);
    let sign_up = "first-name=Ada&last-name=Lovelace&email=ada%40example.com&password=s3cret&confirm-password=s3cret";

    let response = app.clone().oneshot(form_request("/sign-up", sign_up)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/sign-in?success=Registration%20successful");

    let response = app.clone().oneshot(form_request("/sign-up", sign_up)).await.unwrap();
    assert_eq!(location(&response), "/sign-up?error=Email%20already%20registered");

    let response = app
        .clone()
        .oneshot(form_request(
            "/sign-in",
            "email=ada%40example.com&password=wrong",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/sign-in?error=Invalid%20email%20or%20password");

    let response = app
        .clone()
        .oneshot(form_request(
            "/sign-in",
            "email=ada%40example.com&password=s3cret",
        ))
        .await
        .unwrap();
    assert_eq!(location(&response), "/segmentation?success=Login%20successful");
}

#[tokio::test]
async fn mismatched_passwords_are_rejected() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let response = app(&harness)
        .oneshot(form_request(
            "/sign-up",
            "first-name=Ada&last-name=Lovelace&email=ada%40example.com&password=a&confirm-password=b",
        ))
        .await
        .unwrap();
    assert_eq!(location(&response), "/sign-up?error=Passwords%20do%20not%20match");
}

#[tokio::test]
async fn upload_answers_json_when_asked() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let mut request = upload_request(multipart_body("image", "scene.tif", &geotiff_bytes()));
    request
        .headers_mut()
        .insert(header::ACCEPT, "application/json".parse().unwrap());

    let response = app(&harness).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let descriptor: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();

    let (lat, lon) = common::expected_center();
    assert!((descriptor["latitude"].as_f64().unwrap() - lat).abs() < 1e-9);
    assert!((descriptor["longitude"].as_f64().unwrap() - lon).abs() < 1e-9);
    assert_eq!(descriptor["crs"]["kind"], "geographic");
    assert_eq!(descriptor["crs"]["epsg"], 4326);
    assert!(descriptor["result_image"]
        .as_str()
        .unwrap()
        .ends_with("/segmented_scene.png"));
}

#[tokio::test]
async fn references_for_unusual_file_names_resolve() {
    let harness = Harness::new(MockSegmentationModel::new(64));
    let app = app(&harness);

    for name in ["a?b.tif", "scan#1.tif", "my scene.tif"] {
        let mut request = upload_request(multipart_body("image", name, &geotiff_bytes()));
        request
            .headers_mut()
            .insert(header::ACCEPT, "application/json".parse().unwrap());
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", name);
        let descriptor: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();

        for field in ["uploaded_image", "original_image", "result_image"] {
            let uri = descriptor[field].as_str().unwrap();
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{} for {}: {}", field, name, uri);
        }
    }
}

#[tokio::test]
async fn oversized_raster_is_400() {
    let mut harness = Harness::new(MockSegmentationModel::new(64));
    harness.config.max_raster_samples = 100_000;
    let app = app(&harness);

    let body = multipart_body("image", "huge.tif", &compressed_tiff_bytes(1024, 1024));
    let response = app.oneshot(upload_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.starts_with("Raster too large"));
    assert_eq!(harness.model.calls(), 0);
}
