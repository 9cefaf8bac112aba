//! HTTP surface: pages, auth forms, uploads and artifact serving.

pub mod pages;

use std::path::{Component, Path as FsPath};
use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use tower_http::{limit::RequestBodyLimitLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::config::{Config, PNG_DIR, RESULTS_DIR};
use crate::errors::{GeoSegError, Result};
use crate::traits::UserDirectory;
use crate::upload::{UploadOrchestrator, UploadedFile, FILE_FIELD};
use pages::Flash;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Arc<dyn UserDirectory>,
    pub uploads: Arc<UploadOrchestrator>,
}

impl AppState {
    pub fn new(
        config: Config,
        users: Arc<dyn UserDirectory>,
        uploads: UploadOrchestrator,
    ) -> Self {
        Self {
            config: Arc::new(config),
            users,
            uploads: Arc::new(uploads),
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let limit = state.config.max_upload_bytes;
    let png = ServeDir::new(state.config.png_dir());
    let results = ServeDir::new(state.config.results_dir());

    Router::new()
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/segmentation", get(segmentation))
        .route("/about-us", get(about))
        .route("/sign-in", get(sign_in_page).post(sign_in))
        .route("/sign-up", get(sign_up_page).post(sign_up))
        .route("/upload", post(upload))
        .route("/images/*path", get(uploaded_image))
        .nest_service(&format!("/static/{}", PNG_DIR), png)
        .nest_service(&format!("/static/{}", RESULTS_DIR), results)
        .layer(DefaultBodyLimit::max(limit))
        .layer(RequestBodyLimitLayer::new(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for GeoSegError {
    fn into_response(self) -> Response {
        match self {
            GeoSegError::Validation { reason, .. } => {
                (StatusCode::BAD_REQUEST, reason).into_response()
            }
            GeoSegError::PayloadTooLarge { limit } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("File too large! The maximum is {} MB.", limit / (1024 * 1024)),
            )
                .into_response(),
            GeoSegError::Auth(e) => (StatusCode::UNAUTHORIZED, e.to_string()).into_response(),
            other => {
                // details stay in the log
                error!(error = ?other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                )
                    .into_response()
            }
        }
    }
}

/// `303 See Other` to `path` with one flash message in the query string.
fn redirect_with(path: &str, kind: &str, message: &str) -> Redirect {
    Redirect::to(&format!("{}?{}={}", path, kind, urlencoding::encode(message)))
}

async fn index() -> Html<String> {
    Html(pages::index())
}

async fn about() -> Html<String> {
    Html(pages::about())
}

async fn segmentation(Query(flash): Query<Flash>) -> Html<String> {
    Html(pages::segmentation(&flash))
}

async fn sign_in_page(Query(flash): Query<Flash>) -> Html<String> {
    Html(pages::sign_in(&flash))
}

async fn sign_up_page(Query(flash): Query<Flash>) -> Html<String> {
    Html(pages::sign_up(&flash))
}

#[derive(Debug, Deserialize)]
struct SignInForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct SignUpForm {
    #[serde(rename = "first-name", default)]
    first_name: String,
    #[serde(rename = "last-name", default)]
    last_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(rename = "confirm-password", default)]
    confirm_password: String,
}

async fn sign_in(State(state): State<AppState>, Form(form): Form<SignInForm>) -> Redirect {
    match state.users.authenticate(&form.email, &form.password).await {
        Ok(()) => redirect_with("/segmentation", "success", "Login successful"),
        Err(GeoSegError::Auth(e)) => redirect_with("/sign-in", "error", &e.to_string()),
        Err(e) => {
            error!(error = %e, "sign-in failed");
            redirect_with("/sign-in", "error", "Sign-in is unavailable, please try again later")
        }
    }
}

async fn sign_up(State(state): State<AppState>, Form(form): Form<SignUpForm>) -> Redirect {
    if form.password != form.confirm_password {
        return redirect_with("/sign-up", "error", "Passwords do not match");
    }
    let outcome = state
        .users
        .register(&form.first_name, &form.last_name, &form.email, &form.password)
        .await;
    match outcome {
        Ok(()) => redirect_with("/sign-in", "success", "Registration successful"),
        Err(GeoSegError::Auth(e)) => redirect_with("/sign-up", "error", &e.to_string()),
        Err(GeoSegError::Validation { field, reason }) => {
            redirect_with("/sign-up", "error", &format!("{} {}", field, reason))
        }
        Err(e) => {
            error!(error = %e, "sign-up failed");
            redirect_with("/sign-up", "error", "Registration is unavailable, please try again later")
        }
    }
}

fn multipart_error(e: MultipartError, limit: usize) -> GeoSegError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GeoSegError::PayloadTooLarge { limit }
    } else {
        GeoSegError::validation(FILE_FIELD, e.body_text())
    }
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

/// Answers with the results page, or with the bare descriptor when the
/// client accepts JSON.
async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response> {
    let limit = state.config.max_upload_bytes;
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
        file = Some(UploadedFile {
            filename,
            bytes: bytes.to_vec(),
        });
    }

    let result = state.uploads.process(file).await.inspect_err(|e| {
        if matches!(e, GeoSegError::Validation { .. }) {
            warn!(error = %e, "upload rejected");
        }
    })?;
    if wants_json(&headers) {
        return Ok(Json(result).into_response());
    }
    info!(token = %result.token, "rendering upload result");
    Ok(Html(pages::upload_result(&result)).into_response())
}

/// Serves an uploaded original from the uploads directory.
async fn uploaded_image(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let relative = FsPath::new(&path);
    let safe = !path.is_empty()
        && !path.contains('\\')
        && relative.components().all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }

    let full = state.config.upload_dir().join(relative);
    match tokio::fs::read(&full).await {
        Ok(bytes) => {
            let content_type = match full.extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff") => {
                    "image/tiff"
                }
                _ => "application/octet-stream",
            };
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}
