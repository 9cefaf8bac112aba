use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use geoseg::{storage, users, web, Config, SamModel, SegmentationModel, UploadOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::parse();
    config.validate()?;
    ensure!(config.model_path.exists(), "Model path does not exist");
    config.ensure_directories()?;

    let model_path = config.model_path.clone();
    let device_id = config.device_id;
    let model = tokio::task::spawn_blocking(move || SamModel::new(&model_path, device_id))
        .await
        .context("model loading task panicked")?
        .with_context(|| format!("Failed to load model: {}", config.model_path.display()))?;
    info!(image_size = model.get_image_size(), "model loaded");
    let model: Arc<dyn SegmentationModel> = Arc::new(model);

    let users = users::from_config(&config)?;
    let store = storage::from_config(&config)?;
    let uploads = UploadOrchestrator::new(model, store, &config);

    let addr = config.socket_addr();
    let app = web::router(web::AppState::new(config, users, uploads));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("HTTP server failed")
}
