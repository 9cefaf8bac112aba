use clap::{Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::errors::{GeoSegError, Result};

/// Directory names under the static root.
pub const UPLOAD_DIR: &str = "images";
pub const RESULTS_DIR: &str = "results";
pub const PNG_DIR: &str = "png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UserStoreKind {
    /// Transient in-process map, lost on restart
    Memory,
    /// Remote real-time database over REST
    RealtimeDb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ObjectStoreKind {
    /// Directory on the local filesystem
    Local,
    /// HTTP object store (GCS-compatible XML API)
    Http,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(short, long, env = "PORT", default_value_t = 5001)]
    pub port: u16,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 100 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Largest decoded raster, in samples (width x height x bands)
    #[arg(long, env = "MAX_RASTER_SAMPLES", default_value_t = 64 * 1024 * 1024)]
    pub max_raster_samples: usize,

    #[arg(short, long, env = "MODEL_PATH", default_value = "models/sam_vit_b.onnx")]
    pub model_path: PathBuf,

    #[arg(short, long, env = "DEVICE_ID", default_value_t = 0)]
    pub device_id: i32,

    /// Root of the uploaded, rendered and converted image directories
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    #[arg(long, env = "USER_STORE", value_enum, default_value_t = UserStoreKind::Memory)]
    pub user_store: UserStoreKind,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// File holding the database auth token
    #[arg(long, env = "DATABASE_CREDENTIALS")]
    pub database_credentials: Option<PathBuf>,

    #[arg(long, env = "OBJECT_STORE", value_enum, default_value_t = ObjectStoreKind::Local)]
    pub object_store: ObjectStoreKind,

    /// Bucket base URL, e.g. https://storage.googleapis.com/<bucket>
    #[arg(long, env = "OBJECT_STORE_URL")]
    pub object_store_url: Option<String>,

    /// File holding the bearer token for the object store
    #[arg(long, env = "OBJECT_STORE_CREDENTIALS")]
    pub object_store_credentials: Option<PathBuf>,

    #[arg(long, env = "OBJECT_STORE_DIR", default_value = "bucket")]
    pub object_store_dir: PathBuf,
}

impl Config {
    /// Config with every field at its default, independent of the process
    /// arguments and environment.
    pub fn with_static_dir(static_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 5001,
            max_upload_bytes: 100 * 1024 * 1024,
            max_raster_samples: 64 * 1024 * 1024,
            model_path: "models/sam_vit_b.onnx".into(),
            device_id: 0,
            static_dir: static_dir.into(),
            user_store: UserStoreKind::Memory,
            database_url: None,
            database_credentials: None,
            object_store: ObjectStoreKind::Local,
            object_store_url: None,
            object_store_credentials: None,
            object_store_dir: "bucket".into(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.static_dir.join(UPLOAD_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.static_dir.join(RESULTS_DIR)
    }

    pub fn png_dir(&self) -> PathBuf {
        self.static_dir.join(PNG_DIR)
    }

    /// Checks the options that depend on each other.
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(GeoSegError::Configuration {
                message: "max upload size must be positive".to_string(),
            });
        }
        if self.max_raster_samples == 0 {
            return Err(GeoSegError::Configuration {
                message: "max raster samples must be positive".to_string(),
            });
        }
        if self.user_store == UserStoreKind::RealtimeDb && self.database_url.is_none() {
            return Err(GeoSegError::Configuration {
                message: "--database-url is required with --user-store realtime-db".to_string(),
            });
        }
        if self.object_store == ObjectStoreKind::Http && self.object_store_url.is_none() {
            return Err(GeoSegError::Configuration {
                message: "--object-store-url is required with --object-store http".to_string(),
            });
        }
        Ok(())
    }

    /// Creates the three artifact directories if they are missing.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [self.upload_dir(), self.results_dir(), self.png_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| GeoSegError::FileSystem {
                path: dir.clone(),
                operation: "create directory".to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}

/// Reads a token file, trimming the trailing newline editors leave behind.
pub fn read_credential(path: &std::path::Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|e| GeoSegError::FileSystem {
        path: path.to_path_buf(),
        operation: "read credentials".to_string(),
        source: e,
    })?;
    Ok(raw.trim().to_string())
}
