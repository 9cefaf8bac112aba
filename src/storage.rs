//! Object stores for uploaded originals.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::config::{read_credential, Config, ObjectStoreKind};
use crate::errors::{GeoSegError, Result};
use crate::traits::ObjectStore;

/// Builds the object store selected in the configuration.
pub fn from_config(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.object_store {
        ObjectStoreKind::Local => Arc::new(LocalObjectStore::new(&config.object_store_dir)),
        ObjectStoreKind::Http => {
            let url = config.object_store_url.clone().ok_or_else(|| GeoSegError::Configuration {
                message: "object store url missing".to_string(),
            })?;
            let token = config
                .object_store_credentials
                .as_deref()
                .map(read_credential)
                .transpose()?;
            Arc::new(HttpObjectStore::new(url, token))
        }
    };
    info!(backend = store.backend_name(), "object store ready");
    Ok(store)
}

/// Rejects keys that could escape the store root.
fn check_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(GeoSegError::validation("object key", format!("{:?} is not a relative key", key)))
    }
}

/// Stores objects as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }

    /// Removes the directories above `path` that are now empty, stopping
    /// at the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GeoSegError::storage(key, "create directory", e))?;
        }
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            self.prune_empty_parents(&path).await;
            return Err(GeoSegError::storage(key, "write object", e));
        }
        debug!(key, bytes = bytes.len(), "stored object locally");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(GeoSegError::storage(key, "delete object", e)),
        }
        self.prune_empty_parents(&path).await;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path)
            .await
            .map_err(|e| GeoSegError::storage(key, "stat object", e))?)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

/// Bucket reachable over HTTP with `PUT`/`DELETE`/`HEAD` on
/// `<base_url>/<key>`, as the GCS XML API exposes it.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn object_url(&self, key: &str) -> Result<String> {
        check_key(key)?;
        let encoded: Vec<_> = key.split('/').map(|s| urlencoding::encode(s)).collect();
        Ok(format!("{}/{}", self.base_url, encoded.join("/")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let url = self.object_url(key)?;
        let response = self
            .authorize(self.client.put(&url))
            .header(reqwest::header::CONTENT_TYPE, "image/tiff")
            .body(bytes.to_vec())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GeoSegError::storage(
                key,
                "upload object",
                format!("server answered {}", response.status()),
            ));
        }
        debug!(key, bytes = bytes.len(), "uploaded object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self.object_url(key)?;
        let response = self.authorize(self.client.delete(&url)).send().await?;
        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            s => Err(GeoSegError::storage(
                key,
                "delete object",
                format!("server answered {}", s),
            )),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let url = self.object_url(key)?;
        let response = self.authorize(self.client.head(&url)).send().await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(GeoSegError::storage(
                key,
                "stat object",
                format!("server answered {}", s),
            )),
        }
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
