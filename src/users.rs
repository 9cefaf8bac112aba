//! User directory: registration and credential checks over a pluggable
//! backend.

mod memory;
pub mod password;
mod realtime_db;

pub use memory::InMemoryUserDirectory;
pub use realtime_db::RealtimeDbUserDirectory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{read_credential, Config, UserStoreKind};
use crate::errors::{GeoSegError, Result};
use crate::traits::UserDirectory;

/// Stored user. The password is kept only as an Argon2 PHC string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Validates the inputs and hashes the password on the blocking pool.
    pub async fn new(
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<Self> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(GeoSegError::validation("password", "must not be empty"));
        }
        Ok(Self {
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            email,
            password_hash: password::hash_password_blocking(password).await?,
            created_at: Utc::now(),
        })
    }
}

/// Trims and lowercases an email so lookups are case-insensitive.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err(GeoSegError::validation("email", "must not be empty"));
    }
    Ok(email)
}

/// Builds the backend selected in the configuration.
pub fn from_config(config: &Config) -> Result<Arc<dyn UserDirectory>> {
    let directory: Arc<dyn UserDirectory> = match config.user_store {
        UserStoreKind::Memory => Arc::new(InMemoryUserDirectory::new()),
        UserStoreKind::RealtimeDb => {
            let url = config.database_url.clone().ok_or_else(|| GeoSegError::Configuration {
                message: "database url missing".to_string(),
            })?;
            let token = config
                .database_credentials
                .as_deref()
                .map(read_credential)
                .transpose()?;
            Arc::new(RealtimeDbUserDirectory::new(url, token))
        }
    };
    info!(backend = directory.backend_name(), "user directory ready");
    Ok(directory)
}
