use async_trait::async_trait;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{normalize_email, password, UserRecord};
use crate::errors::{AuthError, GeoSegError, Result};
use crate::traits::UserDirectory;

const USERS_PATH: &str = "users";
const ETAG_REQUEST_HEADER: &str = "X-Firebase-ETag";

/// User directory backed by a real-time database's REST interface
/// (`<base>/users/<key>.json`).
///
/// Records are keyed by the SHA-256 of the normalized email. Creation is a
/// conditional `PUT` against the ETag read just before it, so a concurrent
/// registration of the same email is answered with `412` and reported as
/// `EmailTaken`.
#[derive(Debug, Clone)]
pub struct RealtimeDbUserDirectory {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl RealtimeDbUserDirectory {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    /// Database key for an already normalized email.
    pub fn record_key(email: &str) -> String {
        hex::encode(Sha256::digest(email.as_bytes()))
    }

    pub fn record_url(&self, email: &str) -> String {
        format!(
            "{}/{}/{}.json",
            self.base_url,
            USERS_PATH,
            Self::record_key(email)
        )
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }

    /// Reads the record and the ETag of its location.
    async fn fetch(&self, email: &str) -> Result<(Option<UserRecord>, Option<String>)> {
        let response = self
            .with_auth(self.client.get(self.record_url(email)))
            .header(ETAG_REQUEST_HEADER, "true")
            .send()
            .await?
            .error_for_status()?;
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let record: Option<UserRecord> = response.json().await?;
        Ok((record, etag))
    }
}

#[async_trait]
impl UserDirectory for RealtimeDbUserDirectory {
    async fn register(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<()> {
        let record = UserRecord::new(first_name, last_name, email, password).await?;

        let (existing, etag) = self.fetch(&record.email).await?;
        if existing.is_some() {
            debug!("registration rejected: email already present");
            return Err(AuthError::EmailTaken.into());
        }
        let etag = etag.ok_or_else(|| {
            GeoSegError::storage(
                USERS_PATH,
                "conditional create",
                "database did not return an ETag",
            )
        })?;

        let response = self
            .with_auth(self.client.put(self.record_url(&record.email)))
            .header(reqwest::header::IF_MATCH, etag)
            .json(&record)
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => {
                info!(backend = "realtime-db", "user registered");
                Ok(())
            }
            StatusCode::PRECONDITION_FAILED => {
                warn!("concurrent registration lost the conditional write");
                Err(AuthError::EmailTaken.into())
            }
            s => Err(GeoSegError::storage(
                USERS_PATH,
                "conditional create",
                format!("database answered {}", s),
            )),
        }
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<()> {
        let Ok(email) = normalize_email(email) else {
            return Err(AuthError::InvalidCredentials.into());
        };
        let (record, _) = self.fetch(&email).await?;
        match record {
            Some(user) if password::verify_password_blocking(password, &user.password_hash).await => {
                Ok(())
            }
            _ => Err(AuthError::InvalidCredentials.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "realtime-db"
    }
}
