use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{normalize_email, password, UserRecord};
use crate::errors::{AuthError, Result};
use crate::traits::UserDirectory;

/// Transient user directory keyed by normalized email.
///
/// Check-and-insert happens under one lock, so two concurrent registrations
/// of the same email cannot both succeed.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<HashMap<String, UserRecord>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.lock().is_empty()
    }

    pub fn get(&self, email: &str) -> Option<UserRecord> {
        let email = normalize_email(email).ok()?;
        self.users.lock().get(&email).cloned()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn register(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<()> {
        // hash outside the lock
        let record = UserRecord::new(first_name, last_name, email, password).await?;

        let mut users = self.users.lock();
        if users.contains_key(&record.email) {
            debug!("registration rejected: email already present");
            return Err(AuthError::EmailTaken.into());
        }
        info!(backend = "memory", "user registered");
        users.insert(record.email.clone(), record);
        Ok(())
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<()> {
        // the hash is cloned out so the lock is released before verifying
        let stored = normalize_email(email)
            .ok()
            .and_then(|email| self.users.lock().get(&email).map(|u| u.password_hash.clone()));
        match stored {
            Some(hash) if password::verify_password_blocking(password, &hash).await => Ok(()),
            _ => Err(AuthError::InvalidCredentials.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
