//! Salted Argon2id password hashes.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;

use crate::errors::{GeoSegError, Result};

const SALT_LEN: usize = 16;

/// Hashes `password` with a fresh random salt into a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|e| GeoSegError::Configuration {
        message: format!("salt encoding failed: {}", e),
    })?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GeoSegError::Configuration {
            message: format!("password hashing failed: {}", e),
        })
}

/// Checks `password` against a stored PHC string. Malformed hashes never
/// verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Runs [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(password: &str) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| GeoSegError::Configuration {
            message: format!("password hashing task failed: {}", e),
        })?
}

/// Runs [`verify_password`] on the blocking pool. A failed task never
/// verifies.
pub async fn verify_password_blocking(password: &str, stored: &str) -> bool {
    let (password, stored) = (password.to_string(), stored.to_string());
    tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn verifies_only_the_exact_password() -> Result<()> {
        let stored = hash_password("correct horse")?;
        assert!(verify_password("correct horse", &stored));
        assert!(!verify_password("correct horse ", &stored));
        assert!(!verify_password("Correct horse", &stored));
        assert!(!verify_password("", &stored));
        Ok(())
    }

    #[test]
    fn salts_differ_between_hashes() -> Result<()> {
        assert_ne!(hash_password("same")?, hash_password("same")?);
        Ok(())
    }

    #[test]
    fn garbage_hash_does_not_verify() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        // a plaintext record left over from an older store
        assert!(!verify_password("hunter2", "hunter2"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn hashing_leaves_the_runtime_free() -> Result<()> {
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let stored = hash_password_blocking("correct horse").await?;
        let hashed_ticks = ticks.load(Ordering::Relaxed);
        assert!(verify_password_blocking("correct horse", &stored).await);
        assert!(!verify_password_blocking("wrong horse", &stored).await);
        ticker.abort();

        // the single runtime thread kept running other tasks during the hash
        assert!(hashed_ticks > 0);
        assert!(ticks.load(Ordering::Relaxed) > hashed_ticks);
        Ok(())
    }
}
