use std::collections::HashMap;

use {
    argon2::{
        Argon2,
        password_hash::{
            PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
        },
    },
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, warn},
};

use {
    crate::error::{Context, Error, Result},
    botherd_config::AuthConfig,
};

/// Checks a username/password pair. Implementations may be slow (hashing,
/// remote lookups), so callers always await the result off the hot path.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &Secret<String>) -> Result<bool>;
}

/// Fixed set of panel accounts read from `[[auth.users]]`.
pub struct ConfigCredentialStore {
    users: HashMap<String, String>,
}

impl ConfigCredentialStore {
    pub fn from_config(config: &AuthConfig) -> Self {
        let users = config
            .users
            .iter()
            .map(|u| (u.username.clone(), u.password_hash.clone()))
            .collect();
        Self { users }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl CredentialVerifier for ConfigCredentialStore {
    async fn verify(&self, username: &str, password: &Secret<String>) -> Result<bool> {
        let Some(hash) = self.users.get(username).cloned() else {
            debug!(username, "login attempt for unknown user");
            return Ok(false);
        };
        let password = password.expose_secret().clone();
        // Argon2 is deliberately expensive; keep it off the async workers.
        let ok = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .context("password verification task failed")?;
        if !ok {
            warn!(username, "password mismatch");
        }
        Ok(ok)
    }
}

/// Hash a password into an argon2id PHC string suitable for the config file.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::hash(e.to_string()))
}

fn verify_password(password: &str, hash_str: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash_str) else {
        warn!("stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, botherd_config::UserEntry};

    fn store_with(username: &str, password: &str) -> ConfigCredentialStore {
        ConfigCredentialStore::from_config(&AuthConfig {
            users: vec![UserEntry {
                username: username.into(),
                password_hash: hash_password(password).unwrap(),
            }],
        })
    }

    #[tokio::test]
    async fn accepts_matching_password() {
        let store = store_with("alice", "correct horse");
        let ok = store
            .verify("alice", &Secret::new("correct horse".into()))
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn rejects_wrong_password_and_unknown_user() {
        let store = store_with("alice", "correct horse");
        assert!(
            !store
                .verify("alice", &Secret::new("battery staple".into()))
                .await
                .unwrap()
        );
        assert!(
            !store
                .verify("mallory", &Secret::new("correct horse".into()))
                .await
                .unwrap()
        );
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "plaintext"));
    }
}
