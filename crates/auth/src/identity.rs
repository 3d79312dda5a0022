use std::{collections::HashMap, net::IpAddr, time::SystemTime};

use {
    base64::Engine,
    rand::RngCore,
    tokio::sync::RwLock,
    tracing::info,
};

use botherd_common::SessionKey;

/// An identity that completed `POST /api/auth/login`.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub session_key: SessionKey,
    pub username: String,
    /// Address the login came from.
    pub address: IpAddr,
    pub verified_at: SystemTime,
}

/// Session keys handed out by the login endpoint. The admission gate only
/// lets a WebSocket in when it presents one of these.
#[derive(Default)]
pub struct IdentityStore {
    verified: RwLock<HashMap<SessionKey, VerifiedIdentity>>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful credential exchange and mint its session key.
    pub async fn issue(&self, username: &str, address: IpAddr) -> VerifiedIdentity {
        let identity = VerifiedIdentity {
            session_key: SessionKey::new(generate_key()),
            username: username.to_string(),
            address,
            verified_at: SystemTime::now(),
        };
        self.verified
            .write()
            .await
            .insert(identity.session_key.clone(), identity.clone());
        info!(username, remote_ip = %address, "identity verified");
        identity
    }

    pub async fn lookup(&self, key: &SessionKey) -> Option<VerifiedIdentity> {
        self.verified.read().await.get(key).cloned()
    }

    /// Forget a session key. Returns whether it was known.
    pub async fn revoke(&self, key: &SessionKey) -> bool {
        self.verified.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.verified.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.verified.read().await.is_empty()
    }
}

fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
