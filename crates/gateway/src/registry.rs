//! Live sessions, keyed by session key, with an address index.
//!
//! Every mutation goes through [`SessionRegistry`]; both maps are updated
//! under the same write lock so they can never disagree.

use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
    sync::Arc,
};

use {
    botherd_common::SessionKey,
    tokio::{
        sync::{RwLock, mpsc},
        time::Instant,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::{error::DenyReason, lifecycle::BotHandle, uptime::TimerHandle};

/// One admitted WebSocket connection bound to a verified identity.
pub struct SessionEntry {
    pub key: SessionKey,
    pub conn_id: String,
    pub address: IpAddr,
    pub username: String,
    pub created_at: Instant,
    pub sender: mpsc::UnboundedSender<String>,
    /// Parent of every task the session owns (timer, bot, behaviours).
    pub cancel: CancellationToken,
    bot: Option<Arc<BotHandle>>,
    timer: Option<TimerHandle>,
}

impl SessionEntry {
    pub fn new(
        key: SessionKey,
        conn_id: impl Into<String>,
        address: IpAddr,
        username: impl Into<String>,
        sender: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key,
            conn_id: conn_id.into(),
            address,
            username: username.into(),
            created_at: Instant::now(),
            sender,
            cancel,
            bot: None,
            timer: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionKey, SessionEntry>,
    by_address: HashMap<IpAddr, HashSet<SessionKey>>,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, re-checking the capacity rules atomically so two
    /// connections racing through admission cannot both get in.
    pub async fn insert(&self, entry: SessionEntry, max_sessions: usize) -> Result<(), DenyReason> {
        let mut inner = self.inner.write().await;
        if inner
            .by_address
            .get(&entry.address)
            .is_some_and(|keys| !keys.is_empty())
        {
            return Err(DenyReason::AddressBusy(entry.address));
        }
        if inner.sessions.contains_key(&entry.key) {
            return Err(DenyReason::IdentityBusy);
        }
        if max_sessions > 0 && inner.sessions.len() >= max_sessions {
            return Err(DenyReason::CapacityReached(max_sessions));
        }

        info!(
            session_key = %entry.key,
            conn_id = %entry.conn_id,
            remote_ip = %entry.address,
            username = %entry.username,
            "session registered"
        );
        inner
            .by_address
            .entry(entry.address)
            .or_default()
            .insert(entry.key.clone());
        inner.sessions.insert(entry.key.clone(), entry);
        Ok(())
    }

    /// Drop a session and everything it owns. Removing an unknown key is a no-op.
    pub async fn remove(&self, key: &SessionKey) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.sessions.remove(key) else {
            return false;
        };
        if let Some(keys) = inner.by_address.get_mut(&entry.address) {
            keys.remove(key);
            if keys.is_empty() {
                inner.by_address.remove(&entry.address);
            }
        }
        drop(inner);

        entry.cancel.cancel();
        if let Some(bot) = &entry.bot {
            bot.shutdown("session closed");
        }
        info!(
            session_key = %key,
            conn_id = %entry.conn_id,
            duration_secs = entry.created_at.elapsed().as_secs(),
            "session removed"
        );
        true
    }

    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.inner.read().await.sessions.contains_key(key)
    }

    pub async fn has_bot(&self, key: &SessionKey) -> bool {
        self.inner
            .read()
            .await
            .sessions
            .get(key)
            .is_some_and(|s| s.bot.is_some())
    }

    pub async fn bot(&self, key: &SessionKey) -> Option<Arc<BotHandle>> {
        self.inner
            .read()
            .await
            .sessions
            .get(key)
            .and_then(|s| s.bot.clone())
    }

    /// Attach a bot to a session.
    ///
    /// With `replaces: None` the slot must be empty; with `Some(id)` the slot
    /// must still hold the handle with that id. Returns `false` when the
    /// session is gone or the slot does not match.
    pub async fn set_bot(
        &self,
        key: &SessionKey,
        handle: Arc<BotHandle>,
        replaces: Option<u64>,
    ) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.sessions.get_mut(key) else {
            return false;
        };
        let current = entry.bot.as_ref().map(|b| b.id);
        if current != replaces {
            return false;
        }
        debug!(session_key = %key, bot_id = handle.id, ?replaces, "bot attached");
        entry.bot = Some(handle);
        true
    }

    /// Detach the bot, if any. Idempotent.
    pub async fn remove_bot(&self, key: &SessionKey) -> Option<Arc<BotHandle>> {
        self.inner
            .write()
            .await
            .sessions
            .get_mut(key)
            .and_then(|s| s.bot.take())
    }

    /// Detach the bot only if it is still the handle with `id`.
    pub async fn remove_bot_if(&self, key: &SessionKey, id: u64) -> Option<Arc<BotHandle>> {
        let mut inner = self.inner.write().await;
        let entry = inner.sessions.get_mut(key)?;
        if entry.bot.as_ref().is_some_and(|b| b.id == id) {
            entry.bot.take()
        } else {
            None
        }
    }

    /// Install the session's uptime timer, dropping (and so stopping) any previous one.
    pub async fn set_timer(&self, key: &SessionKey, timer: TimerHandle) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(key) {
            Some(entry) => {
                entry.timer = Some(timer);
                true
            },
            None => false,
        }
    }

    pub async fn clear_timer(&self, key: &SessionKey) -> bool {
        let timer = self
            .inner
            .write()
            .await
            .sessions
            .get_mut(key)
            .and_then(|s| s.timer.take());
        timer.is_some()
    }

    pub async fn has_timer(&self, key: &SessionKey) -> bool {
        self.inner
            .read()
            .await
            .sessions
            .get(key)
            .is_some_and(|s| s.timer.is_some())
    }

    pub async fn sender(&self, key: &SessionKey) -> Option<mpsc::UnboundedSender<String>> {
        self.inner
            .read()
            .await
            .sessions
            .get(key)
            .map(|s| s.sender.clone())
    }

    pub async fn session_token(&self, key: &SessionKey) -> Option<CancellationToken> {
        self.inner
            .read()
            .await
            .sessions
            .get(key)
            .map(|s| s.cancel.clone())
    }

    pub async fn created_at(&self, key: &SessionKey) -> Option<Instant> {
        self.inner
            .read()
            .await
            .sessions
            .get(key)
            .map(|s| s.created_at)
    }

    pub async fn address_has_session(&self, address: IpAddr) -> bool {
        self.inner
            .read()
            .await
            .by_address
            .get(&address)
            .is_some_and(|keys| !keys.is_empty())
    }

    pub async fn address_sessions(&self, address: IpAddr) -> Vec<SessionKey> {
        self.inner
            .read()
            .await
            .by_address
            .get(&address)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }

    pub async fn bot_count(&self) -> usize {
        self.inner
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.bot.is_some())
            .count()
    }

    /// Verify the address index mirrors the session map exactly.
    pub async fn check_consistency(&self) -> Result<(), String> {
        let inner = self.inner.read().await;
        for (key, entry) in &inner.sessions {
            if &entry.key != key {
                return Err(format!("session {key} stored under the wrong key"));
            }
            if !inner
                .by_address
                .get(&entry.address)
                .is_some_and(|keys| keys.contains(key))
            {
                return Err(format!("session {key} missing from address index"));
            }
        }
        for (address, keys) in &inner.by_address {
            if keys.is_empty() {
                return Err(format!("empty address bucket for {address}"));
            }
            for key in keys {
                match inner.sessions.get(key) {
                    Some(entry) if entry.address == *address => {},
                    Some(_) => return Err(format!("session {key} indexed under {address}")),
                    None => return Err(format!("stale index entry {key} for {address}")),
                }
            }
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, ip: &str) -> (SessionEntry, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let entry = SessionEntry::new(
            SessionKey::from(key),
            format!("conn-{key}"),
            ip.parse().unwrap(),
            "alice",
            tx,
            CancellationToken::new(),
        );
        (entry, rx)
    }

    #[tokio::test]
    async fn one_session_per_address() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = entry("a", "203.0.113.5");
        let (b, _rx_b) = entry("b", "203.0.113.5");

        registry.insert(a, 0).await.unwrap();
        let denied = registry.insert(b, 0).await.unwrap_err();
        assert!(matches!(denied, DenyReason::AddressBusy(_)));
        assert_eq!(registry.len().await, 1);
        registry.check_consistency().await.unwrap();
    }

    #[tokio::test]
    async fn one_session_per_identity() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = entry("same", "203.0.113.5");
        let (b, _rx_b) = entry("same", "198.51.100.7");

        registry.insert(a, 0).await.unwrap();
        assert_eq!(
            registry.insert(b, 0).await.unwrap_err(),
            DenyReason::IdentityBusy
        );
    }

    #[tokio::test]
    async fn capacity_limit_is_enforced() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = entry("a", "203.0.113.5");
        let (b, _rx_b) = entry("b", "198.51.100.7");

        registry.insert(a, 1).await.unwrap();
        assert_eq!(
            registry.insert(b, 1).await.unwrap_err(),
            DenyReason::CapacityReached(1)
        );
    }

    #[tokio::test]
    async fn indices_stay_consistent_across_mutations() {
        let registry = SessionRegistry::new();
        let ips = ["203.0.113.5", "203.0.113.6", "198.51.100.7"];
        for (i, ip) in ips.iter().enumerate() {
            let (e, _rx) = entry(&format!("k{i}"), ip);
            registry.insert(e, 0).await.unwrap();
            registry.check_consistency().await.unwrap();
        }

        assert!(registry.remove(&SessionKey::from("k1")).await);
        registry.check_consistency().await.unwrap();
        assert!(!registry.address_has_session("203.0.113.6".parse().unwrap()).await);

        // Idempotent.
        assert!(!registry.remove(&SessionKey::from("k1")).await);
        assert!(!registry.remove(&SessionKey::from("never")).await);
        registry.check_consistency().await.unwrap();

        // The freed address can be reused.
        let (e, _rx) = entry("k3", "203.0.113.6");
        registry.insert(e, 0).await.unwrap();
        registry.check_consistency().await.unwrap();
        assert_eq!(
            registry
                .address_sessions("203.0.113.6".parse().unwrap())
                .await,
            vec![SessionKey::from("k3")]
        );
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn remove_cancels_session_token() {
        let registry = SessionRegistry::new();
        let (e, _rx) = entry("a", "203.0.113.5");
        let token = e.cancel.clone();
        registry.insert(e, 0).await.unwrap();

        registry.remove(&SessionKey::from("a")).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn clear_timer_is_idempotent() {
        let registry = SessionRegistry::new();
        let (e, _rx) = entry("a", "203.0.113.5");
        registry.insert(e, 0).await.unwrap();
        let key = SessionKey::from("a");
        assert!(!registry.clear_timer(&key).await);
        assert!(!registry.has_timer(&key).await);
    }
}
