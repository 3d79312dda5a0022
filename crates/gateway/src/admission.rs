//! Admission gate for new WebSocket connections.
//!
//! Checks run in a fixed order and stop at the first failure: address
//! heuristic, then capacity, then authentication. The address heuristic is a
//! best-effort filter for proxies, VPN exits and private networks. It is not
//! a security boundary: a public proxy address passes it.

use std::{net::IpAddr, sync::Arc};

use {
    botherd_auth::{IdentityStore, VerifiedIdentity},
    botherd_common::SessionKey,
    botherd_config::AdmissionConfig,
    tracing::debug,
};

use crate::{
    error::{DenyReason, Result},
    registry::SessionRegistry,
};

pub struct AdmissionGate {
    config: AdmissionConfig,
    identities: Arc<IdentityStore>,
    registry: Arc<SessionRegistry>,
}

impl AdmissionGate {
    pub fn new(
        config: AdmissionConfig,
        identities: Arc<IdentityStore>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            config,
            identities,
            registry,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.config.max_sessions
    }

    /// Decide whether a connection from `address` claiming `claimed` may
    /// become a session. Nothing is registered here; the caller inserts into
    /// the registry, which repeats the capacity checks atomically.
    pub async fn admit(
        &self,
        address: Option<IpAddr>,
        claimed: Option<&SessionKey>,
    ) -> Result<VerifiedIdentity> {
        let ip = self.check_address(address)?;

        if self.registry.address_has_session(ip).await {
            return Err(DenyReason::AddressBusy(ip).into());
        }
        if let Some(key) = claimed
            && self.registry.contains(key).await
        {
            return Err(DenyReason::IdentityBusy.into());
        }
        let max = self.config.max_sessions;
        if max > 0 && self.registry.len().await >= max {
            return Err(DenyReason::CapacityReached(max).into());
        }

        let key = claimed.ok_or(DenyReason::MissingIdentity)?;
        let identity = self
            .identities
            .lookup(key)
            .await
            .ok_or(DenyReason::UnknownIdentity)?;
        debug!(remote_ip = %ip, username = %identity.username, "admission granted");
        Ok(identity)
    }

    /// Normalised client address, or why it is refused.
    pub fn check_address(&self, address: Option<IpAddr>) -> std::result::Result<IpAddr, DenyReason> {
        let ip = address
            .ok_or(DenyReason::UnresolvableAddress)?
            .to_canonical();
        if self.config.block_private_addresses
            && self.config.blocked_networks.iter().any(|net| net.contains(&ip))
        {
            return Err(DenyReason::BlockedAddress(ip));
        }
        Ok(ip)
    }
}
