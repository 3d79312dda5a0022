use std::{sync::Arc, time::Duration};

use {
    botherd_auth::{CredentialVerifier, IdentityStore},
    botherd_bots::BotConnector,
    botherd_config::BotherdConfig,
    tokio_util::sync::CancellationToken,
};

use crate::{
    admission::AdmissionGate,
    lifecycle::{BotSupervisor, LifecycleSettings},
    registry::SessionRegistry,
    relay::EventRelay,
    request_throttle::RequestThrottle,
};

/// Shared gateway state.
///
/// Components hold `Arc`s to the registry rather than to this struct, so it
/// can be dropped and rebuilt in tests without leaking tasks.
pub struct GatewayState {
    pub version: String,
    pub registry: Arc<SessionRegistry>,
    pub identities: Arc<IdentityStore>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub relay: Arc<EventRelay>,
    pub supervisor: Arc<BotSupervisor>,
    pub admission: AdmissionGate,
    pub throttle: RequestThrottle,
    /// Root of every session's cancellation tree; cancelled on shutdown.
    pub shutdown: CancellationToken,
    /// Whether forwarding headers are trusted for the client address.
    pub behind_proxy: bool,
    pub ws_request_logs: bool,
    pub supported_versions: Vec<String>,
}

impl GatewayState {
    pub fn new(
        config: &BotherdConfig,
        verifier: Arc<dyn CredentialVerifier>,
        connector: Arc<dyn BotConnector>,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let identities = Arc::new(IdentityStore::new());
        let relay = Arc::new(EventRelay::new(Arc::clone(&registry)));
        let supervisor = Arc::new(BotSupervisor::new(
            Arc::clone(&registry),
            Arc::clone(&relay),
            connector,
            LifecycleSettings {
                supported_versions: config.bots.supported_versions.clone(),
                auth_reply_timeout: Duration::from_secs(config.bots.auth_reply_timeout_secs),
            },
        ));
        let throttle = RequestThrottle::from_config(&config.admission);
        let admission = AdmissionGate::new(
            config.admission.clone(),
            Arc::clone(&identities),
            Arc::clone(&registry),
        );

        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            registry,
            identities,
            verifier,
            relay,
            supervisor,
            admission,
            throttle,
            shutdown: CancellationToken::new(),
            behind_proxy: config.server.behind_proxy,
            ws_request_logs: config.server.ws_request_logs,
            supported_versions: config.bots.supported_versions.clone(),
        })
    }
}
