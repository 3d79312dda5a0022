//! Config schema types (server, auth, admission, bots).

use {
    ipnet::IpNet,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotherdConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub admission: AdmissionConfig,
    pub bots: BotsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
    /// Trust `X-Forwarded-For` / `X-Real-IP` / `CF-Connecting-IP` for the
    /// client address. Only enable behind a reverse proxy you control.
    pub behind_proxy: bool,
    /// Log every inbound request frame at info level.
    pub ws_request_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8000,
            behind_proxy: false,
            ws_request_logs: false,
        }
    }
}

/// Panel accounts allowed to log in via `POST /api/auth/login`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    /// Argon2 PHC string, as printed by `botherd auth hash-password`.
    pub password_hash: String,
}

/// Admission heuristics applied to every new WebSocket connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Deny connections whose address falls in `blocked_networks`.
    pub block_private_addresses: bool,
    pub blocked_networks: Vec<IpNet>,
    /// Upper bound on concurrent sessions; 0 means unlimited.
    pub max_sessions: usize,
    /// Login attempts per address per minute. 0 disables the limit.
    pub login_attempts_per_minute: u32,
    /// Other `/api/*` requests per address per minute. 0 disables the limit.
    pub api_requests_per_minute: u32,
    /// Refused WebSocket upgrades per address per minute before `/ws`
    /// answers 429 without consulting the gate. 0 disables the limit.
    pub refused_connects_per_minute: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            block_private_addresses: true,
            blocked_networks: default_blocked_networks(),
            max_sessions: 0,
            login_attempts_per_minute: 5,
            api_requests_per_minute: 120,
            refused_connects_per_minute: 10,
        }
    }
}

/// Loopback, private, shared-address, link-local and unspecified ranges.
pub fn default_blocked_networks() -> Vec<IpNet> {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "::/128",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|net| net.parse().ok())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotsConfig {
    /// Game protocol versions accepted in `server.version`. Empty accepts any.
    pub supported_versions: Vec<String>,
    /// How long the auto-auth sequence waits for each chat reply.
    pub auth_reply_timeout_secs: u64,
}

impl Default for BotsConfig {
    fn default() -> Self {
        Self {
            supported_versions: [
                "1.8.9", "1.12.2", "1.16.5", "1.17.1", "1.18.2", "1.19.4", "1.20.1", "1.20.4",
                "1.21.1",
            ]
            .iter()
            .map(|v| (*v).to_string())
            .collect(),
            auth_reply_timeout_secs: 30,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: BotherdConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.server.port, 8000);
        assert!(cfg.admission.block_private_addresses);
        assert_eq!(
            cfg.admission.blocked_networks.len(),
            default_blocked_networks().len()
        );
        assert!(cfg.bots.supported_versions.iter().any(|v| v == "1.20.1"));
    }

    #[test]
    fn users_and_networks_parse() {
        let cfg: BotherdConfig = toml::from_str(
            r#"
            [admission]
            blocked_networks = ["10.0.0.0/8"]
            login_attempts_per_minute = 20

            [[auth.users]]
            username = "alice"
            password_hash = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.auth.users.len(), 1);
        assert_eq!(cfg.auth.users[0].username, "alice");
        assert_eq!(cfg.admission.blocked_networks.len(), 1);
        assert_eq!(cfg.admission.login_attempts_per_minute, 20);
        assert_eq!(cfg.admission.refused_connects_per_minute, 10);
    }
}
