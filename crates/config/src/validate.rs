//! Semantic validation of a loaded configuration.
//!
//! Parsing already guarantees the shape; this reports values that parse but
//! would make the panel unusable or unsafe.

use std::collections::HashSet;

use crate::schema::BotherdConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "auth.users[0].password_hash"
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

pub fn validate(config: &BotherdConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.server.port == 0 {
        result.push(
            Severity::Warning,
            "server.port",
            "port 0 binds a random port; clients will not find the panel",
        );
    }

    if config.auth.users.is_empty() {
        result.push(
            Severity::Warning,
            "auth.users",
            "no users configured; nobody can log in",
        );
    }

    let mut seen = HashSet::new();
    for (i, user) in config.auth.users.iter().enumerate() {
        if user.username.trim().is_empty() {
            result.push(
                Severity::Error,
                format!("auth.users[{i}].username"),
                "username must not be empty",
            );
        }
        if !seen.insert(user.username.as_str()) {
            result.push(
                Severity::Error,
                format!("auth.users[{i}].username"),
                format!("duplicate username '{}'", user.username),
            );
        }
        if !user.password_hash.starts_with("$argon2") {
            result.push(
                Severity::Error,
                format!("auth.users[{i}].password_hash"),
                "expected an argon2 PHC string (see `botherd auth hash-password`)",
            );
        }
    }

    if config.server.behind_proxy {
        result.push(
            Severity::Info,
            "server.behind_proxy",
            "client addresses are taken from forwarding headers",
        );
    } else if config.admission.block_private_addresses && config.server.bind != "0.0.0.0" {
        result.push(
            Severity::Info,
            "admission.block_private_addresses",
            "loopback and private clients are denied; only public addresses can open sessions",
        );
    }

    if config.bots.auth_reply_timeout_secs == 0 {
        result.push(
            Severity::Error,
            "bots.auth_reply_timeout_secs",
            "must be greater than zero",
        );
    }

    result
}
