use thiserror::Error;

/// Which half of the auto-auth exchange failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    Register,
    Login,
}

impl std::fmt::Display for AuthStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register => write!(f, "register"),
            Self::Login => write!(f, "login"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid bot configuration: {message}")]
    InvalidConfig { message: String },

    #[error("failed to connect to {target}: {message}")]
    Connect { target: String, message: String },

    #[error("auto-auth {step} failed: {detail}")]
    AuthSequenceFailed { step: AuthStep, detail: String },

    #[error("unknown anti-afk movement '{0}'")]
    UnknownMovement(String),

    #[error("bot is not connected")]
    Disconnected,
}

impl Error {
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn connect(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            target: target.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn auth_failed(step: AuthStep, detail: impl Into<String>) -> Self {
        Self::AuthSequenceFailed {
            step,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
