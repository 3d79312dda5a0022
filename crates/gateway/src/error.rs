use std::net::IpAddr;

use {
    botherd_protocol::{ErrorShape, error_codes},
    thiserror::Error,
};

/// Why a WebSocket connection was refused before becoming a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    UnresolvableAddress,
    BlockedAddress(IpAddr),
    AddressBusy(IpAddr),
    IdentityBusy,
    CapacityReached(usize),
    MissingIdentity,
    UnknownIdentity,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnresolvableAddress => {
                write!(f, "Connection refused: your address could not be determined")
            },
            Self::BlockedAddress(_) => write!(
                f,
                "Connection refused: proxy, VPN and private network addresses are not allowed"
            ),
            Self::AddressBusy(_) => write!(
                f,
                "Connection refused: a session is already active from your address"
            ),
            Self::IdentityBusy => write!(
                f,
                "Connection refused: this account already has an active session"
            ),
            Self::CapacityReached(max) => {
                write!(f, "Connection refused: server is full ({max} sessions)")
            },
            Self::MissingIdentity => write!(f, "Connection refused: please log in first"),
            Self::UnknownIdentity => {
                write!(f, "Connection refused: session expired, please log in again")
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    AdmissionDenied(DenyReason),

    #[error("A bot is already running for this session")]
    DuplicateStart,

    #[error("No bot running")]
    NoBot,

    #[error("session is not registered")]
    UnknownSession,

    #[error("Unsupported game version: {0}")]
    UnsupportedVersion(String),

    #[error(transparent)]
    Bot(#[from] botherd_bots::Error),
}

impl Error {
    /// Response-frame error for a failed method call.
    pub fn to_error_shape(&self) -> ErrorShape {
        let code = match self {
            Self::DuplicateStart => error_codes::DUPLICATE_START,
            Self::NoBot => error_codes::NO_BOT,
            Self::UnsupportedVersion(_) | Self::Bot(botherd_bots::Error::InvalidConfig { .. }) => {
                error_codes::INVALID_REQUEST
            },
            _ => error_codes::UNAVAILABLE,
        };
        ErrorShape::new(code, self.to_string())
    }
}

impl From<DenyReason> for Error {
    fn from(reason: DenyReason) -> Self {
        Self::AdmissionDenied(reason)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_reasons_are_human_readable() {
        let reason = DenyReason::AddressBusy("203.0.113.5".parse().unwrap_or(IpAddr::from([0; 4])));
        assert!(reason.to_string().contains("already active from your address"));
        assert_eq!(
            Error::from(DenyReason::MissingIdentity).to_string(),
            "Connection refused: please log in first"
        );
    }

    #[test]
    fn error_codes_follow_variant() {
        assert_eq!(Error::DuplicateStart.to_error_shape().code, "DUPLICATE_START");
        assert_eq!(Error::NoBot.to_error_shape().code, "NO_BOT");
        assert_eq!(
            Error::from(botherd_bots::Error::invalid_config("x"))
                .to_error_shape()
                .code,
            "INVALID_REQUEST"
        );
        assert_eq!(
            Error::UnsupportedVersion("0.1".into()).to_error_shape().message,
            "Unsupported game version: 0.1"
        );
    }
}
