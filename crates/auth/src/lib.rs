//! Authentication and identity management.
//!
//! This crate provides:
//! - `CredentialVerifier`: async username/password check (argon2 hashes from config)
//! - `IdentityStore`: the set of session keys issued by a successful login
//! - Client address resolution for admission and throttling decisions

pub mod credential_store;
pub mod error;
pub mod identity;
pub mod locality;

pub use {
    credential_store::{ConfigCredentialStore, CredentialVerifier, hash_password},
    error::{Error, Result},
    identity::{IdentityStore, VerifiedIdentity},
    locality::{has_proxy_headers, parse_ip, resolve_admission_ip, resolve_client_ip},
};
