//! Configuration loading, validation, and env substitution.
//!
//! Config files: `botherd.toml`, `botherd.yaml`, or `botherd.json`
//! Searched in `./` then `~/.config/botherd/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, find_config_file, load_config},
    schema::{AdmissionConfig, AuthConfig, BotherdConfig, BotsConfig, ServerConfig, UserEntry},
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
