//! Value types and error helpers shared by every botherd crate.

pub mod error;
pub mod types;

pub use {
    error::FromMessage,
    types::{Position, SessionKey},
};
