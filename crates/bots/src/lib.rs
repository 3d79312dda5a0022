//! Bot-side building blocks for the control panel.
//!
//! The game protocol itself lives behind [`BotConnector`] / [`ProtocolClient`];
//! this crate only knows how to configure a bot and drive the timed behaviours
//! the panel offers on top of it:
//! - `auto_auth`: register-then-login exchange over chat
//! - `chat_schedule`: one-shot or repeating scripted chat lines
//! - `anti_afk`: movement patterns that keep the bot from idling out
//! - `loopback`: an in-process engine for dry runs and tests

pub mod anti_afk;
pub mod auto_auth;
pub mod chat_schedule;
pub mod client;
pub mod config;
pub mod error;
pub mod loopback;

pub use {
    client::{BotConnector, BotEvent, ChatLine, ClientOptions, Connection, Control, ProtocolClient},
    config::{AuthMode, BotConfig},
    error::{AuthStep, Error, Result},
};
