//! The `addBot` payload.
//!
//! Keys are kebab-case to match what browser clients send. Every section is
//! optional; missing values fall back to defaults so a minimal payload like
//! `{"server": {"ip": "play.example.com"}}` is accepted.

use std::{fmt, str::FromStr, time::Duration};

use {
    botherd_common::Position,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Deserializer, de::Error as _},
};

use crate::{
    anti_afk::Movement,
    error::{Error, Result},
};

pub const DEFAULT_USERNAME: &str = "Bot";
pub const DEFAULT_GAME_PORT: u16 = 25565;
/// Used when auto-reconnect is on but no delay (or 0) was given.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BotConfig {
    pub bot_account: BotAccount,
    pub server: ServerTarget,
    pub utils: BotUtils,
    pub position: PositionGoal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotAccount {
    pub username: String,
    /// `"microsoft"` for provider-authenticated accounts; anything else is offline.
    pub auth: String,
    pub password: Option<Secret<String>>,
}

impl Default for BotAccount {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.into(),
            auth: "offline".into(),
            password: None,
        }
    }
}

/// Credential mode handed to the protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Offline,
    Microsoft,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerTarget {
    pub ip: String,
    #[serde(deserialize_with = "number_or_string")]
    pub port: u16,
    /// Empty lets the protocol client negotiate.
    pub version: String,
}

impl Default for ServerTarget {
    fn default() -> Self {
        Self {
            ip: String::new(),
            port: DEFAULT_GAME_PORT,
            version: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BotUtils {
    pub auto_auth: AutoAuth,
    pub chat_messages: ChatMessages,
    pub anti_afk: AntiAfk,
    pub auto_reconnect: bool,
    /// Milliseconds; 0 means [`DEFAULT_RECONNECT_DELAY`].
    #[serde(deserialize_with = "number_or_string")]
    pub auto_reconnect_delay: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AutoAuth {
    pub enabled: bool,
    pub password: Option<Secret<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ChatMessages {
    pub enabled: bool,
    pub messages: Vec<String>,
    pub repeat: bool,
    /// Seconds between repeated sends.
    #[serde(deserialize_with = "number_or_string")]
    pub repeat_delay: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AntiAfk {
    pub enabled: bool,
    pub movement: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct PositionGoal {
    pub enabled: bool,
    #[serde(deserialize_with = "number_or_string")]
    pub x: f64,
    #[serde(deserialize_with = "number_or_string")]
    pub y: f64,
    #[serde(deserialize_with = "number_or_string")]
    pub z: f64,
}

impl BotConfig {
    /// Reject payloads that cannot possibly produce a working bot.
    pub fn validate(&self) -> Result<()> {
        if self.server.ip.trim().is_empty() {
            return Err(Error::invalid_config("server.ip is required"));
        }
        if self.server.port == 0 {
            return Err(Error::invalid_config("server.port must be non-zero"));
        }
        if self.bot_account.username.trim().is_empty() {
            return Err(Error::invalid_config("bot-account.username is required"));
        }
        if self.auth_mode() == AuthMode::Microsoft && !has_secret(&self.bot_account.password) {
            return Err(Error::invalid_config(
                "microsoft accounts require bot-account.password",
            ));
        }
        if self.utils.auto_auth.enabled && !has_secret(&self.utils.auto_auth.password) {
            return Err(Error::invalid_config(
                "utils.auto-auth.password is required when auto-auth is enabled",
            ));
        }
        let chat = &self.utils.chat_messages;
        if chat.enabled && chat.repeat && chat.repeat_delay == 0 {
            return Err(Error::invalid_config(
                "utils.chat-messages.repeat-delay must be at least 1 second",
            ));
        }
        Ok(())
    }

    pub fn auth_mode(&self) -> AuthMode {
        if self.bot_account.auth.eq_ignore_ascii_case("microsoft") {
            AuthMode::Microsoft
        } else {
            AuthMode::Offline
        }
    }

    /// `host:port` for log lines and notices.
    pub fn target(&self) -> String {
        format!("{}:{}", self.server.ip, self.server.port)
    }

    pub fn version(&self) -> Option<&str> {
        let v = self.server.version.trim();
        (!v.is_empty()).then_some(v)
    }

    pub fn auto_auth_password(&self) -> Option<&str> {
        let auth = &self.utils.auto_auth;
        auth.enabled
            .then(|| auth.password.as_ref().map(|p| p.expose_secret().as_str()))
            .flatten()
    }

    /// Scripted chat lines, if enabled and non-empty.
    pub fn scheduled_messages(&self) -> Option<&[String]> {
        let chat = &self.utils.chat_messages;
        (chat.enabled && !chat.messages.is_empty()).then_some(chat.messages.as_slice())
    }

    /// Interval for repeating chat messages; `None` means send once.
    pub fn repeat_interval(&self) -> Option<Duration> {
        let chat = &self.utils.chat_messages;
        chat.repeat
            .then(|| Duration::from_secs(chat.repeat_delay.max(1)))
    }

    pub fn navigation_goal(&self) -> Option<Position> {
        let p = self.position;
        p.enabled.then(|| Position::new(p.x, p.y, p.z))
    }

    /// The configured anti-afk pattern. `Some(Err(_))` when the name is not recognised.
    pub fn anti_afk(&self) -> Option<Result<Movement>> {
        let afk = &self.utils.anti_afk;
        afk.enabled.then(|| afk.movement.parse())
    }

    pub fn reconnect_delay(&self) -> Option<Duration> {
        let utils = &self.utils;
        utils.auto_reconnect.then(|| match utils.auto_reconnect_delay {
            0 => DEFAULT_RECONNECT_DELAY,
            ms => Duration::from_millis(ms),
        })
    }
}

/// Accepts both `25565` and `"25565"`.
fn number_or_string<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose<N> {
        Number(N),
        Text(String),
    }

    match Loose::<T>::deserialize(deserializer)? {
        Loose::Number(n) => Ok(n),
        Loose::Text(text) => text
            .trim()
            .parse()
            .map_err(|e| D::Error::custom(format!("invalid number {text:?}: {e}"))),
    }
}

fn has_secret(secret: &Option<Secret<String>>) -> bool {
    secret
        .as_ref()
        .is_some_and(|s| !s.expose_secret().is_empty())
}
