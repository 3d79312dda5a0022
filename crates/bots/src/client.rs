//! Seam between the panel and a game-protocol implementation.

use std::sync::Arc;

use {
    async_trait::async_trait,
    botherd_common::Position,
    secrecy::Secret,
    tokio::sync::mpsc,
};

use crate::{config::AuthMode, error::Result};

/// Everything a protocol client needs to join a server.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub version: Option<String>,
    pub username: String,
    pub auth: AuthMode,
    pub password: Option<Secret<String>>,
}

impl ClientOptions {
    pub fn from_config(config: &crate::BotConfig) -> Self {
        Self {
            host: config.server.ip.clone(),
            port: config.server.port,
            version: config.version().map(str::to_string),
            username: config.bot_account.username.clone(),
            auth: config.auth_mode(),
            password: match config.auth_mode() {
                AuthMode::Microsoft => config.bot_account.password.clone(),
                AuthMode::Offline => None,
            },
        }
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Lifecycle and chat events raised by a connected client, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    Spawn,
    Chat { username: String, message: String },
    GoalReached,
    Death,
    Kicked { reason: String },
    Error { message: String },
    End { reason: String },
}

/// A chat line as seen by the auto-auth waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub username: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Forward,
    Back,
    Left,
    Right,
    Jump,
    Sprint,
    Sneak,
}

impl Control {
    pub const ALL: [Control; 7] = [
        Control::Forward,
        Control::Back,
        Control::Left,
        Control::Right,
        Control::Jump,
        Control::Sprint,
        Control::Sneak,
    ];
}

/// Handle to one connected game client.
///
/// Calls are fire-and-forget from the panel's perspective: implementations
/// queue packets and return immediately.
pub trait ProtocolClient: Send + Sync {
    fn username(&self) -> String;

    /// Current entity position, if the client has spawned.
    fn position(&self) -> Option<Position>;

    /// Send a chat line or slash command as the bot.
    fn chat(&self, line: &str) -> Result<()>;

    fn set_control_state(&self, control: Control, active: bool);

    fn look(&self, yaw: f32, pitch: f32);

    fn yaw(&self) -> f32;

    /// Start pathfinding towards `goal`; completion is signalled with
    /// [`BotEvent::GoalReached`].
    fn navigate_to(&self, goal: Position) -> Result<()>;

    /// Disconnect gracefully. The event stream ends afterwards.
    fn quit(&self, reason: &str);
}

/// A live client plus the stream of events it raises.
///
/// The stream yielding `None` is treated as an `End` event.
pub struct Connection {
    pub client: Arc<dyn ProtocolClient>,
    pub events: mpsc::UnboundedReceiver<BotEvent>,
}

/// Factory for protocol clients.
#[async_trait]
pub trait BotConnector: Send + Sync {
    async fn connect(&self, options: ClientOptions) -> Result<Connection>;
}
