//! In-process protocol engine.
//!
//! The binary uses it as a dry-run engine: bots "join" instantly, navigation
//! completes at once and a chat auth plugin answers `/register` and `/login`.
//! Tests use [`LoopbackConnector::manual`] to drive events by hand.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use {
    async_trait::async_trait,
    botherd_common::Position,
    tokio::sync::mpsc,
    tracing::debug,
};

use crate::{
    client::{BotConnector, BotEvent, ClientOptions, Connection, Control, ProtocolClient},
    error::{Error, Result},
};

/// Name the simulated server uses for its own chat lines.
pub const SERVER_NAME: &str = "Server";

const SPAWN_POINT: Position = Position::new(0.0, 64.0, 0.0);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ClientState {
    position: Option<Position>,
    yaw: f32,
    pitch: f32,
    controls: HashSet<Control>,
    sent: Vec<String>,
    looks: usize,
    goal: Option<Position>,
    quit_reason: Option<String>,
}

pub struct LoopbackClient {
    username: String,
    scripted: bool,
    events: Mutex<Option<mpsc::UnboundedSender<BotEvent>>>,
    state: Mutex<ClientState>,
}

impl LoopbackClient {
    fn new(username: &str, scripted: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<BotEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            username: username.to_string(),
            scripted,
            events: Mutex::new(Some(tx)),
            state: Mutex::new(ClientState {
                position: Some(SPAWN_POINT),
                ..ClientState::default()
            }),
        });
        (client, rx)
    }

    /// A client with no connector and no scripted replies.
    pub fn detached(username: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<BotEvent>) {
        Self::new(username, false)
    }

    /// Raise an event as if it came from the server. Returns `false` once the
    /// client has quit or the event stream was dropped.
    pub fn emit(&self, event: BotEvent) -> bool {
        lock(&self.events)
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Close the event stream without a graceful quit, as a dropped
    /// connection would.
    pub fn drop_connection(&self) {
        lock(&self.events).take();
    }

    pub fn set_position(&self, position: Position) {
        lock(&self.state).position = Some(position);
    }

    /// Every chat line and command the bot has sent.
    pub fn sent_lines(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    pub fn control_active(&self, control: Control) -> bool {
        lock(&self.state).controls.contains(&control)
    }

    pub fn look_count(&self) -> usize {
        lock(&self.state).looks
    }

    pub fn goal(&self) -> Option<Position> {
        lock(&self.state).goal
    }

    pub fn quit_reason(&self) -> Option<String> {
        lock(&self.state).quit_reason.clone()
    }

    pub fn has_quit(&self) -> bool {
        lock(&self.state).quit_reason.is_some()
    }

    fn server_says(&self, message: &str) {
        self.emit(BotEvent::Chat {
            username: SERVER_NAME.into(),
            message: message.into(),
        });
    }
}

impl ProtocolClient for LoopbackClient {
    fn username(&self) -> String {
        self.username.clone()
    }

    fn position(&self) -> Option<Position> {
        lock(&self.state).position
    }

    fn chat(&self, line: &str) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if state.quit_reason.is_some() {
                return Err(Error::Disconnected);
            }
            state.sent.push(line.to_string());
        }

        if self.scripted {
            if line.starts_with("/register ") {
                self.server_says("Successfully registered!");
            } else if line.starts_with("/login ") {
                self.server_says("Successfully logged in!");
            } else if !line.starts_with('/') {
                self.emit(BotEvent::Chat {
                    username: self.username.clone(),
                    message: line.to_string(),
                });
            }
        }
        Ok(())
    }

    fn set_control_state(&self, control: Control, active: bool) {
        let mut state = lock(&self.state);
        if active {
            state.controls.insert(control);
        } else {
            state.controls.remove(&control);
        }
    }

    fn look(&self, yaw: f32, pitch: f32) {
        let mut state = lock(&self.state);
        state.yaw = yaw;
        state.pitch = pitch;
        state.looks += 1;
    }

    fn yaw(&self) -> f32 {
        lock(&self.state).yaw
    }

    fn navigate_to(&self, goal: Position) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if state.quit_reason.is_some() {
                return Err(Error::Disconnected);
            }
            state.goal = Some(goal);
            if self.scripted {
                state.position = Some(goal);
            }
        }
        if self.scripted {
            self.emit(BotEvent::GoalReached);
        }
        Ok(())
    }

    fn quit(&self, reason: &str) {
        lock(&self.state).quit_reason = Some(reason.to_string());
        self.drop_connection();
        debug!(bot = %self.username, reason, "loopback client quit");
    }
}

/// Connector handing out [`LoopbackClient`]s.
pub struct LoopbackConnector {
    scripted: bool,
    refuse: AtomicBool,
    attempts: AtomicUsize,
    clients: Mutex<Vec<Arc<LoopbackClient>>>,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnector {
    /// Clients spawn immediately and the simulated server answers auth commands.
    pub fn new() -> Self {
        Self {
            scripted: true,
            refuse: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Clients raise nothing on their own; drive them with [`LoopbackClient::emit`].
    pub fn manual() -> Self {
        Self {
            scripted: false,
            ..Self::new()
        }
    }

    /// Make subsequent `connect` calls fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn last_client(&self) -> Option<Arc<LoopbackClient>> {
        lock(&self.clients).last().cloned()
    }

    /// Number of successful connects so far.
    pub fn connections(&self) -> usize {
        lock(&self.clients).len()
    }

    /// Number of `connect` calls so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BotConnector for LoopbackConnector {
    async fn connect(&self, options: ClientOptions) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::connect(options.target(), "connection refused"));
        }

        let (client, events) = LoopbackClient::new(&options.username, self.scripted);
        if self.scripted {
            client.emit(BotEvent::Spawn);
        }
        lock(&self.clients).push(Arc::clone(&client));
        debug!(
            bot = %options.username,
            target = %options.target(),
            version = options.version.as_deref().unwrap_or("auto"),
            "loopback client connected"
        );

        Ok(Connection { client, events })
    }
}
