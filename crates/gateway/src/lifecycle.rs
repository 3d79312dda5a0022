//! Bot lifecycle: start, event wiring, behaviours, reconnect, stop.
//!
//! Each [`BotHandle`] owns one event-loop task that consumes the protocol
//! client's events in order. What happens for each event is decided by an
//! [`EventTable`] built once from the bot's configuration, so the wiring can
//! be inspected and tested without a live client.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    botherd_bots::{
        BotConfig, BotConnector, BotEvent, ChatLine, ClientOptions, ProtocolClient,
        anti_afk::{self, Movement},
        auto_auth, chat_schedule,
    },
    botherd_common::{Position, SessionKey},
    futures::future::BoxFuture,
    tokio::{
        sync::{broadcast, mpsc},
        time::Instant,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    registry::SessionRegistry,
    relay::EventRelay,
};

const CHAT_FANOUT_CAPACITY: usize = 64;
/// Ceiling for the wait between failed reconnect attempts.
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(60);

/// A running bot and the resources hanging off it.
pub struct BotHandle {
    /// Generation id, unique per gateway.
    pub id: u64,
    pub session_key: SessionKey,
    pub config: Arc<BotConfig>,
    pub client: Arc<dyn ProtocolClient>,
    /// Cancels the event loop, behaviours and any pending reconnect.
    pub cancel: CancellationToken,
    pub messages_sent: Arc<AtomicU64>,
    pub started_at: Instant,
    chat_tx: broadcast::Sender<ChatLine>,
}

impl std::fmt::Debug for BotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotHandle")
            .field("id", &self.id)
            .field("session_key", &self.session_key)
            .finish_non_exhaustive()
    }
}

impl BotHandle {
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stop every task tied to the handle and disconnect the client.
    pub fn shutdown(&self, reason: &str) {
        self.cancel.cancel();
        self.client.quit(reason);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "username": self.client.username(),
            "server": self.config.target(),
            "position": self.client.position(),
            "messagesSent": self.messages_sent(),
            "uptime": self.uptime().as_secs(),
        })
    }
}

// ── Event table ──────────────────────────────────────────────────────────────

/// One step taken in response to a bot event.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// `botStatus {connected: true, position}`.
    ReportConnected,
    /// `botStatus {connected: false}`.
    ReportDisconnected,
    Notify(String),
    /// `message` with the bot's current position appended.
    NotifyAtPosition(&'static str),
    RelayChat { username: String, message: String },
    FeedAuth(ChatLine),
    StartAutoAuth,
    StartChatSchedule,
    Navigate(Position),
    StartAntiAfk(Movement),
    ReportError(String),
    Reconnect(Duration),
    /// Cancel behaviours and release the handle. Ends the event loop.
    Terminate,
}

/// Event → action wiring for one bot, derived from its configuration.
#[derive(Debug, Clone)]
pub struct EventTable {
    on_first_spawn: Vec<Action>,
    on_respawn: Vec<Action>,
    on_end: Vec<Action>,
    feed_auth: bool,
}

impl EventTable {
    pub fn from_config(config: &BotConfig) -> Self {
        let mut on_first_spawn = vec![Action::ReportConnected];
        if config.auto_auth_password().is_some() {
            on_first_spawn.push(Action::StartAutoAuth);
        }
        if config.scheduled_messages().is_some() {
            on_first_spawn.push(Action::StartChatSchedule);
        }
        if let Some(goal) = config.navigation_goal() {
            on_first_spawn.push(Action::Navigate(goal));
        }
        match config.anti_afk() {
            Some(Ok(movement)) => on_first_spawn.push(Action::StartAntiAfk(movement)),
            Some(Err(e)) => on_first_spawn.push(Action::Notify(e.to_string())),
            None => {},
        }

        let on_end = match config.reconnect_delay() {
            Some(delay) => vec![
                Action::ReportDisconnected,
                Action::Notify(format!(
                    "Bot disconnected, reconnecting in {} ms",
                    delay.as_millis()
                )),
                Action::Reconnect(delay),
            ],
            None => vec![
                Action::ReportDisconnected,
                Action::Notify("Bot disconnected".into()),
                Action::Terminate,
            ],
        };

        Self {
            on_first_spawn,
            on_respawn: vec![Action::ReportConnected],
            on_end,
            feed_auth: config.auto_auth_password().is_some(),
        }
    }

    /// Actions for `event`. Spawn-time behaviours only start on the first spawn;
    /// later spawns (respawn after death) just refresh the status.
    pub fn actions(&self, event: &BotEvent, first_spawn: bool) -> Vec<Action> {
        match event {
            BotEvent::Spawn if first_spawn => self.on_first_spawn.clone(),
            BotEvent::Spawn => self.on_respawn.clone(),
            BotEvent::Chat { username, message } => {
                let mut actions = vec![Action::RelayChat {
                    username: username.clone(),
                    message: message.clone(),
                }];
                if self.feed_auth {
                    actions.push(Action::FeedAuth(ChatLine {
                        username: username.clone(),
                        message: message.clone(),
                    }));
                }
                actions
            },
            BotEvent::GoalReached => {
                vec![Action::NotifyAtPosition("Bot arrived at target location: ")]
            },
            BotEvent::Death => vec![Action::NotifyAtPosition("Bot died and respawned at ")],
            BotEvent::Kicked { reason } => vec![
                Action::Notify(format!("Bot was kicked: {reason}")),
                Action::ReportDisconnected,
                Action::Terminate,
            ],
            BotEvent::Error { message } => vec![Action::ReportError(message.clone())],
            BotEvent::End { .. } => self.on_end.clone(),
        }
    }
}

// ── Supervisor ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Accepted `server.version` values; empty accepts anything.
    pub supported_versions: Vec<String>,
    pub auth_reply_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            supported_versions: Vec::new(),
            auth_reply_timeout: Duration::from_secs(30),
        }
    }
}

/// Whether the event loop keeps running after an action.
enum Flow {
    Continue,
    Exit,
}

pub struct BotSupervisor {
    registry: Arc<SessionRegistry>,
    relay: Arc<EventRelay>,
    connector: Arc<dyn BotConnector>,
    settings: LifecycleSettings,
    next_id: AtomicU64,
}

impl BotSupervisor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        relay: Arc<EventRelay>,
        connector: Arc<dyn BotConnector>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            registry,
            relay,
            connector,
            settings,
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a bot for `key`. Every failure is also surfaced to the session
    /// as a `message` event.
    pub async fn start(self: &Arc<Self>, key: &SessionKey, config: BotConfig) -> Result<Arc<BotHandle>> {
        let result = self.try_start(key, config).await;
        if let Err(e) = &result {
            warn!(session_key = %key, error = %e, "bot start failed");
            let notice = match e {
                Error::DuplicateStart | Error::UnsupportedVersion(_) => e.to_string(),
                other => format!("Failed to start bot: {other}"),
            };
            self.relay.message(key, notice).await;
        }
        result
    }

    async fn try_start(self: &Arc<Self>, key: &SessionKey, config: BotConfig) -> Result<Arc<BotHandle>> {
        if self.registry.has_bot(key).await {
            return Err(Error::DuplicateStart);
        }
        config.validate()?;
        if let Some(version) = config.version()
            && !self.settings.supported_versions.is_empty()
            && !self.settings.supported_versions.iter().any(|v| v == version)
        {
            return Err(Error::UnsupportedVersion(version.to_string()));
        }

        let handle = self.launch(key, Arc::new(config), None).await?;
        info!(
            session_key = %key,
            bot_id = handle.id,
            target = %handle.config.target(),
            "bot started"
        );
        self.relay
            .message(
                key,
                format!(
                    "Bot started: {} on {}",
                    handle.client.username(),
                    handle.config.target()
                ),
            )
            .await;
        Ok(handle)
    }

    /// Connect, attach to the session and spawn the event loop.
    ///
    /// Boxed because the event loop re-enters it through reconnect.
    fn launch<'a>(
        self: &'a Arc<Self>,
        key: &'a SessionKey,
        config: Arc<BotConfig>,
        replaces: Option<u64>,
    ) -> BoxFuture<'a, Result<Arc<BotHandle>>> {
        Box::pin(async move {
            let session_token = self
                .registry
                .session_token(key)
                .await
                .ok_or(Error::UnknownSession)?;

            let connection = self
                .connector
                .connect(ClientOptions::from_config(&config))
                .await?;

            let (chat_tx, _) = broadcast::channel(CHAT_FANOUT_CAPACITY);
            let handle = Arc::new(BotHandle {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                session_key: key.clone(),
                config,
                client: connection.client,
                cancel: session_token.child_token(),
                messages_sent: Arc::new(AtomicU64::new(0)),
                started_at: Instant::now(),
                chat_tx,
            });

            if !self
                .registry
                .set_bot(key, Arc::clone(&handle), replaces)
                .await
            {
                handle.shutdown("superseded");
                return Err(if self.registry.contains(key).await {
                    Error::DuplicateStart
                } else {
                    Error::UnknownSession
                });
            }

            tokio::spawn(Arc::clone(self).run_events(Arc::clone(&handle), connection.events));
            Ok(handle)
        })
    }

    /// Stop the session's bot. Returns `false` if none was running.
    pub async fn stop(&self, key: &SessionKey) -> bool {
        let Some(handle) = self.registry.remove_bot(key).await else {
            return false;
        };
        handle.shutdown("stopped by user");
        info!(
            session_key = %key,
            bot_id = handle.id,
            messages_sent = handle.messages_sent(),
            uptime_secs = handle.uptime().as_secs(),
            "bot stopped"
        );
        self.relay.status(key, false, None).await;
        self.relay.message(key, "Bot stopped").await;
        true
    }

    async fn run_events(
        self: Arc<Self>,
        handle: Arc<BotHandle>,
        mut events: mpsc::UnboundedReceiver<BotEvent>,
    ) {
        let table = EventTable::from_config(&handle.config);
        let behaviours = handle.cancel.child_token();
        let mut spawned = false;

        'events: loop {
            let event = tokio::select! {
                biased;
                () = handle.cancel.cancelled() => break,
                event = events.recv() => event.unwrap_or_else(|| BotEvent::End {
                    reason: "connection closed".into(),
                }),
            };
            debug!(session_key = %handle.session_key, bot_id = handle.id, ?event, "bot event");

            let first_spawn = matches!(event, BotEvent::Spawn) && !spawned;
            spawned |= first_spawn;

            for action in table.actions(&event, first_spawn) {
                if let Flow::Exit = self.apply(&handle, &behaviours, action).await {
                    break 'events;
                }
            }
        }
        behaviours.cancel();
        debug!(session_key = %handle.session_key, bot_id = handle.id, "bot event loop finished");
    }

    async fn apply(
        self: &Arc<Self>,
        handle: &Arc<BotHandle>,
        behaviours: &CancellationToken,
        action: Action,
    ) -> Flow {
        let key = &handle.session_key;
        match action {
            Action::ReportConnected => {
                self.relay.status(key, true, handle.client.position()).await;
            },
            Action::ReportDisconnected => {
                self.relay.status(key, false, None).await;
            },
            Action::Notify(text) => {
                self.relay.message(key, text).await;
            },
            Action::NotifyAtPosition(prefix) => {
                let at = handle
                    .client
                    .position()
                    .map_or_else(|| "an unknown position".to_string(), |p| p.to_string());
                self.relay.message(key, format!("{prefix}{at}")).await;
            },
            Action::RelayChat { username, message } => {
                self.relay.chat(key, format!("{username}: {message}")).await;
            },
            Action::FeedAuth(line) => {
                // No receiver means no exchange is waiting.
                let _ = handle.chat_tx.send(line);
            },
            Action::StartAutoAuth => self.spawn_auto_auth(handle, behaviours),
            Action::StartChatSchedule => {
                if let Some(messages) = handle.config.scheduled_messages() {
                    tokio::spawn(chat_schedule::run(
                        messages.to_vec(),
                        handle.config.repeat_interval(),
                        Arc::clone(&handle.client),
                        Arc::clone(&handle.messages_sent),
                        behaviours.clone(),
                    ));
                }
            },
            Action::Navigate(goal) => {
                if let Err(e) = handle.client.navigate_to(goal) {
                    warn!(session_key = %key, error = %e, "navigation failed");
                    self.relay.message(key, format!("Bot error: {e}")).await;
                }
            },
            Action::StartAntiAfk(movement) => {
                tokio::spawn(anti_afk::run(
                    movement,
                    Arc::clone(&handle.client),
                    behaviours.clone(),
                ));
            },
            Action::ReportError(detail) => {
                warn!(session_key = %key, bot_id = handle.id, error = %detail, "protocol client error");
                self.relay.message(key, format!("Bot error: {detail}")).await;
            },
            Action::Reconnect(delay) => {
                behaviours.cancel();
                self.reconnect(handle, delay).await;
                return Flow::Exit;
            },
            Action::Terminate => {
                behaviours.cancel();
                if let Some(released) = self.registry.remove_bot_if(key, handle.id).await {
                    released.shutdown("terminated");
                    info!(session_key = %key, bot_id = handle.id, "bot released after connection ended");
                }
                return Flow::Exit;
            },
        }
        Flow::Continue
    }

    fn spawn_auto_auth(&self, handle: &Arc<BotHandle>, behaviours: &CancellationToken) {
        let Some(password) = handle.config.auto_auth_password().map(str::to_string) else {
            return;
        };
        // Subscribe before the first command goes out.
        let mut replies = handle.chat_tx.subscribe();
        let client = Arc::clone(&handle.client);
        let relay = Arc::clone(&self.relay);
        let key = handle.session_key.clone();
        let timeout = self.settings.auth_reply_timeout;
        let cancel = behaviours.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                outcome = auto_auth::run(client.as_ref(), &mut replies, &password, timeout) => outcome,
            };
            match outcome {
                Ok(()) => {
                    info!(session_key = %key, "auto-auth completed");
                    relay.message(&key, "Auto-auth completed").await;
                },
                Err(e) => {
                    warn!(session_key = %key, error = %e, "auto-auth failed");
                    relay.message(&key, e.to_string()).await;
                },
            }
        });
    }

    /// Replace `handle` with a fresh connection after `delay`.
    ///
    /// The dead handle stays registered while waiting so that `stop` (or the
    /// session closing) cancels it, which abandons the reconnect. Replacement
    /// only succeeds if the slot still holds this handle. Each failed attempt
    /// doubles the wait, up to [`MAX_RECONNECT_BACKOFF`].
    async fn reconnect(self: &Arc<Self>, handle: &Arc<BotHandle>, delay: Duration) {
        let key = &handle.session_key;
        let mut wait = delay;
        loop {
            tokio::select! {
                biased;
                () = handle.cancel.cancelled() => {
                    debug!(session_key = %key, bot_id = handle.id, "reconnect abandoned");
                    return;
                },
                () = tokio::time::sleep(wait) => {},
            }

            match self
                .launch(key, Arc::clone(&handle.config), Some(handle.id))
                .await
            {
                Ok(fresh) => {
                    handle.cancel.cancel();
                    info!(session_key = %key, old_bot_id = handle.id, bot_id = fresh.id, "bot reconnected");
                    self.relay
                        .message(
                            key,
                            format!(
                                "Bot reconnected: {} on {}",
                                fresh.client.username(),
                                fresh.config.target()
                            ),
                        )
                        .await;
                    return;
                },
                Err(Error::DuplicateStart | Error::UnknownSession) => {
                    debug!(session_key = %key, bot_id = handle.id, "reconnect superseded");
                    return;
                },
                Err(e) => {
                    wait = next_backoff(wait);
                    warn!(
                        session_key = %key,
                        error = %e,
                        retry_ms = wait.as_millis() as u64,
                        "reconnect attempt failed"
                    );
                    self.relay
                        .message(
                            key,
                            format!("Reconnect failed: {e}, retrying in {} ms", wait.as_millis()),
                        )
                        .await;
                },
            }
        }
    }
}

fn next_backoff(wait: Duration) -> Duration {
    wait.saturating_mul(2).min(MAX_RECONNECT_BACKOFF)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn config(value: serde_json::Value) -> BotConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn plain_config_only_reports_status_on_spawn() {
        let table = EventTable::from_config(&config(json!({ "server": { "ip": "mc.test" } })));
        assert_eq!(table.actions(&BotEvent::Spawn, true), [Action::ReportConnected]);
        assert_eq!(
            table.actions(&BotEvent::End { reason: "x".into() }, false),
            [
                Action::ReportDisconnected,
                Action::Notify("Bot disconnected".into()),
                Action::Terminate,
            ]
        );
    }

    #[test]
    fn behaviours_start_only_on_first_spawn() {
        let table = EventTable::from_config(&config(json!({
            "server": { "ip": "mc.test" },
            "utils": {
                "auto-auth": { "enabled": true, "password": "pw" },
                "chat-messages": { "enabled": true, "messages": ["hi"] },
                "anti-afk": { "enabled": true, "movement": "jump" }
            },
            "position": { "enabled": true, "x": 1.0, "y": 2.0, "z": 3.0 }
        })));
        assert_eq!(table.actions(&BotEvent::Spawn, true), [
            Action::ReportConnected,
            Action::StartAutoAuth,
            Action::StartChatSchedule,
            Action::Navigate(Position::new(1.0, 2.0, 3.0)),
            Action::StartAntiAfk(Movement::Jump),
        ]);
        assert_eq!(table.actions(&BotEvent::Spawn, false), [Action::ReportConnected]);
    }

    #[test]
    fn chat_feeds_auth_only_when_enabled() {
        let event = BotEvent::Chat {
            username: "Server".into(),
            message: "hello".into(),
        };
        let plain = EventTable::from_config(&config(json!({ "server": { "ip": "mc.test" } })));
        assert_eq!(plain.actions(&event, false).len(), 1);

        let with_auth = EventTable::from_config(&config(json!({
            "server": { "ip": "mc.test" },
            "utils": { "auto-auth": { "enabled": true, "password": "pw" } }
        })));
        assert!(matches!(
            with_auth.actions(&event, false).as_slice(),
            [Action::RelayChat { .. }, Action::FeedAuth(_)]
        ));
    }

    #[test]
    fn reconnect_and_kick_policies() {
        let table = EventTable::from_config(&config(json!({
            "server": { "ip": "mc.test" },
            "utils": { "auto-reconnect": true, "auto-reconnect-delay": 500 }
        })));
        assert_eq!(
            table.actions(&BotEvent::End { reason: "x".into() }, false),
            [
                Action::ReportDisconnected,
                Action::Notify("Bot disconnected, reconnecting in 500 ms".into()),
                Action::Reconnect(Duration::from_millis(500)),
            ]
        );
        // Kicks are terminal even with auto-reconnect.
        assert_eq!(
            table
                .actions(&BotEvent::Kicked { reason: "banned".into() }, false)
                .last(),
            Some(&Action::Terminate)
        );
    }

    #[test]
    fn missing_reconnect_delay_falls_back_to_a_second() {
        let table = EventTable::from_config(&config(json!({
            "server": { "ip": "mc.test" },
            "utils": { "auto-reconnect": true }
        })));
        assert!(
            table
                .actions(&BotEvent::End { reason: "x".into() }, false)
                .contains(&Action::Reconnect(Duration::from_secs(1)))
        );
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        assert_eq!(next_backoff(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(40)), MAX_RECONNECT_BACKOFF);
        assert_eq!(next_backoff(MAX_RECONNECT_BACKOFF), MAX_RECONNECT_BACKOFF);
    }

    #[test]
    fn position_notices() {
        let table = EventTable::from_config(&config(json!({ "server": { "ip": "mc.test" } })));
        assert_eq!(table.actions(&BotEvent::GoalReached, false), [
            Action::NotifyAtPosition("Bot arrived at target location: ")
        ]);
        assert_eq!(table.actions(&BotEvent::Death, false), [
            Action::NotifyAtPosition("Bot died and respawned at ")
        ]);
    }

    #[test]
    fn unknown_movement_becomes_a_notice() {
        let table = EventTable::from_config(&config(json!({
            "server": { "ip": "mc.test" },
            "utils": { "anti-afk": { "enabled": true, "movement": "moonwalk" } }
        })));
        assert_eq!(table.actions(&BotEvent::Spawn, true), [
            Action::ReportConnected,
            Action::Notify("unknown anti-afk movement 'moonwalk'".into()),
        ]);
    }
}
