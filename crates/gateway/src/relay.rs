//! Per-session event delivery and the reverse command path.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    botherd_common::{Position, SessionKey},
    botherd_protocol::{
        BotStatusPayload, ChatPayload, EventFrame, MessagePayload, TimerPayload, events,
    },
    serde::Serialize,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    registry::SessionRegistry,
};

pub struct EventRelay {
    registry: Arc<SessionRegistry>,
    seq: AtomicU64,
}

impl EventRelay {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            seq: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Deliver one event to the owning session only. Returns `false` when the
    /// session is gone or its socket has closed.
    pub async fn publish(
        &self,
        key: &SessionKey,
        event: &str,
        payload: impl Serialize,
    ) -> bool {
        let Some(sender) = self.registry.sender(key).await else {
            debug!(session_key = %key, event, "dropping event for unknown session");
            return false;
        };
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(session_key = %key, event, error = %e, "failed to serialize event payload");
                return false;
            },
        };
        let frame = EventFrame::new(event, payload, self.next_seq());
        match serde_json::to_string(&frame) {
            Ok(json) => sender.send(json).is_ok(),
            Err(e) => {
                warn!(session_key = %key, event, error = %e, "failed to serialize event frame");
                false
            },
        }
    }

    pub async fn message(&self, key: &SessionKey, text: impl Into<String>) -> bool {
        self.publish(key, events::MESSAGE, MessagePayload { text: text.into() })
            .await
    }

    pub async fn chat(&self, key: &SessionKey, text: impl Into<String>) -> bool {
        self.publish(key, events::CHAT, ChatPayload { text: text.into() })
            .await
    }

    pub async fn status(
        &self,
        key: &SessionKey,
        connected: bool,
        position: Option<Position>,
    ) -> bool {
        self.publish(key, events::BOT_STATUS, BotStatusPayload {
            connected,
            position,
        })
        .await
    }

    pub async fn timer(&self, key: &SessionKey, elapsed: u64) -> bool {
        self.publish(key, events::TIMER, TimerPayload { elapsed }).await
    }

    /// Send a raw chat line or command as the session's bot.
    pub async fn forward(&self, key: &SessionKey, command: &str) -> Result<()> {
        let Some(handle) = self.registry.bot(key).await else {
            self.message(key, Error::NoBot.to_string()).await;
            return Err(Error::NoBot);
        };
        handle.client.chat(command)?;
        handle.messages_sent.fetch_add(1, Ordering::Relaxed);
        debug!(session_key = %key, bot_id = handle.id, "forwarded command");
        Ok(())
    }
}
