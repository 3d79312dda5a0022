//! Scripted chat lines sent after spawn.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    tokio::time::{Instant, MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::client::ProtocolClient;

/// Send `messages` as the bot.
///
/// Without `repeat` every line goes out once, in order, immediately. With
/// `repeat` one line is sent per period, cycling through the list and
/// wrapping at the end, until `cancel` fires. Each successful send bumps
/// `sent`.
pub async fn run(
    messages: Vec<String>,
    repeat: Option<Duration>,
    client: Arc<dyn ProtocolClient>,
    sent: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    if messages.is_empty() {
        return;
    }

    let Some(period) = repeat else {
        for line in &messages {
            if cancel.is_cancelled() {
                return;
            }
            send(client.as_ref(), line, &sent);
        }
        return;
    };

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for line in messages.iter().cycle() {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => send(client.as_ref(), line, &sent),
        }
    }
    debug!("chat schedule stopped");
}

fn send(client: &dyn ProtocolClient, line: &str, sent: &AtomicU64) {
    match client.chat(line) {
        Ok(()) => {
            sent.fetch_add(1, Ordering::Relaxed);
        },
        Err(e) => warn!(error = %e, "scheduled chat send failed"),
    }
}
