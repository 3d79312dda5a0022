//! Per-session elapsed-time ticker.

use std::{sync::Arc, time::Duration};

use {
    botherd_common::SessionKey,
    botherd_protocol::TIMER_TICK_MS,
    tokio::{task::JoinHandle, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::relay::EventRelay;

const TICK: Duration = Duration::from_millis(TIMER_TICK_MS);

/// A running ticker. Dropping it stops the task.
pub struct TimerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Publish whole seconds since `created_at` to the session every second.
///
/// The ticker is a child of `parent`, so tearing down the session (or the
/// whole gateway) stops it even if the handle is never dropped.
pub fn start(
    relay: Arc<EventRelay>,
    key: SessionKey,
    created_at: Instant,
    parent: &CancellationToken,
) -> TimerHandle {
    let cancel = parent.child_token();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(created_at + TICK, TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let elapsed = created_at.elapsed().as_secs();
                    if !relay.timer(&key, elapsed).await {
                        break;
                    }
                },
            }
        }
        debug!(session_key = %key, "uptime ticker stopped");
    });
    TimerHandle { cancel, task }
}
