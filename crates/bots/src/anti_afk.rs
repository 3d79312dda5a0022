//! Movement patterns that keep a bot from being kicked for idling.

use std::{f32::consts::PI, str::FromStr, sync::Arc, time::Duration};

use {rand::Rng, tokio_util::sync::CancellationToken, tracing::debug};

use crate::{
    client::{Control, ProtocolClient},
    error::Error,
};

const WALK_LOOK_PERIOD: Duration = Duration::from_secs(2);
const CIRCLE_TURN_PERIOD: Duration = Duration::from_millis(100);
const CIRCLE_TURN_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    /// Hold jump.
    Jump,
    /// Walk forward, looking somewhere random every couple of seconds.
    Walk,
    /// Hold sneak.
    Sneak,
    /// Walk forward while turning steadily.
    Circle,
}

impl FromStr for Movement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jump" => Ok(Self::Jump),
            "walk" => Ok(Self::Walk),
            "sneak" => Ok(Self::Sneak),
            "circle" => Ok(Self::Circle),
            other => Err(Error::UnknownMovement(other.to_string())),
        }
    }
}

impl std::fmt::Display for Movement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Jump => "jump",
            Self::Walk => "walk",
            Self::Sneak => "sneak",
            Self::Circle => "circle",
        };
        f.write_str(name)
    }
}

/// Drive `movement` until `cancel` fires, then release every control.
pub async fn run(movement: Movement, client: Arc<dyn ProtocolClient>, cancel: CancellationToken) {
    debug!(%movement, "anti-afk started");
    match movement {
        Movement::Jump => hold(client.as_ref(), Control::Jump, &cancel).await,
        Movement::Sneak => hold(client.as_ref(), Control::Sneak, &cancel).await,
        Movement::Walk => walk(client.as_ref(), &cancel).await,
        Movement::Circle => circle(client.as_ref(), &cancel).await,
    }
    for control in Control::ALL {
        client.set_control_state(control, false);
    }
    debug!(%movement, "anti-afk stopped");
}

async fn hold(client: &dyn ProtocolClient, control: Control, cancel: &CancellationToken) {
    client.set_control_state(control, true);
    cancel.cancelled().await;
}

async fn walk(client: &dyn ProtocolClient, cancel: &CancellationToken) {
    client.set_control_state(Control::Forward, true);
    let mut ticker = tokio::time::interval(WALK_LOOK_PERIOD);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let (yaw, pitch) = random_look();
                client.look(yaw, pitch);
            },
        }
    }
}

async fn circle(client: &dyn ProtocolClient, cancel: &CancellationToken) {
    client.set_control_state(Control::Forward, true);
    let mut ticker = tokio::time::interval(CIRCLE_TURN_PERIOD);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let yaw = (client.yaw() + CIRCLE_TURN_STEP) % (2.0 * PI);
                client.look(yaw, 0.0);
            },
        }
    }
}

fn random_look() -> (f32, f32) {
    let mut rng = rand::rng();
    (rng.random_range(-PI..PI), rng.random_range(-PI / 4.0..PI / 4.0))
}
