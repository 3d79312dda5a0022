//! Per-address request limits.
//!
//! Login and API calls are counted as they arrive. WebSocket upgrades are
//! only counted when the admission gate refuses them: an address that keeps
//! reconnecting into a refusal gets 429s, while admitted sessions never touch
//! the limiter.

use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use {
    axum::{
        body::Body,
        extract::{ConnectInfo, State},
        http::{Method, Request, StatusCode, header::RETRY_AFTER},
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
    botherd_auth::resolve_client_ip,
    botherd_config::AdmissionConfig,
    dashmap::DashMap,
    tokio::time::Instant,
    tracing::debug,
};

use crate::server::AppState;

const WINDOW: Duration = Duration::from_secs(60);
/// Tracked addresses per limiter before expired windows are swept.
const SWEEP_ABOVE: usize = 4_096;

#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    hits: u32,
}

impl Window {
    fn opened_at(now: Instant) -> Self {
        Self {
            opened: now,
            hits: 0,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.opened) >= WINDOW
    }

    fn remaining(&self, now: Instant) -> Duration {
        WINDOW.saturating_sub(now.saturating_duration_since(self.opened))
    }
}

/// Fixed one-minute windows keyed by client address.
struct AddressLimiter {
    /// Hits allowed per window; 0 turns the limiter off.
    max: u32,
    windows: DashMap<IpAddr, Window>,
}

impl AddressLimiter {
    fn new(max: u32) -> Self {
        Self {
            max,
            windows: DashMap::new(),
        }
    }

    fn with_window<R>(&self, ip: IpAddr, now: Instant, f: impl FnOnce(&mut Window) -> R) -> R {
        let result = {
            let mut window = self.windows.entry(ip).or_insert(Window::opened_at(now));
            if window.expired(now) {
                *window = Window::opened_at(now);
            }
            f(&mut window)
        };
        if self.windows.len() > SWEEP_ABOVE {
            self.windows.retain(|_, w| !w.expired(now));
        }
        result
    }

    /// Count one hit for `ip`, or return how long it must wait.
    fn admit(&self, ip: IpAddr, now: Instant) -> Result<(), Duration> {
        if self.max == 0 {
            return Ok(());
        }
        self.with_window(ip, now, |window| {
            if window.hits >= self.max {
                return Err(window.remaining(now));
            }
            window.hits += 1;
            Ok(())
        })
    }

    /// Count a hit without checking the limit.
    fn record(&self, ip: IpAddr, now: Instant) {
        if self.max > 0 {
            self.with_window(ip, now, |window| window.hits = window.hits.saturating_add(1));
        }
    }

    /// How long `ip` must wait, without counting anything.
    fn blocked_for(&self, ip: IpAddr, now: Instant) -> Option<Duration> {
        if self.max == 0 {
            return None;
        }
        let window = self.windows.get(&ip)?;
        (!window.expired(now) && window.hits >= self.max).then(|| window.remaining(now))
    }

    fn tracked(&self) -> usize {
        self.windows.len()
    }
}

pub struct RequestThrottle {
    login: AddressLimiter,
    api: AddressLimiter,
    refused_connects: AddressLimiter,
}

impl RequestThrottle {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            login: AddressLimiter::new(config.login_attempts_per_minute),
            api: AddressLimiter::new(config.api_requests_per_minute),
            refused_connects: AddressLimiter::new(config.refused_connects_per_minute),
        }
    }

    /// Called by the WebSocket handler when the admission gate says no.
    pub fn record_refused_connect(&self, ip: IpAddr) {
        self.refused_connects.record(ip, Instant::now());
    }

    fn check(&self, method: &Method, path: &str, ip: IpAddr, now: Instant) -> Result<(), Duration> {
        if path == "/ws" {
            return self.refused_connects.blocked_for(ip, now).map_or(Ok(()), Err);
        }
        if path == "/api/auth/login" && *method == Method::POST {
            return self.login.admit(ip, now);
        }
        if path.starts_with("/api/") {
            return self.api.admit(ip, now);
        }
        Ok(())
    }
}

pub async fn throttle_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let gateway = &state.gateway;
    let ip = resolve_client_ip(request.headers(), addr, gateway.behind_proxy);
    let verdict = gateway
        .throttle
        .check(request.method(), request.uri().path(), ip, Instant::now());
    match verdict {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            debug!(
                remote_ip = %ip,
                path = request.uri().path(),
                wait_ms = wait.as_millis() as u64,
                "request throttled"
            );
            too_many_requests(wait)
        },
    }
}

fn too_many_requests(wait: Duration) -> Response {
    let secs = (wait.as_secs() + u64::from(wait.subsec_nanos() > 0)).max(1);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, secs.to_string())],
        Json(serde_json::json!({
            "success": false,
            "error": "too many requests",
            "retryAfter": secs,
        })),
    )
        .into_response()
}
