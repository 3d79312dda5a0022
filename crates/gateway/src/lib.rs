//! Gateway: WebSocket/HTTP server, admission, session registry and bot
//! lifecycle supervision.
//!
//! Lifecycle of a connection:
//! 1. `POST /api/auth/login` verifies credentials and issues a session key
//! 2. `/ws?session=<key>` passes the admission gate and registers a session
//! 3. Requests (`addBot`, `command`, `removeBot`, `status`) are dispatched
//!    through the method registry in `methods.rs`
//! 4. Bot events reach the owning session only, through the event relay
//! 5. Closing the socket stops the session's bot and every timer it owns

pub mod admission;
pub mod auth_routes;
pub mod error;
pub mod lifecycle;
pub mod methods;
pub mod registry;
pub mod relay;
pub mod request_throttle;
pub mod server;
pub mod state;
pub mod uptime;
pub mod ws;

pub use {
    error::{DenyReason, Error, Result},
    lifecycle::{BotHandle, BotSupervisor, LifecycleSettings},
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
