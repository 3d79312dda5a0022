use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use tracing::{debug, warn};

use {
    botherd_bots::BotConfig,
    botherd_common::SessionKey,
    botherd_protocol::{CommandParams, ErrorShape, ResponseFrame, error_codes, methods},
};

use crate::state::GatewayState;

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every method handler.
pub struct MethodContext {
    pub request_id: String,
    pub method: String,
    pub params: serde_json::Value,
    pub session_key: SessionKey,
    pub conn_id: String,
    pub state: Arc<GatewayState>,
}

/// The result a method handler produces.
pub type MethodResult = Result<serde_json::Value, ErrorShape>;

/// A boxed async method handler.
pub type HandlerFn =
    Box<dyn Fn(MethodContext) -> Pin<Box<dyn Future<Output = MethodResult> + Send>> + Send + Sync>;

fn invalid_params(e: serde_json::Error) -> ErrorShape {
    ErrorShape::new(error_codes::INVALID_REQUEST, format!("invalid params: {e}"))
}

// ── Registry ─────────────────────────────────────────────────────────────────

pub struct MethodRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            handlers: HashMap::new(),
        };
        reg.register_bot_methods();
        reg
    }

    pub fn register(&mut self, method: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(method.into(), handler);
    }

    pub async fn dispatch(&self, ctx: MethodContext) -> ResponseFrame {
        let method = ctx.method.clone();
        let request_id = ctx.request_id.clone();
        let conn_id = ctx.conn_id.clone();

        let Some(handler) = self.handlers.get(&method) else {
            warn!(method, conn_id = %conn_id, "unknown method");
            return ResponseFrame::err(
                &request_id,
                ErrorShape::new(
                    error_codes::UNKNOWN_METHOD,
                    format!("unknown method: {method}"),
                ),
            );
        };

        debug!(method, request_id = %request_id, conn_id = %conn_id, "dispatching method");
        match handler(ctx).await {
            Ok(payload) => {
                debug!(method, request_id = %request_id, "method ok");
                ResponseFrame::ok(&request_id, payload)
            },
            Err(err) => {
                warn!(method, request_id = %request_id, code = %err.code, msg = %err.message, "method error");
                ResponseFrame::err(&request_id, err)
            },
        }
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn register_bot_methods(&mut self) {
        self.register(
            methods::ADD_BOT,
            Box::new(|ctx| {
                Box::pin(async move {
                    let config: BotConfig =
                        serde_json::from_value(ctx.params).map_err(invalid_params)?;
                    let handle = ctx
                        .state
                        .supervisor
                        .start(&ctx.session_key, config)
                        .await
                        .map_err(|e| e.to_error_shape())?;
                    Ok(handle.snapshot())
                })
            }),
        );

        self.register(
            methods::COMMAND,
            Box::new(|ctx| {
                Box::pin(async move {
                    let command = serde_json::from_value::<CommandParams>(ctx.params)
                        .map_err(invalid_params)?
                        .into_command();
                    if command.trim().is_empty() {
                        return Err(ErrorShape::new(
                            error_codes::INVALID_REQUEST,
                            "command must not be empty",
                        ));
                    }
                    ctx.state
                        .relay
                        .forward(&ctx.session_key, &command)
                        .await
                        .map_err(|e| e.to_error_shape())?;
                    Ok(serde_json::json!({ "sent": true }))
                })
            }),
        );

        self.register(
            methods::REMOVE_BOT,
            Box::new(|ctx| {
                Box::pin(async move {
                    let removed = ctx.state.supervisor.stop(&ctx.session_key).await;
                    Ok(serde_json::json!({ "removed": removed }))
                })
            }),
        );

        self.register(
            methods::STATUS,
            Box::new(|ctx| {
                Box::pin(async move {
                    let state = &ctx.state;
                    let elapsed = state
                        .registry
                        .created_at(&ctx.session_key)
                        .await
                        .map(|t| t.elapsed().as_secs())
                        .unwrap_or_default();
                    let bot = state
                        .registry
                        .bot(&ctx.session_key)
                        .await
                        .map(|h| h.snapshot());
                    Ok(serde_json::json!({
                        "elapsed": elapsed,
                        "bot": bot,
                        "supportedVersions": state.supported_versions,
                    }))
                })
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_protocol_method() {
        let registry = MethodRegistry::new();
        let mut expected: Vec<String> = methods::ALL.iter().map(|m| (*m).to_string()).collect();
        expected.sort();
        assert_eq!(registry.method_names(), expected);
    }
}
