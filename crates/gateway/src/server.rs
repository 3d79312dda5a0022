use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{ConnectInfo, Query, State, WebSocketUpgrade},
        http::HeaderMap,
        response::{IntoResponse, Json},
        routing::get,
    },
    axum_extra::extract::CookieJar,
    serde::Deserialize,
    tower_http::cors::{Any, CorsLayer},
    tracing::{info, warn},
};

use {
    botherd_auth::{CredentialVerifier, has_proxy_headers, resolve_admission_ip},
    botherd_bots::BotConnector,
    botherd_common::SessionKey,
    botherd_config::BotherdConfig,
    botherd_protocol::{PROTOCOL_VERSION, SESSION_COOKIE},
};

use crate::{
    auth_routes::auth_router, methods::MethodRegistry, state::GatewayState,
    ws::handle_connection,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
    pub methods: Arc<MethodRegistry>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>, methods: Arc<MethodRegistry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app_state = AppState {
        gateway: Arc::clone(&state),
        methods,
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route("/api/versions", get(versions_handler))
        .nest("/api/auth", auth_router().with_state(state))
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            crate::request_throttle::throttle_gate,
        ))
        .layer(cors)
        .with_state(app_state)
}

/// Start the gateway HTTP + WebSocket server and run until Ctrl-C.
pub async fn start_gateway(
    config: BotherdConfig,
    verifier: Arc<dyn CredentialVerifier>,
    connector: Arc<dyn BotConnector>,
) -> anyhow::Result<()> {
    let state = GatewayState::new(&config, verifier, connector);
    let methods = Arc::new(MethodRegistry::new());
    let app = build_gateway_app(Arc::clone(&state), methods);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let mut lines = vec![
        format!("botherd gateway v{}", state.version),
        format!("listening on http://{}", listener.local_addr()?),
        format!("{} panel user(s) configured", config.auth.users.len()),
        format!(
            "supported versions: {}",
            if state.supported_versions.is_empty() {
                "any".to_string()
            } else {
                state.supported_versions.join(", ")
            }
        ),
    ];
    if config.server.behind_proxy {
        lines.push("trusting X-Forwarded-For for client addresses".into());
    }
    if !config.admission.block_private_addresses {
        lines.push("⚠ private address blocking disabled".into());
    }
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let shutdown = state.shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutting down, closing all sessions");
        shutdown.cancel();
    })
    .await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gw = &state.gateway;
    Json(serde_json::json!({
        "status": "ok",
        "version": gw.version,
        "protocol": PROTOCOL_VERSION,
        "sessions": gw.registry.len().await,
        "bots": gw.registry.bot_count().await,
    }))
}

async fn versions_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "versions": state.gateway.supported_versions }))
}

/// `?session=<key>`; the cookie is the fallback.
#[derive(Deserialize)]
struct WsQuery {
    session: Option<String>,
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    jar: CookieJar,
    headers: HeaderMap,
) -> impl IntoResponse {
    let behind_proxy = state.gateway.behind_proxy;
    if !behind_proxy && has_proxy_headers(&headers) {
        warn!(
            remote_ip = %addr.ip(),
            "forwarding headers present but behind_proxy is off; using socket address"
        );
    }
    let remote_ip = resolve_admission_ip(&headers, addr, behind_proxy);
    let claimed = query
        .session
        .filter(|s| !s.is_empty())
        .or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_string()))
        .map(SessionKey::new);

    ws.on_upgrade(move |socket| {
        handle_connection(socket, state.gateway, state.methods, remote_ip, claimed)
    })
}
