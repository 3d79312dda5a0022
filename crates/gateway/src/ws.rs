use std::{net::IpAddr, sync::Arc};

use {
    axum::extract::ws::{CloseFrame, Message, WebSocket, close_code},
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use {
    botherd_common::SessionKey,
    botherd_protocol::{
        ErrorShape, EventFrame, GatewayFrame, MAX_PAYLOAD_BYTES, ResponseFrame, error_codes,
        events,
    },
};

use crate::{
    error::DenyReason,
    methods::{MethodContext, MethodRegistry},
    registry::SessionEntry,
    state::GatewayState,
    uptime,
};

fn top_level_param_keys(params: &Option<serde_json::Value>) -> Vec<String> {
    params
        .as_ref()
        .and_then(serde_json::Value::as_object)
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default()
}

fn encode<T: serde::Serialize>(frame: &T) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            None
        },
    }
}

/// Tell the client why it was refused, then close with a policy violation.
async fn refuse(mut socket: WebSocket, reason: &str) {
    let frame = EventFrame::new(events::MESSAGE, serde_json::json!({ "text": reason }), 0);
    if let Some(json) = encode(&frame) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "connection refused".into(),
        })))
        .await;
}

/// Handle a single WebSocket connection through its full lifecycle:
/// admission → registration → message loop → cleanup.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    methods: Arc<MethodRegistry>,
    remote_ip: Option<IpAddr>,
    claimed: Option<SessionKey>,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();

    // ── Admission ────────────────────────────────────────────────────────

    let identity = match state.admission.admit(remote_ip, claimed.as_ref()).await {
        Ok(identity) => identity,
        Err(e) => {
            info!(
                conn_id = %conn_id,
                remote_ip = ?remote_ip,
                reason = %e,
                "ws: connection refused"
            );
            if let Some(ip) = remote_ip {
                state.throttle.record_refused_connect(ip);
            }
            refuse(socket, &e.to_string()).await;
            return;
        },
    };
    // The gate resolved an address before granting admission.
    let Ok(address) = state.admission.check_address(remote_ip) else {
        refuse(socket, &DenyReason::UnresolvableAddress.to_string()).await;
        return;
    };

    let key = identity.session_key.clone();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();
    let session_token = state.shutdown.child_token();
    let entry = SessionEntry::new(
        key.clone(),
        conn_id.clone(),
        address,
        identity.username.clone(),
        client_tx.clone(),
        session_token.clone(),
    );
    if let Err(reason) = state
        .registry
        .insert(entry, state.admission.max_sessions())
        .await
    {
        info!(conn_id = %conn_id, remote_ip = %address, reason = %reason, "ws: lost admission race");
        refuse(socket, &reason.to_string()).await;
        return;
    }
    info!(
        conn_id = %conn_id,
        remote_ip = %address,
        session_key = %key,
        username = %identity.username,
        "ws: new connection"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Spawn write loop: forwards frames from the session channel to the WebSocket.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    if let Some(created_at) = state.registry.created_at(&key).await {
        let timer = uptime::start(Arc::clone(&state.relay), key.clone(), created_at, &session_token);
        state.registry.set_timer(&key, timer).await;
    }

    // ── Message loop ─────────────────────────────────────────────────────

    loop {
        let msg = tokio::select! {
            () = session_token.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        let text = match msg {
            Some(Ok(Message::Text(t))) => t.as_str().to_string(),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        };

        // Enforce payload size limit.
        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(conn_id = %conn_id, size = text.len(), "ws: payload too large");
            state
                .relay
                .message(
                    &key,
                    format!("Request dropped: payload exceeds {MAX_PAYLOAD_BYTES} bytes"),
                )
                .await;
            continue;
        }

        let frame: GatewayFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "ws: invalid frame");
                let reply = ResponseFrame::err(
                    "",
                    ErrorShape::new(error_codes::INVALID_REQUEST, "invalid frame"),
                );
                if let Some(json) = encode(&reply) {
                    let _ = client_tx.send(json);
                }
                continue;
            },
        };

        match frame {
            GatewayFrame::Request(req) => {
                if state.ws_request_logs {
                    info!(
                        conn_id = %conn_id,
                        request_id = %req.id,
                        method = %req.method,
                        param_keys = ?top_level_param_keys(&req.params),
                        "ws: received request frame"
                    );
                }
                let ctx = MethodContext {
                    request_id: req.id.clone(),
                    method: req.method.clone(),
                    params: req.params.unwrap_or(serde_json::Value::Null),
                    session_key: key.clone(),
                    conn_id: conn_id.clone(),
                    state: Arc::clone(&state),
                };
                let response = methods.dispatch(ctx).await;
                if state.ws_request_logs {
                    info!(
                        conn_id = %conn_id,
                        request_id = %req.id,
                        method = %req.method,
                        ok = response.ok,
                        "ws: sent response frame"
                    );
                }
                if let Some(json) = encode(&response) {
                    let _ = client_tx.send(json);
                }
            },
            _ => {
                debug!(conn_id = %conn_id, "ws: ignoring non-request frame");
            },
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    state.supervisor.stop(&key).await;
    let duration = state
        .registry
        .created_at(&key)
        .await
        .map(|t| t.elapsed())
        .unwrap_or_default();
    state.registry.remove(&key).await;

    info!(
        conn_id = %conn_id,
        session_key = %key,
        duration_secs = duration.as_secs(),
        "ws: connection closed"
    );

    drop(client_tx);
    write_handle.abort();
}
