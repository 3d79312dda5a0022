use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Json,
        extract::{ConnectInfo, State},
        http::{HeaderMap, StatusCode, header::SET_COOKIE},
        response::{IntoResponse, Response},
        routing::post,
    },
    axum_extra::extract::CookieJar,
    botherd_auth::resolve_client_ip,
    botherd_common::SessionKey,
    botherd_protocol::SESSION_COOKIE,
    secrecy::Secret,
    serde::Deserialize,
    tracing::{info, warn},
};

use crate::state::GatewayState;

/// Build the auth router with all `/api/auth/*` routes.
pub fn auth_router() -> axum::Router<Arc<GatewayState>> {
    axum::Router::new()
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
}

// ── Login ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: Secret<String>,
}

async fn login_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Response {
    let address = resolve_client_ip(&headers, addr, state.behind_proxy);
    match state.verifier.verify(&body.username, &body.password).await {
        Ok(true) => {
            let identity = state.identities.issue(&body.username, address).await;
            session_response(&identity.session_key)
        },
        Ok(false) => {
            info!(username = %body.username, remote_ip = %address, "login rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "success": false, "error": "invalid credentials" })),
            )
                .into_response()
        },
        Err(e) => {
            warn!(username = %body.username, error = %e, "credential check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "error": "auth error" })),
            )
                .into_response()
        },
    }
}

// ── Logout ───────────────────────────────────────────────────────────────────

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest {
    session_key: Option<String>,
}

async fn logout_handler(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
    body: Option<Json<LogoutRequest>>,
) -> Response {
    let key = body
        .and_then(|Json(b)| b.session_key)
        .or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_string()))
        .map(SessionKey::new);

    let success = match key {
        Some(key) => {
            let known = state.identities.revoke(&key).await;
            // A live session for a revoked identity is torn down with it.
            if state.registry.contains(&key).await {
                state.supervisor.stop(&key).await;
                state.registry.remove(&key).await;
            }
            known
        },
        None => false,
    };
    clear_session_response(success)
}

fn session_response(key: &SessionKey) -> Response {
    let cookie = format!("{SESSION_COOKIE}={key}; HttpOnly; SameSite=Strict; Path=/");
    (
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(serde_json::json!({ "success": true, "sessionKey": key.as_str() })),
    )
        .into_response()
}

fn clear_session_response(success: bool) -> Response {
    let cookie = format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0");
    (
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(serde_json::json!({ "success": success })),
    )
        .into_response()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn cookie_of(response: &Response) -> String {
        response
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn session_cookie_is_http_only() {
        let response = session_response(&SessionKey::from("abc"));
        let cookie = cookie_of(&response);
        assert!(cookie.starts_with("botherd_session=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
    }

    #[test]
    fn logout_expires_cookie() {
        let cookie = cookie_of(&clear_session_response(true));
        assert!(cookie.starts_with("botherd_session=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
