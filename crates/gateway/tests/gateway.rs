#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests over HTTP and WebSocket.

use std::{collections::VecDeque, net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio::net::{TcpListener, TcpStream},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{Message, client::IntoClientRequest},
    },
};

use {
    botherd_auth::{ConfigCredentialStore, hash_password},
    botherd_bots::loopback::LoopbackConnector,
    botherd_config::{BotherdConfig, UserEntry},
    botherd_gateway::{methods::MethodRegistry, server::build_gateway_app, state::GatewayState},
};

/// A client socket plus frames read ahead while waiting for a response.
struct Ws {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pending: VecDeque<Value>,
}

const CLIENT_IP: &str = "203.0.113.5";

/// Spin up a test gateway on an ephemeral port, return the bound address.
async fn start_test_server() -> (SocketAddr, Arc<GatewayState>) {
    start_test_server_with(|_| {}).await
}

async fn start_test_server_with(
    tweak: impl FnOnce(&mut BotherdConfig),
) -> (SocketAddr, Arc<GatewayState>) {
    let mut config = BotherdConfig::default();
    config.server.behind_proxy = true;
    config.auth.users = ["alice", "bob"]
        .into_iter()
        .map(|username| UserEntry {
            username: username.into(),
            password_hash: hash_password("secret").unwrap(),
        })
        .collect();
    tweak(&mut config);

    let verifier = Arc::new(ConfigCredentialStore::from_config(&config.auth));
    let state = GatewayState::new(&config, verifier, Arc::new(LoopbackConnector::new()));
    let app = build_gateway_app(Arc::clone(&state), Arc::new(MethodRegistry::new()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, state)
}

async fn login(addr: SocketAddr, username: &str, password: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/api/auth/login"))
        .header("x-forwarded-for", CLIENT_IP)
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap()
}

async fn session_key(addr: SocketAddr, username: &str) -> String {
    let body: Value = login(addr, username, "secret").await.json().await.unwrap();
    body["sessionKey"].as_str().unwrap().to_string()
}

async fn connect(addr: SocketAddr, ip: &str, session: Option<&str>) -> Ws {
    let url = match session {
        Some(key) => format!("ws://{addr}/ws?session={key}"),
        None => format!("ws://{addr}/ws"),
    };
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-forwarded-for", ip.parse().unwrap());
    open(request).await
}

async fn open(request: tokio_tungstenite::tungstenite::handshake::client::Request) -> Ws {
    let (stream, _) = connect_async(request).await.unwrap();
    Ws {
        stream,
        pending: VecDeque::new(),
    }
}

/// Next JSON text frame, skipping `timer` ticks. `None` once the server closes.
async fn next_frame(ws: &mut Ws) -> Option<Value> {
    if let Some(frame) = ws.pending.pop_front() {
        return Some(frame);
    }
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.stream.next())
            .await
            .expect("timed out waiting for a frame")?;
        match msg {
            Ok(Message::Text(text)) => {
                let frame: Value = serde_json::from_str(&text).unwrap();
                if frame["event"] == "timer" {
                    continue;
                }
                return Some(frame);
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn expect_message(ws: &mut Ws, text: &str) {
    loop {
        let frame = next_frame(ws)
            .await
            .unwrap_or_else(|| panic!("closed before message {text:?}"));
        if frame["event"] == "message" && frame["payload"]["text"] == text {
            return;
        }
    }
}

/// Send a request and return its response frame. Events that arrive first
/// stay queued for [`next_frame`].
async fn call(ws: &mut Ws, id: &str, method: &str, params: Value) -> Value {
    let frame = json!({ "type": "req", "id": id, "method": method, "params": params });
    ws.stream
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
    let mut skipped = Vec::new();
    let response = loop {
        let frame = next_frame(ws).await.expect("closed before response");
        if frame["type"] == "res" && frame["id"] == id {
            break frame;
        }
        skipped.push(frame);
    };
    ws.pending.extend(skipped);
    response
}

/// Assert the server refuses with `text` and then closes the socket.
async fn expect_refusal(mut ws: Ws, text: &str) {
    let frame = next_frame(&mut ws).await.expect("expected a refusal message");
    assert_eq!(frame["event"], "message");
    assert_eq!(frame["payload"]["text"], text);
    assert!(next_frame(&mut ws).await.is_none());
}

async fn health(addr: SocketAddr) -> Value {
    reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

fn scenario_bot() -> Value {
    json!({
        "server": { "ip": "play.example.com", "port": 25565, "version": "1.20.1" },
        "bot-account": {},
        "utils": {
            "auto-auth": { "enabled": false },
            "chat-messages": { "enabled": false },
            "anti-afk": { "enabled": false }
        },
        "position": { "enabled": false }
    })
}

#[tokio::test]
async fn health_endpoint_returns_json() {
    let (addr, _) = start_test_server().await;
    let body = health(addr).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
    assert_eq!(body["bots"], 0);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let (addr, _) = start_test_server().await;
    let resp = login(addr, "alice", "wrong").await;
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);

    let resp = login(addr, "mallory", "secret").await;
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn login_issues_session_key_and_cookie() {
    let (addr, _) = start_test_server().await;
    let resp = login(addr, "alice", "secret").await;
    assert_eq!(resp.status(), 200);
    let cookie = resp
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    let key = body["sessionKey"].as_str().unwrap();
    assert!(cookie.starts_with(&format!("botherd_session={key};")));
}

#[tokio::test]
async fn add_and_remove_bot_end_to_end() {
    let (addr, state) = start_test_server().await;
    let key = session_key(addr, "alice").await;
    let mut ws = connect(addr, CLIENT_IP, Some(&key)).await;

    let res = call(&mut ws, "1", "addBot", scenario_bot()).await;
    assert_eq!(res["ok"], true, "{res}");
    expect_message(&mut ws, "Bot started: Bot on play.example.com:25565").await;
    assert_eq!(state.registry.bot_count().await, 1);

    let res = call(&mut ws, "2", "status", Value::Null).await;
    assert_eq!(res["payload"]["bot"]["server"], "play.example.com:25565");

    let res = call(&mut ws, "3", "removeBot", Value::Null).await;
    assert_eq!(res["payload"]["removed"], true);
    expect_message(&mut ws, "Bot stopped").await;
    assert_eq!(state.registry.bot_count().await, 0);
    state.registry.check_consistency().await.unwrap();
}

#[tokio::test]
async fn second_add_bot_is_rejected() {
    let (addr, _) = start_test_server().await;
    let key = session_key(addr, "alice").await;
    let mut ws = connect(addr, CLIENT_IP, Some(&key)).await;

    assert_eq!(call(&mut ws, "1", "addBot", scenario_bot()).await["ok"], true);
    let res = call(&mut ws, "2", "addBot", scenario_bot()).await;
    assert_eq!(res["ok"], false);
    assert_eq!(res["error"]["code"], "DUPLICATE_START");
}

#[tokio::test]
async fn command_without_bot_reports_no_bot() {
    let (addr, _) = start_test_server().await;
    let key = session_key(addr, "alice").await;
    let mut ws = connect(addr, CLIENT_IP, Some(&key)).await;

    let res = call(&mut ws, "1", "command", json!({ "command": "/help" })).await;
    assert_eq!(res["ok"], false);
    assert_eq!(res["error"]["code"], "NO_BOT");
}

#[tokio::test]
async fn unknown_method_is_rejected() {
    let (addr, _) = start_test_server().await;
    let key = session_key(addr, "alice").await;
    let mut ws = connect(addr, CLIENT_IP, Some(&key)).await;

    let res = call(&mut ws, "1", "teleport", Value::Null).await;
    assert_eq!(res["error"]["code"], "UNKNOWN_METHOD");
}

#[tokio::test]
async fn second_connection_from_same_address_is_refused() {
    let (addr, state) = start_test_server().await;
    let alice = session_key(addr, "alice").await;
    let bob = session_key(addr, "bob").await;

    let mut first = connect(addr, CLIENT_IP, Some(&alice)).await;
    // Make sure the first session is registered before racing it.
    call(&mut first, "1", "status", Value::Null).await;

    let second = connect(addr, CLIENT_IP, Some(&bob)).await;
    expect_refusal(
        second,
        "Connection refused: a session is already active from your address",
    )
    .await;
    assert_eq!(state.registry.len().await, 1);
}

#[tokio::test]
async fn unauthenticated_connection_is_refused() {
    let (addr, state) = start_test_server().await;
    let ws = connect(addr, "198.51.100.7", None).await;
    expect_refusal(ws, "Connection refused: please log in first").await;

    let ws = connect(addr, "198.51.100.7", Some("forged")).await;
    expect_refusal(ws, "Connection refused: session expired, please log in again").await;
    assert!(state.registry.is_empty().await);
}

#[tokio::test]
async fn private_address_is_refused() {
    let (addr, _) = start_test_server().await;
    let key = session_key(addr, "alice").await;
    let ws = connect(addr, "10.0.0.5", Some(&key)).await;
    expect_refusal(
        ws,
        "Connection refused: proxy, VPN and private network addresses are not allowed",
    )
    .await;
}

#[tokio::test]
async fn session_cookie_is_accepted() {
    let (addr, _) = start_test_server().await;
    let key = session_key(addr, "alice").await;

    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    let headers = request.headers_mut();
    headers.insert("x-forwarded-for", CLIENT_IP.parse().unwrap());
    headers.insert("cookie", format!("botherd_session={key}").parse().unwrap());
    let mut ws = open(request).await;

    let res = call(&mut ws, "1", "status", Value::Null).await;
    assert_eq!(res["ok"], true);
    assert!(res["payload"]["bot"].is_null());
}

#[tokio::test]
async fn logout_revokes_the_session_key() {
    let (addr, _) = start_test_server().await;
    let key = session_key(addr, "alice").await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/api/auth/logout"))
        .json(&json!({ "sessionKey": key }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);

    let ws = connect(addr, CLIENT_IP, Some(&key)).await;
    expect_refusal(ws, "Connection refused: session expired, please log in again").await;
}

#[tokio::test]
async fn disconnect_releases_session_and_bot() {
    let (addr, state) = start_test_server().await;
    let key = session_key(addr, "alice").await;
    let mut ws = connect(addr, CLIENT_IP, Some(&key)).await;
    assert_eq!(call(&mut ws, "1", "addBot", scenario_bot()).await["ok"], true);

    ws.stream.close(None).await.unwrap();
    drop(ws);

    for _ in 0..50 {
        if state.registry.is_empty().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(state.registry.is_empty().await);
    assert_eq!(state.registry.bot_count().await, 0);

    // The address is free again.
    let mut ws = connect(addr, CLIENT_IP, Some(&key)).await;
    assert_eq!(call(&mut ws, "1", "status", Value::Null).await["ok"], true);
}

#[tokio::test]
async fn versions_endpoint_lists_supported_versions() {
    let (addr, state) = start_test_server().await;
    let body: Value = reqwest::get(format!("http://{addr}/api/versions"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body["versions"].as_array().unwrap().len(),
        state.supported_versions.len()
    );
}

#[tokio::test]
async fn oversized_payload_is_reported_and_dropped() {
    let (addr, _) = start_test_server().await;
    let key = session_key(addr, "alice").await;
    let mut ws = connect(addr, CLIENT_IP, Some(&key)).await;

    let padding = "x".repeat(botherd_protocol::MAX_PAYLOAD_BYTES);
    let frame = json!({ "type": "req", "id": "1", "method": "status", "params": { "pad": padding } });
    ws.stream
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
    let notice = next_frame(&mut ws).await.unwrap();
    assert_eq!(notice["event"], "message");
    assert_eq!(
        notice["payload"]["text"],
        format!(
            "Request dropped: payload exceeds {} bytes",
            botherd_protocol::MAX_PAYLOAD_BYTES
        )
    );

    // The session stays usable.
    assert_eq!(call(&mut ws, "2", "status", Value::Null).await["ok"], true);
}

#[tokio::test]
async fn repeated_refusals_throttle_the_upgrade() {
    let (addr, _) =
        start_test_server_with(|config| config.admission.refused_connects_per_minute = 2).await;
    for _ in 0..2 {
        let ws = connect(addr, "198.51.100.7", None).await;
        expect_refusal(ws, "Connection refused: please log in first").await;
    }

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/ws"))
        .header("x-forwarded-for", "198.51.100.7")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    assert!(resp.headers().contains_key("retry-after"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);

    // Other addresses still reach the admission gate.
    let ws = connect(addr, "198.51.100.8", None).await;
    expect_refusal(ws, "Connection refused: please log in first").await;
}

#[tokio::test]
async fn login_attempts_are_throttled() {
    let (addr, _) =
        start_test_server_with(|config| config.admission.login_attempts_per_minute = 2).await;
    assert_eq!(login(addr, "alice", "wrong").await.status(), 401);
    assert_eq!(login(addr, "alice", "wrong").await.status(), 401);
    assert_eq!(login(addr, "alice", "secret").await.status(), 429);
}
