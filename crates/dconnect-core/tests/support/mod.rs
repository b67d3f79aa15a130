//! In-process fake Device Connect Manager for end-to-end tests.
//!
//! Serves the REST endpoints the client uses plus `/gotapi/websocket`, logs
//! every call in arrival order, and lets a test script failures (grant
//! refusal, handshake rejection, expired-token answers) ahead of time.

#![allow(clippy::unwrap_used, dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, RawQuery, State};
use axum::http::Method;
use axum::response::Response;
use axum::routing::{any, get};
use axum::{Json, Router};
use dconnect_core::{ClientConfig, ConnectOptions, HostConfig, ScopeSet};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};

// ── Scripted behaviour ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum GrantMode {
    Ok,
    /// errorCode 2: local authorization disabled.
    LocalOAuthDisabled,
    Fail(i32),
}

#[derive(Debug, Clone)]
pub struct Behavior {
    pub grant: GrantMode,
    /// errorCodes answered by successive `accessToken` calls.
    pub token_errors: VecDeque<i32>,
    /// errorCodes answered by successive handshakes before one succeeds.
    pub handshake_errors: VecDeque<i32>,
    /// errorCodes answered by successive `serviceDiscovery` calls.
    pub discovery_errors: VecDeque<i32>,
    /// errorCodes answered by successive generic profile calls.
    pub profile_errors: VecDeque<i32>,
    pub services: Vec<Value>,
    /// Hold the handshake ack back this long.
    pub ack_delay: Option<Duration>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            grant: GrantMode::Ok,
            token_errors: VecDeque::new(),
            handshake_errors: VecDeque::new(),
            discovery_errors: VecDeque::new(),
            profile_errors: VecDeque::new(),
            services: vec![
                json!({ "id": "host.deviceconnect.org", "name": "Host", "online": true, "scopes": ["battery"] }),
                json!({ "id": "theta.deviceconnect.org", "name": "THETA V", "online": true }),
            ],
            ack_delay: None,
        }
    }
}

/// One request the manager saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: String,
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl Call {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub struct ManagerState {
    pub behavior: Mutex<Behavior>,
    calls: Mutex<Vec<Call>>,
    tokens_issued: AtomicUsize,
    open_sockets: AtomicUsize,
    acked_sockets: AtomicUsize,
    events: broadcast::Sender<String>,
    kick: broadcast::Sender<()>,
}

impl ManagerState {
    fn record(&self, method: &str, path: &str, params: Vec<(String, String)>) {
        self.calls.lock().push(Call {
            method: method.to_owned(),
            path: path.to_owned(),
            params,
        });
    }
}

// ── FakeManager ─────────────────────────────────────────────────────

/// Shuts down when dropped.
pub struct FakeManager {
    pub addr: SocketAddr,
    pub state: Arc<ManagerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl FakeManager {
    pub async fn start() -> Self {
        Self::start_with(Behavior::default()).await
    }

    pub async fn start_with(behavior: Behavior) -> Self {
        let state = Arc::new(ManagerState {
            behavior: Mutex::new(behavior),
            calls: Mutex::new(Vec::new()),
            tokens_issued: AtomicUsize::new(0),
            open_sockets: AtomicUsize::new(0),
            acked_sockets: AtomicUsize::new(0),
            events: broadcast::channel(64).0,
            kick: broadcast::channel(4).0,
        });

        let router = Router::new()
            .route("/gotapi/availability", get(availability))
            .route("/gotapi/authorization/grant", get(grant))
            .route("/gotapi/authorization/accessToken", get(access_token))
            .route("/gotapi/serviceDiscovery", get(service_discovery))
            .route("/gotapi/websocket", get(websocket))
            .route("/gotapi/{*rest}", any(profile))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn host(&self) -> HostConfig {
        HostConfig::new(self.addr.ip().to_string()).with_port(self.addr.port())
    }

    pub fn host_name(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::new(self.host_name(), scopes()).with_port(self.addr.port())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().clone()
    }

    /// Paths of every call, in arrival order.
    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.path).collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls().iter().filter(|c| c.path == path).count()
    }

    pub fn open_sockets(&self) -> usize {
        self.state.open_sockets.load(Ordering::SeqCst)
    }

    /// Sockets that were sent a successful ack, open or not.
    pub fn acked_sockets(&self) -> usize {
        self.state.acked_sockets.load(Ordering::SeqCst)
    }

    pub fn behave(&self, f: impl FnOnce(&mut Behavior)) {
        f(&mut self.state.behavior.lock());
    }

    /// Push an event frame to every established socket.
    pub fn push_event(&self, event: &Value) {
        let _ = self.state.events.send(event.to_string());
    }

    /// Close every established socket from the server side.
    pub fn drop_sockets(&self) {
        let _ = self.state.kick.send(());
    }
}

impl Drop for FakeManager {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ── Helpers for tests ───────────────────────────────────────────────

pub fn scopes() -> ScopeSet {
    ["serviceDiscovery", "battery", "deviceOrientation"]
        .into_iter()
        .collect()
}

/// Deterministic config: no background monitor, bounded handshake wait.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        application_name: "dconnect-tests".into(),
        handshake_timeout: Some(Duration::from_secs(5)),
        monitor_interval: None,
        timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ── Handlers ────────────────────────────────────────────────────────

fn parse_params(raw: Option<&str>) -> Vec<(String, String)> {
    raw.map(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .into_owned()
            .collect()
    })
    .unwrap_or_default()
}

fn error(code: i32) -> Json<Value> {
    Json(json!({ "result": 1, "errorCode": code, "errorMessage": format!("error {code}") }))
}

async fn availability(
    State(state): State<Arc<ManagerState>>,
    RawQuery(query): RawQuery,
) -> Json<Value> {
    state.record("GET", "/gotapi/availability", parse_params(query.as_deref()));
    Json(json!({ "result": 0, "version": "2.2.0", "name": "fake-manager" }))
}

async fn grant(State(state): State<Arc<ManagerState>>) -> Json<Value> {
    state.record("GET", "/gotapi/authorization/grant", Vec::new());
    let mode = state.behavior.lock().grant.clone();
    match mode {
        GrantMode::Ok => Json(json!({ "result": 0, "clientId": "client-1" })),
        GrantMode::LocalOAuthDisabled => error(2),
        GrantMode::Fail(code) => error(code),
    }
}

async fn access_token(
    State(state): State<Arc<ManagerState>>,
    RawQuery(query): RawQuery,
) -> Json<Value> {
    state.record(
        "GET",
        "/gotapi/authorization/accessToken",
        parse_params(query.as_deref()),
    );
    if let Some(code) = state.behavior.lock().token_errors.pop_front() {
        return error(code);
    }
    let n = state.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "result": 0, "accessToken": format!("token-{n}"), "expire": 3600 }))
}

async fn service_discovery(
    State(state): State<Arc<ManagerState>>,
    RawQuery(query): RawQuery,
) -> Json<Value> {
    state.record("GET", "/gotapi/serviceDiscovery", parse_params(query.as_deref()));
    let mut behavior = state.behavior.lock();
    if let Some(code) = behavior.discovery_errors.pop_front() {
        return error(code);
    }
    Json(json!({ "result": 0, "services": behavior.services }))
}

async fn profile(
    State(state): State<Arc<ManagerState>>,
    method: Method,
    Path(rest): Path<String>,
    RawQuery(query): RawQuery,
    body: String,
) -> Json<Value> {
    let raw = if body.is_empty() { query } else { Some(body) };
    let params = parse_params(raw.as_deref());
    let path = format!("/gotapi/{rest}");
    state.record(method.as_str(), &path, params.clone());

    if let Some(code) = state.behavior.lock().profile_errors.pop_front() {
        return error(code);
    }
    let params: serde_json::Map<String, Value> =
        params.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
    Json(json!({ "result": 0, "path": path, "params": params }))
}

async fn websocket(ws: WebSocketUpgrade, State(state): State<Arc<ManagerState>>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: Arc<ManagerState>) {
    let token = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                break serde_json::from_str::<Value>(text.as_str())
                    .ok()
                    .and_then(|v| v["accessToken"].as_str().map(str::to_owned))
                    .unwrap_or_default();
            }
            Some(Ok(_)) => {}
            _ => return,
        }
    };
    state.record(
        "WS",
        "/gotapi/websocket",
        vec![("accessToken".to_owned(), token)],
    );

    let rejection = state.behavior.lock().handshake_errors.pop_front();
    if let Some(code) = rejection {
        let ack = json!({ "result": 1, "errorCode": code, "errorMessage": format!("rejected {code}") });
        let _ = socket.send(Message::Text(ack.to_string().into())).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let delay = state.behavior.lock().ack_delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let mut events = state.events.subscribe();
    let mut kick = state.kick.subscribe();
    if socket
        .send(Message::Text(json!({ "result": 0 }).to_string().into()))
        .await
        .is_err()
    {
        return;
    }
    state.open_sockets.fetch_add(1, Ordering::SeqCst);
    state.acked_sockets.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = kick.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.open_sockets.fetch_sub(1, Ordering::SeqCst);
}
