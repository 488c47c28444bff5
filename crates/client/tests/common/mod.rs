//! In-process fake of the notification backend for integration tests.
//!
//! Serves the `/v1/notifications` REST surface from memory and accepts
//! push-channel upgrades at `/`. Tests drive pushes and connection drops
//! through [`FakeBackend`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use insyd_client::ClientConfig;
use insyd_core::{Notification, NotificationType, Preferences};
use serde_json::json;
use tokio::sync::broadcast;

pub const USER: &str = "user-1";

/// One REST request as seen by the fake.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: &'static str,
    pub path: String,
    pub query: HashMap<String, String>,
}

#[derive(Debug, Clone)]
enum SocketCommand {
    Text(String),
    Drop,
}

pub struct BackendState {
    notifications: Mutex<Vec<Notification>>,
    preferences: Mutex<Option<Preferences>>,
    events: Mutex<Vec<serde_json::Value>>,
    requests: Mutex<Vec<Recorded>>,
    socket_users: Mutex<Vec<String>>,
    sockets: broadcast::Sender<SocketCommand>,
    live_sockets: AtomicUsize,
    fail_writes: AtomicBool,
}

pub struct FakeBackend {
    pub addr: SocketAddr,
    state: Arc<BackendState>,
    server: tokio::task::JoinHandle<()>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let (sockets, _) = broadcast::channel(64);
        let state = Arc::new(BackendState {
            notifications: Mutex::new(Vec::new()),
            preferences: Mutex::new(None),
            events: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            socket_users: Mutex::new(Vec::new()),
            sockets,
            live_sockets: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        });

        let app = Router::new()
            .route("/", get(push_upgrade))
            .route("/v1/notifications", get(list))
            .route("/v1/notifications/{id}/read", post(mark_read))
            .route("/v1/notifications/read-all", post(mark_all_read))
            .route(
                "/v1/notifications/preferences",
                get(get_preferences).put(put_preferences),
            )
            .route("/v1/notifications/events", post(submit_event))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, server }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client config bound to this fake with fast reconnects.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.base_url(), USER);
        config.backoff = insyd_client::BackoffPolicy::new(
            Duration::from_millis(20),
            Duration::from_millis(200),
        );
        config.request_timeout = Duration::from_secs(5);
        config
    }

    pub fn seed(&self, notifications: Vec<Notification>) {
        self.state.notifications.lock().unwrap().extend(notifications);
    }

    pub fn stored(&self, id: &str) -> Option<Notification> {
        self.state
            .notifications
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn events(&self) -> Vec<serde_json::Value> {
        self.state.events.lock().unwrap().clone()
    }

    pub fn socket_users(&self) -> Vec<String> {
        self.state.socket_users.lock().unwrap().clone()
    }

    pub fn live_sockets(&self) -> usize {
        self.state.live_sockets.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Store `notification` and push it to every open socket.
    pub fn publish(&self, notification: Notification) {
        let frame = json!({ "type": "notification.new", "payload": &notification }).to_string();
        self.state.notifications.lock().unwrap().push(notification);
        self.push_raw(frame);
    }

    /// Send a raw text frame to every open socket.
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.state.sockets.send(SocketCommand::Text(text.into()));
    }

    /// Close every open socket from the server side.
    pub fn drop_sockets(&self) {
        let _ = self.state.sockets.send(SocketCommand::Drop);
    }

    /// Wait until exactly `n` sockets are open.
    pub async fn wait_for_sockets(&self, n: usize) {
        wait_until(|| self.live_sockets() == n).await;
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Poll `condition` every 10ms for up to five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

pub fn notification(id: &str, minutes: i64, is_read: bool) -> Notification {
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        + chrono::Duration::minutes(minutes);
    Notification {
        id: id.to_string(),
        recipient_id: USER.to_string(),
        kind: NotificationType::Social,
        title: format!("Notification {id}"),
        body: format!("Body of {id}"),
        data_json: json!({ "source": "fake" }),
        is_read,
        is_archived: false,
        created_at: created,
        updated_at: created,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

type Shared = State<Arc<BackendState>>;

fn record(state: &BackendState, method: &'static str, path: String, query: HashMap<String, String>) {
    state
        .requests
        .lock()
        .unwrap()
        .push(Recorded { method, path, query });
}

fn server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "database unavailable" })),
    )
        .into_response()
}

async fn list(State(state): Shared, Query(query): Query<HashMap<String, String>>) -> Response {
    record(&state, "GET", "/v1/notifications".into(), query.clone());

    let Some(user) = query.get("userId") else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "userId required" })))
            .into_response();
    };
    let is_read = query.get("is_read").map(|v| v == "true");
    let limit = query
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(50);

    let mut items: Vec<Notification> = state
        .notifications
        .lock()
        .unwrap()
        .iter()
        .filter(|n| &n.recipient_id == user)
        .filter(|n| is_read.map_or(true, |r| n.is_read == r))
        .cloned()
        .collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    items.truncate(limit);

    Json(items).into_response()
}

async fn mark_read(State(state): Shared, Path(id): Path<String>) -> Response {
    record(&state, "POST", format!("/v1/notifications/{id}/read"), HashMap::new());
    if state.fail_writes.load(Ordering::SeqCst) {
        return server_error();
    }

    let mut notifications = state.notifications.lock().unwrap();
    match notifications.iter_mut().find(|n| n.id == id) {
        Some(n) => {
            n.is_read = true;
            StatusCode::NO_CONTENT.into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("notification {id} not found") })),
        )
            .into_response(),
    }
}

async fn mark_all_read(State(state): Shared, Query(query): Query<HashMap<String, String>>) -> Response {
    record(&state, "POST", "/v1/notifications/read-all".into(), query.clone());
    if state.fail_writes.load(Ordering::SeqCst) {
        return server_error();
    }

    let user = query.get("userId").cloned().unwrap_or_default();
    let mut updated = 0;
    for n in state.notifications.lock().unwrap().iter_mut() {
        if n.recipient_id == user && !n.is_read {
            n.is_read = true;
            updated += 1;
        }
    }
    Json(json!({ "updated": updated })).into_response()
}

async fn get_preferences(State(state): Shared, Query(query): Query<HashMap<String, String>>) -> Response {
    record(&state, "GET", "/v1/notifications/preferences".into(), query);
    match state.preferences.lock().unwrap().clone() {
        Some(prefs) => Json(prefs).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "no preferences" }))).into_response(),
    }
}

async fn put_preferences(
    State(state): Shared,
    Query(query): Query<HashMap<String, String>>,
    Json(prefs): Json<Preferences>,
) -> Response {
    record(&state, "PUT", "/v1/notifications/preferences".into(), query);
    *state.preferences.lock().unwrap() = Some(prefs.clone());
    Json(prefs).into_response()
}

async fn submit_event(State(state): Shared, Json(body): Json<serde_json::Value>) -> Response {
    record(&state, "POST", "/v1/notifications/events".into(), HashMap::new());
    let mut events = state.events.lock().unwrap();
    let id = format!("evt-{}", events.len() + 1);
    events.push(body.clone());
    (
        StatusCode::CREATED,
        Json(json!({ "id": id, "verb": body["verb"], "status": "queued" })),
    )
        .into_response()
}

async fn push_upgrade(
    ws: WebSocketUpgrade,
    State(state): Shared,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let user = query.get("userId").cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: Arc<BackendState>, user: String) {
    let mut commands = state.sockets.subscribe();
    state.socket_users.lock().unwrap().push(user);
    state.live_sockets.fetch_add(1, Ordering::SeqCst);

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(SocketCommand::Text(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(SocketCommand::Drop) | Err(_) => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.live_sockets.fetch_sub(1, Ordering::SeqCst);
}
