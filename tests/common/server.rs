//! Mock notification service lifecycle management
//!
//! Serves the notification REST API under `/api` and a STOMP-over-WebSocket
//! push endpoint under `/ws`. Tests drive it directly: seed notifications,
//! push payloads to subscribed users, drop connections, make calls fail.

use super::constants::*;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use planner_notify::notifications::{NotificationRecord, NotificationStatus};
use planner_notify::push::stomp::{self, Inbound, StompCommand, StompFrame};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

enum SessionCommand {
    Push(String),
    Drop,
}

struct Subscriber {
    user_id: String,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

#[derive(Default)]
struct MockState {
    tokens: HashMap<String, String>,
    notifications: Mutex<HashMap<String, Vec<NotificationRecord>>>,
    calls: Mutex<Vec<String>>,
    subscribers: Mutex<Vec<Subscriber>>,
    ws_connects: AtomicUsize,
    fail_mutations: AtomicBool,
    reject_connect: AtomicBool,
    silent: AtomicBool,
    heartbeats_disabled: AtomicBool,
}

impl MockState {
    fn user_for(&self, headers: &HeaderMap) -> Option<String> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        self.user_for_bearer(value)
    }

    fn user_for_bearer(&self, value: &str) -> Option<String> {
        let token = value.strip_prefix("Bearer ")?;
        self.tokens.get(token).cloned()
    }

    fn record_call(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

type SharedState = Arc<MockState>;

/// Mock notification service on a random port
///
/// When dropped, the server shuts down.
pub struct TestServer {
    /// REST base URL (e.g., "http://127.0.0.1:12345/api")
    pub base_url: String,

    /// Push endpoint (e.g., "ws://127.0.0.1:12345/ws")
    pub ws_url: String,

    state: SharedState,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let tokens = HashMap::from([
            (TEST_TOKEN.to_string(), TEST_USER_ID.to_string()),
            (OTHER_TOKEN.to_string(), OTHER_USER_ID.to_string()),
        ]);
        let state = Arc::new(MockState {
            tokens,
            ..Default::default()
        });

        let api = Router::new()
            .route("/notifications", get(list_notifications))
            .route("/notifications/read-all", patch(mark_all_read))
            .route("/notifications/all", delete(delete_all))
            .route("/notifications/{id}/read", patch(mark_read))
            .route("/notifications/{id}", delete(delete_one));
        let app = Router::new()
            .nest("/api", api)
            .route("/ws", get(ws_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}/api", port),
            ws_url: format!("ws://127.0.0.1:{}/ws", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Replace the server-side notifications of `user_id`.
    pub fn seed(&self, user_id: &str, records: Vec<NotificationRecord>) {
        self.state
            .notifications
            .lock()
            .unwrap()
            .insert(user_id.to_string(), records);
    }

    pub fn notifications(&self, user_id: &str) -> Vec<NotificationRecord> {
        self.state
            .notifications
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// REST calls received so far, e.g. "PATCH /notifications/1/read".
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Send `body` as a MESSAGE frame to every live subscription of
    /// `user_id`. Returns the number of subscriptions reached.
    pub fn push(&self, user_id: &str, body: &str) -> usize {
        let subscribers = self.state.subscribers.lock().unwrap();
        subscribers
            .iter()
            .filter(|s| s.user_id == user_id)
            .filter(|s| s.tx.send(SessionCommand::Push(body.to_string())).is_ok())
            .count()
    }

    /// Live subscriptions of `user_id`.
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.state
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.user_id == user_id && !s.tx.is_closed())
            .count()
    }

    /// Wait until `user_id` has exactly `count` live subscriptions.
    pub async fn wait_for_subscribers(&self, user_id: &str, count: usize) {
        let start = std::time::Instant::now();
        while self.subscriber_count(user_id) != count {
            if start.elapsed() > Duration::from_millis(WAIT_TIMEOUT_MS) {
                panic!(
                    "Expected {} subscribers for {}, found {}",
                    count,
                    user_id,
                    self.subscriber_count(user_id)
                );
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    /// Kill the sockets of `user_id` without a STOMP or WebSocket goodbye.
    pub fn drop_connections(&self, user_id: &str) {
        for subscriber in self.state.subscribers.lock().unwrap().iter() {
            if subscriber.user_id == user_id {
                let _ = subscriber.tx.send(SessionCommand::Drop);
            }
        }
    }

    pub fn ws_connect_count(&self) -> usize {
        self.state.ws_connects.load(Ordering::SeqCst)
    }

    /// Make every REST mutation answer 500.
    pub fn set_fail_mutations(&self, fail: bool) {
        self.state.fail_mutations.store(fail, Ordering::SeqCst);
    }

    /// Answer STOMP CONNECT with an ERROR frame.
    pub fn set_reject_connect(&self, reject: bool) {
        self.state.reject_connect.store(reject, Ordering::SeqCst);
    }

    /// Stop sending heartbeats on new and existing sessions.
    pub fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// Answer new sessions with `heart-beat:0,0` and never send heartbeats.
    pub fn set_heartbeats_disabled(&self, disabled: bool) {
        self.state
            .heartbeats_disabled
            .store(disabled, Ordering::SeqCst);
    }
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_notifications(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let Some(user_id) = state.user_for(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    state.record_call(format!(
        "GET /notifications?limit={}",
        query.limit.unwrap_or_default()
    ));
    let mut records = state
        .notifications
        .lock()
        .unwrap()
        .get(&user_id)
        .cloned()
        .unwrap_or_default();
    if let Some(limit) = query.limit {
        records.truncate(limit);
    }
    Json(records).into_response()
}

/// Shared handling of the mutation endpoints.
fn mutate(
    state: &MockState,
    headers: &HeaderMap,
    call: String,
    apply: impl FnOnce(&mut Vec<NotificationRecord>) -> bool,
) -> StatusCode {
    let Some(user_id) = state.user_for(headers) else {
        return StatusCode::UNAUTHORIZED;
    };
    state.record_call(call);
    if state.fail_mutations.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    let mut notifications = state.notifications.lock().unwrap();
    if apply(notifications.entry(user_id).or_default()) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn mark_read(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> StatusCode {
    mutate(
        &state,
        &headers,
        format!("PATCH /notifications/{}/read", id),
        |records| match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.status = NotificationStatus::Read;
                true
            }
            None => false,
        },
    )
}

async fn mark_all_read(State(state): State<SharedState>, headers: HeaderMap) -> StatusCode {
    mutate(
        &state,
        &headers,
        "PATCH /notifications/read-all".to_string(),
        |records| {
            for record in records.iter_mut() {
                record.status = NotificationStatus::Read;
            }
            true
        },
    )
}

async fn delete_one(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> StatusCode {
    mutate(
        &state,
        &headers,
        format!("DELETE /notifications/{}", id),
        |records| {
            let before = records.len();
            records.retain(|r| r.id != id);
            records.len() != before
        },
    )
}

async fn delete_all(State(state): State<SharedState>, headers: HeaderMap) -> StatusCode {
    mutate(
        &state,
        &headers,
        "DELETE /notifications/all".to_string(),
        |records| {
            records.clear();
            true
        },
    )
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Response {
    if state.user_for(&headers).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.ws_connects.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_frame(socket: &mut WebSocket, frame: StompFrame) -> bool {
    socket
        .send(Message::Text(frame.encode().into()))
        .await
        .is_ok()
}

/// Next decoded STOMP frame from the client, skipping heartbeats.
async fn next_frame(socket: &mut WebSocket) -> Option<StompFrame> {
    while let Some(Ok(message)) = socket.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(items) = stomp::decode(text.as_str()) else {
            return None;
        };
        if let Some(frame) = items.into_iter().find_map(|item| match item {
            Inbound::Frame(frame) => Some(frame),
            Inbound::Heartbeat => None,
        }) {
            return Some(frame);
        }
    }
    None
}

async fn handle_socket(mut socket: WebSocket, state: SharedState) {
    // CONNECT, authenticated again at the STOMP level.
    let Some(connect) = next_frame(&mut socket).await else {
        return;
    };
    let user_id = connect
        .get_header("Authorization")
        .and_then(|value| state.user_for_bearer(value));
    let user_id = match user_id {
        Some(user_id) if !state.reject_connect.load(Ordering::SeqCst) => user_id,
        _ => {
            let error = StompFrame::new(StompCommand::Error)
                .header("message", "Unauthorized")
                .with_body("invalid credentials");
            send_frame(&mut socket, error).await;
            return;
        }
    };
    let heartbeats_disabled = state.heartbeats_disabled.load(Ordering::SeqCst);
    let heart_beat = if heartbeats_disabled {
        "0,0".to_string()
    } else {
        format!("{},{}", SERVER_HEARTBEAT_MS, SERVER_HEARTBEAT_MS)
    };
    let connected = StompFrame::new(StompCommand::Connected)
        .header("version", "1.2")
        .header("heart-beat", heart_beat);
    if !send_frame(&mut socket, connected).await {
        return;
    }

    // SUBSCRIBE, acknowledged with a RECEIPT.
    let Some(subscribe) = next_frame(&mut socket).await else {
        return;
    };
    if subscribe.command != StompCommand::Subscribe {
        return;
    }
    let subscription = subscribe.get_header("id").unwrap_or("0").to_string();
    let destination = subscribe.get_header("destination").unwrap_or("").to_string();
    if let Some(receipt) = subscribe.get_header("receipt") {
        let receipt = StompFrame::new(StompCommand::Receipt).header("receipt-id", receipt);
        if !send_frame(&mut socket, receipt).await {
            return;
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    state.subscribers.lock().unwrap().push(Subscriber {
        user_id: user_id.clone(),
        tx,
    });

    let mut heartbeat = tokio::time::interval(Duration::from_millis(SERVER_HEARTBEAT_MS));
    let mut message_id = 0usize;
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if !heartbeats_disabled
                    && !state.silent.load(Ordering::SeqCst)
                    && socket.send(Message::Text("\n".into())).await.is_err()
                {
                    break;
                }
            }
            command = rx.recv() => match command {
                Some(SessionCommand::Push(body)) => {
                    message_id += 1;
                    let frame = StompFrame::new(StompCommand::Message)
                        .header("destination", destination.as_str())
                        .header("subscription", subscription.as_str())
                        .header("message-id", message_id.to_string())
                        .header("content-type", "application/json")
                        .with_body(body);
                    if !send_frame(&mut socket, frame).await {
                        break;
                    }
                }
                Some(SessionCommand::Drop) | None => return,
            },
            incoming = next_frame(&mut socket) => match incoming {
                Some(frame) if frame.command == StompCommand::Disconnect => break,
                Some(_) => {}
                None => break,
            },
        }
    }
    let _ = socket.close().await;
}
