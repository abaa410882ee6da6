#![allow(dead_code)]

// In-process stand-ins for the note store REST API and the y-sync relay.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, timeout};
use yrs::encoding::read::Cursor;
use yrs::sync::{Awareness, DefaultProtocol, Message, MessageReader, Protocol, SyncMessage};
use yrs::updates::decoder::{Decode, DecoderV1};
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, Transact, Update};

const UPDATE_BUFFER_SIZE: usize = 256;

// ── REST store ──────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct FakeNoteApi {
    inner: Arc<FakeNoteApiInner>,
}

#[derive(Default)]
struct FakeNoteApiInner {
    token: String,
    snapshots: StdMutex<HashMap<u64, Vec<u8>>>,
    patches: StdMutex<Vec<(u64, serde_json::Value)>>,
    posts: StdMutex<usize>,
}

impl FakeNoteApi {
    pub fn new(token: &str) -> Self {
        Self {
            inner: Arc::new(FakeNoteApiInner { token: token.to_string(), ..Default::default() }),
        }
    }

    pub fn snapshot(&self, note_id: u64) -> Option<Vec<u8>> {
        self.inner.snapshots.lock().unwrap().get(&note_id).cloned()
    }

    pub fn put_snapshot(&self, note_id: u64, state: Vec<u8>) {
        self.inner.snapshots.lock().unwrap().insert(note_id, state);
    }

    pub fn patches(&self) -> Vec<(u64, serde_json::Value)> {
        self.inner.patches.lock().unwrap().clone()
    }

    pub fn post_count(&self) -> usize {
        *self.inner.posts.lock().unwrap()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.inner.token);
        headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()) == Some(expected.as_str())
    }

    pub async fn serve(self) -> SocketAddr {
        let router = Router::new()
            .route("/notes/{id}/state", get(get_state).post(post_state))
            .route("/notes/{id}", patch(patch_note))
            .with_state(self);
        spawn(router).await
    }
}

async fn get_state(
    State(api): State<FakeNoteApi>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    if !api.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match api.snapshot(id) {
        Some(state) => state.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn post_state(
    State(api): State<FakeNoteApi>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !api.authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    *api.inner.posts.lock().unwrap() += 1;
    api.put_snapshot(id, body.to_vec());
    StatusCode::NO_CONTENT
}

async fn patch_note(
    State(api): State<FakeNoteApi>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    if !api.authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    api.inner.patches.lock().unwrap().push((id, body));
    StatusCode::NO_CONTENT
}

// ── y-sync relay ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FakeRelay {
    inner: Arc<FakeRelayInner>,
}

struct FakeRelayInner {
    token: String,
    rooms: Mutex<HashMap<u64, Arc<Room>>>,
}

struct Room {
    awareness: Mutex<Awareness>,
    updates_tx: broadcast::Sender<(u64, Vec<u8>)>,
    next_peer_id: AtomicU64,
}

impl FakeRelay {
    pub fn new(token: &str) -> Self {
        Self {
            inner: Arc::new(FakeRelayInner {
                token: token.to_string(),
                rooms: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub async fn serve(self) -> SocketAddr {
        let router = Router::new().route("/notes/{id}", get(room_route)).with_state(self);
        spawn(router).await
    }

    async fn room(&self, note_id: u64) -> Arc<Room> {
        let mut rooms = self.inner.rooms.lock().await;
        Arc::clone(rooms.entry(note_id).or_insert_with(|| {
            let (updates_tx, _) = broadcast::channel(UPDATE_BUFFER_SIZE);
            Arc::new(Room {
                awareness: Mutex::new(Awareness::new(Doc::new())),
                updates_tx,
                next_peer_id: AtomicU64::new(1),
            })
        }))
    }
}

async fn room_route(
    ws: WebSocketUpgrade,
    State(relay): State<FakeRelay>,
    Path(id): Path<u64>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if query.get("token") != Some(&relay.inner.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let room = relay.room(id).await;
    ws.on_upgrade(move |socket| handle_socket(socket, room))
}

async fn handle_socket(mut socket: WebSocket, room: Arc<Room>) {
    let peer_id = room.next_peer_id.fetch_add(1, Ordering::Relaxed);
    let mut updates_rx = room.updates_tx.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else {
                    break;
                };
                match message {
                    WsMessage::Binary(payload) => {
                        let processed =
                            process_incoming_binary(peer_id, payload.as_ref(), &room, &mut socket)
                                .await;
                        if let Err(error) = processed {
                            tracing::warn!(?error, "failed to process relay frame");
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            outbound = updates_rx.recv() => {
                match outbound {
                    Ok((sender_id, payload)) if sender_id != peer_id => {
                        if socket.send(WsMessage::Binary(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn process_incoming_binary(
    peer_id: u64,
    payload: &[u8],
    room: &Room,
    socket: &mut WebSocket,
) -> Result<()> {
    let protocol = DefaultProtocol;
    let mut responses = Vec::new();
    let mut broadcast_updates = Vec::new();

    {
        let awareness = room.awareness.lock().await;
        let mut decoder = DecoderV1::new(Cursor::new(payload));
        let mut reader = MessageReader::new(&mut decoder);

        while let Some(next_message) = reader.next() {
            match next_message.context("failed to decode y-sync message")? {
                Message::Sync(SyncMessage::SyncStep1(state_vector)) => {
                    if let Some(response) = protocol.handle_sync_step1(&awareness, state_vector)? {
                        responses.push(response.encode_v1());
                    }
                    let relay_sv = awareness.doc().transact().state_vector();
                    responses.push(Message::Sync(SyncMessage::SyncStep1(relay_sv)).encode_v1());
                }
                Message::Sync(SyncMessage::SyncStep2(update))
                | Message::Sync(SyncMessage::Update(update)) => {
                    protocol.handle_update(&awareness, Update::decode_v1(&update)?)?;
                    broadcast_updates.push(Message::Sync(SyncMessage::Update(update)).encode_v1());
                }
                _ => {}
            }
        }
    }

    for response in responses {
        socket.send(WsMessage::Binary(response.into())).await.context("send failed")?;
    }
    for update in broadcast_updates {
        let _ = room.updates_tx.send((peer_id, update));
    }
    Ok(())
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("test listener should bind");
    let addr = listener.local_addr().expect("listener should expose local address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server should run");
    });
    addr
}

/// Poll `condition` every 10ms for up to five seconds.
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let result = timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}
