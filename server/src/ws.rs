use axum::extract::ws::{Message as AxumWsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{ClientMessage, ControlAction, ServerMessage};
use crate::state::{now_ms, sanitize_name, RoomStore, Viewer, DEFAULT_ROOM};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct JoinParams {
    room: Option<String>,
    name: Option<String>,
    pin: Option<String>,
}

pub async fn ws_endpoint(
    ws: WebSocketUpgrade,
    Query(params): Query<JoinParams>,
    State(app): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, params, app))
}

/// Per-connection lifecycle: admit, snapshot, message loop, depart.
async fn handle_connection(socket: WebSocket, params: JoinParams, app: AppState) {
    let room_id = params
        .room
        .filter(|room| !room.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ROOM.to_string());
    let name = sanitize_name(params.name.as_deref());
    // Authority is decided exactly once, here; it never changes for the
    // lifetime of the connection.
    let is_host = secret_matches(params.pin.as_deref().unwrap_or(""), &app.config.admin_pin);
    let viewer_id = Uuid::new_v4();

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Outbound pump: everything this seat should see flows through one
    // queue, so admission snapshot and broadcasts keep their order.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(AxumWsMessage::Text(json)).await.is_err() {
                break;
            }
        }
    });

    app.rooms.admit(
        viewer_id,
        Viewer {
            name: name.clone(),
            is_host,
            room_id: room_id.clone(),
            tx,
        },
    );
    app.rooms
        .broadcast(&room_id, ServerMessage::System(format!("{name} joined.")));

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(AxumWsMessage::Text(text)) => {
                handle_text(&app.rooms, &room_id, &name, is_host, &text);
            }
            Ok(AxumWsMessage::Close(_)) => {
                tracing::debug!("viewer {} closing connection", viewer_id);
                break;
            }
            Err(e) => {
                tracing::debug!("websocket error for viewer {}: {}", viewer_id, e);
                break;
            }
            _ => {}
        }
    }

    if let Some(viewer) = app.rooms.depart(viewer_id) {
        app.rooms.broadcast(
            &room_id,
            ServerMessage::System(format!("{} left.", viewer.name)),
        );
    }
    send_task.abort();
}

/// Parse one inbound frame. Malformed payloads are dropped without a
/// reply; a viewer is a best-effort peer and gets no protocol errors.
fn handle_text(rooms: &RoomStore, room_id: &str, name: &str, is_host: bool, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => dispatch(rooms, room_id, name, is_host, msg, now_ms()),
        Err(e) => tracing::debug!("dropping unparseable message: {}", e),
    }
}

/// Apply one inbound message to the room. Host-only mutations from
/// non-hosts are ignored without any reply, so an unauthorized peer
/// cannot probe whether the pin it sent was close.
pub(crate) fn dispatch(
    rooms: &RoomStore,
    room_id: &str,
    name: &str,
    is_host: bool,
    msg: ClientMessage,
    now_ms: u64,
) {
    match msg {
        ClientMessage::Chat(text) => {
            rooms.push_chat(room_id, name, &text, now_ms);
        }
        ClientMessage::SetVideo(video) => {
            if !is_host {
                return;
            }
            rooms.update_state(room_id, now_ms, |state| state.select(video, now_ms));
        }
        ClientMessage::Control(control) => {
            if !is_host {
                return;
            }
            rooms.update_state(room_id, now_ms, |state| match control.action {
                ControlAction::Play => state.play(control.time, now_ms),
                ControlAction::Pause => state.pause(control.time, now_ms),
                ControlAction::Seek => state.seek(control.time, now_ms),
            });
        }
    }
}

/// Compare digests rather than the raw strings so the comparison does not
/// bail out at the first differing byte.
pub(crate) fn secret_matches(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}
