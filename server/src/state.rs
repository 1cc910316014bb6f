use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{ChatEntry, HelloPayload, PlaybackState, ServerMessage, ViewerInfo};

const LOG_TAG: &str = "[Parlor]";

/// Chat history kept per room; oldest entries are evicted beyond this.
pub const CHAT_CAPACITY: usize = 200;
/// Longest chat line accepted; anything beyond is cut off.
pub const MAX_CHAT_CHARS: usize = 2000;
/// Longest display name accepted at admission.
pub const MAX_NAME_CHARS: usize = 40;
/// Room joined when the query string names none.
pub const DEFAULT_ROOM: &str = "family";

pub type ViewerSender = mpsc::UnboundedSender<ServerMessage>;

/// A connected viewer, registered for the lifetime of its socket.
///
/// `is_host` is decided once at admission and never changes afterwards,
/// even if the configured pin is rotated while the connection lives.
pub struct Viewer {
    pub name: String,
    pub is_host: bool,
    pub room_id: String,
    pub tx: ViewerSender,
}

/// Per-room record: the authoritative timeline, the bounded chat log, and
/// the ids of every seated viewer.
struct Room {
    state: PlaybackState,
    chat: VecDeque<ChatEntry>,
    viewers: Vec<Uuid>,
}

impl Room {
    fn new(now_ms: u64) -> Self {
        Self {
            state: PlaybackState::new(now_ms),
            chat: VecDeque::new(),
            viewers: Vec::new(),
        }
    }
}

/// In-memory table of rooms and connected viewers.
///
/// Rooms are created lazily on first reference and live for the process
/// lifetime; there is no expiry. All mutations are short synchronous
/// critical sections on the sharded maps, never held across an await.
/// State mutations fan out to the room's viewers under the same room
/// guard, so every viewer observes them in mutation order.
#[derive(Clone)]
pub struct RoomStore {
    rooms: Arc<DashMap<String, Room>>,
    viewers: Arc<DashMap<Uuid, Viewer>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            viewers: Arc::new(DashMap::new()),
        }
    }

    /// Seat a viewer in its room, creating the room on first reference,
    /// and deliver the admission snapshot (`hello`, plus the authority
    /// notice for hosts) before any later broadcast can reach the seat.
    pub fn admit(&self, viewer_id: Uuid, viewer: Viewer) {
        let tx = viewer.tx.clone();
        let you = ViewerInfo {
            name: viewer.name.clone(),
            is_host: viewer.is_host,
        };
        let room_id = viewer.room_id.clone();
        self.viewers.insert(viewer_id, viewer);

        let mut room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(now_ms()));
        room.viewers.push(viewer_id);
        let hello = HelloPayload {
            you: you.clone(),
            chat: room.chat.iter().cloned().collect(),
            state: room.state.clone(),
        };
        let _ = tx.send(ServerMessage::Hello(hello));
        if you.is_host {
            let _ = tx.send(ServerMessage::HostGranted);
        }
        drop(room);

        tracing::info!("{LOG_TAG} {} seated in room {}", you.name, room_id);
    }

    /// Remove a viewer; the room itself is never destroyed.
    pub fn depart(&self, viewer_id: Uuid) -> Option<Viewer> {
        let (_, viewer) = self.viewers.remove(&viewer_id)?;
        if let Some(mut room) = self.rooms.get_mut(&viewer.room_id) {
            room.viewers.retain(|id| *id != viewer_id);
        }
        tracing::info!("{LOG_TAG} {} left room {}", viewer.name, viewer.room_id);
        Some(viewer)
    }

    /// Stamp, store, and broadcast one finished chat entry. Oldest entries
    /// fall off beyond [`CHAT_CAPACITY`].
    pub fn push_chat(&self, room_id: &str, from: &str, text: &str, now_ms: u64) -> ChatEntry {
        let entry = ChatEntry {
            from: from.to_string(),
            text: truncate_chars(text, MAX_CHAT_CHARS),
            ts: now_ms,
        };
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(now_ms));
        room.chat.push_back(entry.clone());
        if room.chat.len() > CHAT_CAPACITY {
            room.chat.pop_front();
        }
        self.fan_out(&room.viewers, &ServerMessage::Chat(entry.clone()));
        entry
    }

    /// Apply a host-authorized mutation to the room's timeline and
    /// broadcast the full new state to every seat, sender included.
    pub fn update_state<F>(&self, room_id: &str, now_ms: u64, mutate: F) -> PlaybackState
    where
        F: FnOnce(&mut PlaybackState),
    {
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(now_ms));
        mutate(&mut room.state);
        let state = room.state.clone();
        self.fan_out(&room.viewers, &ServerMessage::State(state.clone()));
        state
    }

    /// Best-effort fan-out to every seat in the room. A dead seat's send
    /// failure is ignored; its own disconnect path reaps it.
    pub fn broadcast(&self, room_id: &str, msg: ServerMessage) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        self.fan_out(&room.viewers, &msg);
    }

    fn fan_out(&self, viewer_ids: &[Uuid], msg: &ServerMessage) {
        for viewer_id in viewer_ids {
            if let Some(viewer) = self.viewers.get(viewer_id) {
                let _ = viewer.tx.send(msg.clone());
            }
        }
    }

    pub fn playback_state(&self, room_id: &str) -> Option<PlaybackState> {
        self.rooms.get(room_id).map(|room| room.state.clone())
    }

    pub fn chat_history(&self, room_id: &str) -> Vec<ChatEntry> {
        self.rooms
            .get(room_id)
            .map(|room| room.chat.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Trim, strip control characters, and cap the display name; empty input
/// falls back to the default guest name.
pub fn sanitize_name(raw: Option<&str>) -> String {
    let cleaned: String = raw
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|ch| !ch.is_control())
        .take(MAX_NAME_CHARS)
        .collect();
    if cleaned.is_empty() {
        "Guest".to_string()
    } else {
        cleaned
    }
}

fn truncate_chars(raw: &str, max: usize) -> String {
    raw.chars().take(max).collect()
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}
