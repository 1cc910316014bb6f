use serde::{Deserialize, Serialize};

/// Messages accepted from a connected viewer.
///
/// Anything that fails to parse into one of these is dropped without a
/// reply; viewers are untrusted best-effort peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Raw chat text. The server stamps author and time.
    Chat(String),
    /// Host-only: select the video reference the whole room should play.
    SetVideo(String),
    /// Host-only transport control.
    Control(ControlPayload),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlPayload {
    pub action: ControlAction,
    #[serde(default)]
    pub time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Play,
    Pause,
    Seek,
}

/// Messages sent to viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    /// One-time snapshot delivered on admission.
    Hello(HelloPayload),
    /// Ephemeral presence notice; never stored in the chat log.
    System(String),
    Chat(ChatEntry),
    State(PlaybackState),
    /// Directed notice that this connection holds host authority.
    HostGranted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    pub you: ViewerInfo,
    pub chat: Vec<ChatEntry>,
    pub state: PlaybackState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerInfo {
    pub name: String,
    pub is_host: bool,
}

/// One chat line, immutable once stamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub from: String,
    pub text: String,
    pub ts: u64,
}

/// The authoritative playback timeline of a room.
///
/// Reads as: at wall-clock `updated_at` (epoch ms) playback was at `time`
/// seconds, moving forward iff `playing`. Mutated only by host-authorized
/// messages; every mutation restamps `updated_at` without ever letting it
/// go backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub video: Option<String>,
    pub playing: bool,
    pub time: f64,
    pub updated_at: u64,
}

impl PlaybackState {
    pub fn new(now_ms: u64) -> Self {
        Self {
            video: None,
            playing: false,
            time: 0.0,
            updated_at: now_ms,
        }
    }

    /// Switching videos always lands paused at the start, so every viewer's
    /// first-load behavior agrees across the switch.
    pub fn select(&mut self, video: String, now_ms: u64) {
        self.video = Some(video);
        self.playing = false;
        self.time = 0.0;
        self.stamp(now_ms);
    }

    pub fn play(&mut self, time: f64, now_ms: u64) {
        self.playing = true;
        self.time = time.max(0.0);
        self.stamp(now_ms);
    }

    pub fn pause(&mut self, time: f64, now_ms: u64) {
        self.playing = false;
        self.time = time.max(0.0);
        self.stamp(now_ms);
    }

    pub fn seek(&mut self, time: f64, now_ms: u64) {
        self.time = time.max(0.0);
        self.stamp(now_ms);
    }

    // A clock step backwards must not regress the timeline.
    fn stamp(&mut self, now_ms: u64) {
        self.updated_at = self.updated_at.max(now_ms);
    }
}
