use serde::{Deserialize, Serialize};

// Wire types for the room protocol (must match the server's protocol).

/// Messages a seat sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Raw chat text; the server stamps author and time.
    Chat(String),
    /// Host-only: select the video reference for the whole room.
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

/// Messages the server sends to a seat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    /// One-time snapshot delivered on admission.
    Hello(HelloPayload),
    /// Ephemeral presence notice; never part of chat history.
    System(String),
    Chat(ChatEntry),
    State(PlaybackState),
    /// This connection holds host authority.
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub from: String,
    pub text: String,
    pub ts: u64,
}

/// The room's authoritative timeline: at wall-clock `updated_at` (epoch
/// ms) playback was at `time` seconds, moving forward iff `playing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub video: Option<String>,
    pub playing: bool,
    pub time: f64,
    pub updated_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_matches_server_wire() {
        let msg = ClientMessage::Control(ControlPayload {
            action: ControlAction::Seek,
            time: 12.5,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "control");
        assert_eq!(json["payload"]["action"], "seek");
        assert_eq!(json["payload"]["time"], 12.5);
    }

    #[test]
    fn inbound_state_parses_camel_case_field_names() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type":"state","payload":{"video":"/videos/movie/playlist.m3u8","playing":true,"time":8.0,"updatedAt":1000}}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::State(state) => {
                assert!(state.playing);
                assert_eq!(state.updated_at, 1_000);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn host_granted_has_no_payload() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"hostGranted"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::HostGranted));
    }
}
