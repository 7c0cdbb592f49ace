//! Wire protocol for the card-duel session server.
//!
//! Frames are JSON objects tagged by a `type` field. This module defines the
//! closed set of inbound ([`ClientMessage`]) and outbound ([`ServerMessage`])
//! frame shapes, the closed [`ErrorCode`] set, and room-code generation.

use std::collections::HashSet;
use std::fmt;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, server-generated player identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Six-character room code drawn from a reduced alphabet that excludes
/// visually ambiguous characters (`I O S 0 1`).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRTUVWXYZ23456789";
const CODE_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(pub String);

impl RoomCode {
    /// Generate a fresh room code, rejection-sampling against `existing`
    /// until a code not already live is produced.
    pub fn generate(existing: &HashSet<RoomCode>) -> Self {
        let mut rng = rand::rng();
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| *CODE_ALPHABET.choose(&mut rng).expect("alphabet non-empty") as char)
                .collect();
            let candidate = RoomCode(code);
            if !existing.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// Normalise a client-supplied code the way `join_room`/`reconnect` do:
    /// uppercased, as received over the wire.
    pub fn normalize(raw: &str) -> Self {
        RoomCode(raw.to_uppercase())
    }

    /// Sentinel used in the connection registry to mark a player parked in
    /// the matchmaking queue rather than bound to a real room.
    pub fn queue_sentinel() -> Self {
        RoomCode("__queue__".to_string())
    }

    pub fn is_queue_sentinel(&self) -> bool {
        self.0 == "__queue__"
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Minimal descriptor of a player, echoed in `game_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDescriptor {
    pub id: PlayerId,
    pub name: String,
    pub deck_id: String,
}

/// Closed set of error codes the server ever replies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    RoomNotFound,
    GameInProgress,
    RoomFull,
    NotInRoom,
    NotYourTurn,
    RateLimit,
    Kicked,
    PlayerNotFound,
    NotDisconnected,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        write!(f, "{}", json.as_str().unwrap_or("UNKNOWN"))
    }
}

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        player_name: String,
        deck_id: String,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_code: String,
        player_name: String,
        deck_id: String,
    },
    #[serde(rename_all = "camelCase")]
    FindMatch {
        player_name: String,
        deck_id: String,
    },
    LeaveRoom,
    #[serde(rename_all = "camelCase")]
    Reconnect {
        room_code: String,
        player_id: PlayerId,
    },
    #[serde(rename_all = "camelCase")]
    GameAction {
        action: serde_json::Value,
        #[serde(default)]
        game_state: Option<serde_json::Value>,
    },
    Chat {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Emote {
        emote_id: String,
    },
    #[serde(rename_all = "camelCase")]
    GameEnd {
        winner_id: Option<PlayerId>,
        turn_count: u32,
    },
    Pong,
}

/// The closed set of inbound type tags. Anything outside this set is
/// forward-compatible noise: logged and dropped, not a `PARSE_ERROR`.
const KNOWN_CLIENT_TAGS: &[&str] = &[
    "create_room",
    "join_room",
    "find_match",
    "leave_room",
    "reconnect",
    "game_action",
    "chat",
    "emote",
    "game_end",
    "pong",
];

/// Frames the server may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomCreated {
        room_code: RoomCode,
        player_id: PlayerId,
    },
    #[serde(rename_all = "camelCase")]
    PlayerJoined {
        player_id: PlayerId,
        player_name: String,
    },
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        player_id: PlayerId,
        player_name: String,
    },
    #[serde(rename_all = "camelCase")]
    GameStart {
        room_code: RoomCode,
        your_player_id: PlayerId,
        opponent_id: PlayerId,
        player1: PlayerDescriptor,
        player2: PlayerDescriptor,
    },
    #[serde(rename_all = "camelCase")]
    TurnStart {
        player_id: PlayerId,
        turn_duration: u64,
    },
    #[serde(rename_all = "camelCase")]
    GameAction {
        player_id: PlayerId,
        action: serde_json::Value,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected {
        player_id: PlayerId,
        reconnect_deadline: u64,
    },
    #[serde(rename_all = "camelCase")]
    Reconnected {
        game_state: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    Chat {
        player_id: PlayerId,
        player_name: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Emote {
        player_id: PlayerId,
        player_name: String,
        emote_id: String,
    },
    Ping {
        timestamp: u64,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }

    /// Serialise to the JSON text frame sent on the wire.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).expect("ServerMessage always serialises")
    }
}

/// Result of decoding an inbound text frame.
pub enum DecodedFrame {
    /// A recognised, well-formed message ready to dispatch.
    Message(ClientMessage),
    /// A recognised tag that this build doesn't handle, or a tag outside
    /// the closed set: forward-compatibility, drop silently.
    Unknown(String),
}

/// Decode a raw inbound text frame.
///
/// Malformed JSON or a recognised tag with an invalid payload shape is a
/// `PARSE_ERROR`. An unrecognised `type` tag is not an error — the caller
/// logs and drops it per §4.1.
pub fn decode_frame(text: &str) -> Result<DecodedFrame, String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;

    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| "missing `type` field".to_string())?;

    if !KNOWN_CLIENT_TAGS.contains(&tag) {
        return Ok(DecodedFrame::Unknown(tag.to_string()));
    }

    serde_json::from_value::<ClientMessage>(value)
        .map(DecodedFrame::Message)
        .map_err(|e| format!("malformed `{tag}` frame: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_code_generation_avoids_existing() {
        let mut existing = HashSet::new();
        existing.insert(RoomCode("AAAAAA".to_string()));
        for _ in 0..100 {
            let code = RoomCode::generate(&existing);
            assert_ne!(code.0, "AAAAAA");
            assert_eq!(code.0.len(), CODE_LEN);
            assert!(code.0.chars().all(|c| CODE_ALPHABET.contains(&(c as u8))));
        }
    }

    #[test]
    fn room_code_normalize_uppercases() {
        assert_eq!(RoomCode::normalize("ab12cd").0, "AB12CD");
    }

    #[test]
    fn decode_known_tag_roundtrips() {
        let frame = r#"{"type":"chat","message":"hi"}"#;
        match decode_frame(frame).unwrap() {
            DecodedFrame::Message(ClientMessage::Chat { message }) => assert_eq!(message, "hi"),
            _ => panic!("expected Chat message"),
        }
    }

    #[test]
    fn decode_unknown_tag_is_not_an_error() {
        let frame = r#"{"type":"surrender_dance"}"#;
        match decode_frame(frame).unwrap() {
            DecodedFrame::Unknown(tag) => assert_eq!(tag, "surrender_dance"),
            _ => panic!("expected Unknown"),
        }
    }

    #[test]
    fn decode_malformed_known_tag_is_parse_error() {
        let frame = r#"{"type":"create_room"}"#;
        assert!(decode_frame(frame).is_err());
    }

    #[test]
    fn decode_invalid_json_is_parse_error() {
        assert!(decode_frame("not json").is_err());
    }

    #[test]
    fn server_message_serialises_camel_case() {
        let msg = ServerMessage::RoomCreated {
            room_code: RoomCode("ABC123".to_string()),
            player_id: PlayerId::new(),
        };
        let json = msg.to_frame();
        assert!(json.contains("\"type\":\"room_created\""));
        assert!(json.contains("\"roomCode\":\"ABC123\""));
    }

    #[test]
    fn error_code_serialises_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::NotYourTurn).unwrap();
        assert_eq!(json, "\"NOT_YOUR_TURN\"");
    }
}
