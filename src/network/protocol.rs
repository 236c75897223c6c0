//! Protocol Messages
//!
//! Wire format between a participant and the relay. JSON text frames,
//! internally tagged by `type`, camelCase throughout. Every message carries
//! a `timestamp` in ms since epoch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::clock::now_millis;
use crate::game::input::PlayerInput;
use crate::game::snapshot::GameStateSnapshot;

// =============================================================================
// CLIENT -> RELAY MESSAGES
// =============================================================================

/// Messages sent from a participant to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Enter a room. Sent on every (re)open.
    Join(JoinRequest),

    /// Local input sample.
    Input(InputMessage),

    /// Host-authored state (host only).
    State(StateMessage),

    /// Lobby readiness toggle.
    Ready(ReadyMessage),

    /// Latency ping.
    Ping(PingMessage),

    /// Keep-alive.
    Heartbeat(HeartbeatMessage),
}

/// Room join request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Room to enter.
    pub room_id: String,
    /// Joining participant.
    pub player_id: String,
    /// Display name shown to the peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    /// Send time.
    pub timestamp: i64,
}

/// Input sample for a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMessage {
    /// Sender.
    pub player_id: String,
    /// The sample.
    pub input: PlayerInput,
    /// Sender's frame counter when the sample was taken.
    pub frame_number: u64,
    /// Send time.
    pub timestamp: i64,
}

/// Authoritative state from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMessage {
    /// Sender (the host).
    pub player_id: String,
    /// State for one frame.
    pub snapshot: GameStateSnapshot,
    /// Send time.
    pub timestamp: i64,
}

/// Ready toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyMessage {
    /// Sender.
    pub player_id: String,
    /// New readiness.
    pub ready: bool,
    /// Send time.
    pub timestamp: i64,
}

/// Latency ping; echoed back in `pong`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingMessage {
    /// Sender.
    pub player_id: String,
    /// Ping send time, echoed by the relay.
    pub timestamp: i64,
}

/// Keep-alive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMessage {
    /// Sender.
    pub player_id: String,
    /// Send time.
    pub timestamp: i64,
}


impl ClientMessage {
    /// Build a `join`.
    pub fn join(room_id: &str, player_id: &str, player_name: Option<&str>) -> Self {
        Self::Join(JoinRequest {
            room_id: room_id.to_string(),
            player_id: player_id.to_string(),
            player_name: player_name.map(str::to_string),
            timestamp: now_millis(),
        })
    }

    /// Build an `input`.
    pub fn input(player_id: &str, input: PlayerInput, frame_number: u64) -> Self {
        Self::Input(InputMessage {
            player_id: player_id.to_string(),
            input,
            frame_number,
            timestamp: now_millis(),
        })
    }

    /// Build a `state`.
    pub fn state(player_id: &str, snapshot: GameStateSnapshot) -> Self {
        Self::State(StateMessage {
            player_id: player_id.to_string(),
            snapshot,
            timestamp: now_millis(),
        })
    }

    /// Build a `ready`.
    pub fn ready(player_id: &str, ready: bool) -> Self {
        Self::Ready(ReadyMessage {
            player_id: player_id.to_string(),
            ready,
            timestamp: now_millis(),
        })
    }

    /// Build a `ping` stamped now.
    pub fn ping(player_id: &str) -> Self {
        Self::Ping(PingMessage {
            player_id: player_id.to_string(),
            timestamp: now_millis(),
        })
    }

    /// Build a `heartbeat`.
    pub fn heartbeat(player_id: &str) -> Self {
        Self::Heartbeat(HeartbeatMessage {
            player_id: player_id.to_string(),
            timestamp: now_millis(),
        })
    }


    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Input(_) => "input",
            Self::State(_) => "state",
            Self::Ready(_) => "ready",
            Self::Ping(_) => "ping",
            Self::Heartbeat(_) => "heartbeat",
        }
    }
}

// =============================================================================
// RELAY -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from the relay to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Join acknowledged.
    Joined(JoinedInfo),

    /// Another participant entered the room.
    PlayerJoined(PlayerJoinedInfo),

    /// A participant left the room for good.
    PlayerLeft(PlayerLeftInfo),

    /// Peer input, forwarded verbatim.
    PlayerInput(PlayerInputInfo),

    /// Host state, forwarded verbatim.
    GameStateUpdate(GameStateInfo),

    /// Peer readiness changed.
    PlayerReady(PlayerReadyInfo),

    /// Reply to `ping`.
    Pong(PongInfo),

    /// Relay-side failure.
    Error(RelayError),
}

/// Join acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedInfo {
    /// Room entered.
    pub room_id: String,
    /// Relay's host verdict, when it arbitrates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_host: Option<bool>,
    /// Relay-assigned slot, when it arbitrates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_index: Option<u8>,
    /// Send time.
    #[serde(default)]
    pub timestamp: i64,
}

/// Peer arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoinedInfo {
    /// Peer id.
    pub player_id: String,
    /// Peer display name.
    #[serde(default)]
    pub player_name: String,
    /// Whether the peer is host, when the relay says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_host: Option<bool>,
    /// Send time.
    #[serde(default)]
    pub timestamp: i64,
}

/// Peer departure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeftInfo {
    /// Peer id.
    pub player_id: String,
    /// Send time.
    #[serde(default)]
    pub timestamp: i64,
}

/// Peer input. `input` stays untyped until validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInputInfo {
    /// Peer id.
    pub player_id: String,
    /// Raw input payload.
    pub input: Value,
    /// Peer frame counter, if sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_number: Option<u64>,
    /// Send time.
    #[serde(default)]
    pub timestamp: i64,
}

/// Host state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateInfo {
    /// The snapshot.
    pub snapshot: GameStateSnapshot,
    /// Send time.
    #[serde(default)]
    pub timestamp: i64,
}

/// Peer readiness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReadyInfo {
    /// Peer id.
    pub player_id: String,
    /// New readiness.
    pub ready: bool,
    /// Send time.
    #[serde(default)]
    pub timestamp: i64,
}

/// Ping reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongInfo {
    /// Echo of the ping timestamp.
    pub timestamp: i64,
    /// Relay clock at reply time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<i64>,
}

/// Relay error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayError {
    /// Human readable message.
    pub message: String,
    /// Send time.
    #[serde(default)]
    pub timestamp: i64,
}

/// Outcome of decoding one inbound text frame.
#[derive(Debug)]
pub enum Decoded {
    /// A message this client understands.
    Message(ServerMessage),
    /// Well-formed JSON with a tag this client does not know.
    Unknown(String),
    /// Not a usable frame.
    Malformed(serde_json::Error),
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Decode a frame, separating unknown tags from garbage.
    pub fn decode(text: &str) -> Decoded {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return Decoded::Malformed(e),
        };

        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);

        match serde_json::from_value::<ServerMessage>(value) {
            Ok(msg) => Decoded::Message(msg),
            Err(e) => match tag {
                Some(tag) if !Self::KNOWN_TAGS.contains(&tag.as_str()) => Decoded::Unknown(tag),
                _ => Decoded::Malformed(e),
            },
        }
    }

    /// Tags this client understands.
    pub const KNOWN_TAGS: [&'static str; 8] = [
        "joined",
        "playerJoined",
        "playerLeft",
        "playerInput",
        "gameStateUpdate",
        "playerReady",
        "pong",
        "error",
    ];
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_wire_shape() {
        let msg = ClientMessage::join("ROOM42", "p1", None);
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "join");
        assert_eq!(value["roomId"], "ROOM42");
        assert_eq!(value["playerId"], "p1");
        assert!(value.get("playerName").is_none());
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_input_wire_shape() {
        let input = PlayerInput {
            x: 0.3,
            y: -0.7,
            fire: true,
            timestamp: 9,
        };
        let msg = ClientMessage::input("p1", input, 12);
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "input");
        assert_eq!(value["frameNumber"], 12);
        assert_eq!(value["input"]["x"], 0.3);
        assert_eq!(value["input"]["fire"], true);

        let parsed = ClientMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_client_tags() {
        let msgs = vec![
            ClientMessage::state("p1", GameStateSnapshot::default()),
            ClientMessage::ready("p1", true),
            ClientMessage::ping("p1"),
            ClientMessage::heartbeat("p1"),
        ];

        for msg in msgs {
            let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
            assert_eq!(value["type"], msg.kind());
        }
    }

    #[test]
    fn test_decode_player_joined() {
        let text = r#"{"type":"playerJoined","playerId":"p2","playerName":"Ada","isHost":true,"timestamp":1}"#;
        match ServerMessage::decode(text) {
            Decoded::Message(ServerMessage::PlayerJoined(info)) => {
                assert_eq!(info.player_id, "p2");
                assert_eq!(info.player_name, "Ada");
                assert_eq!(info.is_host, Some(true));
            }
            other => panic!("Wrong decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_player_joined_without_role() {
        let text = r#"{"type":"playerJoined","playerId":"p2","playerName":"Ada"}"#;
        match ServerMessage::decode(text) {
            Decoded::Message(ServerMessage::PlayerJoined(info)) => assert_eq!(info.is_host, None),
            other => panic!("Wrong decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_joined_optional_role() {
        let text = r#"{"type":"joined","roomId":"R"}"#;
        match ServerMessage::decode(text) {
            Decoded::Message(ServerMessage::Joined(info)) => {
                assert_eq!(info.room_id, "R");
                assert_eq!(info.is_host, None);
                assert_eq!(info.player_index, None);
            }
            other => panic!("Wrong decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_player_input_keeps_raw_payload() {
        let text = r#"{"type":"playerInput","playerId":"p2","input":{"x":"bad"}}"#;
        match ServerMessage::decode(text) {
            Decoded::Message(ServerMessage::PlayerInput(info)) => {
                assert_eq!(info.input, json!({"x": "bad"}));
                assert_eq!(info.frame_number, None);
            }
            other => panic!("Wrong decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_pong_and_error() {
        match ServerMessage::decode(r#"{"type":"pong","timestamp":100,"serverTime":250}"#) {
            Decoded::Message(ServerMessage::Pong(p)) => {
                assert_eq!(p.timestamp, 100);
                assert_eq!(p.server_time, Some(250));
            }
            other => panic!("Wrong decode: {:?}", other),
        }

        match ServerMessage::decode(r#"{"type":"error","message":"room full"}"#) {
            Decoded::Message(ServerMessage::Error(e)) => assert_eq!(e.message, "room full"),
            other => panic!("Wrong decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_tag() {
        match ServerMessage::decode(r#"{"type":"chat","text":"hi"}"#) {
            Decoded::Unknown(tag) => assert_eq!(tag, "chat"),
            other => panic!("Wrong decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(ServerMessage::decode("{not json"), Decoded::Malformed(_)));
        assert!(matches!(ServerMessage::decode(r#"{"no":"tag"}"#), Decoded::Malformed(_)));
        // Known tag, missing field
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"playerLeft"}"#),
            Decoded::Malformed(_)
        ));
    }

    #[test]
    fn test_state_update_round_trip() {
        let msg = ServerMessage::GameStateUpdate(GameStateInfo {
            snapshot: GameStateSnapshot {
                frame_number: 77,
                bullets_count: 12,
                ..Default::default()
            },
            timestamp: 5,
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("gameStateUpdate"));
        assert!(json.contains("bulletsCount"));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }
}
