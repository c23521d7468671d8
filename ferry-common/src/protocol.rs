//! Protocol definitions for Ferry
//!
//! All signaling messages are JSON payloads inside `FY|` frames over TCP.
//! The enums are internally tagged with `"type"`, and the tag must equal
//! the frame's type field.
//!
//! Chunk bytes that travel inside JSON (relay mode) are base64 encoded.

use std::fmt;

use serde::{Deserialize, Serialize};

/// File description supplied by the host when a room is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub mime_type: String,
}

/// Transport chosen for a room once both endpoints are known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMode {
    /// Same private subnet, plain TCP between the endpoints
    DirectP2p,
    /// Negotiated peer-to-peer channel that may fall back to the relay
    WebrtcP2p,
    /// Chunks pass through the server's relay buffer
    ServerRelay,
}

impl TransferMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectP2p => "direct-p2p",
            Self::WebrtcP2p => "webrtc-p2p",
            Self::ServerRelay => "server-relay",
        }
    }

    /// Whether chunk traffic flows over a peer-to-peer data channel
    #[must_use]
    pub fn is_peer_to_peer(&self) -> bool {
        !matches!(self, Self::ServerRelay)
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a member reports as complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => f.write_str("sender"),
            Self::Receiver => f.write_str("receiver"),
        }
    }
}

/// Direction of a transfer session from the local endpoint's view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    /// The role this direction reports on completion
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::Send => Role::Sender,
            Self::Receive => Role::Receiver,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => f.write_str("send"),
            Self::Receive => f.write_str("receive"),
        }
    }
}

/// Client request messages
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Create a room for one file; the caller becomes host
    CreateRoom {
        file_info: FileInfo,
        /// Address the client believes it is reachable on
        #[serde(default, skip_serializing_if = "Option::is_none")]
        local_address: Option<String>,
    },
    /// Join a room by code
    JoinRoom {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        local_address: Option<String>,
    },
    /// Re-enter a room after a lost connection
    RejoinRoom {
        room_id: String,
        direction: Direction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_id: Option<String>,
        last_chunk: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        local_address: Option<String>,
    },
    /// Leave a room
    LeaveRoom { room_id: String },
    /// Opaque negotiation payload for the other member
    Signal {
        room_id: String,
        payload: serde_json::Value,
    },
    /// Store one chunk in the relay buffer
    ///
    /// `chunk_size` is the sender's chunk size; the last chunk may be shorter.
    RelayChunk {
        room_id: String,
        transfer_id: String,
        chunk_index: u64,
        total_chunks: u64,
        #[serde(default)]
        chunk_size: u64,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
    /// Pull one chunk from the relay buffer
    ///
    /// `held_below` is how many leading chunks the receiver already holds;
    /// the server may discard those when it needs room.
    RequestRelayChunk {
        room_id: String,
        transfer_id: String,
        chunk_index: u64,
        #[serde(default)]
        held_below: u64,
    },
    /// Report a role complete
    FileTransferComplete {
        room_id: String,
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_id: Option<String>,
    },
    /// Live room and connection counts
    ServerStats,
}

impl fmt::Debug for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Chunk bytes stay out of logs
            ClientMessage::RelayChunk {
                room_id,
                transfer_id,
                chunk_index,
                total_chunks,
                chunk_size,
                payload,
            } => f
                .debug_struct("RelayChunk")
                .field("room_id", room_id)
                .field("transfer_id", transfer_id)
                .field("chunk_index", chunk_index)
                .field("total_chunks", total_chunks)
                .field("chunk_size", chunk_size)
                .field("payload_len", &payload.len())
                .finish(),
            ClientMessage::CreateRoom {
                file_info,
                local_address,
            } => f
                .debug_struct("CreateRoom")
                .field("file_info", file_info)
                .field("local_address", local_address)
                .finish(),
            ClientMessage::JoinRoom {
                room_id,
                local_address,
            } => f
                .debug_struct("JoinRoom")
                .field("room_id", room_id)
                .field("local_address", local_address)
                .finish(),
            ClientMessage::RejoinRoom {
                room_id,
                direction,
                transfer_id,
                last_chunk,
                local_address,
            } => f
                .debug_struct("RejoinRoom")
                .field("room_id", room_id)
                .field("direction", direction)
                .field("transfer_id", transfer_id)
                .field("last_chunk", last_chunk)
                .field("local_address", local_address)
                .finish(),
            ClientMessage::LeaveRoom { room_id } => {
                f.debug_struct("LeaveRoom").field("room_id", room_id).finish()
            }
            ClientMessage::Signal { room_id, payload } => f
                .debug_struct("Signal")
                .field("room_id", room_id)
                .field("payload", payload)
                .finish(),
            ClientMessage::RequestRelayChunk {
                room_id,
                transfer_id,
                chunk_index,
                held_below,
            } => f
                .debug_struct("RequestRelayChunk")
                .field("room_id", room_id)
                .field("transfer_id", transfer_id)
                .field("chunk_index", chunk_index)
                .field("held_below", held_below)
                .finish(),
            ClientMessage::FileTransferComplete {
                room_id,
                role,
                transfer_id,
            } => f
                .debug_struct("FileTransferComplete")
                .field("room_id", room_id)
                .field("role", role)
                .field("transfer_id", transfer_id)
                .finish(),
            ClientMessage::ServerStats => f.write_str("ServerStats"),
        }
    }
}

/// Server response and notification messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    CreateRoomResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        /// Identifier the server assigned to this connection
        #[serde(default, skip_serializing_if = "Option::is_none")]
        member_id: Option<u32>,
    },
    JoinRoomResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<TransferMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_info: Option<FileInfo>,
        /// The joiner is the room's host
        #[serde(default)]
        self_transfer: bool,
    },
    RejoinRoomResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<TransferMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_info: Option<FileInfo>,
        /// Relay chunk indices buffered for the rejoining transfer, ascending
        #[serde(default)]
        buffered_chunks: Vec<u64>,
    },
    LeaveRoomResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
    },
    /// Negotiation payload forwarded from the other member
    Signal {
        from: u32,
        payload: serde_json::Value,
    },
    /// Acknowledges a stored relay chunk
    RelayChunkResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
        chunk_index: u64,
    },
    RelayChunkAvailable {
        transfer_id: String,
        chunk_index: u64,
        total_chunks: u64,
        chunk_size: u64,
    },
    RelayChunkData {
        transfer_id: String,
        chunk_index: u64,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
    RelayChunkError {
        transfer_id: String,
        chunk_index: u64,
        reason: String,
    },
    /// Acknowledges a completion report
    FileTransferCompleteResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
    },
    PeerJoined {
        member_id: u32,
    },
    PeerLeft {
        member_id: u32,
    },
    PeerReconnected {
        member_id: u32,
        direction: Direction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_id: Option<String>,
        last_chunk: u64,
    },
    TransferModeSelected {
        mode: TransferMode,
        reason: String,
        fallback_to_relay: bool,
        compression: bool,
    },
    RoomClosing {
        room_id: String,
    },
    RoomClosed {
        room_id: String,
    },
    ServerStatsResponse {
        rooms: usize,
        connections: usize,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },
}

/// Serde adapter storing byte vectors as standard base64 strings
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_mode_wire_names() {
        assert_eq!(
            serde_json::to_string(&TransferMode::DirectP2p).unwrap(),
            "\"direct-p2p\""
        );
        assert_eq!(
            serde_json::to_string(&TransferMode::WebrtcP2p).unwrap(),
            "\"webrtc-p2p\""
        );
        assert_eq!(
            serde_json::from_str::<TransferMode>("\"server-relay\"").unwrap(),
            TransferMode::ServerRelay
        );
        assert!(!TransferMode::ServerRelay.is_peer_to_peer());
        assert!(TransferMode::WebrtcP2p.is_peer_to_peer());
    }

    #[test]
    fn test_client_message_tagging() {
        let msg = ClientMessage::JoinRoom {
            room_id: "ABC123".to_string(),
            local_address: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"JoinRoom","room_id":"ABC123"}"#);

        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"ServerStats"}"#).unwrap();
        assert!(matches!(parsed, ClientMessage::ServerStats));
    }

    #[test]
    fn test_relay_chunk_payload_is_base64() {
        let msg = ClientMessage::RelayChunk {
            room_id: "ABC123".to_string(),
            transfer_id: "transfer-0011223344556677".to_string(),
            chunk_index: 3,
            total_chunks: 9,
            chunk_size: 4,
            payload: vec![0, 1, 2, 255],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["payload"], "AAEC/w==");

        let back: ClientMessage = serde_json::from_value(json).unwrap();
        match back {
            ClientMessage::RelayChunk { payload, .. } => assert_eq!(payload, vec![0, 1, 2, 255]),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_bad_base64_rejected() {
        let json = r#"{"type":"RelayChunkData","transfer_id":"t","chunk_index":0,"payload":"***"}"#;
        assert!(serde_json::from_str::<ServerMessage>(json).is_err());
    }

    #[test]
    fn test_debug_hides_chunk_bytes() {
        let msg = ClientMessage::RelayChunk {
            room_id: "ABC123".to_string(),
            transfer_id: "t".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            chunk_size: 16,
            payload: vec![42; 16],
        };
        let debug = format!("{msg:?}");
        assert!(debug.contains("payload_len: 16"));
        assert!(!debug.contains("42, 42"));
    }

    #[test]
    fn test_join_response_defaults() {
        let json = r#"{"type":"JoinRoomResponse","success":false,"error":"room not found"}"#;
        match serde_json::from_str::<ServerMessage>(json).unwrap() {
            ServerMessage::JoinRoomResponse {
                success,
                self_transfer,
                mode,
                ..
            } => {
                assert!(!success);
                assert!(!self_transfer);
                assert!(mode.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_direction_role() {
        assert_eq!(Direction::Send.role(), Role::Sender);
        assert_eq!(Direction::Receive.role(), Role::Receiver);
        assert_eq!(serde_json::to_string(&Role::Receiver).unwrap(), "\"receiver\"");
    }
}
