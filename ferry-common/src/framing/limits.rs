//! Per-type payload limits for protocol messages

use std::collections::HashMap;
use std::sync::LazyLock;

use super::MAX_PAYLOAD_LENGTH;
use crate::MAX_CHUNK_SIZE;

/// Apply 20% padding to a limit for safety margin
const fn pad_limit(base: u64) -> u64 {
    // Integer math: multiply by 6 and divide by 5 equals 1.2x
    (base * 6) / 5
}

/// Base64 length of a maximum-sized chunk
const fn base64_chunk_size() -> u64 {
    MAX_CHUNK_SIZE.div_ceil(3) * 4
}

/// Maximum payload sizes for each message type
///
/// Enforced after parsing the frame header but before reading the payload,
/// so oversized messages are rejected without allocating.
///
/// A limit of `0` means no per-type limit; the global `MAX_PAYLOAD_LENGTH`
/// still applies. Used for server responses whose size grows with buffered
/// state.
///
/// `Signal` is a shared type name: the client and server variants carry
/// the same opaque payload in opposite directions and share one limit.
static MESSAGE_TYPE_LIMITS: LazyLock<HashMap<&'static str, u64>> = LazyLock::new(|| {
    let mut m = HashMap::new();

    // Client messages
    m.insert("CreateRoom", pad_limit(1100)); // name (255, escaped x2) + mime (128, x2) + address (64, x2) + overhead
    m.insert("JoinRoom", pad_limit(220)); // room (6) + address (64, x2) + overhead
    m.insert("RejoinRoom", pad_limit(360)); // room + direction + transfer_id (64) + last_chunk (20 digits) + address + overhead
    m.insert("LeaveRoom", pad_limit(50));
    m.insert("Signal", pad_limit(65_650)); // opaque payload (64 KiB) + room or from + overhead
    m.insert("RelayChunk", pad_limit(base64_chunk_size() + 260)); // base64 chunk + ids + indices
    m.insert("RequestRelayChunk", pad_limit(200));
    m.insert("FileTransferComplete", pad_limit(170));
    m.insert("ServerStats", pad_limit(22));

    // Server messages
    m.insert("CreateRoomResponse", pad_limit(2250)); // success + error (2048) + error_kind + room_id + member_id
    m.insert("JoinRoomResponse", pad_limit(3400)); // error (2048) + file_info (~1000) + mode + flags
    m.insert("RejoinRoomResponse", 0); // unlimited (buffered_chunks grows with the relay buffer)
    m.insert("LeaveRoomResponse", pad_limit(2200));
    m.insert("RelayChunkResponse", pad_limit(2250));
    m.insert("RelayChunkAvailable", pad_limit(200));
    m.insert("RelayChunkData", pad_limit(base64_chunk_size() + 160));
    m.insert("RelayChunkError", pad_limit(2300)); // reason (2048) + transfer_id + index
    m.insert("FileTransferCompleteResponse", pad_limit(2200));
    m.insert("PeerJoined", pad_limit(40));
    m.insert("PeerLeft", pad_limit(38));
    m.insert("PeerReconnected", pad_limit(200));
    m.insert("TransferModeSelected", pad_limit(400)); // reason text is server-generated and short
    m.insert("RoomClosing", pad_limit(45));
    m.insert("RoomClosed", pad_limit(44));
    m.insert("ServerStatsResponse", pad_limit(90));
    m.insert("Error", pad_limit(2154)); // message (2048) + command (32) + overhead

    // Data channel messages (metadata JSON or raw chunk bytes)
    m.insert("ChannelData", pad_limit(MAX_CHUNK_SIZE));

    m
});

/// Get the maximum payload size for a message type
///
/// Types without a per-type limit (and unknown types, which the reader
/// rejects before asking) fall back to `MAX_PAYLOAD_LENGTH`.
#[must_use]
pub fn max_payload_for_type(message_type: &str) -> u64 {
    match MESSAGE_TYPE_LIMITS.get(message_type) {
        Some(&limit) if limit > 0 => limit,
        _ => MAX_PAYLOAD_LENGTH,
    }
}

/// Check if a message type is known
#[must_use]
pub fn is_known_message_type(message_type: &str) -> bool {
    MESSAGE_TYPE_LIMITS.contains_key(message_type)
}

/// Get all known message type names
#[must_use]
pub fn known_message_types() -> Vec<&'static str> {
    MESSAGE_TYPE_LIMITS.keys().copied().collect()
}
