//! Room requests on the signaling connection
//!
//! Thin wrappers turning request/response pairs into `TransferError`s.

use ferry_common::protocol::{
    ClientMessage, Direction, FileInfo, Role, ServerMessage, TransferMode,
};

use super::errors::{ProtocolError, SessionError, TransferError};
use crate::network::SignalingClient;

/// Result of joining a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedRoom {
    pub room_id: String,
    pub file_info: FileInfo,
    /// Known immediately when both members are present
    pub mode: Option<TransferMode>,
    pub self_transfer: bool,
}

/// Result of re-entering a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejoinedRoom {
    pub mode: Option<TransferMode>,
    pub file_info: Option<FileInfo>,
    pub buffered_chunks: Vec<u64>,
}

pub async fn create_room(
    client: &SignalingClient,
    file_info: FileInfo,
    local_address: Option<String>,
) -> Result<String, TransferError> {
    let request = ClientMessage::CreateRoom {
        file_info,
        local_address,
    };
    match client.request(request).await? {
        ServerMessage::CreateRoomResponse {
            success: true,
            room_id: Some(room_id),
            ..
        } => Ok(room_id),
        ServerMessage::CreateRoomResponse {
            error, error_kind, ..
        } => Err(SessionError::from_response(error_kind.as_deref(), error).into()),
        other => Err(unexpected(other)),
    }
}

pub async fn join_room(
    client: &SignalingClient,
    room_id: &str,
    local_address: Option<String>,
) -> Result<JoinedRoom, TransferError> {
    let request = ClientMessage::JoinRoom {
        room_id: room_id.to_string(),
        local_address,
    };
    match client.request(request).await? {
        ServerMessage::JoinRoomResponse {
            success: true,
            room_id: joined,
            mode,
            file_info: Some(file_info),
            self_transfer,
            ..
        } => Ok(JoinedRoom {
            room_id: joined.unwrap_or_else(|| room_id.to_ascii_uppercase()),
            file_info,
            mode,
            self_transfer,
        }),
        ServerMessage::JoinRoomResponse {
            success: true, ..
        } => Err(ProtocolError::Unexpected("join response without file info".to_string()).into()),
        ServerMessage::JoinRoomResponse {
            error, error_kind, ..
        } => Err(SessionError::from_response(error_kind.as_deref(), error).into()),
        other => Err(unexpected(other)),
    }
}

pub async fn rejoin_room(
    client: &SignalingClient,
    room_id: &str,
    direction: Direction,
    transfer_id: &str,
    last_chunk: u64,
    local_address: Option<String>,
) -> Result<RejoinedRoom, TransferError> {
    let request = ClientMessage::RejoinRoom {
        room_id: room_id.to_string(),
        direction,
        transfer_id: (!transfer_id.is_empty()).then(|| transfer_id.to_string()),
        last_chunk,
        local_address,
    };
    match client.request(request).await? {
        ServerMessage::RejoinRoomResponse {
            success: true,
            mode,
            file_info,
            buffered_chunks,
            ..
        } => Ok(RejoinedRoom {
            mode,
            file_info,
            buffered_chunks,
        }),
        ServerMessage::RejoinRoomResponse {
            error, error_kind, ..
        } => Err(SessionError::from_response(error_kind.as_deref(), error).into()),
        other => Err(unexpected(other)),
    }
}

/// Report a role complete
pub async fn report_complete(
    client: &SignalingClient,
    room_id: &str,
    role: Role,
    transfer_id: &str,
) -> Result<(), TransferError> {
    let request = ClientMessage::FileTransferComplete {
        room_id: room_id.to_string(),
        role,
        transfer_id: (!transfer_id.is_empty()).then(|| transfer_id.to_string()),
    };
    match client.request(request).await? {
        ServerMessage::FileTransferCompleteResponse { success: true, .. } => Ok(()),
        ServerMessage::FileTransferCompleteResponse {
            error, error_kind, ..
        } => Err(SessionError::from_response(error_kind.as_deref(), error).into()),
        other => Err(unexpected(other)),
    }
}

/// Leave without completing; failures only matter for logging
pub async fn leave_room(client: &SignalingClient, room_id: &str) {
    let request = ClientMessage::LeaveRoom {
        room_id: room_id.to_string(),
    };
    match client.request(request).await {
        Ok(ServerMessage::LeaveRoomResponse { success: true, .. }) => {}
        Ok(other) => tracing::debug!(room_id, response = ?other, "leave not acknowledged"),
        Err(e) => tracing::debug!(room_id, error = %e, "leave failed"),
    }
}

fn unexpected(message: ServerMessage) -> TransferError {
    match message {
        ServerMessage::Error { message, .. } => ProtocolError::Unexpected(message).into(),
        other => ProtocolError::Unexpected(format!("{other:?}")).into(),
    }
}
