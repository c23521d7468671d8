//! I/O utilities for sending and receiving protocol messages
//!
//! The bridge between the protocol enums (`ClientMessage`, `ServerMessage`)
//! and the wire format (framing).

use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::framing::{
    DEFAULT_FRAME_TIMEOUT, DEFAULT_IDLE_TIMEOUT, FrameError, FrameReader, FrameWriter, MessageId,
    RawFrame,
};
use crate::protocol::{ClientMessage, ServerMessage};

// =============================================================================
// Error Conversion
// =============================================================================

impl From<FrameError> for io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(msg) => io::Error::other(msg),
            FrameError::ConnectionClosed => {
                io::Error::new(io::ErrorKind::ConnectionReset, "connection closed")
            }
            FrameError::FrameTimeout | FrameError::IdleTimeout => {
                io::Error::new(io::ErrorKind::TimedOut, err.to_string())
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

// =============================================================================
// Message Sending
// =============================================================================

/// Send a `ClientMessage` to the server
///
/// Generates a new message ID and returns it for response correlation.
pub async fn send_client_message<W>(
    writer: &mut FrameWriter<W>,
    message: &ClientMessage,
) -> io::Result<MessageId>
where
    W: AsyncWriteExt + Unpin,
{
    let message_id = MessageId::new();
    send_client_message_with_id(writer, message, message_id).await?;
    Ok(message_id)
}

/// Send a `ClientMessage` with a specific message ID
pub async fn send_client_message_with_id<W>(
    writer: &mut FrameWriter<W>,
    message: &ClientMessage,
    message_id: MessageId,
) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let message_type = client_message_type(message);
    let payload =
        serde_json::to_vec(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let frame = RawFrame::new(message_id, message_type.to_string(), payload);
    writer.write_frame(&frame).await.map_err(Into::into)
}

/// Send a `ServerMessage` with a fresh message ID
///
/// For responses, use [`send_server_message_with_id`] to echo the request's ID.
pub async fn send_server_message<W>(
    writer: &mut FrameWriter<W>,
    message: &ServerMessage,
) -> io::Result<MessageId>
where
    W: AsyncWriteExt + Unpin,
{
    let message_id = MessageId::new();
    send_server_message_with_id(writer, message, message_id).await?;
    Ok(message_id)
}

/// Send a `ServerMessage` with a specific message ID
pub async fn send_server_message_with_id<W>(
    writer: &mut FrameWriter<W>,
    message: &ServerMessage,
    message_id: MessageId,
) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let message_type = server_message_type(message);
    let payload =
        serde_json::to_vec(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let frame = RawFrame::new(message_id, message_type.to_string(), payload);
    writer.write_frame(&frame).await.map_err(Into::into)
}

// =============================================================================
// Message Receiving
// =============================================================================

/// Received client message with its message ID
#[derive(Debug)]
pub struct ReceivedClientMessage {
    pub message_id: MessageId,
    pub message: ClientMessage,
}

/// Received server message with its message ID
#[derive(Debug)]
pub struct ReceivedServerMessage {
    pub message_id: MessageId,
    pub message: ServerMessage,
}

/// Read a `ClientMessage` from the stream with a frame timeout
///
/// Waits indefinitely for the first byte, then the whole frame must arrive
/// within 60 seconds.
///
/// Returns `Ok(None)` if the connection was cleanly closed.
pub async fn read_client_message_with_timeout<R>(
    reader: &mut FrameReader<R>,
) -> Result<Option<ReceivedClientMessage>, FrameError>
where
    R: AsyncReadExt + Unpin,
{
    let Some(frame) = reader
        .read_frame_with_timeout(DEFAULT_FRAME_TIMEOUT)
        .await?
    else {
        return Ok(None);
    };

    parse_client_frame(frame)
        .map(Some)
        .map_err(|e| FrameError::InvalidJson(e.to_string()))
}

/// Read a `ClientMessage` with a bound on the idle wait too
///
/// Used until a connection has joined a room, so silent sockets are
/// dropped.
///
/// Returns `Ok(None)` if the connection was cleanly closed.
pub async fn read_client_message_with_full_timeout<R>(
    reader: &mut FrameReader<R>,
    idle_timeout: Option<Duration>,
    frame_timeout: Option<Duration>,
) -> Result<Option<ReceivedClientMessage>, FrameError>
where
    R: AsyncReadExt + Unpin,
{
    let idle = idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT);
    let frame_time = frame_timeout.unwrap_or(DEFAULT_FRAME_TIMEOUT);

    let Some(frame) = reader
        .read_frame_with_full_timeout(idle, frame_time)
        .await?
    else {
        return Ok(None);
    };

    parse_client_frame(frame)
        .map(Some)
        .map_err(|e| FrameError::InvalidJson(e.to_string()))
}

/// Read a `ServerMessage` from the stream
///
/// Returns `Ok(None)` if the connection was cleanly closed.
pub async fn read_server_message<R>(
    reader: &mut FrameReader<R>,
) -> io::Result<Option<ReceivedServerMessage>>
where
    R: AsyncReadExt + Unpin,
{
    let Some(frame) = reader.read_frame().await? else {
        return Ok(None);
    };

    parse_server_frame(frame).map(Some)
}

fn parse_client_frame(frame: RawFrame) -> io::Result<ReceivedClientMessage> {
    let message: ClientMessage = serde_json::from_slice(&frame.payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid JSON: {e}")))?;

    let expected_type = client_message_type(&message);
    if frame.message_type != expected_type {
        return Err(type_mismatch(&frame.message_type, expected_type));
    }

    Ok(ReceivedClientMessage {
        message_id: frame.message_id,
        message,
    })
}

fn parse_server_frame(frame: RawFrame) -> io::Result<ReceivedServerMessage> {
    let message: ServerMessage = serde_json::from_slice(&frame.payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid JSON: {e}")))?;

    let expected_type = server_message_type(&message);
    if frame.message_type != expected_type {
        return Err(type_mismatch(&frame.message_type, expected_type));
    }

    Ok(ReceivedServerMessage {
        message_id: frame.message_id,
        message,
    })
}

fn type_mismatch(frame_type: &str, json_type: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("frame type mismatch: frame says '{frame_type}' but JSON is '{json_type}'"),
    )
}

// =============================================================================
// Message Type Helpers
// =============================================================================

/// Get the type name for a client message (matches enum variant name)
#[must_use]
pub fn client_message_type(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::CreateRoom { .. } => "CreateRoom",
        ClientMessage::JoinRoom { .. } => "JoinRoom",
        ClientMessage::RejoinRoom { .. } => "RejoinRoom",
        ClientMessage::LeaveRoom { .. } => "LeaveRoom",
        ClientMessage::Signal { .. } => "Signal",
        ClientMessage::RelayChunk { .. } => "RelayChunk",
        ClientMessage::RequestRelayChunk { .. } => "RequestRelayChunk",
        ClientMessage::FileTransferComplete { .. } => "FileTransferComplete",
        ClientMessage::ServerStats => "ServerStats",
    }
}

/// Get the type name for a server message (matches enum variant name)
#[must_use]
pub fn server_message_type(message: &ServerMessage) -> &'static str {
    match message {
        ServerMessage::CreateRoomResponse { .. } => "CreateRoomResponse",
        ServerMessage::JoinRoomResponse { .. } => "JoinRoomResponse",
        ServerMessage::RejoinRoomResponse { .. } => "RejoinRoomResponse",
        ServerMessage::LeaveRoomResponse { .. } => "LeaveRoomResponse",
        ServerMessage::Signal { .. } => "Signal",
        ServerMessage::RelayChunkResponse { .. } => "RelayChunkResponse",
        ServerMessage::RelayChunkAvailable { .. } => "RelayChunkAvailable",
        ServerMessage::RelayChunkData { .. } => "RelayChunkData",
        ServerMessage::RelayChunkError { .. } => "RelayChunkError",
        ServerMessage::FileTransferCompleteResponse { .. } => "FileTransferCompleteResponse",
        ServerMessage::PeerJoined { .. } => "PeerJoined",
        ServerMessage::PeerLeft { .. } => "PeerLeft",
        ServerMessage::PeerReconnected { .. } => "PeerReconnected",
        ServerMessage::TransferModeSelected { .. } => "TransferModeSelected",
        ServerMessage::RoomClosing { .. } => "RoomClosing",
        ServerMessage::RoomClosed { .. } => "RoomClosed",
        ServerMessage::ServerStatsResponse { .. } => "ServerStatsResponse",
        ServerMessage::Error { .. } => "Error",
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FileInfo, Role};
    use std::io::Cursor;
    use tokio::io::BufReader;

    fn reader_for(buffer: Vec<u8>) -> FrameReader<BufReader<Cursor<Vec<u8>>>> {
        FrameReader::new(BufReader::new(Cursor::new(buffer)))
    }

    #[test]
    fn test_message_type_names() {
        assert_eq!(
            client_message_type(&ClientMessage::LeaveRoom {
                room_id: "ABC123".to_string()
            }),
            "LeaveRoom"
        );
        assert_eq!(
            server_message_type(&ServerMessage::RoomClosed {
                room_id: "ABC123".to_string()
            }),
            "RoomClosed"
        );
    }

    #[tokio::test]
    async fn test_send_and_receive_client_message() {
        let message = ClientMessage::CreateRoom {
            file_info: FileInfo {
                name: "notes.txt".to_string(),
                size: 1234,
                mime_type: "text/plain".to_string(),
            },
            local_address: Some("192.168.1.5".to_string()),
        };

        let mut buffer = Vec::new();
        let sent_id;
        {
            let mut writer = FrameWriter::new(Cursor::new(&mut buffer));
            sent_id = send_client_message(&mut writer, &message).await.unwrap();
        }

        let mut reader = reader_for(buffer);
        let received = read_client_message_with_timeout(&mut reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.message_id, sent_id);
        match received.message {
            ClientMessage::CreateRoom { file_info, .. } => {
                assert_eq!(file_info.name, "notes.txt");
                assert_eq!(file_info.size, 1234);
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_server_message_with_id() {
        let message = ServerMessage::FileTransferCompleteResponse {
            success: true,
            error: None,
            error_kind: None,
        };
        let specific_id = MessageId::new();

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(Cursor::new(&mut buffer));
            send_server_message_with_id(&mut writer, &message, specific_id)
                .await
                .unwrap();
        }

        let mut reader = reader_for(buffer);
        let received = read_server_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(received.message_id, specific_id);
        assert!(matches!(
            received.message,
            ServerMessage::FileTransferCompleteResponse { success: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_frame_type_mismatch_client_message() {
        // Frame header says LeaveRoom but the JSON tag is ServerStats
        let id = MessageId::new();
        let payload = r#"{"type":"ServerStats"}"#;
        let frame_data = format!("FY|9|LeaveRoom|{}|{}|{}\n", id, payload.len(), payload);
        let mut reader = reader_for(frame_data.into_bytes());

        let result = read_client_message_with_timeout(&mut reader).await;
        assert!(matches!(result, Err(FrameError::InvalidJson(msg)) if msg.contains("mismatch")));
    }

    #[tokio::test]
    async fn test_invalid_json_server_message() {
        let id = MessageId::new();
        let frame_data = format!("FY|5|Error|{id}|3|{{{{{{\n");
        let mut reader = reader_for(frame_data.into_bytes());

        let err = read_server_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_clean_close_returns_none() {
        let mut reader = reader_for(Vec::new());
        assert!(read_server_message(&mut reader).await.unwrap().is_none());
        assert!(
            read_client_message_with_full_timeout(&mut reader, None, None)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_completion_report_round_trip() {
        let message = ClientMessage::FileTransferComplete {
            room_id: "ABC123".to_string(),
            role: Role::Receiver,
            transfer_id: None,
        };
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(Cursor::new(&mut buffer));
            send_client_message(&mut writer, &message).await.unwrap();
        }
        let mut reader = reader_for(buffer);
        let received = read_client_message_with_timeout(&mut reader)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            received.message,
            ClientMessage::FileTransferComplete {
                role: Role::Receiver,
                ..
            }
        ));
    }

    #[test]
    fn test_frame_error_conversion() {
        let err: io::Error = FrameError::ConnectionClosed.into();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        let err: io::Error = FrameError::FrameTimeout.into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        let err: io::Error = FrameError::InvalidMagic.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
