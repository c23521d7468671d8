//! Handler for RelayChunk command - buffer an uploaded chunk

use std::io;

use tokio::io::AsyncWrite;

use ferry_common::ErrorKind;
use ferry_common::protocol::ServerMessage;
use ferry_common::validators;

use super::{HandlerContext, err_room_code, err_transfer_id};

/// Parameters of a RelayChunk upload
pub struct RelayChunkRequest {
    pub room_id: String,
    pub transfer_id: String,
    pub chunk_index: u64,
    pub total_chunks: u64,
    /// Sender's chunk size, 0 when not given
    pub chunk_size: u64,
    pub payload: Vec<u8>,
}

/// Handle RelayChunk command
///
/// Stores the chunk, announces it to the other member and acknowledges the
/// uploader.
pub async fn handle_relay_chunk<W>(
    request: RelayChunkRequest,
    ctx: &mut HandlerContext<'_, W>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let RelayChunkRequest {
        room_id,
        transfer_id,
        chunk_index,
        total_chunks,
        chunk_size,
        payload,
    } = request;

    let room_id = match validators::normalize_room_code(&room_id) {
        Ok(code) => code,
        Err(e) => {
            return ctx
                .send_message(&failure(err_room_code(e), ErrorKind::Invalid, chunk_index))
                .await;
        }
    };
    if let Err(e) = validators::validate_transfer_id(&transfer_id) {
        return ctx
            .send_message(&failure(err_transfer_id(e), ErrorKind::Invalid, chunk_index))
            .await;
    }

    // A short last chunk must not shrink the announced size
    let chunk_size = chunk_size.max(payload.len() as u64);
    let notify = match ctx
        .rooms
        .relay_store(
            &room_id,
            ctx.member_id,
            &transfer_id,
            chunk_index,
            total_chunks,
            payload,
        )
        .await
    {
        Ok(notify) => notify,
        Err(e) => {
            tracing::debug!(room = %room_id, chunk_index, error = %e, "relay chunk rejected");
            return ctx
                .send_message(&failure(e.to_string(), e.kind(), chunk_index))
                .await;
        }
    };

    let available = ServerMessage::RelayChunkAvailable {
        transfer_id,
        chunk_index,
        total_chunks,
        chunk_size,
    };
    ctx.members.send_to_all(&notify, &available).await;

    let response = ServerMessage::RelayChunkResponse {
        success: true,
        error: None,
        error_kind: None,
        chunk_index,
    };
    ctx.send_message(&response).await
}

fn failure(message: String, kind: ErrorKind, chunk_index: u64) -> ServerMessage {
    ServerMessage::RelayChunkResponse {
        success: false,
        error: Some(message),
        error_kind: Some(kind.into()),
        chunk_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{
        create_room, create_test_context, next_notification, read_server_message,
    };
    use crate::ServerConfig;
    use crate::handlers::testing::create_test_context_with;
    use ferry_common::{ERROR_KIND_BUSY, ERROR_KIND_INVALID, ERROR_KIND_NOT_MEMBER};

    fn upload(room_id: &str, index: u64, total: u64, payload: Vec<u8>) -> RelayChunkRequest {
        RelayChunkRequest {
            room_id: room_id.to_string(),
            transfer_id: "transfer-abc".to_string(),
            chunk_index: index,
            total_chunks: total,
            chunk_size: 0,
            payload,
        }
    }

    #[tokio::test]
    async fn test_relay_chunk_announced_and_acked() {
        let mut test_ctx = create_test_context().await;
        let code = create_room(&test_ctx, "8.8.8.8", 10).await;
        let (guest, mut guest_rx) = test_ctx.add_member().await;
        test_ctx
            .rooms
            .join(&code, guest, "1.1.1.1".parse().unwrap())
            .await
            .unwrap();

        handle_relay_chunk(
            upload(&code, 1, 2, vec![7; 300]),
            &mut test_ctx.handler_context(),
        )
        .await
        .unwrap();

        match read_server_message(&mut test_ctx).await {
            ServerMessage::RelayChunkResponse {
                success,
                chunk_index,
                ..
            } => {
                assert!(success);
                assert_eq!(chunk_index, 1);
            }
            other => panic!("Expected RelayChunkResponse, got {:?}", other),
        }
        match next_notification(&mut guest_rx).await {
            ServerMessage::RelayChunkAvailable {
                transfer_id,
                chunk_index,
                total_chunks,
                chunk_size,
            } => {
                assert_eq!(transfer_id, "transfer-abc");
                assert_eq!(chunk_index, 1);
                assert_eq!(total_chunks, 2);
                assert_eq!(chunk_size, 300);
            }
            other => panic!("Expected RelayChunkAvailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_last_chunk_announces_nominal_size() {
        let mut test_ctx = create_test_context().await;
        let code = create_room(&test_ctx, "8.8.8.8", 10).await;
        let (guest, mut guest_rx) = test_ctx.add_member().await;
        test_ctx
            .rooms
            .join(&code, guest, "1.1.1.1".parse().unwrap())
            .await
            .unwrap();

        // The last chunk goes out before any full-size one
        let request = RelayChunkRequest {
            chunk_size: 300,
            ..upload(&code, 2, 3, vec![7; 40])
        };
        handle_relay_chunk(request, &mut test_ctx.handler_context())
            .await
            .unwrap();
        read_server_message(&mut test_ctx).await;

        match next_notification(&mut guest_rx).await {
            ServerMessage::RelayChunkAvailable {
                chunk_index,
                chunk_size,
                ..
            } => {
                assert_eq!(chunk_index, 2);
                assert_eq!(chunk_size, 300);
            }
            other => panic!("Expected RelayChunkAvailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_relay_buffer_is_busy() {
        let config = ServerConfig {
            relay_buffer_limit: 64,
            ..ServerConfig::default()
        };
        let mut test_ctx = create_test_context_with(config).await;
        let code = create_room(&test_ctx, "8.8.8.8", 10).await;

        handle_relay_chunk(upload(&code, 0, 2, vec![1; 64]), &mut test_ctx.handler_context())
            .await
            .unwrap();
        read_server_message(&mut test_ctx).await;
        handle_relay_chunk(upload(&code, 1, 2, vec![2; 8]), &mut test_ctx.handler_context())
            .await
            .unwrap();

        match read_server_message(&mut test_ctx).await {
            ServerMessage::RelayChunkResponse {
                success,
                error_kind,
                chunk_index,
                ..
            } => {
                assert!(!success);
                assert_eq!(error_kind.as_deref(), Some(ERROR_KIND_BUSY));
                assert_eq!(chunk_index, 1);
            }
            other => panic!("Expected RelayChunkResponse, got {:?}", other),
        }
        assert!(
            test_ctx
                .rooms
                .relay_fetch(&code, test_ctx.member_id, "transfer-abc", 1, 0)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_relay_chunk_index_out_of_range() {
        let mut test_ctx = create_test_context().await;
        let code = create_room(&test_ctx, "8.8.8.8", 10).await;

        handle_relay_chunk(upload(&code, 5, 5, vec![1]), &mut test_ctx.handler_context())
            .await
            .unwrap();

        match read_server_message(&mut test_ctx).await {
            ServerMessage::RelayChunkResponse {
                success,
                error_kind,
                ..
            } => {
                assert!(!success);
                assert_eq!(error_kind.as_deref(), Some(ERROR_KIND_INVALID));
            }
            other => panic!("Expected RelayChunkResponse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relay_chunk_requires_membership() {
        let mut test_ctx = create_test_context().await;
        let code = create_room(&test_ctx, "8.8.8.8", 10).await;
        let (other, other_rx) = test_ctx.add_member().await;
        test_ctx.act_as(other, other_rx);

        handle_relay_chunk(upload(&code, 0, 1, vec![1]), &mut test_ctx.handler_context())
            .await
            .unwrap();

        match read_server_message(&mut test_ctx).await {
            ServerMessage::RelayChunkResponse { error_kind, .. } => {
                assert_eq!(error_kind.as_deref(), Some(ERROR_KIND_NOT_MEMBER));
            }
            other => panic!("Expected RelayChunkResponse, got {:?}", other),
        }
    }
}
