//! Handler for RequestRelayChunk command - pull a buffered chunk

use std::io;

use tokio::io::AsyncWrite;

use ferry_common::protocol::ServerMessage;
use ferry_common::validators;

use super::{HandlerContext, err_room_code, err_transfer_id};

/// Parameters of a RequestRelayChunk pull
pub struct RelayPullRequest {
    pub room_id: String,
    pub transfer_id: String,
    pub chunk_index: u64,
    /// Leading chunks the puller already holds
    pub held_below: u64,
}

/// Handle RequestRelayChunk command
///
/// Replies with the chunk bytes, or with `RelayChunkError` when the chunk is
/// not (or no longer) buffered.
pub async fn handle_request_relay_chunk<W>(
    request: RelayPullRequest,
    ctx: &mut HandlerContext<'_, W>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let RelayPullRequest {
        room_id,
        transfer_id,
        chunk_index,
        held_below,
    } = request;

    let validated = validators::normalize_room_code(&room_id)
        .map_err(err_room_code)
        .and_then(|code| {
            validators::validate_transfer_id(&transfer_id)
                .map(|()| code)
                .map_err(err_transfer_id)
        });
    let room_id = match validated {
        Ok(code) => code,
        Err(reason) => {
            let response = ServerMessage::RelayChunkError {
                transfer_id,
                chunk_index,
                reason,
            };
            return ctx.send_message(&response).await;
        }
    };

    let response = match ctx
        .rooms
        .relay_fetch(&room_id, ctx.member_id, &transfer_id, chunk_index, held_below)
        .await
    {
        Ok(payload) => ServerMessage::RelayChunkData {
            transfer_id,
            chunk_index,
            payload: payload.as_ref().clone(),
        },
        Err(e) => {
            tracing::debug!(room = %room_id, chunk_index, error = %e, "relay chunk unavailable");
            ServerMessage::RelayChunkError {
                transfer_id,
                chunk_index,
                reason: e.to_string(),
            }
        }
    };
    ctx.send_message(&response).await
}
