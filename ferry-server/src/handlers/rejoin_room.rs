//! Handler for RejoinRoom command

use std::io;

use tokio::io::AsyncWrite;

use ferry_common::ErrorKind;
use ferry_common::protocol::{Direction, ServerMessage};
use ferry_common::validators;

use super::{
    HandlerContext, err_address, err_room_code, err_transfer_id, room_error_to_message,
};

/// Parameters of a RejoinRoom request
pub struct RejoinRequest {
    pub room_id: String,
    pub direction: Direction,
    pub transfer_id: Option<String>,
    pub last_chunk: u64,
    pub local_address: Option<String>,
}

/// Handle RejoinRoom command - re-enter a room after a reconnect
pub async fn handle_rejoin_room<W>(
    request: RejoinRequest,
    joined: &mut bool,
    ctx: &mut HandlerContext<'_, W>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let RejoinRequest {
        room_id,
        direction,
        transfer_id,
        last_chunk,
        local_address,
    } = request;

    let room_id = match validators::normalize_room_code(&room_id) {
        Ok(code) => code,
        Err(e) => {
            return ctx
                .send_message(&failure(err_room_code(e), ErrorKind::Invalid))
                .await;
        }
    };
    if let Some(id) = &transfer_id
        && let Err(e) = validators::validate_transfer_id(id)
    {
        return ctx
            .send_message(&failure(err_transfer_id(e), ErrorKind::Invalid))
            .await;
    }
    if let Some(address) = &local_address
        && let Err(e) = validators::validate_address(address)
    {
        return ctx
            .send_message(&failure(err_address(e), ErrorKind::Invalid))
            .await;
    }

    let address = ctx.endpoint_address(local_address.as_deref());
    let result = match ctx
        .rooms
        .rejoin(
            &room_id,
            ctx.member_id,
            direction,
            transfer_id.as_deref(),
            address,
        )
        .await
    {
        Ok(result) => result,
        Err(e) => {
            tracing::info!(room = %room_id, member = ctx.member_id, error = %e, "rejoin rejected");
            let response = failure(room_error_to_message(&e, &room_id), e.kind());
            return ctx.send_message(&response).await;
        }
    };
    *joined = true;

    let response = ServerMessage::RejoinRoomResponse {
        success: true,
        error: None,
        error_kind: None,
        mode: result.mode,
        file_info: Some(result.file_info),
        buffered_chunks: result.buffered_chunks,
    };
    ctx.send_message(&response).await?;

    if let Some(stale) = result.evicted {
        tracing::info!(room = %room_id, member = stale, replaced_by = ctx.member_id, "stale member evicted");
        ctx.members
            .send_to_all(
                &[stale],
                &ServerMessage::RoomClosed {
                    room_id: room_id.clone(),
                },
            )
            .await;
    }

    if !result.notify.is_empty() {
        tracing::info!(
            room = %room_id,
            member = ctx.member_id,
            %direction,
            last_chunk,
            "member reconnected"
        );
        let notice = ServerMessage::PeerReconnected {
            member_id: ctx.member_id,
            direction,
            transfer_id,
            last_chunk,
        };
        ctx.members.send_to_all(&result.notify, &notice).await;
    }

    if let Some(decision) = result.decision {
        let selected = ServerMessage::TransferModeSelected {
            mode: decision.mode,
            reason: decision.reason,
            fallback_to_relay: decision.fallback_to_relay,
            compression: decision.compression,
        };
        ctx.members.send_to_all(&result.members, &selected).await;
    }

    Ok(())
}

fn failure(message: String, kind: ErrorKind) -> ServerMessage {
    ServerMessage::RejoinRoomResponse {
        success: false,
        error: Some(message),
        error_kind: Some(kind.into()),
        mode: None,
        file_info: None,
        buffered_chunks: Vec::new(),
    }
}
