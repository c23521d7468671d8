//! Handler for JoinRoom command

use std::io;

use tokio::io::AsyncWrite;

use ferry_common::ErrorKind;
use ferry_common::protocol::ServerMessage;
use ferry_common::validators;

use super::{HandlerContext, err_address, err_room_code, join_error_to_message};

/// Handle JoinRoom command - become the second member, or self-transfer
pub async fn handle_join_room<W>(
    room_id: String,
    local_address: Option<String>,
    joined: &mut bool,
    ctx: &mut HandlerContext<'_, W>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let room_id = match validators::normalize_room_code(&room_id) {
        Ok(code) => code,
        Err(e) => {
            return ctx
                .send_message(&failure(err_room_code(e), ErrorKind::Invalid))
                .await;
        }
    };
    if let Some(address) = &local_address
        && let Err(e) = validators::validate_address(address)
    {
        return ctx
            .send_message(&failure(err_address(e), ErrorKind::Invalid))
            .await;
    }

    let address = ctx.endpoint_address(local_address.as_deref());
    let result = match ctx.rooms.join(&room_id, ctx.member_id, address).await {
        Ok(result) => result,
        Err(e) => {
            tracing::debug!(room = %room_id, member = ctx.member_id, error = %e, "join rejected");
            let response = failure(join_error_to_message(&e, &room_id), e.kind());
            return ctx.send_message(&response).await;
        }
    };
    *joined = true;

    let response = ServerMessage::JoinRoomResponse {
        success: true,
        error: None,
        error_kind: None,
        room_id: Some(result.room_id.clone()),
        mode: result.mode,
        file_info: Some(result.file_info.clone()),
        self_transfer: result.self_transfer,
    };
    ctx.send_message(&response).await?;

    if result.self_transfer {
        // The host is its own partner; no classification takes place
        tracing::info!(room = %result.room_id, member = ctx.member_id, "self-transfer");
        return ctx.queue_notification(ServerMessage::PeerJoined {
            member_id: ctx.member_id,
        });
    }

    if let Some(decision) = result.decision {
        tracing::info!(
            room = %result.room_id,
            mode = %decision.mode,
            reason = %decision.reason,
            "room paired"
        );

        let others: Vec<u32> = result
            .members
            .iter()
            .copied()
            .filter(|&m| m != ctx.member_id)
            .collect();
        ctx.members
            .send_to_all(
                &others,
                &ServerMessage::PeerJoined {
                    member_id: ctx.member_id,
                },
            )
            .await;

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
    ServerMessage::JoinRoomResponse {
        success: false,
        error: Some(message),
        error_kind: Some(kind.into()),
        room_id: None,
        mode: None,
        file_info: None,
        self_transfer: false,
    }
}
