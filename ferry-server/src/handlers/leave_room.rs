//! Handler for LeaveRoom command

use std::io;

use tokio::io::AsyncWrite;

use ferry_common::ErrorKind;
use ferry_common::protocol::ServerMessage;
use ferry_common::validators;

use super::{HandlerContext, err_room_code, room_error_to_message};

/// Handle LeaveRoom command - abnormal departure, no grace period
pub async fn handle_leave_room<W>(room_id: String, ctx: &mut HandlerContext<'_, W>) -> io::Result<()>
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

    let result = match ctx.rooms.leave(&room_id, ctx.member_id).await {
        Ok(result) => result,
        Err(e) => {
            let response = failure(room_error_to_message(&e, &room_id), e.kind());
            return ctx.send_message(&response).await;
        }
    };

    if result.deleted {
        tracing::info!(room = %room_id, "room deleted after last member left");
    } else {
        ctx.members
            .send_to_all(
                &result.remaining,
                &ServerMessage::PeerLeft {
                    member_id: ctx.member_id,
                },
            )
            .await;
    }

    let response = ServerMessage::LeaveRoomResponse {
        success: true,
        error: None,
        error_kind: None,
    };
    ctx.send_message(&response).await
}

fn failure(message: String, kind: ErrorKind) -> ServerMessage {
    ServerMessage::LeaveRoomResponse {
        success: false,
        error: Some(message),
        error_kind: Some(kind.into()),
    }
}
