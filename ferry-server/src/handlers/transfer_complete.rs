//! Handler for FileTransferComplete command

use std::io;
use std::time::Duration;

use tokio::io::AsyncWrite;

use ferry_common::ErrorKind;
use ferry_common::protocol::{Role, ServerMessage};
use ferry_common::validators;

use super::{HandlerContext, err_room_code, err_transfer_id, room_error_to_message};
use crate::members::MemberManager;
use crate::rooms::{CompletionOutcome, RoomManager};

/// Handle FileTransferComplete command - record a finished role
///
/// The report that completes the role set starts the close sequence:
/// `RoomClosing` now, `RoomClosed` after the grace period.
pub async fn handle_transfer_complete<W>(
    room_id: String,
    role: Role,
    transfer_id: Option<String>,
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
    if let Some(id) = &transfer_id
        && let Err(e) = validators::validate_transfer_id(id)
    {
        return ctx
            .send_message(&failure(err_transfer_id(e), ErrorKind::Invalid))
            .await;
    }

    let outcome = match ctx
        .rooms
        .report_role_complete(&room_id, ctx.member_id, role, transfer_id.as_deref())
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            let response = failure(room_error_to_message(&e, &room_id), e.kind());
            return ctx.send_message(&response).await;
        }
    };
    tracing::debug!(room = %room_id, member = ctx.member_id, %role, "role complete");

    let response = ServerMessage::FileTransferCompleteResponse {
        success: true,
        error: None,
        error_kind: None,
    };
    ctx.send_message(&response).await?;

    if let CompletionOutcome::Closing { serial, members } = outcome {
        tracing::info!(room = %room_id, "room closing");
        let closing = ServerMessage::RoomClosing {
            room_id: room_id.clone(),
        };
        ctx.members.send_to_all(&members, &closing).await;

        spawn_close(
            ctx.rooms.clone(),
            ctx.members.clone(),
            room_id,
            serial,
            ctx.config.close_grace,
        );
    }

    Ok(())
}

/// Finish the close sequence after the grace period
///
/// If the sweeper or a leave deleted the room first, nothing more is sent.
fn spawn_close(
    rooms: RoomManager,
    members: MemberManager,
    room_id: String,
    serial: u64,
    grace: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if let Some(detached) = rooms.close(&room_id, serial).await {
            tracing::info!(room = %room_id, "room closed");
            members
                .send_to_all(&detached, &ServerMessage::RoomClosed { room_id })
                .await;
        }
    });
}

fn failure(message: String, kind: ErrorKind) -> ServerMessage {
    ServerMessage::FileTransferCompleteResponse {
        success: false,
        error: Some(message),
        error_kind: Some(kind.into()),
    }
}
