//! Handler for CreateRoom command

use std::io;

use tokio::io::AsyncWrite;

use ferry_common::ErrorKind;
use ferry_common::protocol::{FileInfo, ServerMessage};
use ferry_common::validators;

use super::{HandlerContext, err_address, err_file_info, room_error_to_message};

/// Handle CreateRoom command - open a room hosted by this connection
pub async fn handle_create_room<W>(
    file_info: FileInfo,
    local_address: Option<String>,
    joined: &mut bool,
    ctx: &mut HandlerContext<'_, W>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let validation = validators::validate_file_name(&file_info.name)
        .and_then(|()| validators::validate_mime_type(&file_info.mime_type))
        .map_err(err_file_info)
        .and_then(|()| match &local_address {
            Some(address) => validators::validate_address(address).map_err(err_address),
            None => Ok(()),
        });
    if let Err(message) = validation {
        return ctx.send_message(&failure(message, ErrorKind::Invalid)).await;
    }

    let address = ctx.endpoint_address(local_address.as_deref());
    let size = file_info.size;

    match ctx
        .rooms
        .create_room(ctx.member_id, address, file_info)
        .await
    {
        Ok(room_id) => {
            tracing::info!(room = %room_id, host = ctx.member_id, size, "room created");
            *joined = true;
            let response = ServerMessage::CreateRoomResponse {
                success: true,
                error: None,
                error_kind: None,
                room_id: Some(room_id),
                member_id: Some(ctx.member_id),
            };
            ctx.send_message(&response).await
        }
        Err(e) => {
            tracing::error!(error = %e, "room creation failed");
            let response = failure(room_error_to_message(&e, ""), e.kind());
            ctx.send_message(&response).await
        }
    }
}

fn failure(message: String, kind: ErrorKind) -> ServerMessage {
    ServerMessage::CreateRoomResponse {
        success: false,
        error: Some(message),
        error_kind: Some(kind.into()),
        room_id: None,
        member_id: None,
    }
}
