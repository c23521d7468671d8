//! Handler for Signal command - opaque forwarding to the other member

use std::io;

use tokio::io::AsyncWrite;

use ferry_common::protocol::ServerMessage;
use ferry_common::validators;

use super::{HandlerContext, err_room_code, err_signal_payload, room_error_to_message};

/// Handle Signal command
///
/// The payload is forwarded verbatim; its contents are never inspected
/// beyond the size check. There is no success response.
pub async fn handle_signal<W>(
    room_id: String,
    payload: serde_json::Value,
    ctx: &mut HandlerContext<'_, W>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let room_id = match validators::normalize_room_code(&room_id) {
        Ok(code) => code,
        Err(e) => return ctx.send_error(&err_room_code(e), Some("Signal")).await,
    };
    if let Err(e) = validators::validate_signal_payload(&payload) {
        return ctx
            .send_error(&err_signal_payload(e), Some("Signal"))
            .await;
    }

    let others = match ctx.rooms.others_in_room(&room_id, ctx.member_id).await {
        Ok(others) => others,
        Err(e) => {
            return ctx
                .send_error(&room_error_to_message(&e, &room_id), Some("Signal"))
                .await;
        }
    };

    if others.is_empty() {
        tracing::debug!(room = %room_id, "signal dropped, no partner present");
        return Ok(());
    }

    let forwarded = ServerMessage::Signal {
        from: ctx.member_id,
        payload,
    };
    ctx.members.send_to_all(&others, &forwarded).await;
    Ok(())
}
