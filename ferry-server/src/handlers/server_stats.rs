//! Handler for ServerStats command

use std::io;

use tokio::io::AsyncWrite;

use ferry_common::protocol::ServerMessage;

use super::HandlerContext;

/// Handle ServerStats command - live room and connection counts
pub async fn handle_server_stats<W>(ctx: &mut HandlerContext<'_, W>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = ServerMessage::ServerStatsResponse {
        rooms: ctx.rooms.room_count().await,
        connections: ctx.members.count().await,
    };
    ctx.send_message(&response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{create_room, create_test_context, read_server_message};

    #[tokio::test]
    async fn test_counts() {
        let mut test_ctx = create_test_context().await;
        create_room(&test_ctx, "8.8.8.8", 1).await;
        let _second = test_ctx.add_member().await;

        handle_server_stats(&mut test_ctx.handler_context())
            .await
            .unwrap();

        match read_server_message(&mut test_ctx).await {
            ServerMessage::ServerStatsResponse { rooms, connections } => {
                assert_eq!(rooms, 1);
                assert_eq!(connections, 2);
            }
            other => panic!("Expected ServerStatsResponse, got {:?}", other),
        }
    }
}
