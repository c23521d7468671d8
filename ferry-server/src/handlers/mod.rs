//! Message handlers for client commands

mod create_room;
pub mod errors;
mod join_room;
mod leave_room;
mod rejoin_room;
mod relay_chunk;
mod request_relay_chunk;
mod server_stats;
mod signal;
mod transfer_complete;

#[cfg(test)]
pub mod testing;

pub use create_room::handle_create_room;
pub use errors::*;
pub use join_room::handle_join_room;
pub use leave_room::handle_leave_room;
pub use rejoin_room::{RejoinRequest, handle_rejoin_room};
pub use relay_chunk::{RelayChunkRequest, handle_relay_chunk};
pub use request_relay_chunk::{RelayPullRequest, handle_request_relay_chunk};
pub use server_stats::handle_server_stats;
pub use signal::handle_signal;
pub use transfer_complete::handle_transfer_complete;

use std::io;
use std::net::{IpAddr, SocketAddr};

use tokio::io::AsyncWrite;

use ferry_common::framing::{FrameWriter, MessageId};
use ferry_common::io::send_server_message_with_id;
use ferry_common::protocol::ServerMessage;
use ferry_common::validators::parse_address;

use crate::config::ServerConfig;
use crate::members::{MemberManager, MemberSender};
use crate::rooms::RoomManager;

/// Context passed to all handlers with shared resources
pub struct HandlerContext<'a, W> {
    pub writer: &'a mut FrameWriter<W>,
    pub peer_addr: SocketAddr,
    /// Member id of this connection
    pub member_id: u32,
    pub tx: &'a MemberSender,
    /// Message ID from the incoming request (for response correlation)
    pub message_id: MessageId,
    pub rooms: &'a RoomManager,
    pub members: &'a MemberManager,
    pub config: &'a ServerConfig,
}

impl<'a, W: AsyncWrite + Unpin> HandlerContext<'a, W> {
    /// Send a message to the client, echoing the request's message ID
    pub async fn send_message(&mut self, message: &ServerMessage) -> io::Result<()> {
        send_server_message_with_id(self.writer, message, self.message_id).await
    }

    /// Queue a notification for this connection behind any pending ones
    ///
    /// Used for notices that must reach the client after the direct response.
    pub fn queue_notification(&self, message: ServerMessage) -> io::Result<()> {
        self.tx
            .send((message, None))
            .map_err(|_| io::Error::other(ERR_CHANNEL_CLOSED))
    }

    /// Send an error message without disconnecting
    pub async fn send_error(&mut self, message: &str, command: Option<&str>) -> io::Result<()> {
        let error_msg = ServerMessage::Error {
            message: message.to_string(),
            command: command.map(|s| s.to_string()),
        };
        self.send_message(&error_msg).await
    }

    /// Address the classifier should see for this connection
    ///
    /// The client-reported address wins when it parses; otherwise the
    /// observed peer address is used.
    pub fn endpoint_address(&self, local_address: Option<&str>) -> IpAddr {
        local_address
            .and_then(parse_address)
            .unwrap_or_else(|| self.peer_addr.ip())
    }
}
