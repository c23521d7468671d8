//! A connected member

use std::net::SocketAddr;

use tokio::sync::mpsc;

use ferry_common::framing::MessageId;
use ferry_common::protocol::ServerMessage;

/// Outgoing queue of a connection; `None` ids are generated when written
pub type MemberSender = mpsc::UnboundedSender<(ServerMessage, Option<MessageId>)>;

/// A signaling connection known to the server
#[derive(Debug, Clone)]
pub struct Member {
    /// Server-assigned identifier, unique for the server's lifetime
    pub id: u32,
    /// Remote address of the connection
    pub address: SocketAddr,
    /// Channel for pushing messages to this connection
    pub tx: MemberSender,
}
