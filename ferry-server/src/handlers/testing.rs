//! Shared test utilities for handler tests

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use ferry_common::framing::{FrameReader, FrameWriter, MessageId};
use ferry_common::io::read_server_message as io_read_server_message;
use ferry_common::protocol::{FileInfo, ServerMessage};

use super::HandlerContext;
use crate::config::ServerConfig;
use crate::members::{MemberManager, MemberSender};
use crate::rooms::RoomManager;

/// Type alias for the write half used in tests
type TestWriteHalf = tokio::net::tcp::OwnedWriteHalf;
/// Type alias for the read half used in tests
type TestReadHalf = tokio::net::tcp::OwnedReadHalf;

/// Receiver side of a member's outgoing queue
pub type TestReceiver = mpsc::UnboundedReceiver<(ServerMessage, Option<MessageId>)>;

/// Test context that owns all resources needed for handler testing
pub struct TestContext {
    /// Client end of the socket; reads what handlers write directly
    pub frame_reader: FrameReader<BufReader<TestReadHalf>>,
    pub frame_writer: FrameWriter<TestWriteHalf>,
    pub tx: MemberSender,
    /// Notifications queued for this connection
    pub rx: TestReceiver,
    pub peer_addr: SocketAddr,
    pub member_id: u32,
    pub message_id: MessageId,
    pub rooms: RoomManager,
    pub members: MemberManager,
    pub config: ServerConfig,
}

impl TestContext {
    /// Create a HandlerContext from this TestContext
    pub fn handler_context(&mut self) -> HandlerContext<'_, TestWriteHalf> {
        HandlerContext {
            writer: &mut self.frame_writer,
            peer_addr: self.peer_addr,
            member_id: self.member_id,
            tx: &self.tx,
            message_id: self.message_id,
            rooms: &self.rooms,
            members: &self.members,
            config: &self.config,
        }
    }

    /// Register another connection, returning its id and notification queue
    pub async fn add_member(&self) -> (u32, TestReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.members.add(self.peer_addr, tx).await;
        (id, rx)
    }

    /// Switch this context to act as a different member
    pub fn act_as(&mut self, member_id: u32, rx: TestReceiver) -> TestReceiver {
        self.member_id = member_id;
        std::mem::replace(&mut self.rx, rx)
    }
}

/// Helper to create test context using real TCP sockets
pub async fn create_test_context() -> TestContext {
    create_test_context_with(ServerConfig::default()).await
}

pub async fn create_test_context_with(config: ServerConfig) -> TestContext {
    // Create TCP listener on localhost
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Connect client
    let client_handle = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });

    // Accept connection
    let (server_stream, peer_addr) = listener.accept().await.unwrap();
    let (_read_half, write_half) = server_stream.into_split();
    let frame_writer = FrameWriter::new(write_half);

    let client = client_handle.await.unwrap();
    let (client_read_half, _client_write_half) = client.into_split();
    let frame_reader = FrameReader::new(BufReader::new(client_read_half));

    let rooms = RoomManager::new(config.limits).with_relay_limit(config.relay_buffer_limit);
    let members = MemberManager::new();

    // Register this connection like the connection loop does
    let (tx, rx) = mpsc::unbounded_channel();
    let member_id = members.add(peer_addr, tx.clone()).await;

    // Create a default message ID for tests (must be valid hex characters)
    let message_id = MessageId::from_bytes(b"000000000000").expect("valid hex test message ID");

    TestContext {
        frame_reader,
        frame_writer,
        tx,
        rx,
        peer_addr,
        member_id,
        message_id,
        rooms,
        members,
        config,
    }
}

/// Read the next message the handler wrote directly to the socket
pub async fn read_server_message(test_ctx: &mut TestContext) -> ServerMessage {
    io_read_server_message(&mut test_ctx.frame_reader)
        .await
        .expect("Failed to read message")
        .expect("Connection closed unexpectedly")
        .message
}

/// Next queued notification, failing the test after 5 seconds
pub async fn next_notification(rx: &mut TestReceiver) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for notification")
        .expect("Notification channel closed")
        .0
}

/// Assert that nothing is queued right now
pub fn assert_no_notification(rx: &mut TestReceiver) {
    if let Ok((msg, _)) = rx.try_recv() {
        panic!("Expected no notification, got {:?}", msg);
    }
}

pub fn test_file(size: u64) -> FileInfo {
    FileInfo {
        name: "holiday.mov".to_string(),
        size,
        mime_type: "video/quicktime".to_string(),
    }
}

/// Create a room hosted by the context's member
pub async fn create_room(test_ctx: &TestContext, address: &str, size: u64) -> String {
    test_ctx
        .rooms
        .create_room(test_ctx.member_id, address.parse().unwrap(), test_file(size))
        .await
        .unwrap()
}
