//! End-to-end transfers against an in-process server
//!
//! Each test starts a server on an ephemeral port and runs real sender and
//! receiver sessions through it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use ferry_client::channel::ChannelSignal;
use ferry_client::config::{ReconnectSettings, Settings, TransferSettings};
use ferry_client::network::Connection;
use ferry_client::transfers::rooms::{create_room, join_room, report_complete};
use ferry_client::transfers::{
    CheckpointStore, CheckpointWriter, EventStream, FailureAction, FsSink, Outcome,
    ResumeCheckpoint, SessionContext, SessionError, TransferError, TransferEvent, copy_file,
    event_channel, receive_file, send_file,
};
use ferry_common::protocol::{
    ClientMessage, Direction, FileInfo, Role, ServerMessage, TransferMode,
};
use ferry_common::topology::TopologyLimits;
use ferry_server::{ServerConfig, serve};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

// ============================================================================
// Helper Functions
// ============================================================================

const TEST_TIMEOUT: Duration = Duration::from_secs(20);

async fn start_server(config: ServerConfig) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, config));
    addr.to_string()
}

fn fast_server() -> ServerConfig {
    ServerConfig {
        close_grace: Duration::from_millis(50),
        ..ServerConfig::default()
    }
}

fn settings(server_address: &str, local_address: Option<&str>) -> Settings {
    Settings {
        server_address: server_address.to_string(),
        local_address: local_address.map(str::to_string),
        transfer: TransferSettings {
            chunk_size: 1024,
            relay_chunk_size: 700,
            direct_pause_ms: 0,
            relay_pause_ms: 0,
            ..TransferSettings::default()
        },
        reconnect: ReconnectSettings {
            enabled: false,
            ..ReconnectSettings::default()
        },
        ..Settings::default()
    }
}

fn context(settings: Settings) -> (SessionContext, EventStream) {
    let (events, stream) = event_channel();
    (
        SessionContext::new(settings, CheckpointWriter::disabled(), events),
        stream,
    )
}

fn write_file(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
    let bytes: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
    let path = dir.join(name);
    std::fs::write(&path, &bytes).unwrap();
    (path, bytes)
}

async fn room_code(stream: &mut EventStream) -> String {
    loop {
        match timeout(TEST_TIMEOUT, stream.recv()).await.unwrap() {
            Some(TransferEvent::RoomCreated { room_id }) => return room_id,
            Some(_) => continue,
            None => panic!("Sender stopped before creating a room"),
        }
    }
}

fn drain(stream: &mut EventStream) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = stream.try_recv() {
        events.push(event);
    }
    events
}

/// Send `len` bytes from one session to another and check the saved copy
async fn transfer_between(
    server: ServerConfig,
    sender_address: Option<&str>,
    receiver_address: Option<&str>,
    len: usize,
) -> (Vec<TransferEvent>, Vec<TransferEvent>) {
    let addr = start_server(server).await;
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let (path, bytes) = write_file(source_dir.path(), "photo.jpg", len);

    let (sender_ctx, mut sender_events) = context(settings(&addr, sender_address));
    let sender = tokio::spawn(async move { send_file(&sender_ctx, &path, None).await });
    let code = room_code(&mut sender_events).await;

    let (receiver_ctx, mut receiver_events) = context(settings(&addr, receiver_address));
    let sink = FsSink::new(target_dir.path());
    let received = timeout(TEST_TIMEOUT, receive_file(&receiver_ctx, &code, &sink, None))
        .await
        .expect("Receive timed out")
        .expect("Receive failed");

    let sent = timeout(TEST_TIMEOUT, sender)
        .await
        .expect("Send timed out")
        .unwrap()
        .expect("Send failed");

    assert_eq!(sent.direction, Direction::Send);
    assert_eq!(sent.outcome, Outcome::Completed);
    assert_eq!(received.direction, Direction::Receive);
    assert_eq!(received.file_name, "photo.jpg");
    assert_eq!(received.file_size, len as u64);

    let saved = received.save_path.expect("Receive should report a save path");
    assert_eq!(saved, target_dir.path().join("photo.jpg"));
    assert_eq!(std::fs::read(&saved).unwrap(), bytes);

    (drain(&mut sender_events), drain(&mut receiver_events))
}

const TRANSFER_ID: &str = "transfer-0011223344556677";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Relay between clients on different public addresses
fn relay_server() -> ServerConfig {
    ServerConfig {
        limits: TopologyLimits {
            direct_ceiling: 0,
            ..TopologyLimits::default()
        },
        ..fast_server()
    }
}

/// Reconnect quickly, and pace relay chunks so a transfer is still running
/// when its connection is cut
fn reconnecting(mut settings: Settings) -> Settings {
    settings.transfer.relay_pause_ms = 20;
    settings.reconnect = ReconnectSettings {
        enabled: true,
        max_attempts: 5,
        initial_delay_ms: 100,
        multiplier: 1.5,
        max_delay_ms: 500,
    };
    settings
}

/// TCP forwarder in front of the server whose connections can be cut
struct Proxy {
    address: String,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Proxy {
    async fn start(upstream: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let links = Arc::new(Mutex::new(Vec::new()));

        let upstream = upstream.to_string();
        let tracked = links.clone();
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                let upstream = upstream.clone();
                let link = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(&upstream).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                tracked.lock().unwrap().push(link);
            }
        });

        Self { address, links }
    }

    /// Drop every connection made so far; new ones are still accepted
    fn sever(&self) {
        for link in self.links.lock().unwrap().drain(..) {
            link.abort();
        }
    }
}

/// Relay `len` bytes while one side's signaling runs through a proxy that is
/// cut once the sender is five chunks in
async fn relay_with_severed_link(
    sever_sender: bool,
    len: usize,
) -> (Vec<TransferEvent>, Vec<TransferEvent>) {
    let addr = start_server(relay_server()).await;
    let proxy = Proxy::start(&addr).await;
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let (path, bytes) = write_file(source_dir.path(), "video.bin", len);

    let (sender_address, receiver_address) = if sever_sender {
        (proxy.address.as_str(), addr.as_str())
    } else {
        (addr.as_str(), proxy.address.as_str())
    };

    let (sender_ctx, mut sender_events) =
        context(reconnecting(settings(sender_address, Some("8.8.8.8"))));
    let sender = tokio::spawn(async move { send_file(&sender_ctx, &path, None).await });
    let code = room_code(&mut sender_events).await;

    let (receiver_ctx, mut receiver_events) =
        context(reconnecting(settings(receiver_address, Some("1.1.1.1"))));
    let sink = FsSink::new(target_dir.path());
    let receiver =
        tokio::spawn(async move { receive_file(&receiver_ctx, &code, &sink, None).await });

    let mut seen = Vec::new();
    loop {
        let event = timeout(TEST_TIMEOUT, sender_events.recv())
            .await
            .unwrap()
            .expect("Sender stopped before the cut");
        let five_in = matches!(event, TransferEvent::Progress { chunk_index, .. } if chunk_index >= 5);
        seen.push(event);
        if five_in {
            break;
        }
    }
    proxy.sever();

    let received = timeout(TEST_TIMEOUT, receiver)
        .await
        .expect("Receive timed out")
        .unwrap()
        .expect("Receive failed");
    let sent = timeout(TEST_TIMEOUT, sender)
        .await
        .expect("Send timed out")
        .unwrap()
        .expect("Send failed");

    assert_eq!(sent.outcome, Outcome::Completed);
    assert_eq!(received.outcome, Outcome::Completed);
    let saved = received.save_path.expect("Receive should report a save path");
    assert_eq!(std::fs::read(saved).unwrap(), bytes);

    seen.extend(drain(&mut sender_events));
    (seen, drain(&mut receiver_events))
}

fn has_reconnected(events: &[TransferEvent]) -> bool {
    let suspended = events
        .iter()
        .position(|e| matches!(e, TransferEvent::Suspended { .. }));
    let reconnecting = events
        .iter()
        .position(|e| matches!(e, TransferEvent::Reconnecting { attempt: 1, .. }));
    let resumed = events
        .iter()
        .rposition(|e| matches!(e, TransferEvent::Resumed { .. }));
    matches!(
        (suspended, reconnecting, resumed),
        (Some(s), Some(r), Some(p)) if s < r && r < p
    )
}

fn saved_checkpoint(room_id: &str, source_path: &Path, chunk_index: u64) -> ResumeCheckpoint {
    ResumeCheckpoint {
        transfer_id: TRANSFER_ID.to_string(),
        room_id: room_id.to_string(),
        direction: Direction::Send,
        file_name: "report.pdf".to_string(),
        file_size: 7000,
        chunk_index,
        total_chunks: 10,
        chunk_size: 700,
        source_path: Some(source_path.to_path_buf()),
        last_updated: Utc::now(),
    }
}

fn selected_mode(events: &[TransferEvent]) -> Option<TransferMode> {
    events.iter().find_map(|event| match event {
        TransferEvent::ModeSelected { mode, .. } => Some(*mode),
        _ => None,
    })
}

// ============================================================================
// Transfers
// ============================================================================

#[tokio::test]
async fn test_direct_transfer_same_host() {
    let (sender_events, receiver_events) =
        transfer_between(fast_server(), None, None, 10_000).await;

    assert_eq!(selected_mode(&sender_events), Some(TransferMode::DirectP2p));
    assert_eq!(selected_mode(&receiver_events), Some(TransferMode::DirectP2p));
    assert!(
        sender_events
            .iter()
            .any(|e| matches!(e, TransferEvent::ChannelOpened { .. }))
    );
    assert!(
        receiver_events
            .iter()
            .any(|e| matches!(e, TransferEvent::Completed(_)))
    );
}

#[tokio::test]
async fn test_negotiated_channel_across_subnets() {
    // Both loopback, but different /24s
    let (sender_events, _) = transfer_between(
        fast_server(),
        Some("127.0.0.1"),
        Some("127.0.1.1"),
        4096,
    )
    .await;

    assert_eq!(selected_mode(&sender_events), Some(TransferMode::WebrtcP2p));
    assert!(
        !sender_events
            .iter()
            .any(|e| matches!(e, TransferEvent::FellBackToRelay))
    );
}

#[tokio::test]
async fn test_relay_transfer_across_networks() {
    let server = ServerConfig {
        limits: TopologyLimits {
            direct_ceiling: 0,
            ..TopologyLimits::default()
        },
        ..fast_server()
    };
    let (sender_events, receiver_events) =
        transfer_between(server, Some("8.8.8.8"), Some("1.1.1.1"), 5000).await;

    assert_eq!(selected_mode(&sender_events), Some(TransferMode::ServerRelay));
    assert_eq!(selected_mode(&receiver_events), Some(TransferMode::ServerRelay));

    // 5000 bytes in 700-byte relay chunks
    let last = receiver_events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Progress { total_chunks, .. } => Some(*total_chunks),
            _ => None,
        })
        .last();
    assert_eq!(last, Some(8));
}

#[tokio::test]
async fn test_empty_file_relay() {
    let server = ServerConfig {
        limits: TopologyLimits {
            direct_ceiling: 0,
            ..TopologyLimits::default()
        },
        ..fast_server()
    };
    transfer_between(server, Some("8.8.8.8"), Some("1.1.1.1"), 0).await;
}

#[tokio::test]
async fn test_relay_waits_out_a_full_buffer() {
    // Room for two 700-byte chunks
    let server = ServerConfig {
        relay_buffer_limit: 1400,
        ..relay_server()
    };
    let (_, receiver_events) =
        transfer_between(server, Some("8.8.8.8"), Some("1.1.1.1"), 7000).await;

    assert_eq!(selected_mode(&receiver_events), Some(TransferMode::ServerRelay));
}

#[tokio::test]
async fn test_copy_to_self() {
    let addr = start_server(fast_server()).await;
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let (path, bytes) = write_file(source_dir.path(), "notes.txt", 3000);

    let (ctx, mut events) = context(settings(&addr, None));
    let sink = FsSink::new(target_dir.path());
    let entry = timeout(TEST_TIMEOUT, copy_file(&ctx, &path, &sink))
        .await
        .expect("Copy timed out")
        .expect("Copy failed");

    assert_eq!(entry.direction, Direction::Receive);
    assert_eq!(entry.outcome, Outcome::Completed);
    let saved = entry.save_path.unwrap();
    assert_eq!(std::fs::read(saved).unwrap(), bytes);

    let events = drain(&mut events);
    assert!(selected_mode(&events).is_none());
    assert!(events.iter().any(|e| matches!(e, TransferEvent::Completed(_))));
}

#[tokio::test]
async fn test_unreachable_offer_falls_back_to_relay() {
    let addr = start_server(fast_server()).await;
    let source_dir = tempfile::tempdir().unwrap();
    let (path, bytes) = write_file(source_dir.path(), "slides.pdf", 5000);

    let (sender_ctx, mut sender_events) = context(settings(&addr, Some("127.0.0.1")));
    let sender = tokio::spawn(async move { send_file(&sender_ctx, &path, None).await });
    let code = room_code(&mut sender_events).await;

    // The receiver offers a port nothing listens on
    let closed = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let mut receiver = Connection::connect(&addr).await.unwrap();
    let joined = join_room(&receiver.client, &code, Some("127.0.1.1".to_string()))
        .await
        .unwrap();
    assert_eq!(joined.mode, Some(TransferMode::WebrtcP2p));
    let offer = ChannelSignal::Offer {
        candidates: vec![closed],
        last_chunk: 0,
    };
    receiver
        .client
        .send(ClientMessage::Signal {
            room_id: joined.room_id.clone(),
            payload: offer.to_payload(),
        })
        .unwrap();

    let mut chunks = BTreeMap::new();
    let mut fell_back = false;
    let mut transfer_id = String::new();
    let mut total = u64::MAX;
    while (chunks.len() as u64) < total {
        match timeout(TEST_TIMEOUT, receiver.events.recv()).await.unwrap() {
            Some(ServerMessage::Signal { payload, .. }) => {
                fell_back |= ChannelSignal::from_payload(&payload) == Some(ChannelSignal::Fallback);
            }
            Some(ServerMessage::RelayChunkAvailable {
                transfer_id: id,
                chunk_index,
                total_chunks,
                chunk_size,
            }) => {
                assert_eq!(chunk_size, 700);
                total = total_chunks;
                let request = ClientMessage::RequestRelayChunk {
                    room_id: joined.room_id.clone(),
                    transfer_id: id.clone(),
                    chunk_index,
                    held_below: 0,
                };
                match receiver.client.request(request).await.unwrap() {
                    ServerMessage::RelayChunkData { payload, .. } => {
                        chunks.insert(chunk_index, payload);
                    }
                    other => panic!("Expected RelayChunkData, got {:?}", other),
                }
                transfer_id = id;
            }
            Some(_) => {}
            None => panic!("Signaling connection closed"),
        }
    }
    assert!(fell_back);
    assert_eq!(total, 8);
    let assembled: Vec<u8> = chunks.into_values().flatten().collect();
    assert_eq!(assembled, bytes);

    report_complete(&receiver.client, &joined.room_id, Role::Receiver, &transfer_id)
        .await
        .unwrap();
    let sent = timeout(TEST_TIMEOUT, sender)
        .await
        .expect("Send timed out")
        .unwrap()
        .expect("Send failed");
    assert_eq!(sent.outcome, Outcome::Completed);

    let events = drain(&mut sender_events);
    assert_eq!(selected_mode(&events), Some(TransferMode::WebrtcP2p));
    assert!(events.iter().any(|e| matches!(e, TransferEvent::FellBackToRelay)));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, TransferEvent::ChannelOpened { .. }))
    );
}

// ============================================================================
// Reconnect and resume
// ============================================================================

#[tokio::test]
async fn test_sender_reconnects_mid_relay() {
    let (sender_events, receiver_events) = relay_with_severed_link(true, 21_000).await;

    assert!(has_reconnected(&sender_events), "{sender_events:?}");
    assert!(
        sender_events
            .iter()
            .any(|e| matches!(e, TransferEvent::Resumed { from_chunk } if *from_chunk >= 5))
    );
    assert!(
        !receiver_events
            .iter()
            .any(|e| matches!(e, TransferEvent::Suspended { .. }))
    );
}

#[tokio::test]
async fn test_receiver_reconnects_mid_relay() {
    let (_, receiver_events) = relay_with_severed_link(false, 21_000).await;

    assert!(has_reconnected(&receiver_events), "{receiver_events:?}");
    assert!(
        receiver_events
            .iter()
            .any(|e| matches!(e, TransferEvent::Completed(_)))
    );
}

#[tokio::test]
async fn test_send_resumes_from_saved_checkpoint() {
    let addr = start_server(relay_server()).await;
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let store_path = store_dir.path().join("transfer-progress.json");
    let (path, bytes) = write_file(source_dir.path(), "report.pdf", 7000);

    // An earlier sender process got three chunks out, then died
    let mut first = Connection::connect(&addr).await.unwrap();
    let info = FileInfo {
        name: "report.pdf".to_string(),
        size: 7000,
        mime_type: String::new(),
    };
    let room_id = create_room(&first.client, info, Some("8.8.8.8".to_string()))
        .await
        .unwrap();

    let (receiver_ctx, mut receiver_events) = context(settings(&addr, Some("1.1.1.1")));
    let sink = FsSink::new(target_dir.path());
    let code = room_id.clone();
    let receiver =
        tokio::spawn(async move { receive_file(&receiver_ctx, &code, &sink, None).await });

    loop {
        match timeout(TEST_TIMEOUT, first.events.recv()).await.unwrap() {
            Some(ServerMessage::TransferModeSelected { mode, .. }) => {
                assert_eq!(mode, TransferMode::ServerRelay);
                break;
            }
            Some(_) => {}
            None => panic!("Signaling connection closed"),
        }
    }
    for index in 0..3u64 {
        let start = index as usize * 700;
        let ack = first
            .client
            .request(ClientMessage::RelayChunk {
                room_id: room_id.clone(),
                transfer_id: TRANSFER_ID.to_string(),
                chunk_index: index,
                total_chunks: 10,
                chunk_size: 700,
                payload: bytes[start..start + 700].to_vec(),
            })
            .await
            .unwrap();
        assert!(matches!(
            ack,
            ServerMessage::RelayChunkResponse { success: true, .. }
        ));
    }
    first.shutdown();

    let mut store = CheckpointStore::open(&store_path, DAY);
    store.save(saved_checkpoint(&room_id, &path, 3)).unwrap();
    let checkpoint = CheckpointStore::open(&store_path, DAY)
        .load(TRANSFER_ID)
        .expect("Checkpoint should be on disk");

    let (writer, writer_task) = CheckpointWriter::spawn(CheckpointStore::open(&store_path, DAY));
    let (events, mut sender_events) = event_channel();
    let sender_ctx = SessionContext::new(settings(&addr, Some("8.8.8.8")), writer, events);
    let sent = timeout(TEST_TIMEOUT, send_file(&sender_ctx, &path, Some(checkpoint)))
        .await
        .expect("Send timed out")
        .expect("Send failed");
    assert_eq!(sent.outcome, Outcome::Completed);

    let received = timeout(TEST_TIMEOUT, receiver)
        .await
        .expect("Receive timed out")
        .unwrap()
        .expect("Receive failed");
    let saved = received.save_path.expect("Receive should report a save path");
    assert_eq!(std::fs::read(saved).unwrap(), bytes);

    let events = drain(&mut sender_events);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, TransferEvent::Resumed { from_chunk: 3 }))
    );
    assert!(
        drain(&mut receiver_events)
            .iter()
            .any(|e| matches!(e, TransferEvent::Completed(_)))
    );

    drop(sender_ctx);
    let store = writer_task.await.unwrap();
    assert!(store.load(TRANSFER_ID).is_none());
}

#[tokio::test]
async fn test_resume_into_closed_room_clears_checkpoint() {
    let addr = start_server(fast_server()).await;
    let source_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let store_path = store_dir.path().join("transfer-progress.json");
    let (path, _) = write_file(source_dir.path(), "report.pdf", 7000);

    let mut store = CheckpointStore::open(&store_path, DAY);
    store.save(saved_checkpoint("ZZZZZZ", &path, 4)).unwrap();
    let checkpoint = store.load(TRANSFER_ID).unwrap();

    let (writer, writer_task) = CheckpointWriter::spawn(CheckpointStore::open(&store_path, DAY));
    let (events, _events) = event_channel();
    let ctx = SessionContext::new(settings(&addr, None), writer, events);
    let err = timeout(TEST_TIMEOUT, send_file(&ctx, &path, Some(checkpoint)))
        .await
        .expect("Send timed out")
        .unwrap_err();
    assert!(matches!(err, TransferError::Session(SessionError::RoomGone)));
    assert_eq!(err.action(), FailureAction::StartOver);

    drop(ctx);
    let store = writer_task.await.unwrap();
    assert!(store.load(TRANSFER_ID).is_none());
    assert!(
        CheckpointStore::open(&store_path, DAY)
            .load(TRANSFER_ID)
            .is_none()
    );
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_receive_unknown_room() {
    let addr = start_server(fast_server()).await;
    let target_dir = tempfile::tempdir().unwrap();
    let (ctx, mut events) = context(settings(&addr, None));
    let sink = FsSink::new(target_dir.path());

    let err = receive_file(&ctx, "ZZZZZZ", &sink, None).await.unwrap_err();
    assert!(matches!(
        err,
        TransferError::Session(SessionError::RoomNotFound)
    ));
    assert_eq!(err.action(), FailureAction::StartOver);

    match drain(&mut events).pop() {
        Some(TransferEvent::Failed { record, action, .. }) => {
            assert_eq!(action, FailureAction::StartOver);
            assert_eq!(record.outcome, Outcome::Failed);
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_missing_file() {
    let addr = start_server(fast_server()).await;
    let (ctx, _events) = context(settings(&addr, None));

    let err = send_file(&ctx, Path::new("/nonexistent/ferry-test.bin"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Io(_)));
}

#[tokio::test]
async fn test_cancelled_while_waiting_for_receiver() {
    let addr = start_server(fast_server()).await;
    let source_dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(source_dir.path(), "a.bin", 100);

    let (ctx, mut events) = context(settings(&addr, None));
    let cancel = ctx.cancel.clone();
    let sender = tokio::spawn(async move { send_file(&ctx, &path, None).await });
    room_code(&mut events).await;
    cancel.cancel();

    let err = timeout(TEST_TIMEOUT, sender).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, TransferError::Cancelled));
    match drain(&mut events).pop() {
        Some(TransferEvent::Failed { record, .. }) => assert_eq!(record.outcome, Outcome::Cancelled),
        other => panic!("Expected Failed, got {:?}", other),
    }
}
