//! Signaling connection with request/response correlation
//!
//! Reading and writing run in separate tasks so a frame read is never
//! cancelled halfway through. Responses are matched to requests by message
//! ID; everything else (notifications, forwarded signals, stray errors) is
//! delivered on the event channel. The event channel closing is how callers
//! learn the connection was lost.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use ferry_common::framing::{FrameReader, FrameWriter, MessageId};
use ferry_common::io::{read_server_message, send_client_message_with_id};
use ferry_common::protocol::{ClientMessage, ServerMessage};

use crate::constants::{CONNECTION_TIMEOUT, REQUEST_TIMEOUT};

type Reader = FrameReader<BufReader<OwnedReadHalf>>;
type Writer = FrameWriter<OwnedWriteHalf>;

/// Type alias for the command channel sender
type CommandSender = mpsc::UnboundedSender<(MessageId, ClientMessage)>;

/// Type alias for the command channel receiver
type CommandReceiver = mpsc::UnboundedReceiver<(MessageId, ClientMessage)>;

/// Requests waiting for their response
type PendingRequests = Arc<Mutex<HashMap<MessageId, oneshot::Sender<ServerMessage>>>>;

/// Server messages that are not responses to a pending request
pub type EventReceiver = mpsc::UnboundedReceiver<ServerMessage>;

/// Errors talking to the signaling server
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("signaling connection lost")]
    Disconnected,
    #[error("no response from server")]
    Timeout,
}

/// Handle for shutting down a signaling connection
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: oneshot::Sender<()>,
}

impl ShutdownHandle {
    /// Signal the network tasks to shut down
    pub fn shutdown(self) {
        let _ = self.tx.send(());
    }
}

/// Cloneable handle for sending to the server
#[derive(Debug, Clone)]
pub struct SignalingClient {
    tx: CommandSender,
    pending: PendingRequests,
}

impl SignalingClient {
    /// Send without waiting for a response
    pub fn send(&self, message: ClientMessage) -> Result<MessageId, SignalingError> {
        let message_id = MessageId::new();
        self.tx
            .send((message_id, message))
            .map_err(|_| SignalingError::Disconnected)?;
        Ok(message_id)
    }

    /// Send and wait for the response carrying the same message ID
    pub async fn request(&self, message: ClientMessage) -> Result<ServerMessage, SignalingError> {
        let message_id = MessageId::new();
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(message_id, tx);

        if self.tx.send((message_id, message)).is_err() {
            self.lock_pending().remove(&message_id);
            return Err(SignalingError::Disconnected);
        }

        match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(SignalingError::Disconnected),
            Err(_) => {
                self.lock_pending().remove(&message_id);
                Err(SignalingError::Timeout)
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<MessageId, oneshot::Sender<ServerMessage>>> {
        lock(&self.pending)
    }
}

/// A live signaling connection
#[derive(Debug)]
pub struct Connection {
    pub client: SignalingClient,
    pub events: EventReceiver,
    shutdown: Option<ShutdownHandle>,
}

impl Connection {
    /// Connect to the signaling server at `address` (`host:port`)
    pub async fn connect(address: &str) -> Result<Self, SignalingError> {
        let stream = match timeout(CONNECTION_TIMEOUT, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(SignalingError::Connect {
                    address: address.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(SignalingError::Connect {
                    address: address.to_string(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "connection timed out"),
                });
            }
        };
        let _ = stream.set_nodelay(true);
        tracing::debug!(server = %address, "signaling connected");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an established stream and spawn the reader and writer tasks
    pub fn from_stream(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let reader = FrameReader::new(BufReader::new(read_half));
        let writer = FrameWriter::new(write_half);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));

        spawn_reader_writer_tasks(reader, writer, cmd_rx, event_tx, pending.clone(), shutdown_rx);

        Self {
            client: SignalingClient {
                tx: cmd_tx,
                pending,
            },
            events: event_rx,
            shutdown: Some(ShutdownHandle { tx: shutdown_tx }),
        }
    }

    /// Close the connection; later requests fail with `Disconnected`
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.shutdown.take() {
            handle.shutdown();
        }
    }
}

/// Spawn separate reader and writer tasks sharing a stop flag
fn spawn_reader_writer_tasks(
    reader: Reader,
    writer: Writer,
    cmd_rx: CommandReceiver,
    event_tx: mpsc::UnboundedSender<ServerMessage>,
    pending: PendingRequests,
    shutdown_rx: oneshot::Receiver<()>,
) {
    let stop_flag = Arc::new(AtomicBool::new(false));

    let reader_stop = stop_flag.clone();
    tokio::spawn(async move {
        reader_task(reader, event_tx, pending, reader_stop).await;
    });

    tokio::spawn(async move {
        writer_task(writer, cmd_rx, shutdown_rx, stop_flag).await;
    });
}

/// Reads messages, routing responses to their requests
///
/// Runs without `select!` so reads are never cancelled mid-frame. On exit
/// every pending request is dropped, which fails its waiter.
async fn reader_task(
    mut reader: Reader,
    event_tx: mpsc::UnboundedSender<ServerMessage>,
    pending: PendingRequests,
    stop_flag: Arc<AtomicBool>,
) {
    loop {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }

        match read_server_message(&mut reader).await {
            Ok(Some(received)) => {
                let waiter = lock(&pending).remove(&received.message_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(received.message);
                    }
                    None => {
                        if event_tx.send(received.message).is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(None) => {
                tracing::debug!("signaling connection closed by server");
                break;
            }
            Err(e) => {
                tracing::debug!(error = %e, "signaling read failed");
                break;
            }
        }
    }

    stop_flag.store(true, Ordering::Relaxed);
    lock(&pending).clear();
}

/// Writes queued messages until shutdown or a write error
async fn writer_task(
    mut writer: Writer,
    mut cmd_rx: CommandReceiver,
    mut shutdown_rx: oneshot::Receiver<()>,
    stop_flag: Arc<AtomicBool>,
) {
    loop {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }

        tokio::select! {
            command = cmd_rx.recv() => {
                let Some((message_id, message)) = command else {
                    break;
                };
                if let Err(e) = send_client_message_with_id(&mut writer, &message, message_id).await {
                    tracing::debug!(error = %e, "signaling write failed");
                    break;
                }
            }
            _ = &mut shutdown_rx => {
                break;
            }
        }
    }

    stop_flag.store(true, Ordering::Relaxed);
    let _ = writer.get_mut().shutdown().await;
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_common::io::{read_client_message_with_timeout, send_server_message, send_server_message_with_id};
    use tokio::net::TcpListener;

    /// Accept one client and hand back framed halves of the server side
    async fn pair() -> (
        Connection,
        FrameReader<BufReader<OwnedReadHalf>>,
        FrameWriter<OwnedWriteHalf>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(async move { Connection::connect(&addr.to_string()).await });
        let (stream, _) = listener.accept().await.unwrap();
        let connection = connect.await.unwrap().unwrap();
        let (r, w) = stream.into_split();
        (
            connection,
            FrameReader::new(BufReader::new(r)),
            FrameWriter::new(w),
        )
    }

    #[tokio::test]
    async fn test_request_matches_response_by_id() {
        let (mut connection, mut server_reader, mut server_writer) = pair().await;
        let client = connection.client.clone();

        let request = tokio::spawn(async move { client.request(ClientMessage::ServerStats).await });

        let received = read_client_message_with_timeout(&mut server_reader)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received.message, ClientMessage::ServerStats));

        // A notification first, then the response
        send_server_message(&mut server_writer, &ServerMessage::PeerLeft { member_id: 7 })
            .await
            .unwrap();
        send_server_message_with_id(
            &mut server_writer,
            &ServerMessage::ServerStatsResponse {
                rooms: 1,
                connections: 2,
            },
            received.message_id,
        )
        .await
        .unwrap();

        match request.await.unwrap().unwrap() {
            ServerMessage::ServerStatsResponse { rooms, connections } => {
                assert_eq!(rooms, 1);
                assert_eq!(connections, 2);
            }
            other => panic!("Expected ServerStatsResponse, got {:?}", other),
        }
        match connection.events.recv().await {
            Some(ServerMessage::PeerLeft { member_id }) => assert_eq!(member_id, 7),
            other => panic!("Expected PeerLeft, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_close_ends_events_and_fails_requests() {
        let (mut connection, server_reader, server_writer) = pair().await;
        let client = connection.client.clone();
        let request = tokio::spawn(async move { client.request(ClientMessage::ServerStats).await });

        // Give the request time to be written before the server goes away
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(server_reader);
        drop(server_writer);

        assert!(connection.events.recv().await.is_none());
        assert!(matches!(
            request.await.unwrap(),
            Err(SignalingError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        match Connection::connect(&addr.to_string()).await {
            Err(SignalingError::Connect { address, .. }) => assert_eq!(address, addr.to_string()),
            other => panic!("Expected Connect error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_server_side() {
        let (mut connection, mut server_reader, _server_writer) = pair().await;
        connection.shutdown();
        let next = read_client_message_with_timeout(&mut server_reader).await.unwrap();
        assert!(next.is_none());
    }
}
