//! Client connection handling

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use ferry_common::framing::{FrameError, FrameReader, FrameWriter, MessageId};
use ferry_common::io::{
    ReceivedClientMessage, read_client_message_with_full_timeout,
    read_client_message_with_timeout, send_server_message_with_id,
};
use ferry_common::protocol::{ClientMessage, ServerMessage};

use crate::config::ServerConfig;
use crate::handlers::{self, HandlerContext, err_invalid_message_format};
use crate::members::MemberManager;
use crate::rooms::RoomManager;

/// Parameters for handling a connection
pub struct ConnectionParams {
    pub peer_addr: SocketAddr,
    pub rooms: RoomManager,
    pub members: MemberManager,
    pub config: ServerConfig,
}

/// Connection state for a single client
struct ConnectionState {
    member_id: u32,
    /// Has created, joined or rejoined a room at some point
    joined: bool,
}

/// Handle a client connection
pub async fn handle_connection(socket: TcpStream, params: ConnectionParams) -> io::Result<()> {
    handle_connection_inner(socket, params).await
}

/// Inner connection handler that works with any AsyncRead + AsyncWrite stream
pub async fn handle_connection_inner<S>(socket: S, params: ConnectionParams) -> io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let ConnectionParams {
        peer_addr,
        rooms,
        members,
        config,
    } = params;

    let (reader, writer) = tokio::io::split(socket);
    let frame_reader = FrameReader::new(BufReader::new(reader));
    let mut frame_writer = FrameWriter::new(writer);

    // Messages for this client from other connections and delayed tasks
    let (tx, mut rx) = mpsc::unbounded_channel::<(ServerMessage, Option<MessageId>)>();

    let member_id = members.add(peer_addr, tx.clone()).await;
    let mut conn_state = ConnectionState {
        member_id,
        joined: false,
    };
    tracing::debug!(peer = %peer_addr, member = member_id, "connection accepted");

    // The pending read owns the reader, so an outgoing notice never cancels
    // a half-read frame
    let mut pending_read = Box::pin(read_next(frame_reader, false));

    loop {
        tokio::select! {
            (reader, result) = &mut pending_read => {
                match result {
                    Ok(Some(received)) => {
                        let mut ctx = HandlerContext {
                            writer: &mut frame_writer,
                            peer_addr,
                            member_id,
                            tx: &tx,
                            message_id: received.message_id,
                            rooms: &rooms,
                            members: &members,
                            config: &config,
                        };

                        if let Err(e) = handle_client_message(
                            received.message,
                            &mut conn_state,
                            &mut ctx,
                        ).await {
                            tracing::debug!(peer = %peer_addr, error = %e, "closing connection");
                            break;
                        }
                        pending_read.set(read_next(reader, conn_state.joined));
                    }
                    Ok(None) => {
                        // Connection closed cleanly
                        break;
                    }
                    Err(e) => {
                        // Scanners and dropped connections produce these constantly
                        let is_common_error = matches!(
                            e,
                            FrameError::InvalidMagic
                                | FrameError::FrameTimeout
                                | FrameError::IdleTimeout
                                | FrameError::ConnectionClosed
                        );
                        if is_common_error {
                            tracing::debug!(peer = %peer_addr, error = %e, "frame error");
                        } else {
                            tracing::warn!(peer = %peer_addr, error = %e, "frame error");
                        }

                        // Try to send error before disconnecting
                        let error_msg = ServerMessage::Error {
                            message: err_invalid_message_format(),
                            command: None,
                        };
                        let _ = send_server_message_with_id(
                            &mut frame_writer,
                            &error_msg,
                            MessageId::new(),
                        ).await;
                        break;
                    }
                }
            }

            msg = rx.recv() => {
                match msg {
                    Some((msg, msg_id)) => {
                        let id = msg_id.unwrap_or_else(MessageId::new);
                        if send_server_message_with_id(&mut frame_writer, &msg, id).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let _ = frame_writer.get_mut().shutdown().await;

    // Disconnect is an implicit leave of every room
    for (room_id, remaining) in rooms.remove_from_all(conn_state.member_id).await {
        if remaining.is_empty() {
            tracing::info!(room = %room_id, "room deleted after last member disconnected");
            continue;
        }
        members
            .send_to_all(
                &remaining,
                &ServerMessage::PeerLeft {
                    member_id: conn_state.member_id,
                },
            )
            .await;
    }
    members.remove(conn_state.member_id).await;
    tracing::debug!(peer = %peer_addr, member = conn_state.member_id, "connection closed");

    Ok(())
}

/// Read the next client message, handing the reader back with the result
///
/// Before a room is joined the first frame must arrive within the idle
/// timeout; afterwards the connection may idle while the peer works.
async fn read_next<R>(
    mut reader: FrameReader<R>,
    in_room: bool,
) -> (FrameReader<R>, Result<Option<ReceivedClientMessage>, FrameError>)
where
    R: AsyncRead + Unpin,
{
    let result = if in_room {
        read_client_message_with_timeout(&mut reader).await
    } else {
        read_client_message_with_full_timeout(&mut reader, None, None).await
    };
    (reader, result)
}

/// Dispatch a message from the client
async fn handle_client_message<W>(
    msg: ClientMessage,
    conn_state: &mut ConnectionState,
    ctx: &mut HandlerContext<'_, W>,
) -> io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    match msg {
        ClientMessage::CreateRoom {
            file_info,
            local_address,
        } => {
            handlers::handle_create_room(file_info, local_address, &mut conn_state.joined, ctx)
                .await?;
        }
        ClientMessage::JoinRoom {
            room_id,
            local_address,
        } => {
            handlers::handle_join_room(room_id, local_address, &mut conn_state.joined, ctx).await?;
        }
        ClientMessage::RejoinRoom {
            room_id,
            direction,
            transfer_id,
            last_chunk,
            local_address,
        } => {
            let request = handlers::RejoinRequest {
                room_id,
                direction,
                transfer_id,
                last_chunk,
                local_address,
            };
            handlers::handle_rejoin_room(request, &mut conn_state.joined, ctx).await?;
        }
        ClientMessage::LeaveRoom { room_id } => {
            handlers::handle_leave_room(room_id, ctx).await?;
        }
        ClientMessage::Signal { room_id, payload } => {
            handlers::handle_signal(room_id, payload, ctx).await?;
        }
        ClientMessage::RelayChunk {
            room_id,
            transfer_id,
            chunk_index,
            total_chunks,
            chunk_size,
            payload,
        } => {
            let request = handlers::RelayChunkRequest {
                room_id,
                transfer_id,
                chunk_index,
                total_chunks,
                chunk_size,
                payload,
            };
            handlers::handle_relay_chunk(request, ctx).await?;
        }
        ClientMessage::RequestRelayChunk {
            room_id,
            transfer_id,
            chunk_index,
            held_below,
        } => {
            let request = handlers::RelayPullRequest {
                room_id,
                transfer_id,
                chunk_index,
                held_below,
            };
            handlers::handle_request_relay_chunk(request, ctx).await?;
        }
        ClientMessage::FileTransferComplete {
            room_id,
            role,
            transfer_id,
        } => {
            handlers::handle_transfer_complete(room_id, role, transfer_id, ctx).await?;
        }
        ClientMessage::ServerStats => {
            handlers::handle_server_stats(ctx).await?;
        }
    }

    Ok(())
}
