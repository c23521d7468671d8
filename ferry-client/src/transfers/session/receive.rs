//! Receiver session driver

use std::collections::VecDeque;
use std::net::IpAddr;
use std::path::PathBuf;

use tokio::time::{Instant, sleep_until};

use ferry_common::FALLBACK_FILE_NAME;
use ferry_common::protocol::{ClientMessage, Direction, FileInfo, Role, ServerMessage, TransferMode};

use super::{ModeChoice, SessionContext, Tracker, finish, wait_for_mode};
use crate::channel::{ChannelError, ChannelKind, ChannelSignal, DataChannel, PendingOffer, TcpChannel};
use crate::constants::OFFER_ACCEPT_TIMEOUT;
use crate::network::{Connection, outbound_ip};
use crate::transfers::checkpoint::ResumeCheckpoint;
use crate::transfers::engine::{ReceiveEngine, Received};
use crate::transfers::errors::{ProtocolError, SessionError, TransferError};
use crate::transfers::events::TransferEvent;
use crate::transfers::history::HistoryEntry;
use crate::transfers::rooms::{join_room, leave_room, rejoin_room, report_complete};
use crate::transfers::storage::FileSink;
use crate::transfers::supervisor::{ReconnectSupervisor, RejoinTicket};
use crate::transfers::types::{TransferSession, Transport};

/// Receive the file offered in room `room_id`, handing it to `sink`
///
/// With `resume`, the receiver re-enters the checkpoint's room. Chunks held
/// by a previous process are not kept on disk, so it asks for everything
/// again; in relay mode the buffered chunks are pulled from the server.
pub async fn receive_file(
    ctx: &SessionContext,
    room_id: &str,
    sink: &dyn FileSink,
    resume: Option<ResumeCheckpoint>,
) -> Result<HistoryEntry, TransferError> {
    let mut tracker = Tracker::new(Direction::Receive, FALLBACK_FILE_NAME, 0);
    let result = run(ctx, room_id, sink, resume, &mut tracker).await.map(Some);
    finish(ctx, &tracker, result)
}

async fn run(
    ctx: &SessionContext,
    room_code: &str,
    sink: &dyn FileSink,
    resume: Option<ResumeCheckpoint>,
    tracker: &mut Tracker,
) -> Result<PathBuf, TransferError> {
    let local_address = ctx.settings.local_address.clone();
    let mut connection = Connection::connect(&ctx.settings.server_address).await?;

    let (room_id, transfer_id, file_info, mode, buffered) = match resume {
        Some(checkpoint) => {
            let rejoined = rejoin_room(
                &connection.client,
                &checkpoint.room_id,
                Direction::Receive,
                &checkpoint.transfer_id,
                0,
                local_address,
            )
            .await;
            let room = match rejoined {
                Ok(room) => room,
                Err(e @ TransferError::Session(_)) => {
                    ctx.checkpoints.clear(&checkpoint.transfer_id);
                    ctx.checkpoints.flush().await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            let file_info = room.file_info.unwrap_or_else(|| FileInfo {
                name: checkpoint.file_name.clone(),
                size: checkpoint.file_size,
                mime_type: String::new(),
            });
            tracing::info!(room_id = %checkpoint.room_id, "resuming receive");
            (
                checkpoint.room_id,
                checkpoint.transfer_id,
                file_info,
                room.mode.map(ModeChoice::from_rejoin),
                room.buffered_chunks,
            )
        }
        None => {
            let joined = join_room(&connection.client, room_code, local_address).await?;
            if joined.self_transfer {
                return Err(SessionError::Rejected(
                    "cannot receive a file this connection is sending".to_string(),
                )
                .into());
            }
            (joined.room_id, String::new(), joined.file_info, None, Vec::new())
        }
    };

    tracker.file_name = file_info.name.clone();
    tracker.file_size = file_info.size;
    ctx.emit(TransferEvent::Joined {
        room_id: room_id.clone(),
        file_info: file_info.clone(),
    });

    let choice = match mode {
        Some(choice) => choice,
        None => wait_for_mode(ctx, &mut connection.events, file_info.size).await?,
    };

    let session = TransferSession::new(
        transfer_id,
        room_id,
        Direction::Receive,
        FALLBACK_FILE_NAME.to_string(),
        0,
        0,
        choice.mode,
    );
    let mut engine = ReceiveEngine::new(session, ctx.policy());
    let transport = if choice.mode.is_peer_to_peer() {
        Transport::Channel
    } else {
        engine.expect_file(&file_info);
        Transport::Relay
    };

    let discovered = outbound_ip(&ctx.settings.server_address).await;
    let mut driver = ReceiveDriver {
        ctx,
        connection,
        engine,
        file_info,
        transport,
        discovered,
        channel: None,
        offer: None,
        offer_sent_at: None,
        pulls: buffered.into(),
        resumed: false,
    };
    driver.drive(sink, tracker).await
}

/// What woke the receive loop
enum Step {
    Event(Option<ServerMessage>),
    Accepted(std::io::Result<TcpChannel>),
    Channel(Result<Option<Vec<u8>>, ChannelError>),
    OfferExpired,
    GraceElapsed,
}

struct ReceiveDriver<'a> {
    ctx: &'a SessionContext,
    connection: Connection,
    engine: ReceiveEngine,
    file_info: FileInfo,
    transport: Transport,
    discovered: Option<IpAddr>,
    channel: Option<Box<dyn DataChannel>>,
    offer: Option<PendingOffer>,
    offer_sent_at: Option<Instant>,
    /// Relay chunk indices to pull, in order
    pulls: VecDeque<u64>,
    resumed: bool,
}

impl ReceiveDriver<'_> {
    async fn drive(
        &mut self,
        sink: &dyn FileSink,
        tracker: &mut Tracker,
    ) -> Result<PathBuf, TransferError> {
        let mut supervisor =
            ReconnectSupervisor::new(&self.ctx.settings.reconnect, self.ctx.events.clone());

        let received = self.collect(&mut supervisor).await;
        if let Err(e) = received {
            self.engine.abort();
            if matches!(e, TransferError::Cancelled) {
                self.ctx
                    .checkpoints
                    .cancel(&self.engine.session().transfer_id);
                let room_id = self.engine.session().room_id.clone();
                leave_room(&self.connection.client, &room_id).await;
            }
            return Err(e);
        }

        let bytes = match self.engine.assemble() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.engine.abort();
                return Err(e);
            }
        };
        let session = self.engine.session();
        tracker.file_name = session.file_name.clone();
        tracker.file_size = bytes.len() as u64;
        let saved = sink.persist(&session.file_name, bytes).await?;
        tracing::info!(path = %saved.display(), "file saved");

        self.report(&mut supervisor).await;
        self.ctx
            .checkpoints
            .clear(&self.engine.session().transfer_id);
        self.engine.complete();
        Ok(saved)
    }

    /// Run until every chunk is held
    async fn collect(&mut self, supervisor: &mut ReconnectSupervisor) -> Result<(), TransferError> {
        if self.transport == Transport::Channel {
            self.send_offer().await?;
        }

        while !self.engine.is_complete() {
            if self.ctx.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            if self.transport == Transport::Relay
                && let Some(index) = self.pulls.pop_front()
            {
                if self.engine.holds(index) {
                    continue;
                }
                let pulled = tokio::select! {
                    _ = self.ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                    pulled = self.pull(index) => pulled,
                };
                match pulled {
                    Ok(bytes) => {
                        let stored = self.engine.store_chunk(index, bytes, Instant::now())?;
                        self.on_stored(stored);
                    }
                    Err(e) if e.is_transport() => {
                        self.pulls.push_front(index);
                        self.recover(supervisor, e.to_string()).await?;
                    }
                    Err(e) => return Err(e),
                }
                continue;
            }

            let grace = self
                .engine
                .grace_deadline(self.ctx.settings.transfer.metadata_grace());
            let offer_expiry = match (&self.channel, self.offer_sent_at) {
                (None, Some(sent)) if self.transport == Transport::Channel => {
                    Some(sent + OFFER_ACCEPT_TIMEOUT)
                }
                _ => None,
            };
            let accepting = self.channel.is_none() && self.offer.is_some();

            let step = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                message = self.connection.events.recv() => Step::Event(message),
                accepted = accept(&self.offer), if accepting => Step::Accepted(accepted),
                message = recv(&mut self.channel) => Step::Channel(message),
                _ = sleep_until_some(offer_expiry), if offer_expiry.is_some() => Step::OfferExpired,
                _ = sleep_until_some(grace), if grace.is_some() => Step::GraceElapsed,
            };

            match step {
                Step::Event(Some(message)) => self.on_event(message).await?,
                Step::Event(None) => {
                    self.recover(supervisor, "signaling connection lost".to_string())
                        .await?;
                }
                Step::Accepted(Ok(channel)) => {
                    self.channel = Some(Box::new(channel));
                    self.offer = None;
                    self.offer_sent_at = None;
                    self.ctx.emit(TransferEvent::ChannelOpened {
                        kind: ChannelKind::Tcp,
                    });
                    if self.resumed {
                        self.ctx.emit(TransferEvent::Resumed {
                            from_chunk: self.engine.contiguous(),
                        });
                    }
                }
                Step::Accepted(Err(e)) => {
                    tracing::warn!(error = %e, "data channel accept failed");
                    self.offer = None;
                    self.send_offer().await?;
                }
                Step::Channel(Ok(Some(message))) => {
                    let received = self.engine.accept(message, Instant::now())?;
                    if let Received::Metadata { .. } = received {
                        let session = self.engine.session();
                        self.ctx.emit(TransferEvent::Joined {
                            room_id: session.room_id.clone(),
                            file_info: FileInfo {
                                name: session.file_name.clone(),
                                size: session.file_size,
                                mime_type: self.file_info.mime_type.clone(),
                            },
                        });
                    }
                    self.on_stored(received);
                }
                Step::Channel(Ok(None)) => self.channel_lost("closed by peer").await?,
                Step::Channel(Err(e)) => self.channel_lost(&e.to_string()).await?,
                Step::OfferExpired => {
                    tracing::debug!("offer not taken, sending it again");
                    self.send_offer().await?;
                }
                Step::GraceElapsed => {
                    self.engine.finish_without_metadata();
                }
            }
        }
        Ok(())
    }

    /// Progress and checkpoints after a stored chunk
    fn on_stored(&mut self, received: Received) {
        if let Received::Chunk {
            fresh: true,
            checkpoint,
            ..
        } = received
        {
            let session = self.engine.session();
            self.ctx.emit(TransferEvent::Progress {
                direction: Direction::Receive,
                chunk_index: session.chunk_index,
                total_chunks: session.total_chunks,
                bytes_transferred: session.bytes_transferred,
                file_size: session.file_size,
            });
            if let Some(checkpoint) = checkpoint {
                self.ctx.checkpoints.save(checkpoint);
            }
        }
    }

    async fn on_event(&mut self, message: ServerMessage) -> Result<(), TransferError> {
        match message {
            ServerMessage::RelayChunkAvailable {
                transfer_id,
                chunk_index,
                total_chunks,
                chunk_size,
            } => {
                if self.transport == Transport::Channel {
                    // The sender is relaying; a fallback notice went missing
                    self.switch_to_relay();
                }
                self.engine.set_transfer_id(&transfer_id);
                self.engine.expect_total(total_chunks, chunk_size);
                if !self.engine.holds(chunk_index) && !self.pulls.contains(&chunk_index) {
                    self.pulls.push_back(chunk_index);
                }
            }
            ServerMessage::Signal { payload, .. } => match ChannelSignal::from_payload(&payload) {
                Some(ChannelSignal::Fallback) => self.switch_to_relay(),
                Some(ChannelSignal::Connected) => tracing::debug!("sender connected"),
                _ => tracing::debug!(payload = %payload, "ignored signal"),
            },
            ServerMessage::PeerReconnected {
                direction: Direction::Send,
                last_chunk,
                ..
            } => {
                tracing::info!(last_chunk, "sender reconnected");
                if self.transport == Transport::Channel {
                    // The sender dropped its channel when its connection went
                    self.channel = None;
                    self.resumed = true;
                    self.send_offer().await?;
                }
            }
            ServerMessage::RoomClosing { .. } | ServerMessage::RoomClosed { .. } => {
                return Err(SessionError::RoomGone.into());
            }
            ServerMessage::PeerLeft { member_id } => {
                tracing::info!(member_id, "sender left, waiting for it to reconnect");
            }
            other => tracing::debug!(message = ?other, "ignored during receive"),
        }
        Ok(())
    }

    fn switch_to_relay(&mut self) {
        if self.transport == Transport::Relay {
            return;
        }
        tracing::info!("sender fell back to relay");
        self.transport = Transport::Relay;
        self.channel = None;
        self.offer = None;
        self.offer_sent_at = None;
        self.engine.set_mode(TransferMode::ServerRelay);
        self.engine.expect_file(&self.file_info);
        self.ctx.emit(TransferEvent::FellBackToRelay);
    }

    async fn channel_lost(&mut self, reason: &str) -> Result<(), TransferError> {
        tracing::info!(reason, held = self.engine.contiguous(), "data channel lost");
        self.channel = None;
        self.resumed = true;
        self.send_offer().await
    }

    /// Offer the listener to the sender, binding one if needed
    ///
    /// The offer carries the contiguous chunk count so the sender can start
    /// from there.
    async fn send_offer(&mut self) -> Result<(), TransferError> {
        if self.offer.is_none() {
            let offer = PendingOffer::bind(
                self.ctx.settings.local_address.as_deref(),
                self.discovered,
            )
            .await?;
            self.offer = Some(offer);
        }
        let Some(offer) = &self.offer else {
            return Ok(());
        };

        let signal = offer.offer(self.engine.contiguous());
        let message = ClientMessage::Signal {
            room_id: self.engine.session().room_id.clone(),
            payload: signal.to_payload(),
        };
        // A lost connection surfaces on the event channel
        if let Err(e) = self.connection.client.send(message) {
            tracing::debug!(error = %e, "failed to send offer");
        }
        self.offer_sent_at = Some(Instant::now());
        Ok(())
    }

    async fn pull(&self, index: u64) -> Result<Vec<u8>, TransferError> {
        let session = self.engine.session();
        let request = ClientMessage::RequestRelayChunk {
            room_id: session.room_id.clone(),
            transfer_id: session.transfer_id.clone(),
            chunk_index: index,
            held_below: self.engine.contiguous(),
        };
        match self.connection.client.request(request).await? {
            ServerMessage::RelayChunkData { payload, .. } => Ok(payload),
            ServerMessage::RelayChunkError { reason, .. } => {
                Err(ProtocolError::RelayChunk { index, reason }.into())
            }
            ServerMessage::Error { message, .. } => Err(ProtocolError::Unexpected(message).into()),
            other => Err(ProtocolError::Unexpected(format!("{other:?}")).into()),
        }
    }

    /// Suspend, reconnect, rejoin and pick up where the room is
    async fn recover(
        &mut self,
        supervisor: &mut ReconnectSupervisor,
        reason: String,
    ) -> Result<(), TransferError> {
        // A timed-out request can leave the old socket open
        self.connection.shutdown();
        self.engine.suspend();
        self.ctx.emit(TransferEvent::Suspended {
            reason: reason.clone(),
        });
        self.ctx.checkpoints.save(self.engine.checkpoint());
        self.ctx.checkpoints.flush().await;

        let session = self.engine.session();
        let ticket = RejoinTicket {
            room_id: session.room_id.clone(),
            direction: Direction::Receive,
            transfer_id: session.transfer_id.clone(),
            last_chunk: self.engine.contiguous(),
        };
        let reconnector = self.ctx.reconnector();
        let rejoined = tokio::select! {
            _ = self.ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = supervisor.recover(&reconnector, &ticket) => result?,
        };

        self.connection = rejoined.connection;
        for index in rejoined.room.buffered_chunks {
            if !self.engine.holds(index) && !self.pulls.contains(&index) {
                self.pulls.push_back(index);
            }
        }
        self.resumed = true;
        self.ctx.emit(TransferEvent::Resumed {
            from_chunk: self.engine.contiguous(),
        });

        if self.transport == Transport::Channel && self.channel.is_none() {
            self.send_offer().await?;
        }
        Ok(())
    }

    /// Report the receiver role, once more after a reconnect if needed
    ///
    /// The file is already saved; a failed report only leaves the room to
    /// expire on its own.
    async fn report(&mut self, supervisor: &mut ReconnectSupervisor) {
        for attempt in 0..2 {
            let session = self.engine.session();
            let result = report_complete(
                &self.connection.client,
                &session.room_id,
                Role::Receiver,
                &session.transfer_id,
            )
            .await;
            match result {
                Ok(()) => return,
                Err(e) if e.is_transport() && attempt == 0 => {
                    if let Err(e) = self.recover(supervisor, e.to_string()).await {
                        tracing::warn!(error = %e, "could not report completion");
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not report completion");
                    return;
                }
            }
        }
    }
}

async fn accept(offer: &Option<PendingOffer>) -> std::io::Result<TcpChannel> {
    match offer {
        Some(offer) => offer.accept().await,
        None => std::future::pending().await,
    }
}

async fn recv(channel: &mut Option<Box<dyn DataChannel>>) -> Result<Option<Vec<u8>>, ChannelError> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
