//! Sender session driver

use std::net::SocketAddr;
use std::path::Path;

use chrono::Utc;
use tokio::sync::mpsc::error::TryRecvError;

use ferry_common::protocol::{ClientMessage, Direction, Role, ServerMessage, TransferMode};

use super::{ModeChoice, SessionContext, Tracker, finish, wait_for_mode};
use crate::channel::{ChannelSignal, DataChannel, dial};
use crate::constants::COMPLETION_WAIT;
use crate::network::Connection;
use crate::transfers::checkpoint::ResumeCheckpoint;
use crate::transfers::engine::{ChannelLink, ChunkLink, RelayLink, SendEngine};
use crate::transfers::errors::{SessionError, TransferError};
use crate::transfers::events::TransferEvent;
use crate::transfers::history::HistoryEntry;
use crate::transfers::rooms::{create_room, leave_room, rejoin_room, report_complete};
use crate::transfers::storage::{FileSource, FsSource};
use crate::transfers::supervisor::{ReconnectSupervisor, RejoinTicket};
use crate::transfers::types::{TransferSession, Transport, transfer_id};

/// Send one file
///
/// With `resume`, the transfer re-enters the checkpoint's room and continues
/// from its chunk index instead of creating a new room.
pub async fn send_file(
    ctx: &SessionContext,
    path: &Path,
    resume: Option<ResumeCheckpoint>,
) -> Result<HistoryEntry, TransferError> {
    let source = match FsSource::open(path).await {
        Ok(source) => source,
        Err(e) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let tracker = Tracker::new(Direction::Send, &name, 0);
            return finish(ctx, &tracker, Err(e.into()));
        }
    };

    let tracker = Tracker::new(Direction::Send, &source.info().name, source.info().size);
    let result = run(ctx, &source, resume).await.map(|()| None);
    finish(ctx, &tracker, result)
}

async fn run(
    ctx: &SessionContext,
    source: &FsSource,
    resume: Option<ResumeCheckpoint>,
) -> Result<(), TransferError> {
    let info = source.info().clone();
    let local_address = ctx.settings.local_address.clone();
    let mut connection = Connection::connect(&ctx.settings.server_address).await?;

    let mut chunk_size = ctx.settings.transfer.channel_chunk_size();
    let (room_id, id, resume_from, mode) = match resume {
        Some(checkpoint) => {
            let rejoined = rejoin_room(
                &connection.client,
                &checkpoint.room_id,
                Direction::Send,
                &checkpoint.transfer_id,
                checkpoint.chunk_index,
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
            if checkpoint.chunk_size > 0 {
                chunk_size = checkpoint.chunk_size;
            }
            tracing::info!(
                room_id = %checkpoint.room_id,
                from_chunk = checkpoint.chunk_index,
                "resuming send"
            );
            (
                checkpoint.room_id,
                checkpoint.transfer_id,
                checkpoint.chunk_index,
                room.mode.map(ModeChoice::from_rejoin),
            )
        }
        None => {
            let room_id = create_room(&connection.client, info.clone(), local_address).await?;
            tracing::info!(%room_id, file = %info.name, size = info.size, "room created");
            ctx.emit(TransferEvent::RoomCreated {
                room_id: room_id.clone(),
            });
            let id = transfer_id(&room_id, &info.name, info.size, Utc::now().timestamp_millis());
            (room_id, id, 0, None)
        }
    };

    let session = TransferSession::new(
        id,
        room_id,
        Direction::Send,
        info.name.clone(),
        info.size,
        chunk_size,
        TransferMode::DirectP2p,
    );
    let mut engine = SendEngine::new(session, ctx.policy())
        .with_source_path(source.path().to_path_buf());
    engine.begin(resume_from)?;
    ctx.checkpoints.save(engine.checkpoint());

    let choice = match mode {
        Some(choice) => choice,
        None => wait_for_mode(ctx, &mut connection.events, info.size).await?,
    };
    engine.set_mode(choice.mode);
    if choice.mode == TransferMode::ServerRelay
        && engine.set_chunk_size(ctx.settings.transfer.relay_chunk_size())
    {
        ctx.checkpoints.save(engine.checkpoint());
    }

    let mut driver = SendDriver {
        ctx,
        source,
        connection,
        engine,
        choice,
        transport: if choice.mode.is_peer_to_peer() {
            Transport::Channel
        } else {
            Transport::Relay
        },
        offer: None,
        rewind: None,
        dialed: Vec::new(),
        channel_used: false,
        reported: false,
        resumed: resume_from > 0,
    };
    driver.drive().await
}

/// How a pass over the link ended
enum PassEnd {
    /// Every chunk is out and the room closed
    Finished,
    /// The data channel broke; wait for a new offer
    Renegotiate,
    /// A restarted receiver needs relay chunks again
    Rewind,
    /// The signaling connection is gone
    SignalingLost(String),
}

/// A receiver offer waiting to be dialed
struct Offer {
    candidates: Vec<SocketAddr>,
    last_chunk: u64,
}

struct SendDriver<'a> {
    ctx: &'a SessionContext,
    source: &'a FsSource,
    connection: Connection,
    engine: SendEngine,
    choice: ModeChoice,
    transport: Transport,
    offer: Option<Offer>,
    /// Relay position a reconnected receiver asked to start over from
    rewind: Option<u64>,
    /// Candidates of the channel currently in use
    dialed: Vec<SocketAddr>,
    /// Metadata has gone out on some data channel
    channel_used: bool,
    /// The sender role has been reported complete
    reported: bool,
    /// Whether the next pass continues an earlier one
    resumed: bool,
}

impl SendDriver<'_> {
    async fn drive(&mut self) -> Result<(), TransferError> {
        let mut supervisor =
            ReconnectSupervisor::new(&self.ctx.settings.reconnect, self.ctx.events.clone());
        let reconnector = self.ctx.reconnector();

        loop {
            let end = match self.pass().await {
                Ok(end) => end,
                Err(e) => {
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
            };

            match end {
                PassEnd::Finished => {
                    self.engine.complete();
                    return Ok(());
                }
                PassEnd::Renegotiate => {
                    tracing::debug!("data channel lost, waiting for a new offer");
                    self.resumed = true;
                }
                PassEnd::Rewind => {
                    tracing::info!(from_chunk = ?self.rewind, "receiver restarted, relaying again");
                    self.resumed = true;
                }
                PassEnd::SignalingLost(reason) => {
                    // A timed-out request can leave the old socket open
                    self.connection.shutdown();
                    self.engine.suspend();
                    self.ctx.emit(TransferEvent::Suspended {
                        reason: reason.clone(),
                    });
                    if !self.reported {
                        self.ctx.checkpoints.save(self.engine.checkpoint());
                        self.ctx.checkpoints.flush().await;
                    }

                    let session = self.engine.session();
                    let ticket = RejoinTicket {
                        room_id: session.room_id.clone(),
                        direction: Direction::Send,
                        transfer_id: session.transfer_id.clone(),
                        last_chunk: self.engine.position(),
                    };
                    let recovered = tokio::select! {
                        _ = self.ctx.cancel.cancelled() => Err(TransferError::Cancelled),
                        result = supervisor.recover(&reconnector, &ticket) => result,
                    };

                    match recovered {
                        Ok(rejoined) => {
                            self.connection = rejoined.connection;
                            self.offer = None;
                            self.resumed = true;
                        }
                        Err(e) if self.reported => {
                            // Our role is already on record
                            tracing::info!(error = %e, "room unreachable after sending completed");
                            self.engine.complete();
                            return Ok(());
                        }
                        Err(e) => {
                            self.engine.abort();
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// One pass: open a link, send from the agreed point, report, await close
    ///
    /// Once the sender role is reported there is nothing to send unless the
    /// receiver asks for chunks again, with a new offer or by reconnecting
    /// in relay mode.
    async fn pass(&mut self) -> Result<PassEnd, TransferError> {
        if self.reported && self.offer.is_none() && self.rewind.is_none() {
            return self.await_close().await;
        }

        let (mut link, from) = match self.open_link().await? {
            Ok(opened) => opened,
            Err(end) => return Ok(end),
        };

        match self.engine.start(link.as_mut(), from).await {
            Ok(()) => {}
            Err(e) if e.is_transport() => return Ok(self.lost(link.transport(), e)),
            Err(e) => return Err(e),
        }
        if self.resumed {
            self.ctx.emit(TransferEvent::Resumed { from_chunk: from });
        }

        if let Some(end) = self.pump(link.as_mut()).await? {
            return Ok(end);
        }
        drop(link);

        if !self.reported {
            let session = self.engine.session();
            match report_complete(
                &self.connection.client,
                &session.room_id,
                Role::Sender,
                &session.transfer_id,
            )
            .await
            {
                Ok(()) => {}
                Err(e) if e.is_transport() => return Ok(PassEnd::SignalingLost(e.to_string())),
                Err(e) => return Err(e),
            }
            self.reported = true;
            self.ctx.checkpoints.clear(&session.transfer_id);
            tracing::info!(room_id = %session.room_id, "all chunks sent");
        }

        self.await_close().await
    }

    /// Pick the link for this pass and the chunk to start from
    ///
    /// The inner `Err` ends the pass without a link.
    async fn open_link(
        &mut self,
    ) -> Result<Result<(Box<dyn ChunkLink>, u64), PassEnd>, TransferError> {
        let ctx = self.ctx;
        let transfer = &ctx.settings.transfer;

        if self.transport == Transport::Relay {
            let session = self.engine.session();
            let link: Box<dyn ChunkLink> = Box::new(RelayLink::new(
                self.connection.client.clone(),
                &session.room_id,
                &session.transfer_id,
                session.chunk_size,
                transfer.relay_pause(),
            ));
            let position = self.engine.position();
            let from = self.rewind.take().map_or(position, |rewind| rewind.min(position));
            return Ok(Ok((link, from)));
        }

        let offer = match self.offer.take() {
            Some(offer) => offer,
            None => match self.await_offer().await? {
                Ok(offer) => offer,
                Err(end) => return Ok(Err(end)),
            },
        };
        let from = self.engine.position().min(offer.last_chunk);

        if let Some(channel) = dial(&offer.candidates).await {
            self.signal(ChannelSignal::Connected);
            self.dialed = offer.candidates;
            self.channel_used = true;
            ctx.emit(TransferEvent::ChannelOpened {
                kind: channel.kind(),
            });
            let link: Box<dyn ChunkLink> =
                Box::new(ChannelLink::new(Box::new(channel), transfer.direct_pause()));
            return Ok(Ok((link, from)));
        }

        if !self.choice.fallback_to_relay {
            return Err(TransferError::Transport(
                "could not open a data channel to the receiver".to_string(),
            ));
        }

        tracing::info!("no candidate reachable, falling back to relay");
        self.signal(ChannelSignal::Fallback);
        self.transport = Transport::Relay;
        if !self.channel_used && from == 0 {
            self.engine.set_chunk_size(transfer.relay_chunk_size());
        }
        ctx.emit(TransferEvent::FellBackToRelay);

        let session = self.engine.session();
        let link: Box<dyn ChunkLink> = Box::new(RelayLink::new(
            self.connection.client.clone(),
            &session.room_id,
            &session.transfer_id,
            session.chunk_size,
            transfer.relay_pause(),
        ));
        Ok(Ok((link, from)))
    }

    /// Send chunks until done, interleaving signaling events
    ///
    /// Returns `Some` when the pass ends early.
    async fn pump(&mut self, link: &mut dyn ChunkLink) -> Result<Option<PassEnd>, TransferError> {
        loop {
            loop {
                match self.connection.events.try_recv() {
                    Ok(message) => self.on_event(message)?,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        return Ok(Some(PassEnd::SignalingLost(
                            "signaling connection lost".to_string(),
                        )));
                    }
                }
            }
            if self.rewind.is_some() {
                return Ok(Some(PassEnd::Rewind));
            }

            let sent = tokio::select! {
                _ = self.ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                sent = self.engine.send_next(link, self.source) => sent,
            };

            match sent {
                Ok(Some(chunk)) => {
                    let session = self.engine.session();
                    self.ctx.emit(TransferEvent::Progress {
                        direction: Direction::Send,
                        chunk_index: session.chunk_index,
                        total_chunks: session.total_chunks,
                        bytes_transferred: session.bytes_transferred,
                        file_size: session.file_size,
                    });
                    // A reported role has already cleared its checkpoint
                    if let Some(checkpoint) = chunk.checkpoint
                        && !self.reported
                    {
                        self.ctx.checkpoints.save(checkpoint);
                    }
                }
                Ok(None) => return Ok(None),
                Err(e) if e.is_transport() => return Ok(Some(self.lost(link.transport(), e))),
                Err(e) => return Err(e),
            }
        }
    }

    /// Signaling messages seen while chunks are flowing
    fn on_event(&mut self, message: ServerMessage) -> Result<(), TransferError> {
        match message {
            ServerMessage::Signal { payload, .. } => {
                if let Some(ChannelSignal::Offer {
                    candidates,
                    last_chunk,
                }) = ChannelSignal::from_payload(&payload)
                {
                    // A repeat of the offer in use is not news
                    if candidates != self.dialed {
                        self.offer = Some(Offer {
                            candidates,
                            last_chunk,
                        });
                    }
                }
            }
            ServerMessage::RoomClosing { .. } | ServerMessage::RoomClosed { .. } => {
                return Err(SessionError::RoomGone.into());
            }
            ServerMessage::PeerReconnected {
                direction,
                last_chunk,
                ..
            } => {
                tracing::info!(%direction, last_chunk, "peer reconnected");
                self.rewind_for(direction, last_chunk);
            }
            other => tracing::debug!(message = ?other, "ignored during send"),
        }
        Ok(())
    }

    /// Wait for the receiver to offer a data channel
    async fn await_offer(&mut self) -> Result<Result<Offer, PassEnd>, TransferError> {
        loop {
            let message = tokio::select! {
                _ = self.ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                message = self.connection.events.recv() => message,
            };
            match message {
                Some(ServerMessage::Signal { payload, .. }) => {
                    if let Some(ChannelSignal::Offer {
                        candidates,
                        last_chunk,
                    }) = ChannelSignal::from_payload(&payload)
                    {
                        return Ok(Ok(Offer {
                            candidates,
                            last_chunk,
                        }));
                    }
                }
                Some(ServerMessage::RoomClosing { .. } | ServerMessage::RoomClosed { .. }) => {
                    return Err(SessionError::RoomGone.into());
                }
                Some(other) => tracing::debug!(message = ?other, "ignored while waiting for an offer"),
                None => {
                    return Ok(Err(PassEnd::SignalingLost(
                        "signaling connection lost".to_string(),
                    )));
                }
            }
        }
    }

    /// Wait for the room to close once everything is sent
    ///
    /// A fresh offer means the receiver is still missing chunks.
    async fn await_close(&mut self) -> Result<PassEnd, TransferError> {
        let deadline = tokio::time::sleep(COMPLETION_WAIT);
        tokio::pin!(deadline);

        loop {
            let message = tokio::select! {
                _ = self.ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = &mut deadline => {
                    tracing::warn!("room did not close after sending completed");
                    return Ok(PassEnd::Finished);
                }
                message = self.connection.events.recv() => message,
            };
            match message {
                Some(ServerMessage::RoomClosing { .. } | ServerMessage::RoomClosed { .. }) => {
                    return Ok(PassEnd::Finished);
                }
                Some(ServerMessage::Signal { payload, .. }) => {
                    if let Some(ChannelSignal::Offer {
                        candidates,
                        last_chunk,
                    }) = ChannelSignal::from_payload(&payload)
                    {
                        self.offer = Some(Offer {
                            candidates,
                            last_chunk,
                        });
                        return Ok(PassEnd::Renegotiate);
                    }
                }
                Some(ServerMessage::PeerReconnected {
                    direction,
                    last_chunk,
                    ..
                }) => {
                    if self.rewind_for(direction, last_chunk) {
                        return Ok(PassEnd::Rewind);
                    }
                }
                Some(other) => tracing::debug!(message = ?other, "ignored while waiting for close"),
                None => {
                    return Ok(PassEnd::SignalingLost(
                        "signaling connection lost".to_string(),
                    ));
                }
            }
        }
    }

    /// Plan to relay again from where a reconnected receiver stands
    ///
    /// The relay may have dropped chunks the receiver had pulled before it
    /// restarted. Returns whether a rewind is pending.
    fn rewind_for(&mut self, direction: Direction, last_chunk: u64) -> bool {
        if direction == Direction::Receive
            && self.transport == Transport::Relay
            && last_chunk < self.engine.position()
        {
            let from = self.rewind.map_or(last_chunk, |pending| pending.min(last_chunk));
            self.rewind = Some(from);
        }
        self.rewind.is_some()
    }

    /// Classify a transport failure by the link it happened on
    fn lost(&self, transport: Transport, error: TransferError) -> PassEnd {
        match transport {
            Transport::Channel => {
                tracing::info!(error = %error, position = self.engine.position(), "data channel lost");
                PassEnd::Renegotiate
            }
            Transport::Relay => PassEnd::SignalingLost(error.to_string()),
        }
    }

    fn signal(&self, signal: ChannelSignal) {
        let message = ClientMessage::Signal {
            room_id: self.engine.session().room_id.clone(),
            payload: signal.to_payload(),
        };
        if let Err(e) = self.connection.client.send(message) {
            tracing::debug!(error = %e, "failed to send channel signal");
        }
    }
}
