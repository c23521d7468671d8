//! Self-transfer: send a file to the same client

use std::path::{Path, PathBuf};

use chrono::Utc;

use ferry_common::protocol::{Direction, Role, ServerMessage, TransferMode};

use super::{SessionContext, Tracker, finish};
use crate::channel::{ChannelKind, DataChannel, LoopbackChannel, loopback_pair};
use crate::constants::COMPLETION_WAIT;
use crate::network::{Connection, EventReceiver};
use crate::transfers::checkpoint::CheckpointPolicy;
use crate::transfers::engine::{ChannelLink, ReceiveEngine, Received, SendEngine};
use crate::transfers::errors::{SessionError, TransferError};
use crate::transfers::events::TransferEvent;
use crate::transfers::history::HistoryEntry;
use crate::transfers::rooms::{create_room, join_room, report_complete};
use crate::transfers::storage::{FileSink, FileSource, FsSource};
use crate::transfers::types::{TransferSession, transfer_id};

/// Copy a file through a room this client both creates and joins
///
/// The server marks the room as a self-transfer and picks no transport; the
/// bytes move over an in-process channel. Both roles are still reported so
/// the room closes the usual way. No checkpoints are kept.
pub async fn copy_file(
    ctx: &SessionContext,
    path: &Path,
    sink: &dyn FileSink,
) -> Result<HistoryEntry, TransferError> {
    let source = match FsSource::open(path).await {
        Ok(source) => source,
        Err(e) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let tracker = Tracker::new(Direction::Receive, &name, 0);
            return finish(ctx, &tracker, Err(e.into()));
        }
    };

    let tracker = Tracker::new(Direction::Receive, &source.info().name, source.info().size);
    let result = run(ctx, &source, sink).await.map(Some);
    finish(ctx, &tracker, result)
}

async fn run(
    ctx: &SessionContext,
    source: &FsSource,
    sink: &dyn FileSink,
) -> Result<PathBuf, TransferError> {
    let info = source.info().clone();
    let local_address = ctx.settings.local_address.clone();
    let mut connection = Connection::connect(&ctx.settings.server_address).await?;

    let room_id = create_room(&connection.client, info.clone(), local_address.clone()).await?;
    ctx.emit(TransferEvent::RoomCreated {
        room_id: room_id.clone(),
    });
    let joined = join_room(&connection.client, &room_id, local_address).await?;
    if !joined.self_transfer {
        return Err(
            SessionError::Rejected("room was not marked as a self-transfer".to_string()).into(),
        );
    }
    ctx.emit(TransferEvent::Joined {
        room_id: room_id.clone(),
        file_info: joined.file_info,
    });
    tracing::info!(%room_id, file = %info.name, size = info.size, "self-transfer started");

    let id = transfer_id(&room_id, &info.name, info.size, Utc::now().timestamp_millis());
    let session = |direction: Direction| {
        TransferSession::new(
            id.clone(),
            room_id.clone(),
            direction,
            info.name.clone(),
            info.size,
            ctx.settings.transfer.channel_chunk_size(),
            TransferMode::DirectP2p,
        )
        .with_self_transfer(true)
    };
    let mut sender = SendEngine::new(session(Direction::Send), CheckpointPolicy::disabled());
    let mut receiver = ReceiveEngine::new(session(Direction::Receive), CheckpointPolicy::disabled());

    let (outbound, inbound) = loopback_pair();
    ctx.emit(TransferEvent::ChannelOpened {
        kind: ChannelKind::Loopback,
    });

    let copied = tokio::select! {
        _ = ctx.cancel.cancelled() => Err(TransferError::Cancelled),
        copied = async {
            tokio::try_join!(
                push(&mut sender, outbound, source),
                pull(ctx, &mut receiver, inbound),
            )
        } => copied,
    };
    if let Err(e) = copied {
        sender.abort();
        receiver.abort();
        return Err(e);
    }

    let bytes = receiver.assemble()?;
    let saved = sink.persist(&receiver.session().file_name, bytes).await?;
    tracing::info!(path = %saved.display(), "file saved");

    report_complete(&connection.client, &room_id, Role::Sender, &id).await?;
    report_complete(&connection.client, &room_id, Role::Receiver, &id).await?;
    sender.complete();
    receiver.complete();

    await_closing(ctx, &mut connection.events).await?;
    Ok(saved)
}

async fn push(
    engine: &mut SendEngine,
    channel: LoopbackChannel,
    source: &FsSource,
) -> Result<(), TransferError> {
    let mut link = ChannelLink::new(Box::new(channel), std::time::Duration::ZERO);
    engine.start(&mut link, 0).await?;
    while let Some(sent) = engine.send_next(&mut link, source).await? {
        tracing::trace!(index = sent.index, len = sent.len, "copied chunk");
    }
    Ok(())
}

async fn pull(
    ctx: &SessionContext,
    engine: &mut ReceiveEngine,
    mut channel: LoopbackChannel,
) -> Result<(), TransferError> {
    while !engine.is_complete() {
        let Some(message) = channel.recv().await? else {
            return Err(TransferError::Transport("copy channel closed early".to_string()));
        };
        let received = engine.accept(message, tokio::time::Instant::now())?;
        if let Received::Chunk { fresh: true, .. } = received {
            let session = engine.session();
            ctx.emit(TransferEvent::Progress {
                direction: Direction::Receive,
                chunk_index: session.chunk_index,
                total_chunks: session.total_chunks,
                bytes_transferred: session.bytes_transferred,
                file_size: session.file_size,
            });
        }
    }
    Ok(())
}

/// Wait for the server to close the room after both reports
async fn await_closing(
    ctx: &SessionContext,
    events: &mut EventReceiver,
) -> Result<(), TransferError> {
    let deadline = tokio::time::sleep(COMPLETION_WAIT);
    tokio::pin!(deadline);
    loop {
        let message = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = &mut deadline => {
                tracing::warn!("room did not close after completion");
                return Ok(());
            }
            message = events.recv() => message,
        };
        match message {
            Some(ServerMessage::RoomClosing { .. } | ServerMessage::RoomClosed { .. }) => {
                return Ok(());
            }
            Some(ServerMessage::PeerJoined { member_id }) => {
                tracing::debug!(member_id, "joined own room");
            }
            Some(other) => tracing::debug!(message = ?other, "ignored during copy"),
            // The file is saved and both roles reported
            None => return Ok(()),
        }
    }
}
