//! Session drivers
//!
//! A driver runs one transfer end to end: room setup, transport choice,
//! the engine loop, checkpoints, reconnects and completion reporting. It
//! reports progress as `TransferEvent`s and returns the history record.

mod copy;
mod receive;
mod send;

use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use ferry_common::protocol::{Direction, ServerMessage, TransferMode};
use ferry_common::topology::estimate_transfer_time;

use super::checkpoint::{CheckpointPolicy, CheckpointWriter};
use super::errors::{SessionError, TransferError};
use super::events::{EventSender, TransferEvent};
use super::history::{HistoryEntry, Outcome};
use crate::config::Settings;
use super::supervisor::SignalingReconnector;
use crate::network::EventReceiver;

pub use copy::copy_file;
pub use receive::receive_file;
pub use send::send_file;

/// Shared services for the sessions of one process
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub settings: Settings,
    pub checkpoints: CheckpointWriter,
    pub events: EventSender,
    pub cancel: CancellationToken,
}

impl SessionContext {
    pub fn new(settings: Settings, checkpoints: CheckpointWriter, events: EventSender) -> Self {
        Self {
            settings,
            checkpoints,
            events,
            cancel: CancellationToken::new(),
        }
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.events.send(event);
    }

    fn policy(&self) -> CheckpointPolicy {
        CheckpointPolicy::from_settings(&self.settings.resume)
    }

    fn reconnector(&self) -> SignalingReconnector {
        SignalingReconnector::new(
            &self.settings.server_address,
            self.settings.local_address.clone(),
        )
    }
}

/// The room's transport decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModeChoice {
    mode: TransferMode,
    fallback_to_relay: bool,
}

impl ModeChoice {
    /// A mode learned from a rejoin response, which carries no flags
    fn from_rejoin(mode: TransferMode) -> Self {
        Self {
            mode,
            fallback_to_relay: mode == TransferMode::WebrtcP2p,
        }
    }
}

/// Facts needed for the history record
#[derive(Debug)]
struct Tracker {
    direction: Direction,
    file_name: String,
    file_size: u64,
    started: Instant,
}

impl Tracker {
    fn new(direction: Direction, file_name: &str, file_size: u64) -> Self {
        Self {
            direction,
            file_name: file_name.to_string(),
            file_size,
            started: Instant::now(),
        }
    }

    fn record(&self, outcome: Outcome, save_path: Option<PathBuf>) -> HistoryEntry {
        HistoryEntry {
            direction: self.direction,
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            outcome,
            timestamp: Utc::now(),
            duration_seconds: self.started.elapsed().as_secs(),
            save_path,
        }
    }
}

/// Turn a driver result into the history record and final event
fn finish(
    ctx: &SessionContext,
    tracker: &Tracker,
    result: Result<Option<PathBuf>, TransferError>,
) -> Result<HistoryEntry, TransferError> {
    match result {
        Ok(save_path) => {
            let entry = tracker.record(Outcome::Completed, save_path);
            tracing::info!(
                direction = %entry.direction,
                file = %entry.file_name,
                size = entry.file_size,
                seconds = entry.duration_seconds,
                "transfer complete"
            );
            ctx.emit(TransferEvent::Completed(entry.clone()));
            Ok(entry)
        }
        Err(error) => {
            let outcome = match error {
                TransferError::Cancelled => Outcome::Cancelled,
                _ => Outcome::Failed,
            };
            tracing::warn!(
                direction = %tracker.direction,
                file = %tracker.file_name,
                error = %error,
                action = ?error.action(),
                "transfer failed"
            );
            ctx.emit(TransferEvent::Failed {
                error: error.to_string(),
                action: error.action(),
                record: tracker.record(outcome, None),
            });
            Err(error)
        }
    }
}

/// Wait for the room to pair and pick a transport
async fn wait_for_mode(
    ctx: &SessionContext,
    events: &mut EventReceiver,
    file_size: u64,
) -> Result<ModeChoice, TransferError> {
    loop {
        let message = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
            message = events.recv() => message,
        };

        match message {
            Some(ServerMessage::PeerJoined { member_id }) => {
                ctx.emit(TransferEvent::PeerJoined { member_id });
            }
            Some(ServerMessage::TransferModeSelected {
                mode,
                reason,
                fallback_to_relay,
                compression,
            }) => {
                tracing::info!(%mode, %reason, "transfer mode selected");
                ctx.emit(TransferEvent::ModeSelected {
                    mode,
                    reason,
                    fallback_to_relay,
                    compression,
                    estimate: estimate_transfer_time(mode, file_size),
                });
                return Ok(ModeChoice {
                    mode,
                    fallback_to_relay,
                });
            }
            Some(ServerMessage::RoomClosing { .. } | ServerMessage::RoomClosed { .. }) => {
                return Err(SessionError::RoomGone.into());
            }
            Some(other) => {
                tracing::debug!(message = ?other, "ignored while waiting for a partner");
            }
            None => {
                return Err(TransferError::Transport(
                    "signaling connection lost".to_string(),
                ));
            }
        }
    }
}
