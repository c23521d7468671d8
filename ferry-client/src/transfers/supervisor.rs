//! Reconnect supervisor
//!
//! Takes over when the signaling connection drops during a transfer: waits
//! out a growing backoff, reconnects, and re-enters the room with the last
//! known chunk index. A refused rejoin (room gone) ends recovery at once;
//! running out of attempts ends it too.

use std::time::Duration;

use async_trait::async_trait;

use ferry_common::protocol::Direction;

use super::errors::TransferError;
use super::events::{EventSender, TransferEvent};
use super::rooms::{RejoinedRoom, rejoin_room};
use crate::config::ReconnectSettings;
use crate::network::Connection;

/// Delay schedule between reconnect attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            initial: Duration::from_millis(settings.initial_delay_ms),
            multiplier: settings.multiplier,
            max: Duration::from_millis(settings.max_delay_ms),
            max_attempts: settings.max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Connection state as seen by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
    Failed,
}

/// Everything needed to re-enter a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejoinTicket {
    pub room_id: String,
    pub direction: Direction,
    pub transfer_id: String,
    pub last_chunk: u64,
}

/// One reconnect attempt
#[async_trait]
pub trait Reconnector: Send + Sync {
    type Output: Send;

    async fn reconnect(&self, ticket: &RejoinTicket) -> Result<Self::Output, TransferError>;
}

/// A fresh signaling connection back in the room
#[derive(Debug)]
pub struct Rejoined {
    pub connection: Connection,
    pub room: RejoinedRoom,
}

/// Reconnects to the signaling server and rejoins the room
#[derive(Debug, Clone)]
pub struct SignalingReconnector {
    server_address: String,
    local_address: Option<String>,
}

impl SignalingReconnector {
    pub fn new(server_address: &str, local_address: Option<String>) -> Self {
        Self {
            server_address: server_address.to_string(),
            local_address,
        }
    }
}

#[async_trait]
impl Reconnector for SignalingReconnector {
    type Output = Rejoined;

    async fn reconnect(&self, ticket: &RejoinTicket) -> Result<Rejoined, TransferError> {
        let connection = Connection::connect(&self.server_address).await?;
        let room = rejoin_room(
            &connection.client,
            &ticket.room_id,
            ticket.direction,
            &ticket.transfer_id,
            ticket.last_chunk,
            self.local_address.clone(),
        )
        .await?;
        Ok(Rejoined { connection, room })
    }
}

/// Drives reconnect attempts for one session
#[derive(Debug)]
pub struct ReconnectSupervisor {
    backoff: Backoff,
    enabled: bool,
    state: SupervisorState,
    events: EventSender,
}

impl ReconnectSupervisor {
    pub fn new(settings: &ReconnectSettings, events: EventSender) -> Self {
        Self {
            backoff: Backoff::from_settings(settings),
            enabled: settings.enabled,
            state: SupervisorState::Connected,
            events,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Reconnect and rejoin, or fail
    ///
    /// Only transport errors are retried. Anything else from an attempt
    /// (the room is gone, membership refused) is returned immediately.
    pub async fn recover<R>(
        &mut self,
        reconnector: &R,
        ticket: &RejoinTicket,
    ) -> Result<R::Output, TransferError>
    where
        R: Reconnector + ?Sized,
    {
        self.state = SupervisorState::Disconnected;
        if !self.enabled {
            self.state = SupervisorState::Failed;
            return Err(TransferError::Transport(
                "connection lost and reconnect is disabled".to_string(),
            ));
        }

        let max_attempts = self.backoff.max_attempts;
        for attempt in 1..=max_attempts {
            let delay = self.backoff.delay(attempt);
            self.state = SupervisorState::Reconnecting { attempt };
            let _ = self.events.send(TransferEvent::Reconnecting {
                attempt,
                max_attempts,
                delay,
            });
            tracing::info!(
                room_id = %ticket.room_id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            tokio::time::sleep(delay).await;

            match reconnector.reconnect(ticket).await {
                Ok(output) => {
                    self.state = SupervisorState::Connected;
                    tracing::info!(room_id = %ticket.room_id, attempt, "reconnected");
                    return Ok(output);
                }
                Err(e) if e.is_transport() => {
                    tracing::debug!(attempt, error = %e, "reconnect attempt failed");
                }
                Err(e) => {
                    self.state = SupervisorState::Failed;
                    tracing::warn!(room_id = %ticket.room_id, error = %e, "rejoin refused");
                    return Err(e);
                }
            }
        }

        self.state = SupervisorState::Failed;
        tracing::warn!(room_id = %ticket.room_id, max_attempts, "reconnect attempts exhausted");
        Err(TransferError::Transport(format!(
            "gave up after {max_attempts} reconnect attempts"
        )))
    }
}
