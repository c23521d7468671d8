//! Server configuration

use std::time::Duration;

use ferry_common::topology::TopologyLimits;
use ferry_common::{
    DEFAULT_CLOSE_GRACE, DEFAULT_RELAY_BUFFER_LIMIT, DEFAULT_ROOM_TTL, DEFAULT_SWEEP_INTERVAL,
};

/// Runtime settings for the room server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Age at which the sweeper deletes a room
    pub room_ttl: Duration,
    pub sweep_interval: Duration,
    /// Delay between `RoomClosing` and `RoomClosed`
    pub close_grace: Duration,
    pub limits: TopologyLimits,
    /// Relay bytes one room may buffer before uploads are refused as busy
    pub relay_buffer_limit: u64,
    /// Log scanner noise and per-message details
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            room_ttl: DEFAULT_ROOM_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            close_grace: DEFAULT_CLOSE_GRACE,
            limits: TopologyLimits::default(),
            relay_buffer_limit: DEFAULT_RELAY_BUFFER_LIMIT,
            debug: false,
        }
    }
}
