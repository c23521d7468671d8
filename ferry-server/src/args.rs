//! Command-line argument parsing

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;

use ferry_common::topology::TopologyLimits;
use ferry_common::{
    DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_DIRECT_TRANSFER_CEILING, DEFAULT_PORT,
    DEFAULT_RELAY_BUFFER_LIMIT, MAX_CHUNK_SIZE,
};
use ferry_server::ServerConfig;

/// Ferry room server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// IP address to bind to (IPv4 or IPv6)
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Seconds after creation at which a room is deleted
    #[arg(long, default_value_t = 3600)]
    pub room_ttl: u64,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 600)]
    pub sweep_interval: u64,

    /// Milliseconds between the closing and closed notices
    #[arg(long, default_value_t = 3000)]
    pub close_grace: u64,

    /// Files below this many bytes may use a negotiated peer-to-peer channel
    #[arg(long, default_value_t = DEFAULT_DIRECT_TRANSFER_CEILING)]
    pub direct_ceiling: u64,

    /// Relay transfers above this many bytes are flagged for compression
    #[arg(long, default_value_t = DEFAULT_COMPRESSION_THRESHOLD)]
    pub compression_threshold: u64,

    /// Relay bytes one room may buffer (at least two maximum-size chunks)
    #[arg(long, default_value_t = DEFAULT_RELAY_BUFFER_LIMIT)]
    pub relay_buffer_limit: u64,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    pub debug: bool,
}

impl Args {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            room_ttl: Duration::from_secs(self.room_ttl),
            sweep_interval: Duration::from_secs(self.sweep_interval.max(1)),
            close_grace: Duration::from_millis(self.close_grace),
            limits: TopologyLimits {
                direct_ceiling: self.direct_ceiling,
                compression_threshold: self.compression_threshold,
            },
            relay_buffer_limit: self.relay_buffer_limit.max(2 * MAX_CHUNK_SIZE),
            debug: self.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_server_config() {
        let args = Args::parse_from(["ferryd"]);
        assert_eq!(args.port, DEFAULT_PORT);
        assert_eq!(args.server_config(), ServerConfig::default());
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "ferryd",
            "--port",
            "9000",
            "--close-grace",
            "250",
            "--direct-ceiling",
            "0",
            "--relay-buffer-limit",
            "8388608",
            "--debug",
        ]);
        let config = args.server_config();
        assert_eq!(args.port, 9000);
        assert_eq!(config.close_grace, Duration::from_millis(250));
        assert_eq!(config.limits.direct_ceiling, 0);
        assert_eq!(config.relay_buffer_limit, 8 * 1024 * 1024);
        assert!(config.debug);
    }

    #[test]
    fn test_relay_buffer_limit_holds_two_chunks() {
        let args = Args::parse_from(["ferryd", "--relay-buffer-limit", "1"]);
        assert_eq!(args.server_config().relay_buffer_limit, 2 * MAX_CHUNK_SIZE);
    }
}
