//! Topology classification
//!
//! Picks a transfer mode from the two endpoint addresses and the file size.
//! Pure and deterministic: no I/O, no clock.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use ipnet::Ipv4Net;

use crate::protocol::TransferMode;
use crate::{DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_DIRECT_TRANSFER_CEILING};

const PRIVATE_RANGES: [Ipv4Net; 4] = [
    Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 8),
    Ipv4Net::new_assert(Ipv4Addr::new(172, 16, 0, 0), 12),
    Ipv4Net::new_assert(Ipv4Addr::new(192, 168, 0, 0), 16),
    Ipv4Net::new_assert(Ipv4Addr::new(127, 0, 0, 0), 8),
];

/// Prefix length that counts as "same subnet"
const SUBNET_PREFIX: u8 = 24;

/// Size thresholds used by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyLimits {
    /// Files strictly below this size may try a peer-to-peer channel
    pub direct_ceiling: u64,
    /// Relay transfers strictly above this size are compression-eligible
    pub compression_threshold: u64,
}

impl Default for TopologyLimits {
    fn default() -> Self {
        Self {
            direct_ceiling: DEFAULT_DIRECT_TRANSFER_CEILING,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

/// Outcome of classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDecision {
    pub mode: TransferMode,
    /// Human-readable justification sent to both members
    pub reason: String,
    /// The peer-to-peer attempt may fall back to the relay
    pub fallback_to_relay: bool,
    /// The relay transfer may compress before chunking
    pub compression: bool,
}

/// Classify with the default thresholds
#[must_use]
pub fn classify(local: IpAddr, remote: IpAddr, file_size: u64) -> ModeDecision {
    classify_with(local, remote, file_size, &TopologyLimits::default())
}

/// Classify with explicit thresholds
#[must_use]
pub fn classify_with(
    local: IpAddr,
    remote: IpAddr,
    file_size: u64,
    limits: &TopologyLimits,
) -> ModeDecision {
    if same_private_subnet(local, remote) {
        return ModeDecision {
            mode: TransferMode::DirectP2p,
            reason: "Both devices are on the same local network".to_string(),
            fallback_to_relay: false,
            compression: false,
        };
    }

    if file_size < limits.direct_ceiling {
        return ModeDecision {
            mode: TransferMode::WebrtcP2p,
            reason: "Different networks, trying a peer-to-peer connection".to_string(),
            fallback_to_relay: true,
            compression: false,
        };
    }

    let compression = file_size > limits.compression_threshold;
    ModeDecision {
        mode: TransferMode::ServerRelay,
        reason: if compression {
            "Large file across networks, relaying through the server with compression".to_string()
        } else {
            "Relaying through the server".to_string()
        },
        fallback_to_relay: false,
        compression,
    }
}

/// Whether an address is in an RFC1918 block or loopback
#[must_use]
pub fn is_private(ip: IpAddr) -> bool {
    match normalize(ip) {
        IpAddr::V4(v4) => PRIVATE_RANGES.iter().any(|net| net.contains(&v4)),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Both addresses private and sharing their first three octets
///
/// IPv6 loopback pairs count as the same subnet; other IPv6 addresses never do.
#[must_use]
pub fn same_private_subnet(a: IpAddr, b: IpAddr) -> bool {
    if !is_private(a) || !is_private(b) {
        return false;
    }
    match (normalize(a), normalize(b)) {
        (IpAddr::V4(a), IpAddr::V4(b)) => {
            let (Ok(a), Ok(b)) = (
                Ipv4Net::new(a, SUBNET_PREFIX),
                Ipv4Net::new(b, SUBNET_PREFIX),
            ) else {
                return false;
            };
            a.trunc() == b.trunc()
        }
        (IpAddr::V6(a), IpAddr::V6(b)) => a.is_loopback() && b.is_loopback(),
        _ => false,
    }
}

/// Informational time estimate for a file of `size` bytes
#[must_use]
pub fn estimate_transfer_time(mode: TransferMode, size: u64) -> Duration {
    let bytes_per_sec: u64 = match mode {
        TransferMode::DirectP2p => 10 * 1024 * 1024,
        TransferMode::WebrtcP2p => 1024 * 1024,
        TransferMode::ServerRelay => 500 * 1024,
    };
    Duration::from_secs(size.div_ceil(bytes_per_sec))
}

fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}
