//! Signaling server connection

mod client;
mod local_address;

pub use client::{Connection, EventReceiver, ShutdownHandle, SignalingClient, SignalingError};
pub use local_address::{candidate_addresses, outbound_ip};
