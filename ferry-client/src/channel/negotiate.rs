//! Data channel negotiation over the signaling relay
//!
//! The receiver listens and offers its candidate addresses; the sender dials
//! them in order and confirms, or announces a fallback to the relay when the
//! mode allows it. The server forwards these payloads without reading them.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::constants::CANDIDATE_DIAL_TIMEOUT;
use crate::network::candidate_addresses;

use super::TcpChannel;

/// Negotiation payloads carried in `Signal` messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelSignal {
    /// Receiver is listening on these addresses
    Offer {
        candidates: Vec<SocketAddr>,
        /// Contiguous chunks the receiver already holds
        #[serde(default)]
        last_chunk: u64,
    },
    /// Sender reached one of the candidates
    Connected,
    /// Sender reached none; both sides switch to the relay
    Fallback,
}

impl ChannelSignal {
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Parse a forwarded payload; foreign payloads yield None
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

/// A bound listener waiting for the sender to dial
#[derive(Debug)]
pub struct PendingOffer {
    listener: TcpListener,
    candidates: Vec<SocketAddr>,
}

impl PendingOffer {
    /// Bind an ephemeral listener on all interfaces
    pub async fn bind(configured: Option<&str>, discovered: Option<IpAddr>) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            candidates: candidate_addresses(configured, discovered, port),
        })
    }

    /// The offer to signal to the sender
    pub fn offer(&self, last_chunk: u64) -> ChannelSignal {
        ChannelSignal::Offer {
            candidates: self.candidates.clone(),
            last_chunk,
        }
    }

    /// Wait for the sender's connection
    ///
    /// Cancel-safe; callers race it against signaling events.
    pub async fn accept(&self) -> io::Result<TcpChannel> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!(%peer, "data channel accepted");
        Ok(TcpChannel::new(stream))
    }
}

/// Dial candidates in order, returning the first channel that connects
pub async fn dial(candidates: &[SocketAddr]) -> Option<TcpChannel> {
    for candidate in candidates {
        match timeout(CANDIDATE_DIAL_TIMEOUT, TcpStream::connect(candidate)).await {
            Ok(Ok(stream)) => {
                tracing::debug!(%candidate, "data channel connected");
                return Some(TcpChannel::new(stream));
            }
            Ok(Err(e)) => tracing::debug!(%candidate, error = %e, "candidate refused"),
            Err(_) => tracing::debug!(%candidate, "candidate timed out"),
        }
    }
    None
}
