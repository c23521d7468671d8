//! Local address discovery for topology reports and channel offers

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::{UdpSocket, lookup_host};

use ferry_common::validators::parse_address;

/// The local interface address used to reach `server_address`
///
/// Connecting a UDP socket sends nothing; it only asks the OS to pick a
/// route. Returns None when the server cannot be resolved or no route exists.
pub async fn outbound_ip(server_address: &str) -> Option<IpAddr> {
    let target = lookup_host(server_address).await.ok()?.next()?;
    let bind: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind).await.ok()?;
    socket.connect(target).await.ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// Addresses a receiver offers for a listener on `port`, most specific first
///
/// The configured address comes first, then the discovered route address,
/// then loopback for peers on the same host. Duplicates are dropped.
pub fn candidate_addresses(
    configured: Option<&str>,
    discovered: Option<IpAddr>,
    port: u16,
) -> Vec<SocketAddr> {
    let mut candidates: Vec<SocketAddr> = Vec::new();
    let ips = configured
        .and_then(parse_address)
        .into_iter()
        .chain(discovered)
        .chain(std::iter::once(IpAddr::V4(Ipv4Addr::LOCALHOST)));

    for ip in ips {
        if ip.is_unspecified() {
            continue;
        }
        let addr = SocketAddr::new(ip, port);
        if !candidates.contains(&addr) {
            candidates.push(addr);
        }
    }
    candidates
}
