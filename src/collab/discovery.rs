//! Discovery collaborator: (a) `advertise(nodeId, port)` starts an
//! unsolicited responder on a fixed UDP port answering a fixed discovery
//! probe with a small JSON summary; (b) `probe(timeout)` broadcasts that
//! probe and returns the list of replies.

use crate::error::SessionResult;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

const PROBE_MAGIC: &str = "melq-discover-probe";

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct DiscoveryAnnouncement {
    pub node_id: String,
    pub network_name: String,
    pub host: String,
    pub port: u16,
    pub connection_code: String,
    pub timestamp: u64,
}

/// Find the local LAN IP by connecting a UDP socket to a well-known address
/// and reading back which interface the OS would route through — no packet
/// is actually sent.
fn local_ip() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("1.1.1.1:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(ip) => Some(ip),
        _ => None,
    }
}

/// LAN broadcast address for the local interface, assuming a /24 subnet.
fn broadcast_addr() -> Option<Ipv4Addr> {
    let ip = local_ip()?;
    let o = ip.octets();
    Some(Ipv4Addr::new(o[0], o[1], o[2], 255))
}

/// The LAN IP address this process would be reached at, for printing a
/// ready-to-share connection code without requiring discovery to be running.
pub fn local_ip_string() -> String {
    local_ip().map(|ip| ip.to_string()).unwrap_or_else(|| "0.0.0.0".to_string())
}

/// Start the unsolicited responder: listens on [`crate::DISCOVERY_PORT`] and
/// answers any probe carrying [`PROBE_MAGIC`] with this node's announcement.
/// Runs until the returned task is dropped/aborted.
pub async fn advertise(
    node_id: String,
    network_name: String,
    port: u16,
) -> SessionResult<tokio::task::JoinHandle<()>> {
    let socket = UdpSocket::bind(("0.0.0.0", crate::DISCOVERY_PORT)).await?;
    socket.set_broadcast(true)?;
    let host = local_ip().map(|ip| ip.to_string()).unwrap_or_else(|| "0.0.0.0".to_string());
    let connection_code = format!("melq://{host}:{port}");

    Ok(tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                continue;
            };
            if &buf[..len] != PROBE_MAGIC.as_bytes() {
                continue;
            }
            let announcement = DiscoveryAnnouncement {
                node_id: node_id.clone(),
                network_name: network_name.clone(),
                host: host.clone(),
                port,
                connection_code: connection_code.clone(),
                timestamp: crate::types::room::now_millis(),
            };
            let Ok(reply) = serde_json::to_vec(&announcement) else {
                continue;
            };
            let _ = socket.send_to(&reply, src).await;
        }
    }))
}

/// Broadcast a probe and collect replies for `timeout`.
pub async fn probe(timeout: Duration) -> SessionResult<Vec<DiscoveryAnnouncement>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    let broadcast = broadcast_addr().unwrap_or(Ipv4Addr::new(255, 255, 255, 255));
    let target = SocketAddr::from((broadcast, crate::DISCOVERY_PORT));
    socket.send_to(PROBE_MAGIC.as_bytes(), target).await?;

    let mut replies = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = [0u8; 512];
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _src))) => {
                if let Ok(announcement) = serde_json::from_slice::<DiscoveryAnnouncement>(&buf[..len]) {
                    replies.push(announcement);
                }
            }
            _ => break,
        }
    }
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_with_no_responder_times_out_empty() {
        // No advertiser running on this port in a test process, so the
        // probe should return an empty list rather than hang or error.
        let replies = probe(Duration::from_millis(100)).await.unwrap();
        assert!(replies.is_empty());
    }
}
