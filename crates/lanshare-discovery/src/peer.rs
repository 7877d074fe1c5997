//! Discovered peer.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

/// A device reachable on the local network
///
/// Identity is `device_id`; the remaining fields may change between
/// announcements (rename, new DHCP lease, receiver restarted on another port).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Stable device identifier
    pub device_id: String,
    /// Human-readable device name
    pub device_name: String,
    /// Address the peer was last seen at
    pub ip_address: IpAddr,
    /// Transfer port the peer advertises
    pub port: u16,
    /// Added by hand rather than by an announcement
    #[serde(default)]
    pub manual: bool,
    /// When the peer was last announced or added
    #[serde(skip, default = "Instant::now")]
    pub last_seen: Instant,
}

impl Peer {
    /// Create a peer seen just now
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        ip_address: IpAddr,
        port: u16,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            ip_address,
            port,
            manual: false,
            last_seen: Instant::now(),
        }
    }

    /// Mark as manually added
    #[must_use]
    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    /// Transfer endpoint of the peer
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip_address, self.port)
    }

    /// Time since the peer was last seen
    #[must_use]
    pub fn age(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) at {}",
            self.device_name,
            self.device_id,
            self.socket_addr()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_socket_addr_and_display() {
        let peer = Peer::new("abc", "Laptop", IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)), 42424);
        assert_eq!(peer.socket_addr().to_string(), "192.168.1.5:42424");
        assert_eq!(peer.to_string(), "Laptop (abc) at 192.168.1.5:42424");
        assert!(!peer.manual);
        assert!(peer.clone().manual().manual);
    }

    #[test]
    fn test_json_skips_last_seen() {
        let peer = Peer::new("abc", "Laptop", IpAddr::V4(Ipv4Addr::LOCALHOST), 1);
        let json = serde_json::to_string(&peer).unwrap();
        assert!(!json.contains("last_seen"));

        let back: Peer = serde_json::from_str(&json).unwrap();
        assert_eq!(back.device_id, peer.device_id);
        assert_eq!(back.ip_address, peer.ip_address);
    }
}
