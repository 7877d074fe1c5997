//! UDP sockets for broadcast discovery.
//!
//! Discovery needs two sockets: a listener on the well-known discovery port
//! and a sender that may be pinned to one local interface so announcements
//! leave through it and carry its source address.

use crate::error::{TransportError, TransportResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

/// Socket buffer size for discovery traffic (announcements are tiny)
const DISCOVERY_BUFFER_SIZE: usize = 64 * 1024;

/// Bind a broadcast-capable UDP socket
///
/// `reuse` controls `SO_REUSEADDR`. The discovery listener binds without it
/// so that a port already taken by another process is reported as a bind
/// failure instead of silently sharing traffic.
///
/// # Errors
///
/// Returns `TransportError::BindFailed` if the socket cannot be created,
/// configured or bound.
///
/// # Examples
/// ```no_run
/// use lanshare_transport::udp::bind_broadcast;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let socket = bind_broadcast("0.0.0.0:0".parse()?, true)?;
/// socket.send_to(b"hello", "255.255.255.255:53317").await?;
/// # Ok(())
/// # }
/// ```
pub fn bind_broadcast(addr: SocketAddr, reuse: bool) -> TransportResult<UdpSocket> {
    let on_err = |e| TransportError::bind(addr)(e);

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(on_err)?;

    socket.set_broadcast(true).map_err(on_err)?;
    socket.set_reuse_address(reuse).map_err(on_err)?;
    socket
        .set_recv_buffer_size(DISCOVERY_BUFFER_SIZE)
        .map_err(on_err)?;
    socket
        .set_send_buffer_size(DISCOVERY_BUFFER_SIZE)
        .map_err(on_err)?;

    socket.bind(&addr.into()).map_err(on_err)?;

    // Convert to std socket, then to tokio socket
    socket.set_nonblocking(true).map_err(on_err)?;
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(on_err)
}

/// Bind the discovery listener on `0.0.0.0:port`
///
/// # Errors
///
/// Returns `TransportError::BindFailed` if the port is unavailable.
pub fn bind_discovery_listener(port: u16) -> TransportResult<UdpSocket> {
    bind_broadcast(
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
        false,
    )
}

/// Bind the announcement sender, optionally pinned to a local interface
///
/// # Errors
///
/// Returns `TransportError::BindFailed` if the interface address is not
/// local or the socket cannot be configured.
pub fn bind_announcer(bind_ip: Option<Ipv4Addr>) -> TransportResult<UdpSocket> {
    let ip = bind_ip.unwrap_or(Ipv4Addr::UNSPECIFIED);
    bind_broadcast(SocketAddr::V4(SocketAddrV4::new(ip, 0)), true)
}
