//! TCP listeners and connects for the transfer channel.

use crate::error::{TransportError, TransportResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Pending-connection backlog for transfer listeners
const LISTEN_BACKLOG: i32 = 128;

/// Create a bound, listening, non-blocking std listener
///
/// On Unix `SO_REUSEADDR` lets a receiver rebind a port whose previous
/// connections are still in `TIME_WAIT`. It is left off elsewhere: on
/// Windows the same option admits a second live listener on the port.
///
/// # Errors
///
/// Returns `TransportError::BindFailed` if the address cannot be bound.
pub fn bind_std_listener(addr: SocketAddr) -> TransportResult<std::net::TcpListener> {
    let on_err = |e| TransportError::bind(addr)(e);

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(on_err)?;
    #[cfg(unix)]
    socket.set_reuse_address(true).map_err(on_err)?;
    socket.bind(&addr.into()).map_err(on_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(on_err)?;
    socket.set_nonblocking(true).map_err(on_err)?;

    Ok(socket.into())
}

/// Bind a Tokio listener on `addr`
///
/// # Errors
///
/// Returns `TransportError::BindFailed` if the address cannot be bound.
pub fn listen(addr: SocketAddr) -> TransportResult<TcpListener> {
    let std_listener = bind_std_listener(addr)?;
    TcpListener::from_std(std_listener).map_err(TransportError::bind(addr))
}

/// Bind the first free port from `ports` on `ip`, then fall back to an ephemeral port
///
/// # Errors
///
/// Returns the ephemeral bind error if every candidate fails.
///
/// # Examples
/// ```no_run
/// use lanshare_transport::tcp::listen_on_first_free;
/// use std::net::Ipv4Addr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = listen_on_first_free(Ipv4Addr::UNSPECIFIED.into(), 42424..=42434)?;
/// println!("listening on {}", listener.local_addr()?);
/// # Ok(())
/// # }
/// ```
pub fn listen_on_first_free<I>(ip: IpAddr, ports: I) -> TransportResult<TcpListener>
where
    I: IntoIterator<Item = u16>,
{
    for port in ports {
        match listen(SocketAddr::new(ip, port)) {
            Ok(listener) => return Ok(listener),
            Err(e) => tracing::debug!(port, error = %e, "preferred port unavailable"),
        }
    }
    listen(SocketAddr::new(ip, 0))
}

/// Connect to `addr`, giving up after `timeout`
///
/// `TCP_NODELAY` is enabled on the returned stream; transfer frames are
/// written whole and small control bytes should not wait for Nagle.
///
/// # Errors
///
/// Returns `TransportError::Timeout` if the connect does not finish in time,
/// or `TransportError::ConnectionFailed` for refused or unreachable hosts.
pub async fn connect(addr: SocketAddr, timeout: Duration) -> TransportResult<TcpStream> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(TransportError::ConnectionFailed { addr, source }),
        Err(_) => return Err(TransportError::Timeout { addr, timeout }),
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}
