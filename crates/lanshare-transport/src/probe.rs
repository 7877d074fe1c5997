//! Stateless reachability helpers.
//!
//! `start_server` proves a port can be bound by holding a bare listener open
//! on it; no connection on that listener is ever accepted. `ping` answers
//! whether something is listening on a remote port and collapses every
//! failure (refused, unreachable, timed out) into `false`.

use crate::error::TransportResult;
use crate::tcp::bind_std_listener;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

/// Default bound for [`ping`]
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Listeners held open by [`start_server`], keyed by port
fn probe_servers() -> &'static Mutex<HashMap<u16, TcpListener>> {
    static SERVERS: OnceLock<Mutex<HashMap<u16, TcpListener>>> = OnceLock::new();
    SERVERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Bind a bare listener on `0.0.0.0:port` and keep it open
///
/// Calling again for a port this process already holds succeeds without
/// rebinding. Port 0 binds an ephemeral port; the returned address tells
/// which.
///
/// # Errors
///
/// Returns `TransportError::BindFailed` if the port is unavailable.
pub fn start_server(port: u16) -> TransportResult<SocketAddr> {
    let mut servers = probe_servers()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if port != 0 {
        if let Some(existing) = servers.get(&port) {
            return Ok(existing.local_addr()?);
        }
    }

    let listener = bind_std_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    let local = listener.local_addr()?;
    tracing::info!(port = local.port(), "probe server listening");
    servers.insert(local.port(), listener);
    Ok(local)
}

/// Release a listener held by [`start_server`]
///
/// Returns whether a listener was held for `port`.
pub fn stop_server(port: u16) -> bool {
    probe_servers()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&port)
        .is_some()
}

/// Blocking TCP connect with a bounded timeout
#[must_use]
pub fn ping(addr: SocketAddr, timeout: Duration) -> bool {
    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(%addr, error = %e, "ping failed");
            false
        }
    }
}

/// Async variant of [`ping`]
pub async fn ping_async(addr: SocketAddr, timeout: Duration) -> bool {
    crate::tcp::connect(addr, timeout).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_server_then_ping() {
        let addr = start_server(0).unwrap();
        let port = addr.port();
        assert_ne!(port, 0);

        // Connect completes against the listen backlog without an accept
        assert!(ping(
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            DEFAULT_PING_TIMEOUT
        ));

        // Repeated start on a held port is idempotent
        assert_eq!(start_server(port).unwrap().port(), port);

        assert!(stop_server(port));
        assert!(!stop_server(port));
    }

    #[test]
    fn test_ping_closed_port() {
        let port = {
            let l = bind_std_listener("127.0.0.1:0".parse().unwrap()).unwrap();
            l.local_addr().unwrap().port()
        };
        assert!(!ping(
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            Duration::from_millis(500)
        ));
    }

    #[tokio::test]
    async fn test_ping_async() {
        let addr = start_server(0).unwrap();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()));
        assert!(ping_async(target, DEFAULT_PING_TIMEOUT).await);
        stop_server(addr.port());
    }
}
