//! Transport utility FFI

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::os::raw::c_char;

use lanshare_transport::{DEFAULT_PING_TIMEOUT, probe};

use crate::error::LanshareError;
use crate::from_c_string;

/// Resolve a C host string (IP literal or hostname) and port
///
/// # Safety
///
/// - `host` must be null or a valid NUL-terminated string
pub(crate) unsafe fn resolve(host: *const c_char, port: u16) -> Result<SocketAddr, LanshareError> {
    let host = from_c_string(host)
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| LanshareError::invalid_argument("host is null, empty or not UTF-8"))?;

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host.as_str(), port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| LanshareError::invalid_argument(format!("cannot resolve host {host}")))
}

/// Hold a bare TCP listener open on `port`
///
/// Returns true if the port is bound (now or by an earlier call).
#[unsafe(no_mangle)]
pub extern "C" fn lanshare_transport_start_server(port: u16) -> bool {
    match probe::start_server(port) {
        Ok(addr) => {
            tracing::debug!(port = addr.port(), "probe server ready");
            true
        }
        Err(e) => {
            tracing::warn!(port, error = %e, "probe server failed to bind");
            false
        }
    }
}

/// Whether something accepts TCP connections at `ip:port`
///
/// Bounded by a short timeout; every failure reads as false.
///
/// # Safety
///
/// - `ip` must be null or a valid NUL-terminated string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_transport_ping(ip: *const c_char, port: u16) -> bool {
    match resolve(ip, port) {
        Ok(addr) => probe::ping(addr, DEFAULT_PING_TIMEOUT),
        Err(e) => {
            tracing::debug!(error = %e.message, "ping skipped");
            false
        }
    }
}
