//! Discovery and peer API FFI

use std::net::Ipv4Addr;
use std::os::raw::{c_char, c_int};

use crate::error::{LanshareError, LanshareStatus};
use crate::types::LansharePeerList;
use crate::{LanshareHandle, engine_ref, fail, ffi_try, from_c_string, null_handle};

unsafe fn start(handle: *const LanshareHandle, port: u16, bind_ip: Option<Ipv4Addr>) -> c_int {
    let Some(h) = engine_ref(handle) else {
        return null_handle("handle");
    };
    ffi_try!(h.runtime.block_on(h.engine.start_discovery(port, bind_ip)));
    LanshareStatus::Success as c_int
}

/// Start announcing and listening on UDP `port`
///
/// A running discovery service is restarted. Returns `DiscoveryError` if the
/// port is taken; the caller may retry with another port.
///
/// # Safety
///
/// - `handle` must be null or a valid engine handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_start_discovery(handle: *mut LanshareHandle, port: u16) -> c_int {
    start(handle, port, None)
}

/// Start discovery with announcements pinned to the interface owning `ip`
///
/// # Safety
///
/// - `handle` must be null or a valid engine handle
/// - `ip` must be null or a valid NUL-terminated string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_start_discovery_with_bind_ip(
    handle: *mut LanshareHandle,
    port: u16,
    ip: *const c_char,
) -> c_int {
    let bind_ip = ffi_try!(
        from_c_string(ip)
            .and_then(|s| s.trim().parse::<Ipv4Addr>().ok())
            .ok_or_else(|| LanshareError::invalid_argument("bind ip is not an IPv4 address"))
    );
    start(handle, port, Some(bind_ip))
}

/// Stop discovery; known peers are kept
///
/// # Safety
///
/// - `handle` must be null or a valid engine handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_stop_discovery(handle: *mut LanshareHandle) {
    if let Some(h) = engine_ref(handle) {
        if let Err(e) = h.runtime.block_on(h.engine.stop_discovery()) {
            tracing::warn!(error = %e, "discovery did not stop cleanly");
        }
    }
}

/// Snapshot of known peers in discovery order
///
/// Returns an empty list for a null handle. Free with
/// `lanshare_free_peer_list()`.
///
/// # Safety
///
/// - `handle` must be null or a valid engine handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_get_peers(handle: *const LanshareHandle) -> LansharePeerList {
    match engine_ref(handle) {
        Some(h) => LansharePeerList::from_peers(&h.engine.peers()),
        None => LansharePeerList::empty(),
    }
}

/// Add a peer by hand
///
/// Works whether or not discovery is running. Empty fields, an unparseable
/// address or port 0 return `InvalidArgument` and leave the registry as is.
///
/// # Safety
///
/// - `handle` must be null or a valid engine handle
/// - String arguments must be null or valid NUL-terminated strings
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_add_manual_peer(
    handle: *mut LanshareHandle,
    device_id: *const c_char,
    device_name: *const c_char,
    ip: *const c_char,
    port: u16,
) -> c_int {
    let Some(h) = engine_ref(handle) else {
        return null_handle("handle");
    };
    let (Some(device_id), Some(device_name), Some(ip)) = (
        from_c_string(device_id),
        from_c_string(device_name),
        from_c_string(ip),
    ) else {
        return fail(LanshareError::invalid_argument(
            "peer fields must be non-null UTF-8",
        ));
    };

    ffi_try!(h.engine.add_manual_peer(&device_id, &device_name, &ip, port));
    LanshareStatus::Success as c_int
}

/// Advertise `port` as this device's transfer port in announcements
///
/// # Safety
///
/// - `handle` must be null or a valid engine handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_advertise_port(handle: *mut LanshareHandle, port: u16) {
    if let Some(h) = engine_ref(handle) {
        h.runtime.block_on(h.engine.advertise_port(port));
    }
}
