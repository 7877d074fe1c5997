//! FFI-safe value types

use std::os::raw::c_char;
use std::ptr;

use lanshare_core::PendingTransfer;
use lanshare_discovery::Peer;

use crate::{lanshare_free_string, to_c_string};

/// One known peer; strings are owned by the enclosing list
#[repr(C)]
#[derive(Debug)]
pub struct LansharePeer {
    /// Stable device identifier
    pub device_id: *mut c_char,
    /// Human-readable name
    pub device_name: *mut c_char,
    /// Dotted IP address
    pub ip_address: *mut c_char,
    /// Advertised transfer port
    pub port: u16,
}

impl From<&Peer> for LansharePeer {
    fn from(peer: &Peer) -> Self {
        Self {
            device_id: to_c_string(peer.device_id.as_str()),
            device_name: to_c_string(peer.device_name.as_str()),
            ip_address: to_c_string(peer.ip_address.to_string()),
            port: peer.port,
        }
    }
}

/// Snapshot of known peers
///
/// Free with `lanshare_free_peer_list()`.
#[repr(C)]
#[derive(Debug)]
pub struct LansharePeerList {
    /// First element, or null when `count` is 0
    pub peers: *mut LansharePeer,
    /// Number of elements
    pub count: usize,
}

impl LansharePeerList {
    pub(crate) fn empty() -> Self {
        Self {
            peers: ptr::null_mut(),
            count: 0,
        }
    }

    pub(crate) fn from_peers(peers: &[Peer]) -> Self {
        if peers.is_empty() {
            return Self::empty();
        }
        let items: Box<[LansharePeer]> = peers.iter().map(LansharePeer::from).collect();
        let count = items.len();
        Self {
            peers: Box::into_raw(items).cast::<LansharePeer>(),
            count,
        }
    }
}

/// Release a list returned by `lanshare_get_peers()`
///
/// The list is reset to empty so a second call is harmless.
///
/// # Safety
///
/// - `list` must be null or point to a list returned by `lanshare_get_peers()`
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_free_peer_list(list: *mut LansharePeerList) {
    let Some(list) = list.as_mut() else {
        return;
    };
    if !list.peers.is_null() {
        let items = Box::from_raw(ptr::slice_from_raw_parts_mut(list.peers, list.count));
        for peer in items.iter() {
            lanshare_free_string(peer.device_id);
            lanshare_free_string(peer.device_name);
            lanshare_free_string(peer.ip_address);
        }
        drop(items);
    }
    *list = LansharePeerList::empty();
}

/// An offer waiting for accept or reject
///
/// `is_valid` is false when nothing is waiting; all strings are then null.
/// Free with `lanshare_free_pending_transfer()`.
#[repr(C)]
#[derive(Debug)]
pub struct LansharePendingTransfer {
    /// Name the sender gave for itself
    pub sender_name: *mut c_char,
    /// `ip:port` the offer came from
    pub sender_addr: *mut c_char,
    /// File or folder name
    pub file_name: *mut c_char,
    /// Exact stream length in bytes
    pub file_size: u64,
    /// Payload is a folder archive
    pub is_folder: bool,
    /// An offer is actually waiting
    pub is_valid: bool,
}

impl LansharePendingTransfer {
    pub(crate) fn invalid() -> Self {
        Self {
            sender_name: ptr::null_mut(),
            sender_addr: ptr::null_mut(),
            file_name: ptr::null_mut(),
            file_size: 0,
            is_folder: false,
            is_valid: false,
        }
    }
}

impl From<&PendingTransfer> for LansharePendingTransfer {
    fn from(pending: &PendingTransfer) -> Self {
        Self {
            sender_name: to_c_string(pending.sender_name.as_str()),
            sender_addr: to_c_string(pending.sender_addr.to_string()),
            file_name: to_c_string(pending.file_name.as_str()),
            file_size: pending.file_size,
            is_folder: pending.is_folder,
            is_valid: true,
        }
    }
}

/// Release the strings inside a pending-transfer struct
///
/// The struct itself belongs to the caller; it is reset to the invalid value.
///
/// # Safety
///
/// - `pending` must be null or point to a struct returned by
///   `lanshare_receiver_get_pending()`
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_free_pending_transfer(pending: *mut LansharePendingTransfer) {
    let Some(pending) = pending.as_mut() else {
        return;
    };
    lanshare_free_string(pending.sender_name);
    lanshare_free_string(pending.sender_addr);
    lanshare_free_string(pending.file_name);
    *pending = LansharePendingTransfer::invalid();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_peer_list_layout_and_free() {
        let peers = vec![
            Peer::new("a1", "Laptop", IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)), 42424),
            Peer::new("b2", "Phone", IpAddr::V4(Ipv4Addr::new(192, 168, 1, 21)), 42425),
        ];
        let mut list = LansharePeerList::from_peers(&peers);
        assert_eq!(list.count, 2);

        unsafe {
            let second = &*list.peers.add(1);
            assert_eq!(CStr::from_ptr(second.device_name).to_str().unwrap(), "Phone");
            assert_eq!(CStr::from_ptr(second.ip_address).to_str().unwrap(), "192.168.1.21");
            assert_eq!(second.port, 42425);

            lanshare_free_peer_list(&mut list);
            assert!(list.peers.is_null());
            assert_eq!(list.count, 0);
            // Second free is a no-op
            lanshare_free_peer_list(&mut list);
            lanshare_free_peer_list(ptr::null_mut());
        }
    }

    #[test]
    fn test_empty_peer_list_has_null_storage() {
        let list = LansharePeerList::from_peers(&[]);
        assert!(list.peers.is_null());
        assert_eq!(list.count, 0);
    }

    #[test]
    fn test_pending_transfer_conversion() {
        let pending = PendingTransfer {
            sender_name: "Alice".into(),
            sender_addr: "10.0.0.5:51000".parse().unwrap(),
            file_name: "photos".into(),
            file_size: 10_485_760,
            is_folder: true,
        };
        let mut ffi = LansharePendingTransfer::from(&pending);
        assert!(ffi.is_valid);
        assert!(ffi.is_folder);
        assert_eq!(ffi.file_size, 10_485_760);

        unsafe {
            assert_eq!(CStr::from_ptr(ffi.sender_addr).to_str().unwrap(), "10.0.0.5:51000");
            lanshare_free_pending_transfer(&mut ffi);
        }
        assert!(!ffi.is_valid);
        assert!(ffi.file_name.is_null());
    }
}
