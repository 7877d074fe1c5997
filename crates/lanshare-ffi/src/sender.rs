//! Sender API FFI

use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Arc;

use lanshare_core::TransferSender;

use crate::error::{LanshareError, LanshareStatus};
use crate::transport::resolve;
use crate::{
    LanshareSender, SenderHandle, ffi_try, ffi_try_ptr, from_c_string, null_handle,
    sender_ref, shared_runtime, to_c_string,
};

/// Prepare a file or folder for sending
///
/// Folders are packed into an archive here. Returns null if `path` is null,
/// missing or unreadable.
///
/// # Safety
///
/// - `path` must be null or a valid NUL-terminated string
/// - Free the returned handle with `lanshare_destroy_sender()`
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_create_sender(path: *const c_char) -> *mut LanshareSender {
    let path = ffi_try_ptr!(
        from_c_string(path).ok_or_else(|| LanshareError::invalid_argument("path is null or not UTF-8"))
    );
    let runtime = ffi_try_ptr!(shared_runtime());
    let sender = {
        let _guard = runtime.enter();
        ffi_try_ptr!(TransferSender::new(&path))
    };

    let handle = Box::new(SenderHandle { sender, runtime });
    Box::into_raw(handle) as *mut LanshareSender
}

/// Run the transfer to `ip:port`, blocking until it ends
///
/// Returns `Success` once the receiver has verified the payload, otherwise
/// the failure class (`Rejected`, `Cancelled`, `ChecksumMismatch`, ...).
/// A sender runs at most once; a second call returns `InvalidState`.
///
/// # Safety
///
/// - `sender` must be null or a valid sender handle
/// - `ip` and `sender_name` must be null or valid NUL-terminated strings
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_sender_start(
    sender: *mut LanshareSender,
    ip: *const c_char,
    port: u16,
    sender_name: *const c_char,
) -> c_int {
    let Some(h) = sender_ref(sender) else {
        return null_handle("sender");
    };
    let addr = ffi_try!(resolve(ip, port));
    let name = ffi_try!(
        from_c_string(sender_name)
            .ok_or_else(|| LanshareError::invalid_argument("sender name is null or not UTF-8"))
    );

    // Work on clones so the handle may be destroyed after a cancel
    let transfer = h.sender.clone();
    let runtime = Arc::clone(&h.runtime);
    ffi_try!(runtime.block_on(transfer.start(addr, &name)));
    LanshareStatus::Success as c_int
}

/// Hex digest of the payload, or null until it is known
///
/// # Safety
///
/// - `sender` must be null or a valid sender handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_sender_get_checksum(sender: *const LanshareSender) -> *mut c_char {
    sender_ref(sender)
        .and_then(|h| h.sender.checksum())
        .map_or(ptr::null_mut(), to_c_string)
}

/// Exact payload length in bytes (0 for a null handle)
///
/// # Safety
///
/// - `sender` must be null or a valid sender handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_sender_get_file_size(sender: *const LanshareSender) -> u64 {
    sender_ref(sender).map_or(0, |h| h.sender.file_size())
}

/// Fraction of the payload sent, in `0.0..=1.0`
///
/// # Safety
///
/// - `sender` must be null or a valid sender handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_sender_get_progress(sender: *const LanshareSender) -> f32 {
    sender_ref(sender).map_or(0.0, |h| h.sender.progress() as f32)
}

/// Whether the payload is a folder archive
///
/// # Safety
///
/// - `sender` must be null or a valid sender handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_sender_is_folder(sender: *const LanshareSender) -> bool {
    sender_ref(sender).is_some_and(|h| h.sender.is_folder())
}

/// Set the chunk size; only allowed before `lanshare_sender_start()`
///
/// # Safety
///
/// - `sender` must be null or a valid sender handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_sender_set_chunk_size(
    sender: *mut LanshareSender,
    bytes: usize,
) -> c_int {
    let Some(h) = sender_ref(sender) else {
        return null_handle("sender");
    };
    ffi_try!(h.sender.set_chunk_size(bytes));
    LanshareStatus::Success as c_int
}

/// Request cancellation; a finished transfer is unaffected
///
/// # Safety
///
/// - `sender` must be null or a valid sender handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_sender_cancel(sender: *mut LanshareSender) {
    if let Some(h) = sender_ref(sender) {
        h.sender.cancel();
    }
}

/// Cancel and free a sender
///
/// # Safety
///
/// - `sender` must be null or a pointer returned by `lanshare_create_sender()`
/// - `sender` must not be used after this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_destroy_sender(sender: *mut LanshareSender) {
    if sender.is_null() {
        return;
    }
    let handle = Box::from_raw(sender as *mut SenderHandle);
    handle.sender.cancel();
    drop(handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lanshare_free_string;
    use std::ffi::CString;

    fn sender_for(content: &[u8]) -> (tempfile::TempDir, *mut LanshareSender) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, content).unwrap();
        let c_path = CString::new(path.to_str().unwrap()).unwrap();
        let sender = unsafe { lanshare_create_sender(c_path.as_ptr()) };
        assert!(!sender.is_null());
        (dir, sender)
    }

    #[test]
    fn test_create_sender_rejects_bad_paths() {
        let missing = CString::new("/definitely/not/here.bin").unwrap();
        let empty = CString::new("").unwrap();
        unsafe {
            assert!(lanshare_create_sender(std::ptr::null()).is_null());
            assert!(lanshare_create_sender(missing.as_ptr()).is_null());
            assert!(lanshare_create_sender(empty.as_ptr()).is_null());
        }
    }

    #[test]
    fn test_sender_queries() {
        let (_dir, sender) = sender_for(b"hello lanshare");
        unsafe {
            assert_eq!(lanshare_sender_get_file_size(sender), 14);
            assert!(!lanshare_sender_is_folder(sender));
            assert_eq!(lanshare_sender_get_progress(sender), 0.0);
            assert!(lanshare_sender_get_checksum(sender).is_null());

            assert_eq!(
                lanshare_sender_set_chunk_size(sender, 0),
                LanshareStatus::InvalidArgument as c_int
            );
            assert_eq!(
                lanshare_sender_set_chunk_size(sender, 4096),
                LanshareStatus::Success as c_int
            );
            lanshare_destroy_sender(sender);
        }
    }

    #[test]
    fn test_cancel_before_start() {
        let (_dir, sender) = sender_for(b"data");
        let lo = CString::new("127.0.0.1").unwrap();
        let name = CString::new("Desk").unwrap();
        unsafe {
            lanshare_sender_cancel(sender);
            assert_eq!(
                lanshare_sender_start(sender, lo.as_ptr(), 9, name.as_ptr()),
                LanshareStatus::Cancelled as c_int
            );
            // Not reusable after it ran
            assert_eq!(
                lanshare_sender_set_chunk_size(sender, 4096),
                LanshareStatus::InvalidState as c_int
            );
            lanshare_destroy_sender(sender);
        }
    }

    #[test]
    fn test_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (_dir, sender) = sender_for(b"data");
        let lo = CString::new("127.0.0.1").unwrap();
        let name = CString::new("Desk").unwrap();
        unsafe {
            assert_eq!(
                lanshare_sender_start(sender, lo.as_ptr(), port, name.as_ptr()),
                LanshareStatus::ConnectionFailed as c_int
            );
            let message = crate::error::lanshare_last_error_message();
            assert!(!message.is_null());
            lanshare_free_string(message);
            lanshare_destroy_sender(sender);
        }
    }

    #[test]
    fn test_null_sender() {
        let lo = CString::new("127.0.0.1").unwrap();
        unsafe {
            assert_eq!(
                lanshare_sender_start(ptr::null_mut(), lo.as_ptr(), 1, lo.as_ptr()),
                LanshareStatus::InvalidArgument as c_int
            );
            assert_eq!(lanshare_sender_get_file_size(ptr::null()), 0);
            assert_eq!(lanshare_sender_get_progress(ptr::null()), 0.0);
            assert!(!lanshare_sender_is_folder(ptr::null()));
            assert!(lanshare_sender_get_checksum(ptr::null()).is_null());
            assert_eq!(
                lanshare_sender_set_chunk_size(ptr::null_mut(), 4096),
                LanshareStatus::InvalidArgument as c_int
            );
            lanshare_sender_cancel(ptr::null_mut());
            lanshare_destroy_sender(ptr::null_mut());
        }
    }
}
