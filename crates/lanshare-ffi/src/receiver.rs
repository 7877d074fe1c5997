//! Receiver API FFI

use std::os::raw::{c_char, c_int};
use std::ptr;

use lanshare_core::{ReceiverState, TransferReceiver};

use crate::error::{LanshareError, LanshareStatus};
use crate::types::LansharePendingTransfer;
use crate::{
    LanshareReceiver, ReceiverHandle, ffi_try, ffi_try_ptr, from_c_string, null_handle,
    receiver_ref, shared_runtime, to_c_string,
};

/// Create an idle receiver
///
/// Returns null only if the async runtime cannot be started.
///
/// Free the returned handle with `lanshare_destroy_receiver()`.
#[unsafe(no_mangle)]
pub extern "C" fn lanshare_create_receiver() -> *mut LanshareReceiver {
    let runtime = ffi_try_ptr!(shared_runtime());
    let handle = Box::new(ReceiverHandle {
        receiver: TransferReceiver::new(),
        runtime,
    });
    Box::into_raw(handle) as *mut LanshareReceiver
}

/// Bound TCP port, or 0 before `lanshare_receiver_start()`
///
/// # Safety
///
/// - `receiver` must be null or a valid receiver handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_receiver_get_port(receiver: *const LanshareReceiver) -> u16 {
    receiver_ref(receiver).map_or(0, |h| h.receiver.port())
}

/// Bind a port and start listening for one sender
///
/// Returns `InvalidState` unless idle and `IoError` if no port could be
/// bound.
///
/// # Safety
///
/// - `receiver` must be null or a valid receiver handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_receiver_start(receiver: *mut LanshareReceiver) -> c_int {
    let Some(h) = receiver_ref(receiver) else {
        return null_handle("receiver");
    };
    ffi_try!(h.runtime.block_on(h.receiver.start()));
    LanshareStatus::Success as c_int
}

/// Stop listening and drop any open connection
///
/// # Safety
///
/// - `receiver` must be null or a valid receiver handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_receiver_stop(receiver: *mut LanshareReceiver) {
    if let Some(h) = receiver_ref(receiver) {
        h.runtime.block_on(h.receiver.stop());
    }
}

/// Current state: 0 Idle, 1 Listening, 2 AwaitingAccept, 3 Receiving,
/// 4 Completed, 5 Error
///
/// A null handle reads as Idle.
///
/// # Safety
///
/// - `receiver` must be null or a valid receiver handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_receiver_get_state(receiver: *const LanshareReceiver) -> c_int {
    let state = receiver_ref(receiver).map_or(ReceiverState::Idle, |h| h.receiver.state());
    state as u8 as c_int
}

/// The offer waiting for a decision
///
/// `is_valid` is false unless the state is AwaitingAccept. Release the
/// strings with `lanshare_free_pending_transfer()`.
///
/// # Safety
///
/// - `receiver` must be null or a valid receiver handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_receiver_get_pending(
    receiver: *const LanshareReceiver,
) -> LansharePendingTransfer {
    receiver_ref(receiver)
        .and_then(|h| h.receiver.pending())
        .map_or_else(LansharePendingTransfer::invalid, |p| {
            LansharePendingTransfer::from(&p)
        })
}

/// Accept the pending offer and write it to `save_path`
///
/// For a file, `save_path` may be an existing directory or the target file
/// path. For a folder it is the directory to unpack into. Returns
/// `InvalidState` unless AwaitingAccept; the state is unchanged on error.
///
/// # Safety
///
/// - `receiver` must be null or a valid receiver handle
/// - `save_path` must be null or a valid NUL-terminated string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_receiver_accept(
    receiver: *mut LanshareReceiver,
    save_path: *const c_char,
) -> c_int {
    let Some(h) = receiver_ref(receiver) else {
        return null_handle("receiver");
    };
    let save_path = ffi_try!(
        from_c_string(save_path)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| LanshareError::invalid_argument("save path is null, empty or not UTF-8"))
    );
    ffi_try!(h.receiver.accept(save_path));
    LanshareStatus::Success as c_int
}

/// Decline the pending offer and keep listening
///
/// Returns `InvalidState` unless AwaitingAccept; the state is unchanged.
///
/// # Safety
///
/// - `receiver` must be null or a valid receiver handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_receiver_reject(receiver: *mut LanshareReceiver) -> c_int {
    let Some(h) = receiver_ref(receiver) else {
        return null_handle("receiver");
    };
    ffi_try!(h.receiver.reject());
    LanshareStatus::Success as c_int
}

/// Return a Completed or Error receiver to Idle, releasing its port
///
/// # Safety
///
/// - `receiver` must be null or a valid receiver handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_receiver_reset(receiver: *mut LanshareReceiver) -> c_int {
    let Some(h) = receiver_ref(receiver) else {
        return null_handle("receiver");
    };
    ffi_try!(h.runtime.block_on(h.receiver.reset()));
    LanshareStatus::Success as c_int
}

/// Fraction of the accepted payload received, in `0.0..=1.0`
///
/// # Safety
///
/// - `receiver` must be null or a valid receiver handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_receiver_get_progress(receiver: *const LanshareReceiver) -> f32 {
    receiver_ref(receiver).map_or(0.0, |h| h.receiver.progress() as f32)
}

/// Bytes of the accepted payload written so far
///
/// # Safety
///
/// - `receiver` must be null or a valid receiver handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_receiver_get_bytes_received(
    receiver: *const LanshareReceiver,
) -> u64 {
    receiver_ref(receiver).map_or(0, |h| h.receiver.bytes_received())
}

/// Hex digest computed over the received payload, or null until known
///
/// # Safety
///
/// - `receiver` must be null or a valid receiver handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_receiver_get_checksum(
    receiver: *const LanshareReceiver,
) -> *mut c_char {
    receiver_ref(receiver)
        .and_then(|h| h.receiver.checksum())
        .map_or(ptr::null_mut(), to_c_string)
}

/// Stop and free a receiver
///
/// # Safety
///
/// - `receiver` must be null or a pointer returned by `lanshare_create_receiver()`
/// - `receiver` must not be used after this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_destroy_receiver(receiver: *mut LanshareReceiver) {
    if receiver.is_null() {
        return;
    }
    let handle = Box::from_raw(receiver as *mut ReceiverHandle);
    handle.runtime.block_on(handle.receiver.stop());
    drop(handle);
}
