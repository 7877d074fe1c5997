//! # lanshare-ffi - C ABI for LanShare
//!
//! Exposes the engine, discovery, sender, receiver and transport helpers
//! as `lanshare_*` functions for Swift, Kotlin, Electron and other hosts.
//!
//! ## Safety
//!
//! Callers must ensure:
//! - Handles passed in came from the matching `lanshare_create_*` /
//!   `lanshare_init` call and have not been destroyed
//! - Strings passed in are NUL-terminated UTF-8
//! - Every returned string is freed exactly once with `lanshare_free_string()`
//!
//! Null handles are tolerated everywhere: fallible calls return
//! `InvalidArgument`, queries return a neutral default and the rest do nothing.
//!
//! ## Memory Management
//!
//! - Rust owns all opaque handle memory (engine, sender, receiver)
//! - Caller owns strings returned as `*mut c_char`, the peer list returned by
//!   `lanshare_get_peers()` and the strings inside a pending-transfer struct
//! - Each `lanshare_destroy*()` stops or cancels the instance, then frees it
//!
//! ## Error Handling
//!
//! Fallible functions return a [`LanshareStatus`] code (0 = success). The
//! message for the most recent failure on the calling thread is available
//! from `lanshare_last_error_message()`.

// FFI code inherently requires unsafe operations within unsafe functions
#![allow(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::{Arc, Mutex, PoisonError};

use lanshare_core::{Engine, EngineConfig, TransferReceiver, TransferSender};
use tokio::runtime::Runtime;

pub mod discovery;
pub mod error;
pub mod receiver;
pub mod sender;
pub mod transport;
pub mod types;

pub use error::{LanshareError, LanshareStatus};
pub use types::*;

/// Opaque handle to an engine (identity, peer registry, discovery)
#[repr(C)]
pub struct LanshareHandle {
    _private: [u8; 0],
}

/// Opaque handle to one outbound transfer
#[repr(C)]
pub struct LanshareSender {
    _private: [u8; 0],
}

/// Opaque handle to one receive slot
#[repr(C)]
pub struct LanshareReceiver {
    _private: [u8; 0],
}

/// Internal representation of LanshareHandle
pub(crate) struct EngineHandle {
    pub(crate) engine: Engine,
    pub(crate) runtime: Arc<Runtime>,
}

/// Internal representation of LanshareSender
pub(crate) struct SenderHandle {
    pub(crate) sender: TransferSender,
    pub(crate) runtime: Arc<Runtime>,
}

/// Internal representation of LanshareReceiver
pub(crate) struct ReceiverHandle {
    pub(crate) receiver: TransferReceiver,
    pub(crate) runtime: Arc<Runtime>,
}

/// Process-wide multi-thread runtime shared by every handle
///
/// Built on first use and never dropped, so destroying a handle from any
/// thread cannot tear down a runtime another handle still drives.
pub(crate) fn shared_runtime() -> Result<Arc<Runtime>, LanshareError> {
    static RUNTIME: Mutex<Option<Arc<Runtime>>> = Mutex::new(None);

    let mut slot = RUNTIME.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(runtime) = slot.as_ref() {
        return Ok(Arc::clone(runtime));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lanshare-worker")
        .build()
        .map(Arc::new)
        .map_err(|e| LanshareError::internal_error(format!("runtime start failed: {e}")))?;
    *slot = Some(Arc::clone(&runtime));
    Ok(runtime)
}

fn install_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Create an engine for this device
///
/// Generates a fresh device ID and installs the log subscriber (`RUST_LOG`,
/// default `info`) on the first call.
///
/// Returns null if `device_name` is null, not UTF-8 or blank.
///
/// # Safety
///
/// - `device_name` must be null or a valid NUL-terminated string
/// - Free the returned handle with `lanshare_destroy()`
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_init(device_name: *const c_char) -> *mut LanshareHandle {
    install_tracing();

    let name = ffi_try_ptr!(
        from_c_string(device_name)
            .ok_or_else(|| LanshareError::invalid_argument("device name is null or not UTF-8"))
    );
    let runtime = ffi_try_ptr!(shared_runtime());
    let engine = ffi_try_ptr!(Engine::new(&name, EngineConfig::default()));

    let handle = Box::new(EngineHandle { engine, runtime });
    Box::into_raw(handle) as *mut LanshareHandle
}

/// Stop discovery and free the engine
///
/// # Safety
///
/// - `handle` must be null or a pointer returned by `lanshare_init()`
/// - `handle` must not be used after this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_destroy(handle: *mut LanshareHandle) {
    if handle.is_null() {
        return;
    }
    let handle = Box::from_raw(handle as *mut EngineHandle);
    if let Err(e) = handle.runtime.block_on(handle.engine.stop_discovery()) {
        tracing::warn!(error = %e, "discovery did not stop cleanly");
    }
    drop(handle);
}

/// This device's ID as a caller-owned string
///
/// Returns null for a null handle.
///
/// # Safety
///
/// - `handle` must be null or a valid engine handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_get_device_id(handle: *const LanshareHandle) -> *mut c_char {
    match engine_ref(handle) {
        Some(h) => to_c_string(h.engine.device_id()),
        None => std::ptr::null_mut(),
    }
}

/// Fresh six-digit pairing code formatted `XXX-XXX`
///
/// Free the result with `lanshare_free_string()`.
#[unsafe(no_mangle)]
pub extern "C" fn lanshare_generate_pairing_code() -> *mut c_char {
    to_c_string(lanshare_core::generate_pairing_code())
}

/// Library version as a static NUL-terminated string
///
/// The caller must NOT free this pointer.
#[unsafe(no_mangle)]
pub extern "C" fn lanshare_version() -> *const c_char {
    const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}

/// Free a string returned by a `lanshare_*` function
///
/// # Safety
///
/// - `s` must be null or a pointer returned by this library
/// - `s` must not be used or freed again after this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lanshare_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Convert to a caller-owned C string
///
/// Interior NUL bytes are dropped rather than failing the call.
pub(crate) fn to_c_string(s: impl Into<Vec<u8>>) -> *mut c_char {
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(e) => {
            let mut bytes = e.into_vec();
            bytes.retain(|&b| b != 0);
            CString::new(bytes).map_or(std::ptr::null_mut(), CString::into_raw)
        }
    }
}

/// Convert a C string to an owned Rust `String`
///
/// # Safety
///
/// - `s` must be null or a valid NUL-terminated string
pub(crate) unsafe fn from_c_string(s: *const c_char) -> Option<String> {
    if s.is_null() {
        None
    } else {
        CStr::from_ptr(s).to_str().ok().map(str::to_string)
    }
}

pub(crate) unsafe fn engine_ref<'a>(handle: *const LanshareHandle) -> Option<&'a EngineHandle> {
    (handle as *const EngineHandle).as_ref()
}

pub(crate) unsafe fn sender_ref<'a>(sender: *const LanshareSender) -> Option<&'a SenderHandle> {
    (sender as *const SenderHandle).as_ref()
}

pub(crate) unsafe fn receiver_ref<'a>(
    receiver: *const LanshareReceiver,
) -> Option<&'a ReceiverHandle> {
    (receiver as *const ReceiverHandle).as_ref()
}

/// Record `err` and return its status code
pub(crate) fn fail(err: LanshareError) -> std::os::raw::c_int {
    error::set_last_error(&err);
    err.code as std::os::raw::c_int
}

/// Null-handle guard for status-returning functions
pub(crate) fn null_handle(what: &str) -> std::os::raw::c_int {
    fail(LanshareError::invalid_argument(format!("{what} is null")))
}
