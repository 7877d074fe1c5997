//! Status codes and error handling at the C boundary

use lanshare_core::EngineError;
use std::cell::RefCell;
use std::os::raw::c_char;

/// Status returned by fallible `lanshare_*` functions
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanshareStatus {
    /// Operation succeeded
    Success = 0,
    /// Null pointer, bad UTF-8, unparseable address or invalid setting
    InvalidArgument = 1,
    /// Operation not allowed in the current state
    InvalidState = 2,
    /// Local file or socket I/O failed
    IoError = 3,
    /// The peer could not be reached or the connection dropped
    ConnectionFailed = 4,
    /// A network step took too long
    Timeout = 5,
    /// The receiver declined the transfer
    Rejected = 6,
    /// The transfer was cancelled
    Cancelled = 7,
    /// Integrity verification failed
    ChecksumMismatch = 8,
    /// Discovery could not start or stop
    DiscoveryError = 9,
    /// The peer broke the wire protocol
    ProtocolError = 10,
    /// Anything else
    InternalError = 99,
}

impl From<i32> for LanshareStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => LanshareStatus::Success,
            1 => LanshareStatus::InvalidArgument,
            2 => LanshareStatus::InvalidState,
            3 => LanshareStatus::IoError,
            4 => LanshareStatus::ConnectionFailed,
            5 => LanshareStatus::Timeout,
            6 => LanshareStatus::Rejected,
            7 => LanshareStatus::Cancelled,
            8 => LanshareStatus::ChecksumMismatch,
            9 => LanshareStatus::DiscoveryError,
            10 => LanshareStatus::ProtocolError,
            _ => LanshareStatus::InternalError,
        }
    }
}

impl From<&EngineError> for LanshareStatus {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::InvalidConfig(_) => LanshareStatus::InvalidArgument,
            EngineError::InvalidState(_) => LanshareStatus::InvalidState,
            EngineError::Transport(_) | EngineError::Io(_) => LanshareStatus::IoError,
            EngineError::ConnectionFailed(_) => LanshareStatus::ConnectionFailed,
            EngineError::Timeout(_) => LanshareStatus::Timeout,
            EngineError::Protocol(_) => LanshareStatus::ProtocolError,
            EngineError::HashMismatch => LanshareStatus::ChecksumMismatch,
            EngineError::Rejected => LanshareStatus::Rejected,
            EngineError::Cancelled => LanshareStatus::Cancelled,
            EngineError::Discovery(_) => LanshareStatus::DiscoveryError,
        }
    }
}

/// Error carried to the boundary: a status plus a readable message
#[derive(Debug, Clone)]
pub struct LanshareError {
    /// Status handed back to the caller
    pub code: LanshareStatus,
    /// Message kept for `lanshare_last_error_message`
    pub message: String,
}

impl LanshareError {
    /// Error with an explicit status
    pub fn new(code: LanshareStatus, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `InvalidArgument` error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(LanshareStatus::InvalidArgument, message)
    }

    /// `InternalError` error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(LanshareStatus::InternalError, message)
    }

    /// Message as a caller-owned C string
    pub fn to_c_string(&self) -> *mut c_char {
        crate::to_c_string(self.message.clone())
    }
}

impl From<EngineError> for LanshareError {
    fn from(err: EngineError) -> Self {
        Self::new(LanshareStatus::from(&err), err.to_string())
    }
}

impl From<std::io::Error> for LanshareError {
    fn from(err: std::io::Error) -> Self {
        Self::new(LanshareStatus::IoError, err.to_string())
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<LanshareError>> = const { RefCell::new(None) };
}

/// Remember `err` as this thread's most recent failure
pub(crate) fn set_last_error(err: &LanshareError) {
    tracing::debug!(code = ?err.code, message = %err.message, "ffi call failed");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(err.clone()));
}

/// Message of the most recent failure on the calling thread
///
/// Returns null if no call on this thread has failed yet. Free the result
/// with `lanshare_free_string()`.
#[unsafe(no_mangle)]
pub extern "C" fn lanshare_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|slot| match slot.borrow().as_ref() {
        Some(err) => err.to_c_string(),
        None => std::ptr::null_mut(),
    })
}

/// Message for a status code as a static string
///
/// The caller must NOT free the returned pointer.
#[unsafe(no_mangle)]
pub extern "C" fn lanshare_status_message(code: i32) -> *const c_char {
    let text: &'static [u8] = match LanshareStatus::from(code) {
        LanshareStatus::Success => b"success\0",
        LanshareStatus::InvalidArgument => b"invalid argument\0",
        LanshareStatus::InvalidState => b"invalid state\0",
        LanshareStatus::IoError => b"i/o error\0",
        LanshareStatus::ConnectionFailed => b"connection failed\0",
        LanshareStatus::Timeout => b"timed out\0",
        LanshareStatus::Rejected => b"rejected by receiver\0",
        LanshareStatus::Cancelled => b"cancelled\0",
        LanshareStatus::ChecksumMismatch => b"checksum mismatch\0",
        LanshareStatus::DiscoveryError => b"discovery error\0",
        LanshareStatus::ProtocolError => b"protocol error\0",
        LanshareStatus::InternalError => b"internal error\0",
    };
    text.as_ptr().cast()
}

/// Early-return helper for functions returning a status code
///
/// Records the error for `lanshare_last_error_message` and returns its code.
#[macro_export]
macro_rules! ffi_try {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(err) => {
                let err: $crate::error::LanshareError = err.into();
                $crate::error::set_last_error(&err);
                return err.code as ::std::os::raw::c_int;
            }
        }
    };
}

/// Early-return helper for functions returning a pointer
///
/// Records the error and returns null.
#[macro_export]
macro_rules! ffi_try_ptr {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(err) => {
                let err: $crate::error::LanshareError = err.into();
                $crate::error::set_last_error(&err);
                return ::std::ptr::null_mut();
            }
        }
    };
}
