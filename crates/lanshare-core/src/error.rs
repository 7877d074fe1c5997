//! Error types for the transfer engine
//!
//! Network failures are marked transient so a caller can offer a retry; a
//! retried file transfer resumes from what the receiver already holds.
//! Nothing in the engine retries on its own.
//!
//! # Example
//!
//! ```no_run
//! use lanshare_core::EngineError;
//!
//! fn report(err: &EngineError) {
//!     if err.should_retry() {
//!         println!("{err}; try again");
//!     } else {
//!         println!("{err}");
//!     }
//! }
//! ```

use lanshare_discovery::{DiscoveryError, RegistryError};
use lanshare_transport::TransportError;
use std::borrow::Cow;
use thiserror::Error;

/// Errors that can occur in engine operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    // ============ Configuration & State Errors ============
    /// Invalid argument or configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    // ============ Network Errors ============
    /// Socket setup failed
    #[error("Transport error: {0}")]
    Transport(Cow<'static, str>),

    /// Peer refused or could not be reached
    #[error("Connection failed: {0}")]
    ConnectionFailed(Cow<'static, str>),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(Cow<'static, str>),

    // ============ Protocol Errors ============
    /// Peer sent something the protocol does not allow
    #[error("Protocol error: {0}")]
    Protocol(Cow<'static, str>),

    /// Hash mismatch during verification
    #[error("Hash mismatch: integrity verification failed")]
    HashMismatch,

    // ============ Transfer Outcomes ============
    /// Receiver declined the transfer
    #[error("Transfer rejected by receiver")]
    Rejected,

    /// Transfer cancelled locally or by the peer
    #[error("Transfer cancelled")]
    Cancelled,

    // ============ I/O & Discovery Errors ============
    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(String),

    /// Discovery operation failed
    #[error("Discovery error: {0}")]
    Discovery(Cow<'static, str>),
}

impl EngineError {
    /// Returns true if this error is transient and may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout(_) | EngineError::ConnectionFailed(_) | EngineError::Transport(_)
        )
    }

    /// Returns true if the caller may retry with backoff
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.is_transient() && !matches!(self, EngineError::Timeout(_))
    }

    /// Create an invalid config error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        EngineError::InvalidConfig(Cow::Borrowed(context))
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        EngineError::InvalidState(Cow::Borrowed(context))
    }

    /// Create a timeout error with static context (zero allocation)
    #[must_use]
    pub const fn timeout(context: &'static str) -> Self {
        EngineError::Timeout(Cow::Borrowed(context))
    }

    /// Create a protocol error with static context (zero allocation)
    #[must_use]
    pub const fn protocol(context: &'static str) -> Self {
        EngineError::Protocol(Cow::Borrowed(context))
    }

    /// Create a discovery error with static context (zero allocation)
    #[must_use]
    pub const fn discovery(context: &'static str) -> Self {
        EngineError::Discovery(Cow::Borrowed(context))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => EngineError::Timeout(Cow::Owned(err.to_string())),
            _ => EngineError::Io(err.to_string()),
        }
    }
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionFailed { .. } => {
                EngineError::ConnectionFailed(Cow::Owned(err.to_string()))
            }
            TransportError::Timeout { .. } => EngineError::Timeout(Cow::Owned(err.to_string())),
            TransportError::BindFailed { .. } => EngineError::Transport(Cow::Owned(err.to_string())),
            TransportError::Io(e) => e.into(),
        }
    }
}

impl From<DiscoveryError> for EngineError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::InvalidConfig(msg) => EngineError::InvalidConfig(Cow::Owned(msg)),
            other => EngineError::Discovery(Cow::Owned(other.to_string())),
        }
    }
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        EngineError::InvalidConfig(Cow::Owned(err.to_string()))
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
