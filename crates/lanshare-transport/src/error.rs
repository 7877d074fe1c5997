//! Transport layer errors.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Address binding failed
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        /// Address that could not be bound
        addr: SocketAddr,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Connection failed
    #[error("Connection to {addr} failed: {source}")]
    ConnectionFailed {
        /// Remote address
        addr: SocketAddr,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Connect did not complete in time
    #[error("Connection to {addr} timed out after {timeout:?}")]
    Timeout {
        /// Remote address
        addr: SocketAddr,
        /// Time allowed
        timeout: Duration,
    },
}

impl TransportError {
    /// Returns true if a bind failed because another socket holds the address
    #[must_use]
    pub fn is_addr_in_use(&self) -> bool {
        matches!(
            self,
            TransportError::BindFailed { source, .. } if source.kind() == io::ErrorKind::AddrInUse
        )
    }

    /// Returns true if the remote actively refused the connection
    #[must_use]
    pub fn is_refused(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionFailed { source, .. }
                if source.kind() == io::ErrorKind::ConnectionRefused
        )
    }

    pub(crate) fn bind(addr: SocketAddr) -> impl FnOnce(io::Error) -> Self {
        move |source| TransportError::BindFailed { addr, source }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_in_use_detection() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let err = TransportError::bind(addr)(io::Error::from(io::ErrorKind::AddrInUse));
        assert!(err.is_addr_in_use());
        assert!(err.to_string().contains("127.0.0.1:9"));

        let err = TransportError::bind(addr)(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_addr_in_use());
    }

    #[test]
    fn test_refused_detection() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let err = TransportError::ConnectionFailed {
            addr,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(err.is_refused());

        let err = TransportError::Timeout {
            addr,
            timeout: Duration::from_secs(1),
        };
        assert!(!err.is_refused());
        assert!(err.to_string().contains("timed out"));
    }
}
