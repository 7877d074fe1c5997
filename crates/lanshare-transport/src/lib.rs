//! # LanShare Transport
//!
//! Socket layer for LanShare.
//!
//! This crate provides:
//! - UDP sockets for broadcast discovery (announce and listen)
//! - TCP listeners and bounded-time connects for the transfer channel
//! - Stateless reachability helpers: a bind probe and a TCP ping
//!
//! All sockets are built with `socket2` so options such as `SO_BROADCAST`
//! and `SO_REUSEADDR` are applied before bind, then handed to Tokio.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod probe;
pub mod tcp;
pub mod udp;

pub use error::{TransportError, TransportResult};
pub use probe::{DEFAULT_PING_TIMEOUT, ping, ping_async, start_server, stop_server};

/// Largest UDP datagram the discovery listener accepts
pub const MAX_DATAGRAM_SIZE: usize = 1500;
