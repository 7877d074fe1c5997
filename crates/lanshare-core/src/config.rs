//! Engine configuration

use crate::error::{EngineError, Result};
use lanshare_discovery::DEFAULT_DISCOVERY_PORT;
use lanshare_discovery::service::DEFAULT_ANNOUNCE_INTERVAL;
use lanshare_files::{DEFAULT_CHUNK_SIZE, chunker::is_valid_chunk_size};
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Ports a receiver tries before falling back to an ephemeral port
pub const DEFAULT_RECEIVER_PORTS: RangeInclusive<u16> = 42424..=42434;

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Discovery defaults
    pub discovery: DiscoveryDefaults,

    /// Transfer configuration
    pub transfer: TransferConfig,
}

impl EngineConfig {
    /// Validate every section
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()?;
        self.transfer.validate()
    }
}

/// Settings applied whenever the engine starts discovery
#[derive(Debug, Clone)]
pub struct DiscoveryDefaults {
    /// UDP discovery port
    pub port: u16,

    /// Time between Hello broadcasts
    pub announce_interval: Duration,

    /// Evict silent peers after this long
    pub peer_ttl: Option<Duration>,

    /// Override for the broadcast destination
    pub broadcast_addr: Option<SocketAddr>,
}

impl Default for DiscoveryDefaults {
    fn default() -> Self {
        Self {
            port: DEFAULT_DISCOVERY_PORT,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            peer_ttl: None,
            broadcast_addr: None,
        }
    }
}

impl DiscoveryDefaults {
    fn validate(&self) -> Result<()> {
        if self.announce_interval.is_zero() {
            return Err(EngineError::invalid_config(
                "announce interval must be non-zero",
            ));
        }
        if self.peer_ttl.is_some_and(|ttl| ttl < self.announce_interval) {
            return Err(EngineError::invalid_config(
                "peer ttl must be at least one announce interval",
            ));
        }
        Ok(())
    }
}

/// Transfer configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bytes per data frame
    pub chunk_size: usize,

    /// Bound on the TCP connect
    pub connect_timeout: Duration,

    /// How long a sender waits for the receiver to decide
    pub decision_timeout: Duration,

    /// Bound on any single read or write once a transfer is underway
    pub io_timeout: Duration,

    /// Fixed receiver port; overrides `preferred_ports`
    pub listen_port: Option<u16>,

    /// Receiver ports tried in order before an ephemeral port
    pub preferred_ports: RangeInclusive<u16>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(10),
            decision_timeout: Duration::from_secs(60),
            io_timeout: Duration::from_secs(30),
            listen_port: None,
            preferred_ports: DEFAULT_RECEIVER_PORTS,
        }
    }
}

impl TransferConfig {
    /// Validate transfer settings
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` for a chunk size outside
    /// `1..=MAX_CHUNK_SIZE` or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_chunk_size(self.chunk_size) {
            return Err(EngineError::invalid_config(
                "chunk size must be between 1 byte and 16 MiB",
            ));
        }
        if self.connect_timeout.is_zero()
            || self.decision_timeout.is_zero()
            || self.io_timeout.is_zero()
        {
            return Err(EngineError::invalid_config("timeouts must be non-zero"));
        }
        Ok(())
    }
}
