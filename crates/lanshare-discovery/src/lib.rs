//! # LanShare Discovery
//!
//! Peer discovery layer for LanShare.
//!
//! This crate provides:
//! - [`PeerRegistry`]: the shared, insertion-ordered table of known peers
//! - [`announce`]: the compact binary presence announcement
//! - [`DiscoveryService`]: periodic broadcast announce plus passive listen,
//!   feeding the registry until stopped
//!
//! ## Example
//!
//! ```rust,no_run
//! use lanshare_discovery::{DiscoveryConfig, DiscoveryService, PeerRegistry};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(PeerRegistry::new());
//! let config = DiscoveryConfig::new("4f1c9a", "Living Room PC", 53317);
//! let service = DiscoveryService::start(config, Arc::clone(&registry)).await?;
//!
//! tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//! for peer in registry.snapshot() {
//!     println!("{} at {}", peer.device_name, peer.socket_addr());
//! }
//!
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod announce;
pub mod peer;
pub mod registry;
pub mod service;

pub use announce::{AnnounceError, Announcement, AnnouncementKind};
pub use peer::Peer;
pub use registry::{PeerRegistry, RegistryError};
pub use service::{DiscoveryConfig, DiscoveryError, DiscoveryService, DiscoveryState};

/// Default UDP port for discovery announcements
pub const DEFAULT_DISCOVERY_PORT: u16 = 42400;
