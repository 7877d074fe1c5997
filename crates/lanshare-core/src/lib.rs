//! # LanShare Core
//!
//! Transfer engine for LanShare.
//!
//! This crate provides:
//! - [`Engine`]: device identity, peer registry and discovery lifecycle
//! - [`TransferSender`]: one outbound file or folder over one TCP connection
//! - [`TransferReceiver`]: the inbound state machine (listen, offer, receive)
//! - The wire protocol both sides speak
//! - Error types and handling
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Engine                                │
//! │     (device id, peer registry, discovery service, settings)      │
//! ├────────────────────────────────┬─────────────────────────────────┤
//! │        TransferSender          │        TransferReceiver         │
//! │  handshake → data* → end       │  listen → offer → data* → verdict│
//! ├────────────────────────────────┴─────────────────────────────────┤
//! │           lanshare-files (payload, checksum, chunking)           │
//! │           lanshare-transport (sockets, probe, ping)              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod receiver;
pub mod sender;

pub use config::{DiscoveryDefaults, EngineConfig, TransferConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use identity::{DeviceId, generate_pairing_code};
pub use receiver::{PendingTransfer, ReceiverState, TransferReceiver};
pub use sender::{SenderState, TransferSender};

pub use lanshare_discovery::Peer;
pub use lanshare_files::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
