//! # LanShare Files
//!
//! Payload engine for LanShare transfers.
//!
//! This crate provides:
//! - Streaming BLAKE3 checksums that are independent of chunk boundaries
//! - Fixed-size chunking arithmetic
//! - The logical payload stream: a regular file, or a folder packed into a
//!   single tar archive, on both the sending and the receiving side

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod chunker;
pub mod payload;

pub use checksum::{DIGEST_LEN, Digest, StreamingChecksum};
pub use chunker::FileChunker;
pub use payload::{PayloadKind, PayloadSink, PayloadSource};

/// Default chunk size (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest chunk size a peer may negotiate (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
