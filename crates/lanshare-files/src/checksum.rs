//! Streaming BLAKE3 checksums for payload integrity.
//!
//! Both legs of a transfer feed the same accumulator: the sender as it reads
//! the source, the receiver as it writes the destination. BLAKE3 is a
//! sequential hash over the byte stream, so the digest depends only on the
//! bytes and never on how they were split into chunks.

use crate::chunker::read_full;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

/// Length of a payload digest in bytes
pub const DIGEST_LEN: usize = 32;

/// Final payload digest
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Wrap raw digest bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex encoding (64 characters)
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex-encoded digest
    ///
    /// Returns `None` unless the input is exactly 64 hex characters.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let bytes: [u8; DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental checksum over a logical payload stream
///
/// # Example
///
/// ```
/// use lanshare_files::checksum::{StreamingChecksum, checksum_bytes};
///
/// let mut acc = StreamingChecksum::new();
/// acc.update(b"hello ");
/// acc.update(b"world");
///
/// assert_eq!(acc.bytes_hashed(), 11);
/// assert_eq!(acc.finalize(), checksum_bytes(b"hello world"));
/// ```
#[derive(Clone, Default)]
pub struct StreamingChecksum {
    hasher: blake3::Hasher,
    bytes_hashed: u64,
}

impl StreamingChecksum {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next slice of the payload
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_hashed += data.len() as u64;
    }

    /// Total bytes fed so far
    #[must_use]
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    /// Digest of everything fed so far
    ///
    /// Does not consume the accumulator; further updates continue the stream.
    #[must_use]
    pub fn finalize(&self) -> Digest {
        Digest(*self.hasher.finalize().as_bytes())
    }

    /// Hex digest of everything fed so far
    #[must_use]
    pub fn finalize_hex(&self) -> String {
        self.finalize().to_hex()
    }
}

impl fmt::Debug for StreamingChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingChecksum")
            .field("bytes_hashed", &self.bytes_hashed)
            .finish_non_exhaustive()
    }
}

/// Checksum of an in-memory buffer
#[must_use]
pub fn checksum_bytes(data: &[u8]) -> Digest {
    Digest(*blake3::hash(data).as_bytes())
}

/// Checksum of a file, read `chunk_size` bytes at a time
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
///
/// # Example
///
/// ```no_run
/// use lanshare_files::checksum::checksum_file;
///
/// let digest = checksum_file("/path/to/file", 1024 * 1024)?;
/// println!("{digest}");
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn checksum_file<P: AsRef<Path>>(path: P, chunk_size: usize) -> io::Result<Digest> {
    let mut file = File::open(path)?;
    let mut acc = StreamingChecksum::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let n = read_full(&mut file, &mut buffer)?;
        if n == 0 {
            break;
        }
        acc.update(&buffer[..n]);
    }

    Ok(acc.finalize())
}
