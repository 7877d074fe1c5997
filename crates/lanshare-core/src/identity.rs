//! Device identity and pairing codes
//!
//! A device ID names one engine instance on the network. It is random rather
//! than derived from a hostname or MAC so two copies on the same machine
//! still look like two peers.
//!
//! # Example
//!
//! ```
//! use lanshare_core::identity::{DeviceId, generate_pairing_code};
//!
//! let id = DeviceId::generate();
//! assert_eq!(id.as_str().len(), 32);
//!
//! let code = generate_pairing_code();
//! assert_eq!(code.len(), 7);
//! ```

use rand::Rng;
use rand_core::{OsRng, RngCore};
use std::fmt;

/// Random bytes behind a device ID
pub const DEVICE_ID_BYTES: usize = 16;

/// Hex-encoded 128-bit device identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Generate a fresh ID from the operating system RNG
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; DEVICE_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Hex form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Six random digits formatted as `"XXX-XXX"`
#[must_use]
pub fn generate_pairing_code() -> String {
    let n: u32 = OsRng.gen_range(0..1_000_000);
    format!("{:03}-{:03}", n / 1000, n % 1000)
}
