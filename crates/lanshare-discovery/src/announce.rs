//! Presence announcement wire format.
//!
//! Every field is length-delimited so a datagram can be validated without
//! trusting anything the sender claims:
//!
//! ```text
//! +-------+---------+------+----------+--------+------+----------+------+
//! | "LS"  | version | kind | port u16 | id_len |  id  | name_len | name |
//! +-------+---------+------+----------+--------+------+----------+------+
//!    2         1        1       2          1     0-255      1     0-255
//! ```
//!
//! Integers are big-endian. `port` is the TCP port the sender accepts
//! transfers on, not the discovery port.

use thiserror::Error;

/// Leading bytes of every announcement
pub const MAGIC: [u8; 2] = *b"LS";

/// Current announcement format version
pub const VERSION: u8 = 1;

/// Longest encodable id or name, in bytes
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// Fixed part: magic + version + kind + port + two length bytes
const HEADER_LEN: usize = 2 + 1 + 1 + 2;

/// Announcement decode failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnnounceError {
    /// Magic bytes did not match
    #[error("not a LanShare announcement")]
    BadMagic,

    /// Unknown format version
    #[error("unsupported announcement version {0}")]
    UnsupportedVersion(u8),

    /// Unknown announcement kind
    #[error("unknown announcement kind {0}")]
    UnknownKind(u8),

    /// Datagram ended before a declared field
    #[error("announcement truncated")]
    Truncated,

    /// A text field was not UTF-8
    #[error("announcement field is not valid UTF-8")]
    InvalidUtf8,

    /// Device ID was empty
    #[error("announcement carries an empty device id")]
    EmptyDeviceId,
}

/// Why a device is announcing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AnnouncementKind {
    /// Device is present and accepting transfers
    Hello = 1,
    /// Device is leaving; drop it from peer lists
    Goodbye = 2,
}

impl TryFrom<u8> for AnnouncementKind {
    type Error = AnnounceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Hello),
            2 => Ok(Self::Goodbye),
            other => Err(AnnounceError::UnknownKind(other)),
        }
    }
}

/// One discovery datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Hello or goodbye
    pub kind: AnnouncementKind,
    /// Sender device ID
    pub device_id: String,
    /// Sender device name
    pub device_name: String,
    /// Sender transfer port
    pub port: u16,
}

impl Announcement {
    /// Presence announcement
    pub fn hello(device_id: impl Into<String>, device_name: impl Into<String>, port: u16) -> Self {
        Self {
            kind: AnnouncementKind::Hello,
            device_id: device_id.into(),
            device_name: device_name.into(),
            port,
        }
    }

    /// Departure announcement
    pub fn goodbye(device_id: impl Into<String>, device_name: impl Into<String>, port: u16) -> Self {
        Self {
            kind: AnnouncementKind::Goodbye,
            ..Self::hello(device_id, device_name, port)
        }
    }

    /// Serialize to a datagram
    ///
    /// Fields longer than 255 bytes are cut at the last character boundary
    /// that fits.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let id = truncate_utf8(&self.device_id, MAX_FIELD_LEN);
        let name = truncate_utf8(&self.device_name, MAX_FIELD_LEN);

        let mut buf = Vec::with_capacity(HEADER_LEN + 2 + id.len() + name.len());
        buf.extend_from_slice(&MAGIC);
        buf.push(VERSION);
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.port.to_be_bytes());
        buf.push(id.len() as u8);
        buf.extend_from_slice(id.as_bytes());
        buf.push(name.len() as u8);
        buf.extend_from_slice(name.as_bytes());
        buf
    }

    /// Parse a datagram
    ///
    /// Trailing bytes after the name are ignored so later versions can
    /// append fields.
    ///
    /// # Errors
    ///
    /// Returns an `AnnounceError` for foreign traffic, unknown versions or
    /// kinds, truncated fields, non-UTF-8 text and empty device IDs.
    pub fn decode(bytes: &[u8]) -> Result<Self, AnnounceError> {
        let mut cursor = Cursor { bytes, pos: 0 };

        if cursor.take(2)? != MAGIC {
            return Err(AnnounceError::BadMagic);
        }
        let version = cursor.byte()?;
        if version != VERSION {
            return Err(AnnounceError::UnsupportedVersion(version));
        }
        let kind = AnnouncementKind::try_from(cursor.byte()?)?;
        let port = u16::from_be_bytes([cursor.byte()?, cursor.byte()?]);
        let device_id = cursor.text()?;
        let device_name = cursor.text()?;

        if device_id.is_empty() {
            return Err(AnnounceError::EmptyDeviceId);
        }

        Ok(Self {
            kind,
            device_id,
            device_name,
            port,
        })
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], AnnounceError> {
        let end = self.pos.checked_add(n).ok_or(AnnounceError::Truncated)?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(AnnounceError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, AnnounceError> {
        Ok(self.take(1)?[0])
    }

    fn text(&mut self) -> Result<String, AnnounceError> {
        let len = self.byte()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| AnnounceError::InvalidUtf8)
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hello_layout() {
        let bytes = Announcement::hello("ab", "PC", 0x1234).encode();
        assert_eq!(
            bytes,
            [b'L', b'S', 1, 1, 0x12, 0x34, 2, b'a', b'b', 2, b'P', b'C']
        );
    }

    #[test]
    fn test_goodbye_decodes() {
        let ann = Announcement::goodbye("id", "Name", 42424);
        let back = Announcement::decode(&ann.encode()).unwrap();
        assert_eq!(back, ann);
        assert_eq!(back.kind, AnnouncementKind::Goodbye);
    }

    #[test]
    fn test_rejects_foreign_datagrams() {
        assert_eq!(Announcement::decode(b""), Err(AnnounceError::Truncated));
        assert_eq!(
            Announcement::decode(b"XX\x01\x01\x00\x01\x01a\x00"),
            Err(AnnounceError::BadMagic)
        );
        assert_eq!(
            Announcement::decode(b"LS\x09\x01\x00\x01\x01a\x00"),
            Err(AnnounceError::UnsupportedVersion(9))
        );
        assert_eq!(
            Announcement::decode(b"LS\x01\x07\x00\x01\x01a\x00"),
            Err(AnnounceError::UnknownKind(7))
        );
    }

    #[test]
    fn test_rejects_bad_fields() {
        // id_len claims 5 bytes but only 1 follows
        assert_eq!(
            Announcement::decode(b"LS\x01\x01\x00\x01\x05a"),
            Err(AnnounceError::Truncated)
        );
        assert_eq!(
            Announcement::decode(b"LS\x01\x01\x00\x01\x01\xff\x00"),
            Err(AnnounceError::InvalidUtf8)
        );
        assert_eq!(
            Announcement::decode(b"LS\x01\x01\x00\x01\x00\x01n"),
            Err(AnnounceError::EmptyDeviceId)
        );
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = Announcement::hello("id", "n", 1).encode();
        bytes.extend_from_slice(b"future");
        assert_eq!(Announcement::decode(&bytes).unwrap().device_id, "id");
    }

    #[test]
    fn test_long_name_truncated_on_char_boundary() {
        // 200 two-byte characters: 400 bytes
        let name: String = std::iter::repeat('é').take(200).collect();
        let ann = Announcement::hello("id", name, 1);
        let back = Announcement::decode(&ann.encode()).unwrap();

        assert!(back.device_name.len() <= MAX_FIELD_LEN);
        assert_eq!(back.device_name.len(), 254);
        assert!(back.device_name.chars().all(|c| c == 'é'));
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..600)) {
            let _ = Announcement::decode(&bytes);
        }

        #[test]
        fn prop_short_fields_survive(
            id in "[a-f0-9]{1,32}",
            name in "\\PC{0,60}",
            port in any::<u16>(),
        ) {
            let ann = Announcement::hello(id, name, port);
            let back = Announcement::decode(&ann.encode()).unwrap();
            prop_assert_eq!(back, ann);
        }
    }
}
