//! Transfer wire protocol
//!
//! One TCP connection carries one transfer. All integers are big-endian.
//!
//! ```text
//! sender                                   receiver
//!   | -- [len u32][handshake body] -------> |
//!   | <------------------ [decision u8] --- |   1 = accept, 0 = reject
//!   | <--------------- [first_chunk u64] --- |   only after accept
//!   | -- [1][len u32][data]  (repeated) --> |
//!   | -- [2][32][digest] -----------------> |
//!   | <------------------- [verdict u8] --- |   1 = verified, 0 = mismatch
//! ```
//!
//! `first_chunk` is the index of the first chunk the receiver still needs.
//! It is non-zero when the destination already holds the start of the
//! payload; the sender then skips those chunks but still hashes them, so the
//! end digest always covers the whole stream.
//!
//! A sender that gives up mid-stream sends `[3][0]` and closes.
//!
//! Handshake body:
//!
//! ```text
//! [version u8][flags u8][name_len u8][sender_name][fname_len u16][file_name]
//! [file_size u64][chunk_size u32]
//! ```

use crate::error::{EngineError, Result};
use lanshare_files::chunker::is_valid_chunk_size;
use lanshare_files::{DIGEST_LEN, Digest};
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Handshake format version
pub const PROTOCOL_VERSION: u8 = 3;

/// Largest handshake body a receiver will read
pub const MAX_HANDSHAKE_LEN: usize = 64 * 1024;

/// Longest sender name carried in a handshake, in bytes
pub const MAX_SENDER_NAME_LEN: usize = u8::MAX as usize;

/// Longest file name carried in a handshake, in bytes
pub const MAX_FILE_NAME_LEN: usize = 4096;

const FLAG_FOLDER: u8 = 0x01;

/// Malformed protocol input
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended before a declared field
    #[error("message truncated")]
    Truncated,

    /// Handshake length prefix out of range
    #[error("handshake length {0} out of range")]
    BadLength(u32),

    /// Unknown handshake version
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Chunk size outside the negotiable range
    #[error("chunk size {0} out of range")]
    InvalidChunkSize(u32),

    /// Handshake carried no file name
    #[error("empty file name")]
    EmptyFileName,

    /// A text field was not UTF-8
    #[error("text field is not valid UTF-8")]
    InvalidUtf8,

    /// Unknown frame kind
    #[error("unknown frame kind {0}")]
    UnknownFrame(u8),

    /// Frame payload larger than allowed
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Declared payload length
        len: u32,
        /// Largest allowed payload
        max: usize,
    },

    /// End frame payload was not a digest
    #[error("end frame carries {0} bytes instead of a digest")]
    BadDigest(u32),

    /// Decision or verdict byte not 0 or 1
    #[error("unexpected control byte {0}")]
    BadControlByte(u8),

    /// Resume point past the end of the payload
    #[error("resume chunk {index} is outside a payload of {chunks} chunks")]
    BadResume {
        /// Chunk index named by the receiver
        index: u64,
        /// Chunks in the payload
        chunks: u64,
    },
}

impl From<ProtocolError> for EngineError {
    fn from(err: ProtocolError) -> Self {
        EngineError::Protocol(Cow::Owned(err.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Handshake
// ═══════════════════════════════════════════════════════════════════════════

/// Offer sent by the sender before any payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Human-readable name of the sending device
    pub sender_name: String,
    /// Name of the file or folder
    pub file_name: String,
    /// Exact length of the payload stream
    pub file_size: u64,
    /// Largest data frame the sender will send
    pub chunk_size: u32,
    /// Payload is a folder archive
    pub is_folder: bool,
}

impl Handshake {
    /// Serialize the body (without the length prefix)
    ///
    /// Over-long names are cut on a character boundary.
    #[must_use]
    pub fn encode_body(&self) -> Vec<u8> {
        let sender = truncate_utf8(&self.sender_name, MAX_SENDER_NAME_LEN);
        let file = truncate_utf8(&self.file_name, MAX_FILE_NAME_LEN);

        let mut buf = Vec::with_capacity(3 + sender.len() + 2 + file.len() + 12);
        buf.push(PROTOCOL_VERSION);
        buf.push(if self.is_folder { FLAG_FOLDER } else { 0 });
        buf.push(sender.len() as u8);
        buf.extend_from_slice(sender.as_bytes());
        buf.extend_from_slice(&(file.len() as u16).to_be_bytes());
        buf.extend_from_slice(file.as_bytes());
        buf.extend_from_slice(&self.file_size.to_be_bytes());
        buf.extend_from_slice(&self.chunk_size.to_be_bytes());
        buf
    }

    /// Parse a body
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` for unknown versions, truncated or non-UTF-8
    /// fields, an empty file name or an out-of-range chunk size.
    pub fn decode_body(body: &[u8]) -> std::result::Result<Self, ProtocolError> {
        let mut r = Reader { bytes: body, pos: 0 };

        let version = r.u8()?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let flags = r.u8()?;
        let sender_len = r.u8()? as usize;
        let sender_name = r.text(sender_len)?;
        let file_len = r.u16()? as usize;
        let file_name = r.text(file_len)?;
        let file_size = r.u64()?;
        let chunk_size = r.u32()?;

        if file_name.is_empty() {
            return Err(ProtocolError::EmptyFileName);
        }
        if !is_valid_chunk_size(chunk_size as usize) {
            return Err(ProtocolError::InvalidChunkSize(chunk_size));
        }

        Ok(Self {
            sender_name,
            file_name,
            file_size,
            chunk_size,
            is_folder: flags & FLAG_FOLDER != 0,
        })
    }

    /// Write the length-prefixed handshake
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let body = self.encode_body();
        let mut msg = Vec::with_capacity(4 + body.len());
        msg.extend_from_slice(&(body.len() as u32).to_be_bytes());
        msg.extend_from_slice(&body);
        writer.write_all(&msg).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a length-prefixed handshake
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Protocol` for a bad length or body and
    /// `EngineError::Io` if the stream ends early.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let len = reader.read_u32().await?;
        if len == 0 || len as usize > MAX_HANDSHAKE_LEN {
            return Err(ProtocolError::BadLength(len).into());
        }
        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body).await?;
        Ok(Self::decode_body(&body)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Control bytes
// ═══════════════════════════════════════════════════════════════════════════

/// Receiver's answer to a handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Go ahead and stream
    Accept,
    /// Declined
    Reject,
}

impl Decision {
    /// Wire byte
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Decision::Accept => 1,
            Decision::Reject => 0,
        }
    }

    /// Parse a wire byte
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::BadControlByte` for anything but 0 or 1.
    pub fn from_byte(byte: u8) -> std::result::Result<Self, ProtocolError> {
        match byte {
            1 => Ok(Decision::Accept),
            0 => Ok(Decision::Reject),
            other => Err(ProtocolError::BadControlByte(other)),
        }
    }
}

/// Receiver's integrity answer after the end frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Digest matched
    Verified,
    /// Digest or length did not match
    Mismatch,
}

impl Verdict {
    /// Wire byte
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Verdict::Verified => 1,
            Verdict::Mismatch => 0,
        }
    }

    /// Parse a wire byte
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::BadControlByte` for anything but 0 or 1.
    pub fn from_byte(byte: u8) -> std::result::Result<Self, ProtocolError> {
        match byte {
            1 => Ok(Verdict::Verified),
            0 => Ok(Verdict::Mismatch),
            other => Err(ProtocolError::BadControlByte(other)),
        }
    }
}

/// Write a single control byte and flush
///
/// # Errors
///
/// Returns an error if the write fails.
pub async fn write_control<W: AsyncWrite + Unpin>(writer: &mut W, byte: u8) -> Result<()> {
    writer.write_u8(byte).await?;
    writer.flush().await?;
    Ok(())
}

/// Write the resume point and flush
///
/// # Errors
///
/// Returns an error if the write fails.
pub async fn write_resume<W: AsyncWrite + Unpin>(writer: &mut W, first_chunk: u64) -> Result<()> {
    writer.write_u64(first_chunk).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the resume point and check it against the payload's chunk count
///
/// Zero is always valid, including for an empty payload. Any other index
/// must name an existing chunk.
///
/// # Errors
///
/// Returns `EngineError::Protocol` for an index past the end and
/// `EngineError::Io` if the stream ends early.
pub async fn read_resume<R: AsyncRead + Unpin>(reader: &mut R, chunks: u64) -> Result<u64> {
    let index = reader.read_u64().await?;
    if index != 0 && index >= chunks {
        return Err(ProtocolError::BadResume { index, chunks }.into());
    }
    Ok(index)
}

// ═══════════════════════════════════════════════════════════════════════════
// Frames
// ═══════════════════════════════════════════════════════════════════════════

const FRAME_DATA: u8 = 1;
const FRAME_END: u8 = 2;
const FRAME_CANCEL: u8 = 3;

/// A frame read from the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Payload bytes, left in the caller's buffer
    Data,
    /// End of stream with the sender's digest
    End(Digest),
    /// Sender gave up
    Cancel,
}

/// Write a data frame
///
/// # Errors
///
/// Returns an error if the write fails.
pub async fn write_data<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
    writer.write_u8(FRAME_DATA).await?;
    writer.write_u32(data.len() as u32).await?;
    writer.write_all(data).await?;
    Ok(())
}

/// Write the end frame and flush
///
/// # Errors
///
/// Returns an error if the write fails.
pub async fn write_end<W: AsyncWrite + Unpin>(writer: &mut W, digest: &Digest) -> Result<()> {
    writer.write_u8(FRAME_END).await?;
    writer.write_u32(DIGEST_LEN as u32).await?;
    writer.write_all(digest.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a cancel frame and flush
///
/// # Errors
///
/// Returns an error if the write fails.
pub async fn write_cancel<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_u8(FRAME_CANCEL).await?;
    writer.write_u32(0).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame
///
/// A data payload is placed in `buf`, which is resized to fit. Data frames
/// longer than `max_data` are refused before their payload is read.
///
/// # Errors
///
/// Returns `EngineError::Protocol` for unknown or oversize frames and
/// `EngineError::Io` if the stream ends early.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_data: usize,
    buf: &mut Vec<u8>,
) -> Result<Frame> {
    let kind = reader.read_u8().await?;
    let len = reader.read_u32().await?;

    match kind {
        FRAME_DATA => {
            if len as usize > max_data {
                return Err(ProtocolError::FrameTooLarge { len, max: max_data }.into());
            }
            buf.resize(len as usize, 0);
            reader.read_exact(buf).await?;
            Ok(Frame::Data)
        }
        FRAME_END => {
            if len as usize != DIGEST_LEN {
                return Err(ProtocolError::BadDigest(len).into());
            }
            let mut digest = [0u8; DIGEST_LEN];
            reader.read_exact(&mut digest).await?;
            Ok(Frame::End(Digest::from_bytes(digest)))
        }
        FRAME_CANCEL => Ok(Frame::Cancel),
        other => Err(ProtocolError::UnknownFrame(other).into()),
    }
}

/// Run `fut`, mapping an elapsed deadline to `EngineError::Timeout`
pub(crate) async fn timed<T, F>(limit: Duration, context: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| EngineError::timeout(context))?
}

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], ProtocolError> {
        let end = self.pos.checked_add(n).ok_or(ProtocolError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(ProtocolError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> std::result::Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> std::result::Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> std::result::Result<u16, ProtocolError> {
        self.array().map(u16::from_be_bytes)
    }

    fn u32(&mut self) -> std::result::Result<u32, ProtocolError> {
        self.array().map(u32::from_be_bytes)
    }

    fn u64(&mut self) -> std::result::Result<u64, ProtocolError> {
        self.array().map(u64::from_be_bytes)
    }

    fn text(&mut self, len: usize) -> std::result::Result<String, ProtocolError> {
        std::str::from_utf8(self.take(len)?)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }
}

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
