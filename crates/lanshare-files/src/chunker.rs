//! Payload chunking.
//!
//! Both legs of a transfer agree on one chunk size from the handshake; chunk
//! `i` always covers bytes `i * chunk_size ..` of the stream, which is what
//! lets a receiver name a resume point as a chunk index.

use crate::checksum::StreamingChecksum;
use crate::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use std::io::{self, Read};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Splits a payload stream into fixed-size pieces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with default chunk size
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Create a new chunker with custom chunk size
    ///
    /// Returns `None` for zero or for sizes above [`MAX_CHUNK_SIZE`].
    #[must_use]
    pub fn with_chunk_size(size: usize) -> Option<Self> {
        if is_valid_chunk_size(size) {
            Some(Self { chunk_size: size })
        } else {
            None
        }
    }

    /// Get chunk size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Calculate number of chunks for a payload
    #[must_use]
    pub fn chunk_count(&self, payload_size: u64) -> u64 {
        payload_size.div_ceil(self.chunk_size as u64)
    }

    /// Length of the chunk at `index`, or 0 past the end
    #[must_use]
    pub fn chunk_len(&self, payload_size: u64, index: u64) -> usize {
        let start = index.saturating_mul(self.chunk_size as u64);
        if start >= payload_size {
            return 0;
        }
        (payload_size - start).min(self.chunk_size as u64) as usize
    }

    /// Stream offset where chunk `index` starts
    #[must_use]
    pub fn offset_of(&self, index: u64) -> u64 {
        index.saturating_mul(self.chunk_size as u64)
    }

    /// Number of whole chunks contained in the first `len` bytes
    #[must_use]
    pub fn whole_chunks(&self, len: u64) -> u64 {
        len / self.chunk_size as u64
    }

    /// Allocate a read buffer of one chunk
    #[must_use]
    pub fn buffer(&self) -> Vec<u8> {
        vec![0u8; self.chunk_size]
    }

    /// Read chunk `index` of a `payload_size`-byte stream into `buf`
    ///
    /// `buf` must hold at least one chunk. Returns the filled prefix, which
    /// is shorter than [`chunk_len`](Self::chunk_len) only if the reader ran
    /// dry.
    ///
    /// # Errors
    ///
    /// Propagates read errors.
    pub async fn read_chunk<'b, R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        payload_size: u64,
        index: u64,
        buf: &'b mut [u8],
    ) -> io::Result<&'b [u8]> {
        let want = self.chunk_len(payload_size, index);
        let n = read_full_async(reader, &mut buf[..want]).await?;
        Ok(&buf[..n])
    }

    /// Feed the first `count` chunks of `reader` into `checksum`
    ///
    /// Used to account for a prefix that is already in place on the
    /// receiving side without sending it again.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if the reader holds fewer bytes than those
    /// chunks cover, or any read error.
    pub async fn hash_chunks<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        payload_size: u64,
        count: u64,
        checksum: &mut StreamingChecksum,
    ) -> io::Result<()> {
        let mut buf = self.buffer();
        for index in 0..count {
            let want = self.chunk_len(payload_size, index);
            let chunk = self.read_chunk(reader, payload_size, index, &mut buf).await?;
            if chunk.len() < want {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended inside chunk {index}"),
                ));
            }
            checksum.update(chunk);
        }
        Ok(())
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a chunk size against the negotiable range
#[must_use]
pub fn is_valid_chunk_size(size: usize) -> bool {
    size > 0 && size <= MAX_CHUNK_SIZE
}

/// Read until `buf` is full or the reader is exhausted
///
/// Plain `read` may return short counts on pipes and sockets; chunks on the
/// wire are always full except for the last one.
///
/// # Errors
///
/// Propagates any read error other than `Interrupted`.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Async counterpart of [`read_full`]
///
/// # Errors
///
/// Propagates any read error other than `Interrupted`.
pub async fn read_full_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum_bytes;

    #[test]
    fn test_chunk_count() {
        let chunker = FileChunker::with_chunk_size(1024).unwrap();
        assert_eq!(chunker.chunk_count(0), 0);
        assert_eq!(chunker.chunk_count(1), 1);
        assert_eq!(chunker.chunk_count(1024), 1);
        assert_eq!(chunker.chunk_count(1025), 2);
        assert_eq!(chunker.chunk_count(10 * 1024), 10);
    }

    #[test]
    fn test_chunk_len_last_chunk() {
        let chunker = FileChunker::with_chunk_size(1000).unwrap();
        assert_eq!(chunker.chunk_len(2500, 0), 1000);
        assert_eq!(chunker.chunk_len(2500, 2), 500);
        assert_eq!(chunker.chunk_len(2500, 3), 0);
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(FileChunker::with_chunk_size(0).is_none());
        assert!(FileChunker::with_chunk_size(MAX_CHUNK_SIZE + 1).is_none());
        assert!(FileChunker::with_chunk_size(MAX_CHUNK_SIZE).is_some());
        assert_eq!(FileChunker::default().chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_read_full_short_reads() {
        struct Trickle<'a>(&'a [u8]);

        impl Read for Trickle<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0[0];
                self.0 = &self.0[1..];
                Ok(1)
            }
        }

        let mut reader = Trickle(b"abcdefgh");
        let mut buf = [0u8; 5];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"abcde");
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"fgh");
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_offsets_and_whole_chunks() {
        let chunker = FileChunker::with_chunk_size(4096).unwrap();
        assert_eq!(chunker.offset_of(0), 0);
        assert_eq!(chunker.offset_of(3), 12_288);
        assert_eq!(chunker.offset_of(u64::MAX), u64::MAX);
        assert_eq!(chunker.whole_chunks(0), 0);
        assert_eq!(chunker.whole_chunks(4095), 0);
        assert_eq!(chunker.whole_chunks(10_000), 2);
    }

    #[tokio::test]
    async fn test_read_chunk_sequence() {
        let data: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
        let chunker = FileChunker::with_chunk_size(1000).unwrap();
        let mut reader = &data[..];
        let mut buf = chunker.buffer();

        let mut joined = Vec::new();
        for index in 0..chunker.chunk_count(data.len() as u64) {
            let chunk = chunker.read_chunk(&mut reader, data.len() as u64, index, &mut buf).await.unwrap();
            assert_eq!(chunk.len(), chunker.chunk_len(data.len() as u64, index));
            joined.extend_from_slice(chunk);
        }
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn test_hash_chunks_then_rest_matches_whole() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7) as u8).collect();
        let total = data.len() as u64;
        let chunker = FileChunker::with_chunk_size(1024).unwrap();

        let mut reader = &data[..];
        let mut checksum = StreamingChecksum::new();
        chunker.hash_chunks(&mut reader, total, 4, &mut checksum).await.unwrap();
        assert_eq!(checksum.bytes_hashed(), 4096);

        // The reader is left at the first chunk that was not hashed
        checksum.update(reader);
        assert_eq!(checksum.finalize(), checksum_bytes(&data));
    }

    #[tokio::test]
    async fn test_hash_chunks_short_reader() {
        let data = vec![1u8; 1500];
        let chunker = FileChunker::with_chunk_size(1000).unwrap();
        let mut checksum = StreamingChecksum::new();

        let err = chunker
            .hash_chunks(&mut &data[..], 3000, 2, &mut checksum)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
