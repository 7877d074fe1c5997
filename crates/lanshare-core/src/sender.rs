//! Outbound transfer pipeline
//!
//! A [`TransferSender`] is created for one path and serves exactly one
//! transfer. Handles are cheap clones of one shared state, so one task can
//! drive [`start`](TransferSender::start) while another polls progress or
//! calls [`cancel`](TransferSender::cancel).

use crate::config::TransferConfig;
use crate::error::{EngineError, Result};
use crate::protocol::{self, Decision, Handshake, Verdict, timed};
use lanshare_files::chunker::is_valid_chunk_size;
use lanshare_files::{FileChunker, PayloadSource, StreamingChecksum};
use lanshare_transport::tcp;
use std::borrow::Cow;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;

/// Sender lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SenderState {
    /// Created, `start` not yet called
    Ready = 0,
    /// Opening the TCP connection
    Connecting = 1,
    /// Handshake sent, waiting for the receiver
    AwaitingDecision = 2,
    /// Sending data frames
    Streaming = 3,
    /// End frame sent, waiting for the verdict
    Verifying = 4,
    /// Receiver verified the payload
    Completed = 5,
    /// Receiver declined
    Rejected = 6,
    /// Cancelled locally
    Cancelled = 7,
    /// Ended with an error
    Failed = 8,
}

impl SenderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Ready,
            1 => Self::Connecting,
            2 => Self::AwaitingDecision,
            3 => Self::Streaming,
            4 => Self::Verifying,
            5 => Self::Completed,
            6 => Self::Rejected,
            7 => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    /// No further transitions are possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Cancelled | Self::Failed
        )
    }
}

impl std::fmt::Display for SenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Connecting => "connecting",
            Self::AwaitingDecision => "awaiting decision",
            Self::Streaming => "streaming",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct SenderInner {
    source: PayloadSource,
    config: TransferConfig,
    chunk_size: AtomicUsize,
    state: AtomicU8,
    started: AtomicBool,
    cancelled: AtomicBool,
    cancel_notify: Notify,
    bytes_sent: AtomicU64,
    resumed_from: AtomicU64,
    checksum: Mutex<Option<String>>,
}

/// One outbound transfer of a file or folder
#[derive(Clone)]
pub struct TransferSender {
    inner: Arc<SenderInner>,
}

impl TransferSender {
    /// Prepare `path` for sending with default settings
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` for an empty or missing path and
    /// `EngineError::Io` if the path cannot be read or packed.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_config(path, &TransferConfig::default())
    }

    /// Prepare `path` for sending with explicit transfer settings
    ///
    /// A folder is packed into a temporary archive here; the archive lives
    /// until the last handle is dropped.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new), plus `InvalidConfig` for a bad `config`.
    pub fn with_config<P: AsRef<Path>>(path: P, config: &TransferConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(EngineError::invalid_config("source path is empty"));
        }

        let source = PayloadSource::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => EngineError::InvalidConfig(Cow::Owned(format!(
                "source does not exist: {}",
                path.display()
            ))),
            _ => EngineError::from(e),
        })?;

        tracing::debug!(
            file = %source.name(),
            kind = %source.kind(),
            bytes = source.size(),
            "sender prepared"
        );

        Ok(Self {
            inner: Arc::new(SenderInner {
                source,
                chunk_size: AtomicUsize::new(config.chunk_size),
                config: config.clone(),
                state: AtomicU8::new(SenderState::Ready as u8),
                started: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                cancel_notify: Notify::new(),
                bytes_sent: AtomicU64::new(0),
                resumed_from: AtomicU64::new(0),
                checksum: Mutex::new(None),
            }),
        })
    }

    /// Change the data frame size
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidState` once `start` has been called and
    /// `EngineError::InvalidConfig` for 0 or more than 16 MiB. The chunk
    /// size is unchanged on error.
    pub fn set_chunk_size(&self, bytes: usize) -> Result<()> {
        if self.inner.started.load(Ordering::Acquire) {
            return Err(EngineError::invalid_state(
                "chunk size cannot change after start",
            ));
        }
        if !is_valid_chunk_size(bytes) {
            return Err(EngineError::invalid_config(
                "chunk size must be between 1 byte and 16 MiB",
            ));
        }
        self.inner.chunk_size.store(bytes, Ordering::Release);
        Ok(())
    }

    /// Run the transfer to `addr`
    ///
    /// Returns when the receiver has verified the payload, or with the
    /// error that ended the transfer. The terminal [`SenderState`] mirrors
    /// the outcome.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if called more than once
    /// - `Rejected` if the receiver declined
    /// - `Cancelled` after [`cancel`](Self::cancel)
    /// - `ConnectionFailed` / `Timeout` for network failures
    /// - `HashMismatch` if the receiver could not verify the payload
    /// - `Io` if the source could not be read or changed size
    pub async fn start(&self, addr: SocketAddr, sender_name: &str) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::invalid_state("sender already started"));
        }

        let result = if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            self.run(addr, sender_name).await
        };

        let terminal = match &result {
            Ok(()) => SenderState::Completed,
            Err(EngineError::Rejected) => SenderState::Rejected,
            Err(EngineError::Cancelled) => SenderState::Cancelled,
            Err(_) => SenderState::Failed,
        };
        self.set_state(terminal);

        match &result {
            Ok(()) => tracing::info!(
                peer = %addr,
                file = %self.file_name(),
                bytes = self.bytes_sent(),
                "transfer completed"
            ),
            Err(EngineError::Rejected | EngineError::Cancelled) => {
                tracing::info!(peer = %addr, file = %self.file_name(), outcome = %terminal, "transfer ended")
            }
            Err(e) => {
                tracing::error!(peer = %addr, file = %self.file_name(), error = %e, "transfer failed")
            }
        }
        result
    }

    async fn run(&self, addr: SocketAddr, sender_name: &str) -> Result<()> {
        let config = &self.inner.config;
        let source = &self.inner.source;
        let chunker = FileChunker::with_chunk_size(self.chunk_size())
            .ok_or_else(|| EngineError::invalid_config("chunk size out of range"))?;

        self.set_state(SenderState::Connecting);
        let mut stream = self
            .until_cancelled(async {
                tcp::connect(addr, config.connect_timeout)
                    .await
                    .map_err(EngineError::from)
            })
            .await?;
        tracing::debug!(peer = %addr, "connected");

        let handshake = Handshake {
            sender_name: sender_name.to_string(),
            file_name: source.name().to_string(),
            file_size: source.size(),
            chunk_size: chunker.chunk_size() as u32,
            is_folder: source.is_folder(),
        };
        timed(config.io_timeout, "handshake write", handshake.write_to(&mut stream)).await?;

        self.set_state(SenderState::AwaitingDecision);
        let byte = self
            .until_cancelled(timed(
                config.decision_timeout,
                "waiting for receiver decision",
                read_control(&mut stream),
            ))
            .await?;
        if Decision::from_byte(byte)? == Decision::Reject {
            return Err(EngineError::Rejected);
        }

        let first_chunk = timed(
            config.io_timeout,
            "resume point read",
            protocol::read_resume(&mut stream, chunker.chunk_count(source.size())),
        )
        .await?;

        self.set_state(SenderState::Streaming);
        let digest = self.stream_payload(&mut stream, &chunker, first_chunk).await?;
        *self.lock_checksum() = Some(digest.to_hex());

        self.set_state(SenderState::Verifying);
        timed(config.io_timeout, "end frame write", protocol::write_end(&mut stream, &digest))
            .await?;
        let verdict = timed(config.io_timeout, "waiting for verdict", read_control(&mut stream))
            .await?;

        match Verdict::from_byte(verdict)? {
            Verdict::Verified => Ok(()),
            Verdict::Mismatch => Err(EngineError::HashMismatch),
        }
    }

    async fn stream_payload(
        &self,
        stream: &mut TcpStream,
        chunker: &FileChunker,
        first_chunk: u64,
    ) -> Result<lanshare_files::Digest> {
        let io_timeout = self.inner.config.io_timeout;
        let total = self.inner.source.size();
        let mut file = self.inner.source.open_stream().await?;
        let mut checksum = StreamingChecksum::new();

        if first_chunk > 0 {
            // The receiver holds these already; they only feed the digest
            self.until_cancelled(async {
                chunker
                    .hash_chunks(&mut file, total, first_chunk, &mut checksum)
                    .await
                    .map_err(|e| match e.kind() {
                        io::ErrorKind::UnexpectedEof => EngineError::Io(format!(
                            "source shrank during transfer: fewer than {} of {total} bytes available",
                            chunker.offset_of(first_chunk)
                        )),
                        _ => EngineError::from(e),
                    })
            })
            .await?;

            let offset = chunker.offset_of(first_chunk);
            self.inner.resumed_from.store(offset, Ordering::Release);
            self.inner.bytes_sent.store(offset, Ordering::Release);
            tracing::info!(
                file = %self.file_name(),
                offset,
                chunk = first_chunk,
                "resuming transfer"
            );
        }

        let mut buf = chunker.buffer();
        for index in first_chunk..chunker.chunk_count(total) {
            if self.is_cancelled() {
                // Best effort; the receiver also treats the close as an abort
                let _ = timed(io_timeout, "cancel frame write", protocol::write_cancel(stream)).await;
                return Err(EngineError::Cancelled);
            }

            let want = chunker.chunk_len(total, index);
            let chunk = chunker.read_chunk(&mut file, total, index, &mut buf).await?;
            if chunk.len() < want {
                return Err(EngineError::Io(format!(
                    "source shrank during transfer: {} of {total} bytes available",
                    chunker.offset_of(index) + chunk.len() as u64
                )));
            }

            timed(io_timeout, "data write", protocol::write_data(stream, chunk)).await?;
            checksum.update(chunk);
            self.inner.bytes_sent.fetch_add(chunk.len() as u64, Ordering::Release);
        }

        if file.read(&mut [0u8; 1]).await? != 0 {
            return Err(EngineError::Io(format!(
                "source grew during transfer beyond {total} bytes"
            )));
        }

        Ok(checksum.finalize())
    }

    /// Race `fut` against [`cancel`](Self::cancel)
    async fn until_cancelled<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let notified = self.inner.cancel_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        tokio::select! {
            result = fut => result,
            () = &mut notified => Err(EngineError::Cancelled),
        }
    }

    /// Request cancellation
    ///
    /// Idempotent. Before `start`, the later `start` returns `Cancelled`
    /// without connecting. While waiting for the receiver, the wait ends at
    /// once. While streaming, the chunk in flight completes first. After the
    /// transfer has ended this does nothing.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            tracing::info!(file = %self.file_name(), "transfer cancel requested");
        }
        self.inner.cancel_notify.notify_waiters();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Hex BLAKE3 digest, known once the whole payload has been read
    #[must_use]
    pub fn checksum(&self) -> Option<String> {
        self.lock_checksum().clone()
    }

    /// Length of the payload stream (archive length for folders)
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.inner.source.size()
    }

    /// Name announced to the receiver
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.inner.source.name()
    }

    /// Whether the payload is a folder
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.inner.source.is_folder()
    }

    /// Current data frame size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size.load(Ordering::Acquire)
    }

    /// Payload bytes written to the connection
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Acquire)
    }

    /// Stream offset the transfer resumed from, 0 if it started fresh
    ///
    /// Bytes before this offset were already at the receiver and count as
    /// sent without crossing the connection.
    #[must_use]
    pub fn resumed_from(&self) -> u64 {
        self.inner.resumed_from.load(Ordering::Acquire)
    }

    /// Fraction sent, in `[0, 1]`
    #[must_use]
    pub fn progress(&self) -> f64 {
        let total = self.file_size();
        if total == 0 {
            return if self.state() == SenderState::Completed {
                1.0
            } else {
                0.0
            };
        }
        (self.bytes_sent() as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// Lifecycle state
    #[must_use]
    pub fn state(&self) -> SenderState {
        SenderState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    fn set_state(&self, state: SenderState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    fn lock_checksum(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.inner
            .checksum
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TransferSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSender")
            .field("file", &self.file_name())
            .field("size", &self.file_size())
            .field("state", &self.state())
            .field("bytes_sent", &self.bytes_sent())
            .finish()
    }
}

/// Read one control byte, reporting a closed connection as a failed peer
async fn read_control(stream: &mut TcpStream) -> Result<u8> {
    match stream.read_u8().await {
        Ok(byte) => Ok(byte),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(EngineError::ConnectionFailed(
            Cow::Borrowed("receiver closed the connection"),
        )),
        Err(e) => Err(e.into()),
    }
}
