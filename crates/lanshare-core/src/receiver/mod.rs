//! Inbound transfer state machine
//!
//! ```text
//!            start                handshake              accept
//!   Idle ──────────► Listening ─────────────► AwaitingAccept ──────► Receiving
//!    ▲                 ▲   ▲  junk / early close    │                  │   │
//!    │                 │   └────────────────────────┘ reject /         │   │ verified
//!    │                 └──────────────────────────────sender gone      │   ▼
//!    │ stop (non-terminal)                                      error  │ Completed
//!    │ reset (terminal)                                                ▼
//!    └──────────────────────────────────────────────────────────────  Error
//! ```
//!
//! All network I/O happens on one worker task spawned by
//! [`TransferReceiver::start`]. The caller's side (`accept`, `reject`,
//! queries) only touches shared state and never blocks on the network.

mod state;
mod worker;

pub use state::{PendingTransfer, ReceiverState};

use crate::config::TransferConfig;
use crate::error::{EngineError, Result};
use lanshare_files::{PayloadKind, PayloadSink};
use lanshare_transport::tcp;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// What the user decided about the pending offer
pub(crate) enum Answer {
    Accept(PayloadSink),
    Reject,
}

/// State shared between the receiver handle and its worker
pub(crate) struct Shared {
    pub(crate) config: TransferConfig,
    state: AtomicU8,
    port: AtomicU16,
    pub(crate) bytes_received: AtomicU64,
    pub(crate) total: AtomicU64,
    pending: Mutex<Option<PendingTransfer>>,
    decision: Mutex<Option<oneshot::Sender<Answer>>>,
    checksum: Mutex<Option<String>>,
    saved_path: Mutex<Option<PathBuf>>,
    last_error: Mutex<Option<EngineError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(config: TransferConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(ReceiverState::Idle as u8),
            port: AtomicU16::new(0),
            bytes_received: AtomicU64::new(0),
            total: AtomicU64::new(0),
            pending: Mutex::new(None),
            decision: Mutex::new(None),
            checksum: Mutex::new(None),
            saved_path: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ReceiverState {
        ReceiverState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ReceiverState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: ReceiverState, to: ReceiverState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Publish a new offer and open the decision slot
    pub(crate) fn offer(&self, pending: PendingTransfer, decide: oneshot::Sender<Answer>) {
        self.bytes_received.store(0, Ordering::Release);
        self.total.store(pending.file_size, Ordering::Release);
        *lock(&self.checksum) = None;
        *lock(&self.pending) = Some(pending);
        *lock(&self.decision) = Some(decide);
        self.set_state(ReceiverState::AwaitingAccept);
    }

    /// Withdraw the offer if no decision has been taken yet
    ///
    /// Returns false if `accept` or `reject` already claimed the slot, in
    /// which case their answer is on its way.
    pub(crate) fn withdraw(&self) -> bool {
        if lock(&self.decision).take().is_none() {
            return false;
        }
        *lock(&self.pending) = None;
        self.transition(ReceiverState::AwaitingAccept, ReceiverState::Listening);
        true
    }

    pub(crate) fn clear_pending(&self) {
        *lock(&self.pending) = None;
    }

    pub(crate) fn set_checksum(&self, hex: String) {
        *lock(&self.checksum) = Some(hex);
    }

    pub(crate) fn complete(&self, path: PathBuf) {
        *lock(&self.saved_path) = Some(path);
        self.set_state(ReceiverState::Completed);
    }

    pub(crate) fn fail(&self, err: EngineError) {
        *lock(&self.last_error) = Some(err);
        self.set_state(ReceiverState::Error);
    }
}

/// One inbound transfer slot
///
/// Dropping the receiver signals the worker to stop but does not wait for
/// it; call [`stop`](Self::stop) first to join it.
pub struct TransferReceiver {
    shared: Arc<Shared>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransferReceiver {
    /// Create an idle receiver with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TransferConfig::default())
    }

    /// Create an idle receiver
    #[must_use]
    pub fn with_config(config: TransferConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Bind the listener and spawn the worker
    ///
    /// Tries the configured fixed port, or each preferred port in turn and
    /// then an ephemeral one. Returns the bound port. Must be called within
    /// a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidState` unless `Idle`, and
    /// `EngineError::Transport` if no port could be bound; the receiver
    /// stays `Idle` in both cases.
    pub async fn start(&self) -> Result<u16> {
        if !self
            .shared
            .transition(ReceiverState::Idle, ReceiverState::Listening)
        {
            return Err(EngineError::invalid_state("receiver already started"));
        }

        let ip = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        let bound = match self.shared.config.listen_port {
            Some(port) => tcp::listen(SocketAddr::new(ip, port)),
            None => tcp::listen_on_first_free(ip, self.shared.config.preferred_ports.clone()),
        };
        let listener = match bound {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.set_state(ReceiverState::Idle);
                return Err(e.into());
            }
        };
        let port = listener.local_addr()?.port();
        self.shared.port.store(port, Ordering::Release);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker::run(listener, Arc::clone(&self.shared), shutdown_rx));
        *lock(&self.shutdown) = Some(shutdown);
        *lock(&self.worker) = Some(handle);

        tracing::info!(port, "receiver listening");
        Ok(port)
    }

    /// Stop the worker and wait for it to exit
    ///
    /// Closes the listener and any open connection. A partially written
    /// file is left on disk. Non-terminal states return to `Idle`; terminal
    /// states are kept so the outcome can still be read.
    pub async fn stop(&self) {
        if let Some(shutdown) = lock(&self.shutdown).take() {
            let _ = shutdown.send(true);
        }
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "receiver worker panicked");
            }
        }

        lock(&self.shared.decision).take();
        self.shared.clear_pending();
        let state = self.shared.state();
        if !state.is_terminal() && state != ReceiverState::Idle {
            self.shared.set_state(ReceiverState::Idle);
            tracing::info!(from = %state, "receiver stopped");
        }
    }

    /// Accept the pending offer and write it to `save_path`
    ///
    /// For a file, `save_path` may be an existing directory (the offered
    /// name is appended) or the destination file itself, whose parent must
    /// exist. For a folder it is the directory to unpack into.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidState` unless `AwaitingAccept`, and
    /// `EngineError::Io` if the destination cannot be created. The state is
    /// unchanged on error, and the destination is only opened once the
    /// decision slot has been claimed.
    pub fn accept<P: AsRef<Path>>(&self, save_path: P) -> Result<()> {
        let pending = match (self.shared.state(), self.pending()) {
            (ReceiverState::AwaitingAccept, Some(pending)) => pending,
            _ => return Err(EngineError::invalid_state("no transfer awaiting a decision")),
        };
        let kind = if pending.is_folder {
            PayloadKind::Folder
        } else {
            PayloadKind::File
        };

        // Held until the sink exists so the worker cannot withdraw the offer
        // between the claim and a failed create
        let mut slot = lock(&self.shared.decision);
        let Some(decide) = slot.take() else {
            return Err(EngineError::invalid_state("sender is no longer waiting"));
        };
        let sink = match PayloadSink::create(save_path, &pending.file_name, kind) {
            Ok(sink) => sink,
            Err(e) => {
                *slot = Some(decide);
                return Err(e.into());
            }
        };
        drop(slot);

        if !self
            .shared
            .transition(ReceiverState::AwaitingAccept, ReceiverState::Receiving)
        {
            sink.discard();
            return Err(EngineError::invalid_state("receiver stopped"));
        }
        self.shared.clear_pending();

        tracing::info!(
            file = %pending.file_name,
            peer = %pending.sender_addr,
            target = %sink.target().display(),
            "transfer accepted"
        );
        if let Err(Answer::Accept(sink)) = decide.send(Answer::Accept(sink)) {
            sink.discard();
            return Err(EngineError::invalid_state("receiver stopped"));
        }
        Ok(())
    }

    /// Decline the pending offer and go back to listening
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidState` unless `AwaitingAccept`; the
    /// state is unchanged.
    pub fn reject(&self) -> Result<()> {
        if self.shared.state() != ReceiverState::AwaitingAccept {
            return Err(EngineError::invalid_state("no transfer awaiting a decision"));
        }
        let Some(decide) = lock(&self.shared.decision).take() else {
            return Err(EngineError::invalid_state("no transfer awaiting a decision"));
        };

        let pending = lock(&self.shared.pending).take();
        self.shared
            .transition(ReceiverState::AwaitingAccept, ReceiverState::Listening);
        if let Some(pending) = pending {
            tracing::info!(file = %pending.file_name, peer = %pending.sender_addr, "transfer rejected");
        }
        // The worker may already be gone if stop raced us; nothing to tell it
        let _ = decide.send(Answer::Reject);
        Ok(())
    }

    /// Return a finished receiver to `Idle` so it can be started again
    ///
    /// Waits for the worker to exit, so the listening port is free again
    /// when this returns.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidState` unless `Completed` or `Error`.
    pub async fn reset(&self) -> Result<()> {
        if !self.shared.state().is_terminal() {
            return Err(EngineError::invalid_state(
                "only a finished receiver can be reset",
            ));
        }
        if let Some(shutdown) = lock(&self.shutdown).take() {
            let _ = shutdown.send(true);
        }
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "receiver worker panicked");
            }
        }

        self.shared.bytes_received.store(0, Ordering::Release);
        self.shared.total.store(0, Ordering::Release);
        self.shared.port.store(0, Ordering::Release);
        *lock(&self.shared.checksum) = None;
        *lock(&self.shared.saved_path) = None;
        *lock(&self.shared.last_error) = None;
        self.shared.set_state(ReceiverState::Idle);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Lifecycle state
    #[must_use]
    pub fn state(&self) -> ReceiverState {
        self.shared.state()
    }

    /// Bound port, 0 before the first `start`
    #[must_use]
    pub fn port(&self) -> u16 {
        self.shared.port.load(Ordering::Acquire)
    }

    /// The offer waiting for a decision, if any
    #[must_use]
    pub fn pending(&self) -> Option<PendingTransfer> {
        lock(&self.shared.pending).clone()
    }

    /// Payload bytes written so far
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.shared.bytes_received.load(Ordering::Acquire)
    }

    /// Size announced by the current sender
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.shared.total.load(Ordering::Acquire)
    }

    /// Fraction received, in `[0, 1]`
    #[must_use]
    pub fn progress(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return if self.state() == ReceiverState::Completed {
                1.0
            } else {
                0.0
            };
        }
        (self.bytes_received() as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// Hex digest of what was received, once the end frame arrives
    #[must_use]
    pub fn checksum(&self) -> Option<String> {
        lock(&self.shared.checksum).clone()
    }

    /// Where the item was written, once `Completed`
    #[must_use]
    pub fn saved_path(&self) -> Option<PathBuf> {
        lock(&self.shared.saved_path).clone()
    }

    /// Why the receiver entered `Error`
    #[must_use]
    pub fn last_error(&self) -> Option<EngineError> {
        lock(&self.shared.last_error).clone()
    }
}

impl Default for TransferReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransferReceiver {
    fn drop(&mut self) {
        if let Some(shutdown) = lock(&self.shutdown).take() {
            let _ = shutdown.send(true);
        }
    }
}

impl std::fmt::Debug for TransferReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferReceiver")
            .field("state", &self.state())
            .field("port", &self.port())
            .field("bytes_received", &self.bytes_received())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, Decision, Handshake};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    fn test_config() -> TransferConfig {
        TransferConfig {
            listen_port: Some(0),
            ..TransferConfig::default()
        }
    }

    async fn wait_for_state(receiver: &TransferReceiver, want: ReceiverState) {
        for _ in 0..200 {
            if receiver.state() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("receiver stuck in {} waiting for {}", receiver.state(), want);
    }

    async fn offer(port: u16, name: &str, size: u64) -> TcpStream {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        Handshake {
            sender_name: "tester".into(),
            file_name: name.into(),
            file_size: size,
            chunk_size: 1024,
            is_folder: false,
        }
        .write_to(&mut stream)
        .await
        .unwrap();
        stream
    }

    #[tokio::test]
    async fn test_decisions_outside_awaiting_accept() {
        let receiver = TransferReceiver::with_config(test_config());
        assert!(matches!(receiver.reject(), Err(EngineError::InvalidState(_))));
        assert!(matches!(receiver.accept("."), Err(EngineError::InvalidState(_))));
        assert_eq!(receiver.state(), ReceiverState::Idle);

        receiver.start().await.unwrap();
        assert!(matches!(receiver.reject(), Err(EngineError::InvalidState(_))));
        assert_eq!(receiver.state(), ReceiverState::Listening);
        assert!(matches!(receiver.start().await, Err(EngineError::InvalidState(_))));
        assert!(matches!(receiver.reset().await, Err(EngineError::InvalidState(_))));

        receiver.stop().await;
        assert_eq!(receiver.state(), ReceiverState::Idle);
    }

    #[tokio::test]
    async fn test_preferred_port_fallback() {
        let taken = tcp::listen("0.0.0.0:0".parse().unwrap()).unwrap();
        let taken_port = taken.local_addr().unwrap().port();

        let receiver = TransferReceiver::with_config(TransferConfig {
            preferred_ports: taken_port..=taken_port,
            ..TransferConfig::default()
        });
        let port = receiver.start().await.unwrap();
        assert_ne!(port, taken_port);
        assert_eq!(receiver.port(), port);
        receiver.stop().await;
    }

    #[tokio::test]
    async fn test_junk_connection_keeps_listening() {
        let receiver = TransferReceiver::with_config(test_config());
        let port = receiver.start().await.unwrap();

        // Connect and close without a handshake, like a ping
        drop(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
        // Garbage length prefix
        let mut junk = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut junk, &[0xff; 8]).await.unwrap();
        drop(junk);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(receiver.state(), ReceiverState::Listening);

        let _stream = offer(port, "after-junk.txt", 3).await;
        wait_for_state(&receiver, ReceiverState::AwaitingAccept).await;
        receiver.stop().await;
    }

    #[tokio::test]
    async fn test_reject_returns_to_listening() {
        let receiver = TransferReceiver::with_config(test_config());
        let port = receiver.start().await.unwrap();

        let mut stream = offer(port, "a.txt", 10).await;
        wait_for_state(&receiver, ReceiverState::AwaitingAccept).await;

        let pending = receiver.pending().unwrap();
        assert_eq!(pending.file_name, "a.txt");
        assert_eq!(pending.file_size, 10);
        assert_eq!(pending.sender_name, "tester");
        assert!(!pending.is_folder);

        receiver.reject().unwrap();
        assert_eq!(receiver.state(), ReceiverState::Listening);
        assert!(receiver.pending().is_none());
        assert_eq!(stream.read_u8().await.unwrap(), Decision::Reject.to_byte());

        // Same receiver takes the next offer
        let _second = offer(port, "b.txt", 20).await;
        wait_for_state(&receiver, ReceiverState::AwaitingAccept).await;
        assert_eq!(receiver.pending().unwrap().file_name, "b.txt");
        receiver.stop().await;
        assert_eq!(receiver.state(), ReceiverState::Idle);
    }

    #[tokio::test]
    async fn test_sender_disconnect_while_awaiting() {
        let receiver = TransferReceiver::with_config(test_config());
        let port = receiver.start().await.unwrap();

        let stream = offer(port, "gone.txt", 10).await;
        wait_for_state(&receiver, ReceiverState::AwaitingAccept).await;
        drop(stream);

        wait_for_state(&receiver, ReceiverState::Listening).await;
        assert!(receiver.pending().is_none());
        assert!(matches!(receiver.accept("."), Err(EngineError::InvalidState(_))));
        receiver.stop().await;
    }

    #[tokio::test]
    async fn test_accept_bad_destination_keeps_state() {
        let receiver = TransferReceiver::with_config(test_config());
        let port = receiver.start().await.unwrap();
        let _stream = offer(port, "x.bin", 4).await;
        wait_for_state(&receiver, ReceiverState::AwaitingAccept).await;

        let err = receiver
            .accept("/definitely/not/a/dir/x.bin")
            .unwrap_err();
        assert!(matches!(err, EngineError::Io(_)), "{err}");
        assert_eq!(receiver.state(), ReceiverState::AwaitingAccept);
        assert!(receiver.pending().is_some());
        receiver.stop().await;
    }

    #[tokio::test]
    async fn test_mismatch_goes_to_error() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = TransferReceiver::with_config(test_config());
        let port = receiver.start().await.unwrap();

        let mut stream = offer(port, "bad.bin", 4).await;
        wait_for_state(&receiver, ReceiverState::AwaitingAccept).await;
        receiver.accept(dir.path()).unwrap();
        assert_eq!(stream.read_u8().await.unwrap(), Decision::Accept.to_byte());
        assert_eq!(protocol::read_resume(&mut stream, 1).await.unwrap(), 0);

        protocol::write_data(&mut stream, b"abcd").await.unwrap();
        let wrong = lanshare_files::checksum::checksum_bytes(b"abce");
        protocol::write_end(&mut stream, &wrong).await.unwrap();
        assert_eq!(stream.read_u8().await.unwrap(), 0);

        wait_for_state(&receiver, ReceiverState::Error).await;
        assert_eq!(receiver.last_error(), Some(EngineError::HashMismatch));
        assert_eq!(receiver.bytes_received(), 4);

        // Terminal state survives stop; reset returns to Idle
        receiver.stop().await;
        assert_eq!(receiver.state(), ReceiverState::Error);
        receiver.reset().await.unwrap();
        assert_eq!(receiver.state(), ReceiverState::Idle);
        assert_eq!(receiver.progress(), 0.0);
    }

    #[tokio::test]
    async fn test_reset_releases_fixed_port() {
        let port = {
            let free = tcp::listen("0.0.0.0:0".parse().unwrap()).unwrap();
            free.local_addr().unwrap().port()
        };
        let receiver = TransferReceiver::with_config(TransferConfig {
            listen_port: Some(port),
            ..TransferConfig::default()
        });
        assert_eq!(receiver.start().await.unwrap(), port);

        // Sender gives up mid-stream, which ends the transfer in Error
        let mut stream = offer(port, "cut.bin", 4).await;
        wait_for_state(&receiver, ReceiverState::AwaitingAccept).await;
        let dir = tempfile::tempdir().unwrap();
        receiver.accept(dir.path()).unwrap();
        assert_eq!(stream.read_u8().await.unwrap(), Decision::Accept.to_byte());
        protocol::read_resume(&mut stream, 1).await.unwrap();
        protocol::write_cancel(&mut stream).await.unwrap();
        wait_for_state(&receiver, ReceiverState::Error).await;
        assert_eq!(receiver.last_error(), Some(EngineError::Cancelled));

        // No stop in between: reset alone must release the listener
        receiver.reset().await.unwrap();
        assert_eq!(receiver.start().await.unwrap(), port);
        assert_eq!(receiver.state(), ReceiverState::Listening);
        receiver.stop().await;
    }

    #[tokio::test]
    async fn test_failed_accept_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = TransferReceiver::with_config(test_config());
        let port = receiver.start().await.unwrap();
        let mut stream = offer(port, "retry.bin", 4).await;
        wait_for_state(&receiver, ReceiverState::AwaitingAccept).await;

        assert!(receiver.accept("/definitely/not/a/dir/retry.bin").is_err());
        receiver.accept(dir.path()).unwrap();
        assert_eq!(receiver.state(), ReceiverState::Receiving);
        assert_eq!(stream.read_u8().await.unwrap(), Decision::Accept.to_byte());
        receiver.stop().await;
    }

    #[tokio::test]
    async fn test_accept_after_slot_claimed_leaves_disk_alone() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("existing.bin");
        std::fs::write(&existing, b"keep me").unwrap();
        let fresh = dir.path().join("fresh.bin");

        let receiver = TransferReceiver::with_config(test_config());
        let port = receiver.start().await.unwrap();
        let _stream = offer(port, "existing.bin", 4).await;
        wait_for_state(&receiver, ReceiverState::AwaitingAccept).await;

        // The worker withdrew the offer while the state still reads AwaitingAccept
        lock(&receiver.shared.decision).take();

        assert!(matches!(receiver.accept(&existing), Err(EngineError::InvalidState(_))));
        assert!(matches!(receiver.accept(&fresh), Err(EngineError::InvalidState(_))));
        assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");
        assert!(!fresh.exists());
        receiver.stop().await;
    }
}
