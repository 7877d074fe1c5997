//! Sender/receiver test fixture
//!
//! Provides a receiver bound to an ephemeral loopback-reachable port plus
//! scratch directories for the source and destination side.
//!
//! # Example
//!
//! ```no_run
//! use lanshare_integration_tests::TransferFixture;
//!
//! # async fn example() {
//! let fixture = TransferFixture::start().await;
//! let path = fixture.write_source("hello.txt", b"hello");
//! let sender = lanshare_core::TransferSender::new(&path).unwrap();
//! let run = tokio::spawn({
//!     let sender = sender.clone();
//!     let addr = fixture.addr();
//!     async move { sender.start(addr, "tester").await }
//! });
//! fixture.accept_next().await;
//! run.await.unwrap().unwrap();
//! # }
//! ```

use lanshare_core::{ReceiverState, TransferConfig, TransferReceiver};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// How long any wait in a test may take before it is a failure
pub const WAIT_LIMIT: Duration = Duration::from_secs(15);

/// A started receiver with scratch source and destination directories
pub struct TransferFixture {
    /// Receiver under test, already `Listening`
    pub receiver: TransferReceiver,
    /// Bound TCP port
    pub port: u16,
    /// Scratch space for payloads to send
    pub source_dir: TempDir,
    /// Where accepted payloads land
    pub dest_dir: TempDir,
}

impl TransferFixture {
    /// Start a receiver on an ephemeral port
    ///
    /// # Panics
    ///
    /// Panics if the receiver cannot start or a temp dir cannot be made.
    pub async fn start() -> Self {
        let receiver = TransferReceiver::with_config(Self::config());
        let port = receiver.start().await.expect("receiver start");
        Self {
            receiver,
            port,
            source_dir: tempfile::tempdir().expect("source dir"),
            dest_dir: tempfile::tempdir().expect("dest dir"),
        }
    }

    /// Transfer settings used by the fixture receiver
    #[must_use]
    pub fn config() -> TransferConfig {
        TransferConfig {
            listen_port: Some(0),
            ..TransferConfig::default()
        }
    }

    /// Loopback address of the receiver
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    /// Write `content` to `name` under the source dir
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_source(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.source_dir.path().join(name);
        fs::write(&path, content).expect("write source");
        path
    }

    /// Wait for an offer and accept it into the destination dir
    ///
    /// # Panics
    ///
    /// Panics if no offer arrives or accept fails.
    pub async fn accept_next(&self) {
        wait_for_state(&self.receiver, ReceiverState::AwaitingAccept).await;
        self.receiver
            .accept(self.dest_dir.path())
            .expect("accept pending transfer");
    }

    /// Wait for an offer and reject it
    ///
    /// # Panics
    ///
    /// Panics if no offer arrives or reject fails.
    pub async fn reject_next(&self) {
        wait_for_state(&self.receiver, ReceiverState::AwaitingAccept).await;
        self.receiver.reject().expect("reject pending transfer");
    }

    /// Path of `name` in the destination dir
    #[must_use]
    pub fn dest(&self, name: &str) -> PathBuf {
        self.dest_dir.path().join(name)
    }
}

/// Poll until `receiver` reaches `want`
///
/// # Panics
///
/// Panics if the state is not reached within [`WAIT_LIMIT`].
pub async fn wait_for_state(receiver: &TransferReceiver, want: ReceiverState) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while receiver.state() != want {
        assert!(
            tokio::time::Instant::now() < deadline,
            "receiver stuck in {} waiting for {}",
            receiver.state(),
            want
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Deterministic non-repeating-looking test content
#[must_use]
pub fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64).wrapping_mul(2_654_435_761) >> 13) as u8)
        .collect()
}

/// Create a small nested tree under `root`
///
/// # Panics
///
/// Panics if the tree cannot be written.
pub fn write_tree(root: &Path) {
    fs::create_dir_all(root.join("raw/2024")).expect("mkdir");
    fs::write(root.join("index.txt"), b"holiday photos").expect("write");
    fs::write(root.join("raw/a.bin"), pattern_bytes(70_000)).expect("write");
    fs::write(root.join("raw/2024/b.bin"), pattern_bytes(1_234)).expect("write");
    fs::write(root.join("raw/2024/empty"), b"").expect("write");
}
