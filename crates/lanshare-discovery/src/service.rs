//! Broadcast discovery service
//!
//! Two tasks run until [`DiscoveryService::stop`]: one broadcasts a Hello
//! every interval, the other listens on the discovery port and feeds the
//! shared [`PeerRegistry`]. Either task failing to send or receive a single
//! datagram is logged and skipped; only bind failures surface to the caller.

use crate::announce::{Announcement, AnnouncementKind};
use crate::peer::Peer;
use crate::registry::PeerRegistry;
use lanshare_transport::udp::{bind_announcer, bind_discovery_listener};
use lanshare_transport::{MAX_DATAGRAM_SIZE, TransportError};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default time between Hello broadcasts
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

/// Pause after a failed receive before polling the socket again
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Discovery service errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A discovery socket could not be bound
    #[error("discovery bind failed: {0}")]
    Bind(#[source] TransportError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}

impl DiscoveryError {
    /// Returns true if the discovery port is held by another socket
    ///
    /// Callers may retry with a different port.
    #[must_use]
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, Self::Bind(e) if e.is_addr_in_use())
    }
}

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Local device ID, also used to ignore our own announcements
    pub device_id: String,
    /// Local device name
    pub device_name: String,
    /// UDP discovery port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Local interface to send announcements from
    pub bind_ip: Option<Ipv4Addr>,
    /// Announcement destination, `255.255.255.255:port` if unset
    pub broadcast_addr: Option<SocketAddr>,
    /// Transfer port carried in announcements; 0 advertises the discovery port
    pub advertised_port: u16,
    /// Time between Hello broadcasts
    pub announce_interval: Duration,
    /// Evict announced peers not heard from for this long
    pub peer_ttl: Option<Duration>,
}

impl DiscoveryConfig {
    /// Create a configuration with default interval and no eviction
    pub fn new(device_id: impl Into<String>, device_name: impl Into<String>, port: u16) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            port,
            bind_ip: None,
            broadcast_addr: None,
            advertised_port: 0,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            peer_ttl: None,
        }
    }

    /// Send announcements from a specific local interface
    #[must_use]
    pub fn with_bind_ip(mut self, ip: Ipv4Addr) -> Self {
        self.bind_ip = Some(ip);
        self
    }

    /// Send announcements to `addr` instead of the limited broadcast address
    #[must_use]
    pub fn with_broadcast_addr(mut self, addr: SocketAddr) -> Self {
        self.broadcast_addr = Some(addr);
        self
    }

    /// Change the Hello interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }

    /// Evict announced peers after `ttl` of silence
    #[must_use]
    pub fn with_peer_ttl(mut self, ttl: Duration) -> Self {
        self.peer_ttl = Some(ttl);
        self
    }

    /// Advertise `port` as the transfer port
    #[must_use]
    pub fn with_advertised_port(mut self, port: u16) -> Self {
        self.advertised_port = port;
        self
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::InvalidConfig` for an empty device ID, a zero
    /// interval or a zero TTL.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.device_id.trim().is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "device id must not be empty".into(),
            ));
        }
        if self.announce_interval.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "announce interval must be non-zero".into(),
            ));
        }
        if self.peer_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(DiscoveryError::InvalidConfig(
                "peer ttl must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Discovery service state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Not started, or fully stopped
    Stopped,
    /// Binding sockets
    Starting,
    /// Announcing and listening
    Running,
    /// Shutting down
    Stopping,
}

/// Running discovery service
///
/// Dropping the service signals both tasks to exit without waiting for
/// them or sending a Goodbye; call [`stop`](Self::stop) for an orderly exit.
pub struct DiscoveryService {
    config: DiscoveryConfig,
    registry: Arc<PeerRegistry>,
    advertised_port: Arc<AtomicU16>,
    state: Arc<RwLock<DiscoveryState>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    announcer: Arc<UdpSocket>,
    target: SocketAddr,
    local_addr: SocketAddr,
}

impl DiscoveryService {
    /// Bind both sockets and spawn the announce and listen tasks
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::InvalidConfig` for a bad config and
    /// `DiscoveryError::Bind` if either socket cannot be bound.
    pub async fn start(
        config: DiscoveryConfig,
        registry: Arc<PeerRegistry>,
    ) -> Result<Self, DiscoveryError> {
        config.validate()?;
        let state = Arc::new(RwLock::new(DiscoveryState::Starting));

        let listener = bind_discovery_listener(config.port).map_err(DiscoveryError::Bind)?;
        let local_addr = listener.local_addr()?;
        let announcer = Arc::new(bind_announcer(config.bind_ip).map_err(DiscoveryError::Bind)?);

        let target = config.broadcast_addr.unwrap_or(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::BROADCAST,
            local_addr.port(),
        )));
        let advertised = if config.advertised_port == 0 {
            local_addr.port()
        } else {
            config.advertised_port
        };
        let advertised_port = Arc::new(AtomicU16::new(advertised));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let announce_task = tokio::spawn(announce_loop(
            Arc::clone(&announcer),
            target,
            config.device_id.clone(),
            config.device_name.clone(),
            Arc::clone(&advertised_port),
            config.announce_interval,
            shutdown_rx.clone(),
        ));
        let listen_task = tokio::spawn(listen_loop(
            listener,
            config.device_id.clone(),
            Arc::clone(&registry),
            config.announce_interval,
            config.peer_ttl,
            shutdown_rx,
        ));

        *state.write().await = DiscoveryState::Running;
        tracing::info!(
            listen = %local_addr,
            target = %target,
            bind_ip = ?config.bind_ip,
            advertised_port = advertised,
            "discovery started"
        );

        Ok(Self {
            config,
            registry,
            advertised_port,
            state,
            shutdown,
            tasks: Mutex::new(vec![announce_task, listen_task]),
            announcer,
            target,
            local_addr,
        })
    }

    /// Send a Goodbye, stop both tasks and wait for them to exit
    ///
    /// Idempotent. The registry is left as it is.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for socket teardown
    /// errors.
    pub async fn stop(&self) -> Result<(), DiscoveryError> {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        if tasks.is_empty() {
            return Ok(());
        }
        *self.state.write().await = DiscoveryState::Stopping;

        let goodbye = Announcement::goodbye(
            self.config.device_id.as_str(),
            self.config.device_name.as_str(),
            self.advertised_port(),
        );
        if let Err(e) = self.announcer.send_to(&goodbye.encode(), self.target).await {
            tracing::debug!(error = %e, "goodbye not sent");
        }

        let _ = self.shutdown.send(true);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "discovery task panicked");
            }
        }

        *self.state.write().await = DiscoveryState::Stopped;
        tracing::info!(listen = %self.local_addr, "discovery stopped");
        Ok(())
    }

    /// Current state
    pub async fn state(&self) -> DiscoveryState {
        *self.state.read().await
    }

    /// Address of the listen socket
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry this service feeds
    #[must_use]
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Change the transfer port carried by the next announcements
    pub fn set_advertised_port(&self, port: u16) {
        self.advertised_port.store(port, Ordering::Relaxed);
    }

    /// Transfer port currently being announced
    #[must_use]
    pub fn advertised_port(&self) -> u16 {
        self.advertised_port.load(Ordering::Relaxed)
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Background tasks
// ═══════════════════════════════════════════════════════════════════════════

async fn announce_loop(
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    device_id: String,
    device_name: String,
    advertised_port: Arc<AtomicU16>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let hello = Announcement::hello(
                    device_id.as_str(),
                    device_name.as_str(),
                    advertised_port.load(Ordering::Relaxed),
                );
                if let Err(e) = socket.send_to(&hello.encode(), target).await {
                    tracing::warn!(target = %target, error = %e, "announcement send failed");
                }
            }
        }
    }
}

async fn listen_loop(
    socket: UdpSocket,
    own_id: String,
    registry: Arc<PeerRegistry>,
    interval: Duration,
    peer_ttl: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut prune = tokio::time::interval(interval);
    prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = prune.tick(), if peer_ttl.is_some() => {
                if let Some(ttl) = peer_ttl {
                    let removed = registry.prune_stale(ttl);
                    if removed > 0 {
                        tracing::debug!(removed, "evicted stale peers");
                    }
                }
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => handle_datagram(&buf[..len], from, &own_id, &registry),
                Err(e) => {
                    // Windows reports ICMP port-unreachable here; keep listening
                    tracing::debug!(error = %e, "discovery receive failed");
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

fn handle_datagram(bytes: &[u8], from: SocketAddr, own_id: &str, registry: &PeerRegistry) {
    let announcement = match Announcement::decode(bytes) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(from = %from, error = %e, "dropped malformed announcement");
            return;
        }
    };
    if announcement.device_id == own_id {
        return;
    }

    match announcement.kind {
        AnnouncementKind::Hello => {
            let peer = Peer::new(
                announcement.device_id,
                announcement.device_name,
                from.ip(),
                announcement.port,
            );
            let description = peer.to_string();
            if registry.upsert(peer) {
                tracing::info!(peer = %description, "peer discovered");
            }
        }
        AnnouncementKind::Goodbye => {
            if let Some(peer) = registry.remove(&announcement.device_id) {
                tracing::info!(peer = %peer, "peer left");
            }
        }
    }
}
