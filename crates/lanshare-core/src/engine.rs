//! Engine handle
//!
//! Ties one device identity to the shared peer registry, an optional running
//! discovery service and the transfer settings used to build senders and
//! receivers.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::identity::DeviceId;
use crate::receiver::TransferReceiver;
use crate::sender::TransferSender;
use lanshare_discovery::{DiscoveryConfig, DiscoveryService, Peer, PeerRegistry};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::sync::Mutex;

struct EngineInner {
    device_id: DeviceId,
    device_name: String,
    config: EngineConfig,
    registry: Arc<PeerRegistry>,
    discovery: Mutex<Option<DiscoveryService>>,
    advertised_port: AtomicU16,
}

/// LanShare engine
///
/// Cheap to clone; all clones share one identity, registry and discovery
/// service.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine with a fresh device ID
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` for an empty device name or an
    /// invalid `config`.
    pub fn new(device_name: &str, config: EngineConfig) -> Result<Self> {
        let device_name = device_name.trim();
        if device_name.is_empty() {
            return Err(EngineError::invalid_config("device name must not be empty"));
        }
        config.validate()?;

        let device_id = DeviceId::generate();
        tracing::info!(device_id = %device_id, device_name, "engine created");

        Ok(Self {
            inner: Arc::new(EngineInner {
                device_id,
                device_name: device_name.to_string(),
                config,
                registry: Arc::new(PeerRegistry::new()),
                discovery: Mutex::new(None),
                advertised_port: AtomicU16::new(0),
            }),
        })
    }

    /// This device's ID
    #[must_use]
    pub fn device_id(&self) -> &str {
        self.inner.device_id.as_str()
    }

    /// This device's name
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.inner.device_name
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Shared peer registry
    #[must_use]
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.inner.registry
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Discovery
    // ═══════════════════════════════════════════════════════════════════════

    /// Start announcing and listening on UDP `port`
    ///
    /// A running service is stopped first. `bind_ip` pins announcements to
    /// one local interface.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Discovery` if the port cannot be bound; the
    /// caller may retry with another port.
    pub async fn start_discovery(&self, port: u16, bind_ip: Option<Ipv4Addr>) -> Result<()> {
        let mut slot = self.inner.discovery.lock().await;
        if let Some(running) = slot.take() {
            running.stop().await?;
        }

        let defaults = &self.inner.config.discovery;
        let mut config = DiscoveryConfig::new(self.device_id(), self.device_name(), port)
            .with_interval(defaults.announce_interval)
            .with_advertised_port(self.advertised_port());
        if let Some(ip) = bind_ip {
            config = config.with_bind_ip(ip);
        }
        if let Some(addr) = defaults.broadcast_addr {
            config = config.with_broadcast_addr(addr);
        }
        if let Some(ttl) = defaults.peer_ttl {
            config = config.with_peer_ttl(ttl);
        }

        let service = DiscoveryService::start(config, Arc::clone(&self.inner.registry)).await?;
        *slot = Some(service);
        Ok(())
    }

    /// Stop discovery if it is running; known peers are kept
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Discovery` if shutdown fails.
    pub async fn stop_discovery(&self) -> Result<()> {
        if let Some(running) = self.inner.discovery.lock().await.take() {
            running.stop().await?;
        }
        Ok(())
    }

    /// Whether a discovery service is running
    pub async fn is_discovering(&self) -> bool {
        self.inner.discovery.lock().await.is_some()
    }

    /// Local address of the running discovery listener
    pub async fn discovery_addr(&self) -> Option<std::net::SocketAddr> {
        self.inner
            .discovery
            .lock()
            .await
            .as_ref()
            .map(DiscoveryService::local_addr)
    }

    /// Snapshot of known peers in discovery order
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        self.inner.registry.snapshot()
    }

    /// Add a peer by hand; works with or without discovery running
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` for an empty field, an
    /// unparseable address or port 0. The registry is unchanged on error.
    pub fn add_manual_peer(
        &self,
        device_id: &str,
        device_name: &str,
        ip_address: &str,
        port: u16,
    ) -> Result<Peer> {
        let peer = self
            .inner
            .registry
            .add_manual(device_id, device_name, ip_address, port)?;
        tracing::info!(peer = %peer, "manual peer added");
        Ok(peer)
    }

    /// Announce `port` as this device's transfer port
    ///
    /// Takes effect on the next announcement if discovery is running.
    pub async fn advertise_port(&self, port: u16) {
        self.inner.advertised_port.store(port, Ordering::Relaxed);
        if let Some(service) = self.inner.discovery.lock().await.as_ref() {
            service.set_advertised_port(port);
        }
    }

    /// Transfer port carried in announcements (0 until set)
    #[must_use]
    pub fn advertised_port(&self) -> u16 {
        self.inner.advertised_port.load(Ordering::Relaxed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transfers
    // ═══════════════════════════════════════════════════════════════════════

    /// Prepare `path` for sending with the engine's transfer settings
    ///
    /// # Errors
    ///
    /// See [`TransferSender::with_config`].
    pub fn sender<P: AsRef<Path>>(&self, path: P) -> Result<TransferSender> {
        TransferSender::with_config(path, &self.inner.config.transfer)
    }

    /// Create an idle receiver with the engine's transfer settings
    #[must_use]
    pub fn receiver(&self) -> TransferReceiver {
        TransferReceiver::with_config(self.inner.config.transfer.clone())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("device_id", &self.device_id())
            .field("device_name", &self.device_name())
            .field("peers", &self.inner.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_name() {
        assert!(matches!(
            Engine::new("  ", EngineConfig::default()),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_identity_is_stable_across_clones() {
        let engine = Engine::new("Desk", EngineConfig::default()).unwrap();
        let clone = engine.clone();
        assert_eq!(engine.device_id(), clone.device_id());
        assert_eq!(engine.device_id().len(), 32);
        assert_ne!(
            engine.device_id(),
            Engine::new("Desk", EngineConfig::default()).unwrap().device_id()
        );
    }

    #[test]
    fn test_manual_peer_without_discovery() {
        let engine = Engine::new("Desk", EngineConfig::default()).unwrap();

        assert!(engine.add_manual_peer("", "Phone", "10.0.0.2", 42424).is_err());
        assert!(engine.peers().is_empty());

        engine.add_manual_peer("p1", "Phone", "10.0.0.2", 42424).unwrap();
        let peers = engine.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].socket_addr().to_string(), "10.0.0.2:42424");
    }

    #[tokio::test]
    async fn test_discovery_restart_and_stop() {
        let mut config = EngineConfig::default();
        config.discovery.broadcast_addr = Some("127.0.0.1:9".parse().unwrap());
        let engine = Engine::new("Desk", config).unwrap();

        assert!(!engine.is_discovering().await);
        engine.start_discovery(0, None).await.unwrap();
        let first = engine.discovery_addr().await.unwrap();

        engine.advertise_port(42424).await;
        assert_eq!(engine.advertised_port(), 42424);

        // Restart binds again; the first listener is released
        engine.start_discovery(first.port(), Some(Ipv4Addr::LOCALHOST)).await.unwrap();
        assert!(engine.is_discovering().await);

        engine.stop_discovery().await.unwrap();
        engine.stop_discovery().await.unwrap();
        assert!(!engine.is_discovering().await);
    }
}
