//! Listener transport: many TCP connections behind one queue pair.
//!
//! Provides [`ListenerTransport`], which accepts peers on one endpoint and
//! wraps each in its own [`ClientTransport`]. Three background loops tie
//! them to the listener's queues:
//!
//! - **accept**: starts and registers a client per accepted connection
//! - **aggregate**: on client activity, drains every client's inbound
//!   packets into the listener's, evicting clients whose link went down
//! - **broadcast**: sends every outbound packet to every registered client

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use super::registry::ClientRegistry;
use crate::client::{ClientConfig, ClientTransport};
use crate::core::{
    ACCEPT_RETRY_DELAY, ConnectionState, DEFAULT_HOST, DEFAULT_PORT, LifecycleError, Transport,
    TransportResult,
};
use crate::transport::{self, Driver, Lifecycle, PacketQueue, Queues, cancelled};

/// Listener configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Configuration applied to every accepted connection.
    pub client: ClientConfig,
}

/// Builder for creating a `ListenerTransport`.
#[derive(Debug)]
pub struct ListenerTransportBuilder {
    host: String,
    port: u16,
    config: ListenerConfig,
}

impl ListenerTransportBuilder {
    /// Create a new listener builder.
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            config: ListenerConfig::default(),
        }
    }

    /// Set the host to bind.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port to bind. `0` picks an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the configuration applied to accepted connections.
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.config.client = config;
        self
    }

    /// Set the largest packet accepted or sent on any connection.
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.config.client.max_packet_size = size;
        self
    }

    /// Build the transport. Nothing is bound until `start`.
    pub fn build(self) -> ListenerTransport {
        ListenerTransport::new(self.host, self.port, self.config)
    }
}

impl Default for ListenerTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct ListenerDriver {
    host: String,
    port: u16,
    config: ListenerConfig,
    registry: Arc<ClientRegistry>,
    local_addr: Arc<OnceLock<SocketAddr>>,
    cancel: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Driver for ListenerDriver {
    async fn open(&mut self, queues: &Queues) -> TransportResult<()> {
        let listener = transport::bind(&self.host, self.port).await?;
        let local_addr = listener.local_addr()?;
        let _ = self.local_addr.set(local_addr);
        tracing::info!(address = %local_addr, "listener bound");

        let (cancel, _) = watch::channel(false);
        let activity = Arc::new(Notify::new());

        self.tasks = vec![
            tokio::spawn(accept_loop(
                listener,
                Arc::clone(&self.registry),
                self.config.client.clone(),
                Arc::clone(&activity),
                cancel.subscribe(),
            )),
            tokio::spawn(aggregate_loop(
                Arc::clone(&self.registry),
                Arc::clone(&queues.inbound),
                activity,
                cancel.subscribe(),
            )),
            tokio::spawn(broadcast_loop(
                Arc::clone(&self.registry),
                Arc::clone(&queues.outbound),
                cancel.subscribe(),
            )),
        ];
        self.cancel = Some(cancel);
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(true);
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "listener task failed");
            }
        }

        // Every loop has ended, so the registry no longer changes.
        let clients = self.registry.drain();
        let count = clients.len();
        for client in clients {
            if let Err(e) = client.stop().await {
                tracing::warn!(peer = ?client.peer_addr(), error = %e, "failed to stop client");
            }
        }
        tracing::info!(clients = count, "listener closed");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    config: ClientConfig,
    activity: Arc<Notify>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancelled(&mut cancel) => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::select! {
                    _ = cancelled(&mut cancel) => break,
                    _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => continue,
                }
            }
        };

        let client = ClientTransport::accepted(stream, config.clone(), Arc::clone(&activity));
        if let Err(e) = client.start().await {
            tracing::warn!(%peer, error = %e, "failed to start accepted client");
            continue;
        }

        registry.insert(Arc::new(client));
        // Packets may have arrived before registration.
        activity.notify_one();
        tracing::debug!(%peer, clients = registry.len(), "client accepted");
    }
}

async fn aggregate_loop(
    registry: Arc<ClientRegistry>,
    inbound: Arc<PacketQueue>,
    activity: Arc<Notify>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = cancelled(&mut cancel) => break,
            _ = activity.notified() => {}
        }

        for client in registry.snapshot() {
            // Read the link first: once down, every packet it will ever
            // receive is already queued.
            let down = client.disconnect_reason();

            match client.get_packets() {
                Ok(packets) => inbound.extend(packets),
                Err(e) => tracing::debug!(peer = ?client.peer_addr(), error = %e, "skipping client"),
            }

            if let Some(reason) = down {
                registry.remove(&client);
                tracing::debug!(peer = ?client.peer_addr(), %reason, "evicting client");
                if let Err(e) = client.stop().await {
                    tracing::warn!(peer = ?client.peer_addr(), error = %e, "failed to stop client");
                }
            }
        }
    }
}

async fn broadcast_loop(
    registry: Arc<ClientRegistry>,
    outbound: Arc<PacketQueue>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        while let Some(packet) = outbound.pop() {
            let clients = registry.snapshot();
            if clients.is_empty() {
                tracing::debug!("no clients, dropping packet");
                continue;
            }
            for client in &clients {
                if let Err(e) = client.send_packet(packet.as_str()) {
                    tracing::debug!(peer = ?client.peer_addr(), error = %e, "skipping client");
                }
            }
        }

        tokio::select! {
            _ = cancelled(&mut cancel) => break,
            _ = outbound.ready() => {}
        }
    }
}

/// A transport that accepts many peers and merges their traffic.
///
/// Packets sent through the listener go to every connected peer; packets
/// from any peer come back through one `get_packets` call.
///
/// # Example
///
/// ```ignore
/// use packetline::prelude::*;
///
/// let listener = ListenerTransport::bind_to("0.0.0.0", 9999);
/// listener.start().await?;
///
/// // Reaches every connected peer
/// listener.send_packet("Test Message")?;
///
/// for packet in listener.get_packets()? {
///     println!("{packet}");
/// }
///
/// listener.stop().await?;
/// ```
#[derive(Debug)]
pub struct ListenerTransport {
    lifecycle: Lifecycle<ListenerDriver>,
    registry: Arc<ClientRegistry>,
    local_addr: Arc<OnceLock<SocketAddr>>,
}

impl ListenerTransport {
    fn new(host: String, port: u16, config: ListenerConfig) -> Self {
        let registry = Arc::new(ClientRegistry::default());
        let local_addr = Arc::new(OnceLock::new());
        let driver = ListenerDriver {
            host,
            port,
            config,
            registry: Arc::clone(&registry),
            local_addr: Arc::clone(&local_addr),
            cancel: None,
            tasks: Vec::new(),
        };
        Self {
            lifecycle: Lifecycle::new(driver),
            registry,
            local_addr,
        }
    }

    /// Create a listener for `host:port` with the default configuration.
    pub fn bind_to(host: impl Into<String>, port: u16) -> Self {
        Self::builder().host(host).port(port).build()
    }

    /// Start building a listener.
    pub fn builder() -> ListenerTransportBuilder {
        ListenerTransportBuilder::new()
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }
}

impl Transport for ListenerTransport {
    async fn start(&self) -> TransportResult<()> {
        self.lifecycle.start().await
    }

    async fn stop(&self) -> TransportResult<()> {
        self.lifecycle.stop().await
    }

    fn send_packet(&self, packet: impl Into<String>) -> Result<(), LifecycleError> {
        self.lifecycle.send_packet(packet.into())
    }

    fn get_packets(&self) -> Result<Vec<String>, LifecycleError> {
        self.lifecycle.get_packets()
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }
}
