//! Client transport: one duplex TCP connection.
//!
//! Provides [`ClientTransport`] for talking to a single peer, either by
//! connecting out to it or by wrapping a stream a listener accepted.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::core::{
    ConnectionState, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HOST, DEFAULT_MAX_PACKET_SIZE, DEFAULT_PORT,
    LifecycleError, Transport, TransportResult,
};
use crate::transport::{
    self, Connection, Disconnect, Driver, FrameCodec, Lifecycle, LinkStatus, Queues, SocketOptions,
};

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Connection timeout. `None` waits for the operating system.
    pub connect_timeout: Option<Duration>,

    /// Set `TCP_NODELAY` on the stream.
    pub nodelay: bool,

    /// Set `SO_KEEPALIVE` on the stream.
    pub keepalive: bool,

    /// Largest packet accepted or sent, in bytes.
    pub max_packet_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            nodelay: true,
            keepalive: true,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl ClientConfig {
    /// Socket options derived from this configuration.
    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            nodelay: self.nodelay,
            keepalive: self.keepalive,
        }
    }

    /// Frame codec derived from this configuration.
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.max_packet_size)
    }
}

/// Builder for creating a `ClientTransport`.
#[derive(Debug)]
pub struct ClientTransportBuilder {
    host: String,
    port: u16,
    config: ClientConfig,
}

impl ClientTransportBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            config: ClientConfig::default(),
        }
    }

    /// Set the host to connect to. Names are resolved on `start`.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port to connect to.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Wait for the operating system's own connect timeout.
    pub fn no_connect_timeout(mut self) -> Self {
        self.config.connect_timeout = None;
        self
    }

    /// Enable or disable `TCP_NODELAY`.
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    /// Enable or disable `SO_KEEPALIVE`.
    pub fn keepalive(mut self, enabled: bool) -> Self {
        self.config.keepalive = enabled;
        self
    }

    /// Set the largest packet accepted or sent.
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.config.max_packet_size = size;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the transport. Nothing is connected until `start`.
    pub fn build(self) -> ClientTransport {
        ClientTransport::new(
            Target::Remote {
                host: self.host,
                port: self.port,
            },
            self.config,
            None,
        )
    }
}

impl Default for ClientTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Addresses and link health of an open connection.
#[derive(Debug)]
struct Endpoint {
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    link: Arc<LinkStatus>,
}

#[derive(Debug)]
enum Target {
    Remote { host: String, port: u16 },
    Accepted(Option<TcpStream>),
}

#[derive(Debug)]
struct ClientDriver {
    target: Target,
    config: ClientConfig,
    activity: Option<Arc<Notify>>,
    endpoint: Arc<OnceLock<Endpoint>>,
    connection: Option<Connection>,
}

impl Driver for ClientDriver {
    async fn open(&mut self, queues: &Queues) -> TransportResult<()> {
        let stream = match &mut self.target {
            Target::Remote { host, port } => {
                transport::connect(host, *port, self.config.connect_timeout).await?
            }
            Target::Accepted(stream) => stream.take().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "accepted stream already used")
            })?,
        };
        self.config.socket_options().apply(&stream)?;

        let connection =
            Connection::spawn(stream, queues, self.config.codec(), self.activity.clone())?;
        tracing::debug!(
            peer = %connection.peer_addr(),
            local = %connection.local_addr(),
            "client connected"
        );

        let _ = self.endpoint.set(Endpoint {
            peer_addr: connection.peer_addr(),
            local_addr: connection.local_addr(),
            link: Arc::clone(connection.link()),
        });
        self.connection = Some(connection);
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        // An accepted stream that was never opened is closed here.
        if let Target::Accepted(stream) = &mut self.target {
            *stream = None;
        }

        match self.connection.take() {
            Some(connection) => connection.shutdown().await,
            None => Ok(()),
        }
    }
}

/// A transport bound to exactly one TCP connection.
///
/// # Example
///
/// ```ignore
/// use packetline::prelude::*;
///
/// let client = ClientTransport::builder()
///     .host("127.0.0.1")
///     .port(9999)
///     .connect_timeout(Duration::from_secs(2))
///     .build();
///
/// client.start().await?;
/// client.send_packet("Test Message")?;
///
/// // Later, collect whatever the peer sent
/// let packets = client.get_packets()?;
///
/// client.stop().await?;
/// ```
#[derive(Debug)]
pub struct ClientTransport {
    lifecycle: Lifecycle<ClientDriver>,
    endpoint: Arc<OnceLock<Endpoint>>,
}

impl ClientTransport {
    fn new(target: Target, config: ClientConfig, activity: Option<Arc<Notify>>) -> Self {
        let endpoint = Arc::new(OnceLock::new());
        let driver = ClientDriver {
            target,
            config,
            activity,
            endpoint: Arc::clone(&endpoint),
            connection: None,
        };
        Self {
            lifecycle: Lifecycle::new(driver),
            endpoint,
        }
    }

    /// Create a client for `host:port` with the default configuration.
    pub fn connect_to(host: impl Into<String>, port: u16) -> Self {
        Self::builder().host(host).port(port).build()
    }

    /// Start building a client.
    pub fn builder() -> ClientTransportBuilder {
        ClientTransportBuilder::new()
    }

    /// Wrap an already-connected stream.
    ///
    /// `start` adopts the stream instead of connecting.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self::from_stream_with(stream, ClientConfig::default())
    }

    /// Wrap an already-connected stream with a custom configuration.
    ///
    /// `connect_timeout` is ignored.
    pub fn from_stream_with(stream: TcpStream, config: ClientConfig) -> Self {
        Self::new(Target::Accepted(Some(stream)), config, None)
    }

    /// Wrap an accepted stream whose loops notify `activity` on every
    /// received packet and when the link goes down.
    #[cfg(feature = "server")]
    pub(crate) fn accepted(stream: TcpStream, config: ClientConfig, activity: Arc<Notify>) -> Self {
        Self::new(Target::Accepted(Some(stream)), config, Some(activity))
    }

    /// Why the connection went down, if it has.
    ///
    /// `None` before `start` and while both directions are running. A
    /// transport stopped locally keeps `None`.
    pub fn disconnect_reason(&self) -> Option<Disconnect> {
        self.endpoint.get().and_then(|endpoint| endpoint.link.reason())
    }

    /// Remote address, once connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.endpoint.get().map(|endpoint| endpoint.peer_addr)
    }

    /// Local address, once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.get().map(|endpoint| endpoint.local_addr)
    }
}

impl Transport for ClientTransport {
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
