//! Core traits for packetline.
//!
//! [`Transport`] is the application-facing contract shared by the client
//! and listener roles.

use std::fmt;
use std::future::Future;

use super::error::{LifecycleError, TransportResult};

/// Connection lifecycle state.
///
/// Transitions are one-directional: `NotStarted → Open → Closed`, or
/// `NotStarted → Closed` when a transport is stopped without ever being
/// started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Created, not yet connected or bound.
    #[default]
    NotStarted,
    /// Connected (or bound) with background loops running.
    Open,
    /// Stopped. The transport is inert.
    Closed,
}

impl ConnectionState {
    /// Check whether queue operations are allowed in this state.
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    /// Validate queue access for this state.
    ///
    /// `Closed` is checked first so a stopped transport reports "closed"
    /// rather than "never opened".
    pub fn check_open(self) -> Result<(), LifecycleError> {
        match self {
            ConnectionState::Closed => Err(LifecycleError::Closed),
            ConnectionState::NotStarted => Err(LifecycleError::NotOpened),
            ConnectionState::Open => Ok(()),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::NotStarted => f.write_str("not-started"),
            ConnectionState::Open => f.write_str("open"),
            ConnectionState::Closed => f.write_str("closed"),
        }
    }
}

/// A message transport over some connection topology.
///
/// Both roles expose the same four operations:
///
/// - `start`: connect or bind, then launch background loops
/// - `stop`: cancel and join the loops, release sockets
/// - `send_packet`: enqueue an outbound packet without waiting for delivery
/// - `get_packets`: drain every inbound packet received so far
///
/// # Example
///
/// ```ignore
/// use packetline::prelude::*;
///
/// let client = ClientTransport::connect_to("127.0.0.1", 9999);
/// client.start().await?;
/// client.send_packet("hello")?;
///
/// for packet in client.get_packets()? {
///     println!("{packet}");
/// }
///
/// client.stop().await?;
/// ```
pub trait Transport: Send + Sync {
    /// Open the connection and start the background loops.
    ///
    /// Fails with [`LifecycleError::AlreadyStarted`] unless the transport is
    /// in `NotStarted`. If the connect or bind step fails, the error is
    /// returned and the transport stays in `NotStarted`.
    fn start(&self) -> impl Future<Output = TransportResult<()>> + Send;

    /// Stop the transport.
    ///
    /// Fails with [`LifecycleError::AlreadyStopped`] when already `Closed`.
    /// Otherwise the transport always ends up `Closed`.
    fn stop(&self) -> impl Future<Output = TransportResult<()>> + Send;

    /// Enqueue a packet for transmission.
    fn send_packet(&self, packet: impl Into<String>) -> Result<(), LifecycleError>;

    /// Remove and return every packet received since the previous call.
    fn get_packets(&self) -> Result<Vec<String>, LifecycleError>;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;
}
