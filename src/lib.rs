//! # packetline
//!
//! A minimal message transport over TCP.
//!
//! Packets are opaque UTF-8 strings. Each one travels as a single frame
//! (a 7-bit varint length followed by the bytes), so the receiver always
//! gets back exactly the strings that were sent, in order.
//!
//! Two roles share one contract, the [`Transport`](crate::core::Transport) trait:
//!
//! - [`ClientTransport`](client::ClientTransport): one connection to one peer
//! - [`ListenerTransport`](server::ListenerTransport): accepts many peers,
//!   broadcasts every outbound packet to all of them and merges their
//!   inbound packets into one queue
//!
//! Both are driven the same way: `start`, then any number of
//! `send_packet` / `get_packets` calls, then `stop`. Sending never waits
//! for the network and receiving never blocks; background tasks move the
//! bytes.
//!
//! ## Feature Flags
//!
//! - `client` (default): [`client`] module
//! - `server` (default): [`server`] module, implies `client`
//!
//! ## Modules
//!
//! - [`core`](crate::core): Contract, constants, and error types (always included)
//! - [`transport`]: Framing, queues, lifecycle, and connection loops
//!
//! ## Example Usage
//!
//! ```no_run
//! use packetline::prelude::*;
//!
//! # async fn run() -> TransportResult<()> {
//! let listener = ListenerTransport::bind_to("127.0.0.1", 9999);
//! listener.start().await?;
//!
//! let client = ClientTransport::connect_to("127.0.0.1", 9999);
//! client.start().await?;
//! client.send_packet("Client: 0")?;
//!
//! // Later
//! for packet in listener.get_packets()? {
//!     println!("received {packet}");
//! }
//!
//! client.stop().await?;
//! listener.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! Lifecycle changes, accepted and evicted peers, and loop failures are
//! emitted as [`tracing`] events. No subscriber is installed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Framing, queues and connection loops
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Listener API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::{
        ConnectionState, FrameError, LifecycleError, Transport, TransportError, TransportResult,
    };

    pub use crate::transport::Disconnect;

    #[cfg(feature = "client")]
    pub use crate::client::{ClientConfig, ClientTransport, ClientTransportBuilder};

    #[cfg(feature = "server")]
    pub use crate::server::{ListenerConfig, ListenerTransport, ListenerTransportBuilder};
}

// Re-export commonly used items at crate root
pub use crate::core::{ConnectionState, LifecycleError, Transport, TransportError, TransportResult};

#[cfg(feature = "client")]
pub use crate::client::ClientTransport;

#[cfg(feature = "server")]
pub use crate::server::ListenerTransport;
