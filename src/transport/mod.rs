//! packetline - Transport Layer
//!
//! Everything between the application-facing [`Transport`](crate::core::Transport)
//! trait and the TCP socket:
//!
//! - **Frame encoding/decoding**: [`FrameCodec`] and the varint length prefix
//! - **Packet queues**: [`PacketQueue`] with wake-on-enqueue
//! - **Lifecycle control**: [`Lifecycle`] gating queue access on state
//! - **Duplex loops**: [`Connection`] running one stream's read and write tasks
//! - **Socket setup**: [`connect`], [`bind`] and [`SocketOptions`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   ClientTransport / ListenerTransport   │
//! ├─────────────────────────────────────────┤
//! │   Lifecycle  (state, inbound/outbound)  │
//! ├─────────────────────────────────────────┤
//! │   Connection (read loop, write loop)    │  ← This module
//! │   FrameCodec                            │
//! ├─────────────────────────────────────────┤
//! │              TCP                        │
//! └─────────────────────────────────────────┘
//! ```

mod connection;
mod frame;
mod lifecycle;
mod queue;
mod socket;

pub(crate) use connection::cancelled;
pub use connection::{Connection, Disconnect, LinkStatus};
pub use frame::*;
pub use lifecycle::*;
pub use queue::*;
pub use socket::*;
