//! packetline - Client Transport
//!
//! A [`ClientTransport`] carries packets over one TCP connection.

#[allow(clippy::module_inception)]
mod client;

pub use client::*;
