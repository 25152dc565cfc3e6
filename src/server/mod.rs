//! packetline - Listener Transport
//!
//! A [`ListenerTransport`] accepts any number of peers and exposes them
//! through a single queue pair.

mod registry;
#[allow(clippy::module_inception)]
mod server;

pub use server::*;
