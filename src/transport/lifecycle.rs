//! Connection lifecycle controller shared by every transport role.
//!
//! A transport is a [`Lifecycle`] wrapped around a role-specific [`Driver`].
//! The lifecycle owns the state machine and both packet queues; the driver
//! only knows how to open and close its sockets and loops.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::queue::PacketQueue;
use crate::core::{ConnectionState, LifecycleError, TransportResult};

/// Shared handles to a transport's inbound and outbound queues.
#[derive(Debug, Clone, Default)]
pub struct Queues {
    /// Packets received from the wire, drained by `get_packets`.
    pub inbound: Arc<PacketQueue>,
    /// Packets waiting to be written, filled by `send_packet`.
    pub outbound: Arc<PacketQueue>,
}

impl Queues {
    /// Create a pair of empty queues.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Role-specific open and close procedures.
///
/// The lifecycle guarantees `open` is called at most once, only from
/// `NotStarted`, and that `close` is called at most once. `close` may run
/// without a preceding successful `open` and must then release whatever
/// the driver holds.
pub trait Driver: Send {
    /// Establish the connection and launch background loops that feed and
    /// drain `queues`.
    fn open(&mut self, queues: &Queues) -> impl Future<Output = TransportResult<()>> + Send;

    /// Cancel and join the background loops and release the connection.
    fn close(&mut self) -> impl Future<Output = TransportResult<()>> + Send;
}

/// State machine gating queue access on the connection state.
///
/// `start` and `stop` are serialized by an async lock around the driver.
/// Queue operations never wait on them.
#[derive(Debug)]
pub struct Lifecycle<D> {
    state: Mutex<ConnectionState>,
    queues: Queues,
    driver: tokio::sync::Mutex<D>,
}

impl<D: Driver> Lifecycle<D> {
    /// Create a lifecycle in `NotStarted`.
    pub fn new(driver: D) -> Self {
        Self {
            state: Mutex::new(ConnectionState::NotStarted),
            queues: Queues::new(),
            driver: tokio::sync::Mutex::new(driver),
        }
    }

    fn state_lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state_lock()
    }

    /// Get the queues this lifecycle owns.
    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    /// Run the driver's open procedure and move to `Open`.
    ///
    /// On failure the error is returned unchanged and the state stays
    /// `NotStarted`.
    pub async fn start(&self) -> TransportResult<()> {
        let mut driver = self.driver.lock().await;
        if self.state() != ConnectionState::NotStarted {
            return Err(LifecycleError::AlreadyStarted.into());
        }

        driver.open(&self.queues).await?;

        *self.state_lock() = ConnectionState::Open;
        tracing::info!(state = %ConnectionState::Open, "transport state changed");
        Ok(())
    }

    /// Move to `Closed` and run the driver's close procedure.
    ///
    /// The transition is unconditional: a failing close procedure is
    /// logged and the transport is closed anyway. Queued packets are
    /// discarded.
    pub async fn stop(&self) -> TransportResult<()> {
        let mut driver = self.driver.lock().await;
        let previous = {
            let mut state = self.state_lock();
            if *state == ConnectionState::Closed {
                return Err(LifecycleError::AlreadyStopped.into());
            }
            std::mem::replace(&mut *state, ConnectionState::Closed)
        };

        if let Err(e) = driver.close().await {
            tracing::warn!(error = %e, from = %previous, "close procedure failed");
        }

        self.queues.inbound.clear();
        self.queues.outbound.clear();
        tracing::info!(from = %previous, state = %ConnectionState::Closed, "transport state changed");
        Ok(())
    }

    /// Enqueue an outbound packet.
    pub fn send_packet(&self, packet: String) -> Result<(), LifecycleError> {
        // Holding the state lock orders the push before any concurrent stop.
        let state = self.state_lock();
        state.check_open()?;
        self.queues.outbound.push(packet);
        Ok(())
    }

    /// Drain every inbound packet.
    pub fn get_packets(&self) -> Result<Vec<String>, LifecycleError> {
        let state = self.state_lock();
        state.check_open()?;
        Ok(self.queues.inbound.drain())
    }
}
