//! In-Process Transport
//!
//! Channel pair connecting an embedding host to a [`RelayService`].
//! Events flow host to relay; every [`RelayMessage`] flows back on one
//! bounded channel, whose capacity is the backpressure the host applies.
//!
//! ```ignore
//! let (mut transport, event_rx, msg_tx) = InProcessTransport::new_pair();
//! let service = RelayService::new(backend, config, msg_tx);
//! tokio::spawn(async move { service.serve(event_rx).await });
//! ```
//!
//! [`RelayService`]: crate::service::RelayService

use thiserror::Error;
use tokio::sync::mpsc;

use crate::messages::{ClientEvent, RelayMessage};

/// Default capacity for both directions
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Transport errors
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The relay side has gone away
    #[error("relay service is not running")]
    Disconnected,
}

/// Host end of the channel pair
pub struct InProcessTransport {
    event_tx: mpsc::Sender<ClientEvent>,
    msg_rx: mpsc::Receiver<RelayMessage>,
}

impl InProcessTransport {
    /// Create a transport pair with the default capacity
    ///
    /// Returns the host end, the receiver the service serves from, and the
    /// sender the service delivers into.
    #[must_use]
    pub fn new_pair() -> (
        Self,
        mpsc::Receiver<ClientEvent>,
        mpsc::Sender<RelayMessage>,
    ) {
        Self::new_pair_with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create with custom channel capacity
    #[must_use]
    pub fn new_pair_with_capacity(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<ClientEvent>,
        mpsc::Sender<RelayMessage>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        let (msg_tx, msg_rx) = mpsc::channel(capacity.max(1));

        (Self { event_tx, msg_rx }, event_rx, msg_tx)
    }

    /// Send an event to the relay
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Disconnected`] if the service stopped.
    pub async fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    /// Wait for the next relay message
    ///
    /// Returns `None` once the service and every relay task are gone.
    pub async fn recv(&mut self) -> Option<RelayMessage> {
        self.msg_rx.recv().await
    }

    /// Take a relay message if one is ready
    pub fn try_recv(&mut self) -> Option<RelayMessage> {
        self.msg_rx.try_recv().ok()
    }

    /// Stop sending events, letting the service drain and shut down
    pub fn close(self) -> mpsc::Receiver<RelayMessage> {
        self.msg_rx
    }
}
