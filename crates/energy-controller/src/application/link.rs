//! The link capability: what the controller needs from a wireless stack.
//!
//! The application layer depends only on the [`Link`] trait.  A real
//! implementation wraps a BLE central; [`crate::infrastructure::link::SimulatedLink`]
//! hosts in-memory devices for tests.
//!
//! # Callbacks as subscriptions (for beginners)
//!
//! Radio stacks usually deliver notifications and disconnects through
//! callbacks.  Here both are [`Subscription`]s: a channel receiver plus a
//! cancel hook.  Dropping a subscription (or calling
//! [`Subscription::cancel`]) detaches it from the link, so a caller that
//! returns early can never be woken by a stale callback.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque transport address of a peripheral (e.g. a BLE MAC or OS handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One advertisement seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub peripheral: PeripheralId,
    pub local_name: Option<String>,
    pub services: Vec<Uuid>,
    pub rssi: Option<i16>,
}

/// Errors reported by the link or by the session layered on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No complete response arrived before the deadline.
    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    /// The peripheral disconnected while a request was outstanding.
    #[error("link to peripheral lost")]
    LinkLost,

    /// A request is already outstanding on this connection.
    #[error("a request is already pending on this connection")]
    RequestPending,

    /// The operation needs an open connection.
    #[error("peripheral {0} is not connected")]
    NotConnected(PeripheralId),

    #[error("could not connect to {peripheral}: {reason}")]
    ConnectFailed {
        peripheral: PeripheralId,
        reason: String,
    },

    /// The peripheral does not expose the addressed slot.
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// Any other failure reported by the radio stack.
    #[error("link error: {0}")]
    Backend(String),
}

/// A live callback registration delivering `T` values.
///
/// Cancelled when dropped.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<T> Subscription<T> {
    /// Wraps a receiver; `cancel` runs exactly once, on cancel or drop.
    pub fn new(
        receiver: mpsc::UnboundedReceiver<T>,
        cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            receiver,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Waits for the next value; `None` once the link side is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Detaches from the link now.
    pub fn cancel(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.receiver.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Notification-based link to energy peripherals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Link: Send + Sync {
    /// Scans for `duration` and returns every advertisement seen.
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>, TransportError>;

    async fn connect(
        &self,
        peripheral: &PeripheralId,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), TransportError>;

    /// Reads the current value of a characteristic.
    async fn read(
        &self,
        peripheral: &PeripheralId,
        slot: Uuid,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Writes `bytes` to a characteristic and waits for the acknowledgement.
    async fn write(
        &self,
        peripheral: &PeripheralId,
        slot: Uuid,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Starts delivering notifications from `slot`.
    async fn subscribe(
        &self,
        peripheral: &PeripheralId,
        slot: Uuid,
    ) -> Result<Subscription<Vec<u8>>, TransportError>;

    /// Registers for a single value when `peripheral` disconnects.
    async fn on_disconnect(
        &self,
        peripheral: &PeripheralId,
    ) -> Result<Subscription<()>, TransportError>;
}
