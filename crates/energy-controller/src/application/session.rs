//! DeviceSession: one request/response exchange at a time with one device.
//!
//! The link only offers "write to a slot" and "notify from a slot".  A
//! session turns that into a single awaited call:
//!
//! ```text
//! subscribe(response slot) ─┐
//! on_disconnect()          ─┤
//! write request            ─┤
//!                           ▼
//!        ┌── all chunks received ──► reassemble, verify, decrypt ──► Ok
//! select ┼── disconnect seen ───────► LinkLost
//!        └── deadline passed ───────► Timeout
//! ```
//!
//! The deadline covers every step, subscribing included.  Whatever branch
//! wins, both subscriptions are dropped before the call
//! returns, so late notifications go nowhere.  A session allows one
//! outstanding request; a second concurrent call fails with
//! [`TransportError::RequestPending`] instead of queueing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use energy_core::crypto::freshness::{Clock, FreshnessWindow, SystemClock};
use energy_core::protocol::chunk::{Chunk, ChunkBuffer};
use energy_core::protocol::messages::{
    open_reassembled, seal, ActionResult, DeviceInformation, DeviceService, InformationRequest,
    MessageKind, Sealed, DEVICE_KIND_CHARACTERISTIC, DEVICE_NAME_CHARACTERISTIC,
    IDENTIFIER_CHARACTERISTIC,
};
use energy_core::{
    encode, AccessoryStatus, DeviceKind, DeviceState, PowerSourceState, PowerSourceStatus,
    PowerState, PrivateKey, ProtocolError,
};
use thiserror::Error;
use tokio::time::error::Elapsed;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::link::{Link, PeripheralId, TransportError};

/// Default payload bytes per chunk (a 23-byte ATT MTU minus headers).
pub const DEFAULT_MAX_CHUNK_PAYLOAD: usize = 18;

/// Errors from a session exchange.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The device processed the action and reported failure.
    #[error("device rejected the action: {0}")]
    Rejected(String),

    /// Controllers expose no device service.
    #[error("a {0} has no device service")]
    NoDeviceService(DeviceKind),

    /// The requested state does not exist for this kind of device.
    #[error("a {kind} cannot be put into {state:?}")]
    UnsupportedState { kind: DeviceKind, state: PowerState },
}

/// Timing and framing parameters for sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Bound on connect, reads, and each request/response exchange.
    pub request_timeout: Duration,
    pub max_chunk_payload: usize,
    /// Skew window applied to responses; `None` disables the check.
    pub freshness: Option<FreshnessWindow>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_chunk_payload: DEFAULT_MAX_CHUNK_PAYLOAD,
            freshness: Some(FreshnessWindow::default()),
        }
    }
}

/// How a request is put on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// One write of the whole value.
    Single(Vec<u8>),
    /// One write per chunk, in index order.
    Chunked(Vec<Chunk>),
}

/// A connected device.
pub struct DeviceSession {
    link: Arc<dyn Link>,
    peripheral: PeripheralId,
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the request ends, however it ends.
struct PendingRequest<'a>(&'a AtomicBool);

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DeviceSession {
    /// Connects to `peripheral` and returns a session over the connection.
    ///
    /// # Errors
    ///
    /// Returns the link's [`TransportError`] if the connection fails.
    pub async fn connect(
        link: Arc<dyn Link>,
        peripheral: PeripheralId,
        settings: SessionSettings,
    ) -> Result<Self, TransportError> {
        link.connect(&peripheral, settings.request_timeout).await?;
        debug!(peripheral = %peripheral, "connected");
        Ok(Self::over_connection(link, peripheral, settings))
    }

    /// Wraps a connection that is already open.
    pub fn over_connection(
        link: Arc<dyn Link>,
        peripheral: PeripheralId,
        settings: SessionSettings,
    ) -> Self {
        Self {
            link,
            peripheral,
            settings,
            clock: Arc::new(SystemClock),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Replaces the clock used for the freshness check.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn peripheral(&self) -> &PeripheralId {
        &self.peripheral
    }

    /// Whether a request is currently outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Disconnects from the peripheral.
    ///
    /// # Errors
    ///
    /// Returns the link's [`TransportError`] if the disconnect fails.
    pub async fn close(self) -> Result<(), TransportError> {
        self.link.disconnect(&self.peripheral).await
    }

    // ── Typed exchanges ───────────────────────────────────────────────────────

    /// Reads the identifier, kind and name characteristics.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if a read fails or a value is malformed.
    pub async fn read_identity(&self) -> Result<DeviceInformation, SessionError> {
        let timeout = self.settings.request_timeout;
        let identifier = self
            .link
            .read(&self.peripheral, IDENTIFIER_CHARACTERISTIC, timeout)
            .await?;
        let kind = self
            .link
            .read(&self.peripheral, DEVICE_KIND_CHARACTERISTIC, timeout)
            .await?;
        let name = self
            .link
            .read(&self.peripheral, DEVICE_NAME_CHARACTERISTIC, timeout)
            .await?;
        Ok(DeviceInformation::from_characteristics(
            &identifier,
            &kind,
            &name,
        )?)
    }

    /// Asks the device for its current status.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] for transport, protocol or freshness failures.
    pub async fn read_state(
        &self,
        kind: DeviceKind,
        key: &PrivateKey,
    ) -> Result<DeviceState, SessionError> {
        let service = DeviceService::for_kind(kind).ok_or(SessionError::NoDeviceService(kind))?;
        let body = RequestBody::Single(encode(&InformationRequest::new(key)));
        let request_slot = service.slot(MessageKind::InformationRequest);
        let response_slot = service.slot(MessageKind::InformationResponse);

        match service {
            DeviceService::PowerSource => self
                .request::<PowerSourceStatus>(request_slot, body, response_slot, key)
                .await
                .map(DeviceState::PowerSource),
            DeviceService::Accessory => self
                .request::<AccessoryStatus>(request_slot, body, response_slot, key)
                .await
                .map(DeviceState::Accessory),
        }
    }

    /// Asks the device to switch to `state`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnsupportedState`] without writing anything
    /// when `state` does not exist for `kind`, [`SessionError::Rejected`] when
    /// the device reports failure, or any transport/protocol error.
    pub async fn apply_state(
        &self,
        kind: DeviceKind,
        state: PowerState,
        key: &PrivateKey,
    ) -> Result<(), SessionError> {
        let service = DeviceService::for_kind(kind).ok_or(SessionError::NoDeviceService(kind))?;
        let max = self.settings.max_chunk_payload;
        let chunks = match service {
            DeviceService::PowerSource => {
                let target = PowerSourceState::try_from(state)
                    .map_err(|()| SessionError::UnsupportedState { kind, state })?;
                seal(&target, key, max)?
            }
            DeviceService::Accessory => seal(&state, key, max)?,
        };

        let result: ActionResult = self
            .request(
                service.slot(MessageKind::ActionRequest),
                RequestBody::Chunked(chunks),
                service.slot(MessageKind::ActionResponse),
                key,
            )
            .await?;

        if result.success {
            Ok(())
        } else {
            Err(SessionError::Rejected(
                result
                    .error_description
                    .unwrap_or_else(|| "no description".to_string()),
            ))
        }
    }

    // ── Generic exchange ──────────────────────────────────────────────────────

    /// Writes `body` to `request_slot` and waits for a sealed `T` on
    /// `response_slot`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::RequestPending`] if another request is outstanding.
    /// - [`TransportError::Timeout`] / [`TransportError::LinkLost`] if the
    ///   response does not complete.
    /// - [`ProtocolError`] if the response is malformed, fails
    ///   authentication or is outside the freshness window.
    pub async fn request<T: Sealed>(
        &self,
        request_slot: Uuid,
        body: RequestBody,
        response_slot: Uuid,
        key: &PrivateKey,
    ) -> Result<T, SessionError> {
        let _pending = self.begin()?;
        let after = self.settings.request_timeout;
        let deadline = Instant::now() + after;

        let expired = |_: Elapsed| TransportError::Timeout { after };

        let mut notifications =
            timeout_at(deadline, self.link.subscribe(&self.peripheral, response_slot))
                .await
                .map_err(expired)??;
        let mut disconnects = timeout_at(deadline, self.link.on_disconnect(&self.peripheral))
            .await
            .map_err(expired)??;

        timeout_at(deadline, self.write_body(request_slot, &body))
            .await
            .map_err(expired)??;

        let mut buffer = ChunkBuffer::new();
        let bytes = loop {
            tokio::select! {
                biased;

                notification = notifications.recv() => {
                    let Some(raw) = notification else {
                        return Err(TransportError::LinkLost.into());
                    };
                    if let Some(complete) = buffer.push(Chunk::from_bytes(&raw)?)? {
                        break complete;
                    }
                }
                _ = disconnects.recv() => {
                    warn!(peripheral = %self.peripheral, "link lost during request");
                    return Err(TransportError::LinkLost.into());
                }
                _ = sleep_until(deadline) => {
                    debug!(
                        peripheral = %self.peripheral,
                        received = buffer.received(),
                        "request timed out"
                    );
                    return Err(TransportError::Timeout { after }.into());
                }
            }
        };
        notifications.cancel();
        disconnects.cancel();

        let opened = open_reassembled::<T>(&bytes, key)?;
        if let Some(window) = self.settings.freshness {
            window.check(&opened.authentication, self.clock.as_ref())?;
        }
        Ok(opened.value)
    }

    fn begin(&self) -> Result<PendingRequest<'_>, TransportError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TransportError::RequestPending)?;
        Ok(PendingRequest(&self.in_flight))
    }

    async fn write_body(&self, slot: Uuid, body: &RequestBody) -> Result<(), TransportError> {
        let timeout = self.settings.request_timeout;
        match body {
            RequestBody::Single(bytes) => {
                self.link
                    .write(&self.peripheral, slot, bytes, timeout)
                    .await
            }
            RequestBody::Chunked(chunks) => {
                for chunk in chunks {
                    self.link
                        .write(&self.peripheral, slot, &chunk.to_bytes(), timeout)
                        .await?;
                }
                Ok(())
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
