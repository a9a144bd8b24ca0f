//! In-memory link hosting simulated energy devices.
//!
//! Each [`SimulatedPeripheral`] implements the device side of the protocol:
//! it checks information requests (HMAC, freshness window, nonce replay),
//! answers with sealed chunked notifications, reassembles action requests,
//! applies them to its state and answers with an [`ActionResult`].
//!
//! [`PeripheralBehavior`] switches on failure modes for tests: staying
//! silent, dropping the link when a request arrives, delivering chunks in
//! reverse order, corrupting a response, or rejecting actions.
//!
//! Scans return immediately with every in-range peripheral; the requested
//! scan duration is ignored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use energy_core::crypto::freshness::{Clock, FreshnessWindow, ReplayGuard, SystemClock};
use energy_core::crypto::PrivateKey;
use energy_core::protocol::chunk::{Chunk, ChunkBuffer};
use energy_core::protocol::messages::{
    open_reassembled, seal, ActionResult, DeviceInformation, DeviceService, InformationRequest,
    MessageKind, Opened, DEVICE_KIND_CHARACTERISTIC, DEVICE_NAME_CHARACTERISTIC, ENERGY_SERVICE,
    IDENTIFIER_CHARACTERISTIC,
};
use energy_core::{
    decode, AccessoryState, AccessoryStatus, DeviceId, DeviceKind, DeviceState, PowerSourceState,
    PowerSourceStatus, PowerState, ProtocolError,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::link::{Advertisement, Link, PeripheralId, Subscription, TransportError};
use crate::application::session::DEFAULT_MAX_CHUNK_PAYLOAD;

/// Failure modes of a simulated peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralBehavior {
    /// Accept writes but ignore them.
    pub silent: bool,
    /// Drop the link as soon as a request is written.
    pub disconnect_on_request: bool,
    /// Deliver response chunks last-to-first.
    pub reverse_chunks: bool,
    /// Flip one bit in the last response chunk.
    pub corrupt_responses: bool,
    /// Answer every action with this failure description.
    pub reject_actions: Option<String>,
    pub max_chunk_payload: usize,
}

impl Default for PeripheralBehavior {
    fn default() -> Self {
        Self {
            silent: false,
            disconnect_on_request: false,
            reverse_chunks: false,
            corrupt_responses: false,
            reject_actions: None,
            max_chunk_payload: DEFAULT_MAX_CHUNK_PAYLOAD,
        }
    }
}

/// A device living inside a [`SimulatedLink`].
#[derive(Debug)]
pub struct SimulatedPeripheral {
    info: DeviceInformation,
    key: PrivateKey,
    state: Option<DeviceState>,
    behavior: PeripheralBehavior,
    replay_guard: ReplayGuard,
    action_buffer: ChunkBuffer,
    in_range: bool,
    connected: bool,
}

impl SimulatedPeripheral {
    fn new(info: DeviceInformation, key: PrivateKey, state: Option<DeviceState>) -> Self {
        Self {
            info,
            key,
            state,
            behavior: PeripheralBehavior::default(),
            replay_guard: ReplayGuard::new(FreshnessWindow::default()),
            action_buffer: ChunkBuffer::new(),
            in_range: true,
            connected: false,
        }
    }

    pub fn power_source(
        id: DeviceId,
        name: impl Into<String>,
        key: PrivateKey,
        status: PowerSourceStatus,
    ) -> Self {
        let info = DeviceInformation {
            id,
            kind: DeviceKind::PowerSource,
            name: name.into(),
        };
        Self::new(info, key, Some(DeviceState::PowerSource(status)))
    }

    pub fn accessory(
        id: DeviceId,
        name: impl Into<String>,
        key: PrivateKey,
        status: AccessoryStatus,
    ) -> Self {
        let info = DeviceInformation {
            id,
            kind: DeviceKind::Accessory,
            name: name.into(),
        };
        Self::new(info, key, Some(DeviceState::Accessory(status)))
    }

    /// A controller advertises the energy service but has no device service.
    pub fn controller(id: DeviceId, name: impl Into<String>) -> Self {
        let info = DeviceInformation {
            id,
            kind: DeviceKind::Controller,
            name: name.into(),
        };
        Self::new(info, PrivateKey::generate(), None)
    }

    pub fn with_behavior(mut self, behavior: PeripheralBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Reports a different identity than the real one (for mismatch tests).
    pub fn reporting_kind(mut self, kind: DeviceKind) -> Self {
        self.info.kind = kind;
        self
    }

    fn service(&self) -> Option<DeviceService> {
        match self.state {
            Some(DeviceState::PowerSource(_)) => Some(DeviceService::PowerSource),
            Some(DeviceState::Accessory(_)) => Some(DeviceService::Accessory),
            None => None,
        }
    }

    fn advertisement(&self, peripheral: &PeripheralId) -> Advertisement {
        let mut services = vec![ENERGY_SERVICE];
        services.extend(self.service().map(DeviceService::uuid));
        Advertisement {
            peripheral: peripheral.clone(),
            local_name: Some(self.info.name.clone()),
            services,
            rssi: Some(-58),
        }
    }

    fn read(&self, slot: Uuid) -> Result<Vec<u8>, TransportError> {
        let [identifier, kind, name] = self.info.to_characteristics();
        match slot {
            s if s == IDENTIFIER_CHARACTERISTIC => Ok(identifier),
            s if s == DEVICE_KIND_CHARACTERISTIC => Ok(kind),
            s if s == DEVICE_NAME_CHARACTERISTIC => Ok(name),
            other => Err(TransportError::CharacteristicNotFound(other)),
        }
    }

    /// Handles one write; returns notifications to emit as `(slot, chunks)`.
    fn handle_write(
        &mut self,
        slot: Uuid,
        bytes: &[u8],
        clock: &dyn Clock,
    ) -> Result<Option<(Uuid, Vec<Chunk>)>, TransportError> {
        let service = self
            .service()
            .ok_or(TransportError::CharacteristicNotFound(slot))?;

        let response = if slot == service.slot(MessageKind::InformationRequest) {
            self.answer_information_request(bytes, clock)
        } else if slot == service.slot(MessageKind::ActionRequest) {
            self.accept_action_chunk(bytes, clock)
        } else {
            return Err(TransportError::CharacteristicNotFound(slot));
        };

        match response {
            Ok(Some((kind, mut chunks))) => {
                if self.behavior.corrupt_responses {
                    if let Some(byte) = chunks.last_mut().and_then(|c| c.payload.last_mut()) {
                        *byte ^= 0x01;
                    }
                }
                if self.behavior.reverse_chunks {
                    chunks.reverse();
                }
                Ok(Some((service.slot(kind), chunks)))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(device = %self.info.id, error = %e, "simulated device ignored request");
                Ok(None)
            }
        }
    }

    fn answer_information_request(
        &mut self,
        bytes: &[u8],
        clock: &dyn Clock,
    ) -> Result<Option<(MessageKind, Vec<Chunk>)>, ProtocolError> {
        let request: InformationRequest = decode(bytes)?;
        if !request.authentication.is_authentic(&self.key) {
            return Err(ProtocolError::AuthenticationFailed);
        }
        self.replay_guard
            .accept(&request.authentication.message, clock)?;

        let max = self.behavior.max_chunk_payload;
        let chunks = match &self.state {
            Some(DeviceState::PowerSource(status)) => seal(status, &self.key, max)?,
            Some(DeviceState::Accessory(status)) => seal(status, &self.key, max)?,
            None => return Ok(None),
        };
        Ok(Some((MessageKind::InformationResponse, chunks)))
    }

    fn accept_action_chunk(
        &mut self,
        bytes: &[u8],
        clock: &dyn Clock,
    ) -> Result<Option<(MessageKind, Vec<Chunk>)>, ProtocolError> {
        let chunk = Chunk::from_bytes(bytes)?;
        let Some(payload) = self.action_buffer.push(chunk)? else {
            return Ok(None);
        };

        let (target, authentication) = match self.state {
            Some(DeviceState::PowerSource(_)) => {
                let opened: Opened<PowerSourceState> = open_reassembled(&payload, &self.key)?;
                (PowerState::from(opened.value), opened.authentication)
            }
            Some(DeviceState::Accessory(_)) => {
                let opened: Opened<AccessoryState> = open_reassembled(&payload, &self.key)?;
                (opened.value, opened.authentication)
            }
            None => return Ok(None),
        };
        self.replay_guard.accept(&authentication, clock)?;

        let result = if let Some(reason) = &self.behavior.reject_actions {
            ActionResult::failure(reason.clone())
        } else {
            let applied = self
                .state
                .as_mut()
                .is_some_and(|state| state.set_power_state(target));
            if applied {
                ActionResult::success()
            } else {
                ActionResult::failure(format!("unsupported state {target:?}"))
            }
        };
        debug!(device = %self.info.id, ?target, success = result.success, "simulated action");

        let chunks = seal(&result, &self.key, self.behavior.max_chunk_payload)?;
        Ok(Some((MessageKind::ActionResponse, chunks)))
    }
}

/// One write observed by the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub peripheral: PeripheralId,
    pub slot: Uuid,
    pub bytes: Vec<u8>,
}

struct Listener<T> {
    id: u64,
    sender: mpsc::UnboundedSender<T>,
}

#[derive(Default)]
struct Inner {
    peripherals: HashMap<PeripheralId, SimulatedPeripheral>,
    notifications: HashMap<(PeripheralId, Uuid), Vec<Listener<Vec<u8>>>>,
    disconnects: HashMap<PeripheralId, Vec<Listener<()>>>,
    next_listener: u64,
    writes: Vec<WriteRecord>,
}

impl Inner {
    fn peripheral_mut(
        &mut self,
        peripheral: &PeripheralId,
    ) -> Result<&mut SimulatedPeripheral, TransportError> {
        self.peripherals
            .get_mut(peripheral)
            .ok_or_else(|| TransportError::NotConnected(peripheral.clone()))
    }

    fn connected_mut(
        &mut self,
        peripheral: &PeripheralId,
    ) -> Result<&mut SimulatedPeripheral, TransportError> {
        let p = self.peripheral_mut(peripheral)?;
        if p.connected {
            Ok(p)
        } else {
            Err(TransportError::NotConnected(peripheral.clone()))
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_listener += 1;
        self.next_listener
    }

    fn deliver(&mut self, peripheral: &PeripheralId, slot: Uuid, bytes: &[u8]) -> usize {
        let Some(listeners) = self.notifications.get(&(peripheral.clone(), slot)) else {
            return 0;
        };
        listeners
            .iter()
            .filter(|l| l.sender.send(bytes.to_vec()).is_ok())
            .count()
    }

    fn drop_link(&mut self, peripheral: &PeripheralId) {
        if let Some(p) = self.peripherals.get_mut(peripheral) {
            p.connected = false;
            p.action_buffer.reset();
        }
        if let Some(listeners) = self.disconnects.get(peripheral) {
            for listener in listeners {
                let _ = listener.sender.send(());
            }
        }
    }
}

/// A [`Link`] whose peripherals are in-process simulations.
#[derive(Clone)]
pub struct SimulatedLink {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLink {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock the simulated devices use for freshness and replay checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Places a device at `address`.
    pub fn add_peripheral(&self, address: &str, peripheral: SimulatedPeripheral) -> PeripheralId {
        let id = PeripheralId(address.to_string());
        self.lock().peripherals.insert(id.clone(), peripheral);
        id
    }

    /// Moves a device in or out of radio range; out of range also drops the link.
    pub fn set_in_range(&self, peripheral: &PeripheralId, in_range: bool) {
        let mut inner = self.lock();
        let was_connected = match inner.peripherals.get_mut(peripheral) {
            Some(p) => {
                p.in_range = in_range;
                p.connected
            }
            None => return,
        };
        if !in_range && was_connected {
            inner.drop_link(peripheral);
        }
    }

    pub fn set_behavior(&self, peripheral: &PeripheralId, behavior: PeripheralBehavior) {
        if let Some(p) = self.lock().peripherals.get_mut(peripheral) {
            p.behavior = behavior;
        }
    }

    /// Current state held by the simulated device.
    pub fn device_state(&self, peripheral: &PeripheralId) -> Option<DeviceState> {
        self.lock().peripherals.get(peripheral).and_then(|p| p.state)
    }

    pub fn set_device_state(&self, peripheral: &PeripheralId, state: DeviceState) {
        if let Some(p) = self.lock().peripherals.get_mut(peripheral) {
            p.state = Some(state);
        }
    }

    pub fn is_connected(&self, peripheral: &PeripheralId) -> bool {
        self.lock()
            .peripherals
            .get(peripheral)
            .is_some_and(|p| p.connected)
    }

    /// Every write seen so far, in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    /// Number of writes to `slot` on `peripheral`.
    pub fn writes_to(&self, peripheral: &PeripheralId, slot: Uuid) -> usize {
        self.lock()
            .writes
            .iter()
            .filter(|w| &w.peripheral == peripheral && w.slot == slot)
            .count()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Live notification subscriptions on any slot of `peripheral`.
    pub fn notification_listeners(&self, peripheral: &PeripheralId) -> usize {
        self.lock()
            .notifications
            .iter()
            .filter(|((p, _), _)| p == peripheral)
            .map(|(_, listeners)| listeners.len())
            .sum()
    }

    pub fn disconnect_listeners(&self, peripheral: &PeripheralId) -> usize {
        self.lock()
            .disconnects
            .get(peripheral)
            .map_or(0, Vec::len)
    }

    /// Emits a notification as if the device sent it; returns how many
    /// subscribers received it.
    pub fn notify(&self, peripheral: &PeripheralId, slot: Uuid, bytes: &[u8]) -> usize {
        self.lock().deliver(peripheral, slot, bytes)
    }

    /// Drops the link as if the device went away.
    pub fn drop_link(&self, peripheral: &PeripheralId) {
        self.lock().drop_link(peripheral);
    }

    fn cancel_hook(
        &self,
        remove: fn(&mut Inner, u64),
        id: u64,
    ) -> impl FnOnce() + Send + Sync + 'static {
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = weak.upgrade() {
                let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
                remove(&mut guard, id);
            }
        }
    }
}

fn remove_notification_listener(inner: &mut Inner, id: u64) {
    for listeners in inner.notifications.values_mut() {
        listeners.retain(|l| l.id != id);
    }
    inner.notifications.retain(|_, listeners| !listeners.is_empty());
}

fn remove_disconnect_listener(inner: &mut Inner, id: u64) {
    for listeners in inner.disconnects.values_mut() {
        listeners.retain(|l| l.id != id);
    }
    inner.disconnects.retain(|_, listeners| !listeners.is_empty());
}

#[async_trait]
impl Link for SimulatedLink {
    async fn scan(&self, _duration: Duration) -> Result<Vec<Advertisement>, TransportError> {
        let inner = self.lock();
        let mut ads: Vec<Advertisement> = inner
            .peripherals
            .iter()
            .filter(|(_, p)| p.in_range)
            .map(|(id, p)| p.advertisement(id))
            .collect();
        ads.sort_by(|a, b| a.peripheral.cmp(&b.peripheral));
        Ok(ads)
    }

    async fn connect(
        &self,
        peripheral: &PeripheralId,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        let mut inner = self.lock();
        let p = inner
            .peripherals
            .get_mut(peripheral)
            .filter(|p| p.in_range)
            .ok_or_else(|| TransportError::ConnectFailed {
                peripheral: peripheral.clone(),
                reason: "peripheral not in range".to_string(),
            })?;
        p.connected = true;
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.peripheral_mut(peripheral)?.connected {
            inner.drop_link(peripheral);
        }
        Ok(())
    }

    async fn read(
        &self,
        peripheral: &PeripheralId,
        slot: Uuid,
        _timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.lock().connected_mut(peripheral)?.read(slot)
    }

    async fn write(
        &self,
        peripheral: &PeripheralId,
        slot: Uuid,
        bytes: &[u8],
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        let mut inner = self.lock();
        let device = inner.connected_mut(peripheral)?;
        let behavior = device.behavior.clone();
        let response = if behavior.silent || behavior.disconnect_on_request {
            None
        } else {
            device.handle_write(slot, bytes, self.clock.as_ref())?
        };

        inner.writes.push(WriteRecord {
            peripheral: peripheral.clone(),
            slot,
            bytes: bytes.to_vec(),
        });
        if behavior.disconnect_on_request {
            inner.drop_link(peripheral);
        }
        if let Some((response_slot, chunks)) = response {
            for chunk in chunks {
                inner.deliver(peripheral, response_slot, &chunk.to_bytes());
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        peripheral: &PeripheralId,
        slot: Uuid,
    ) -> Result<Subscription<Vec<u8>>, TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.lock();
            inner.connected_mut(peripheral)?;
            let id = inner.next_id();
            inner
                .notifications
                .entry((peripheral.clone(), slot))
                .or_default()
                .push(Listener { id, sender });
            id
        };
        Ok(Subscription::new(
            receiver,
            self.cancel_hook(remove_notification_listener, id),
        ))
    }

    async fn on_disconnect(
        &self,
        peripheral: &PeripheralId,
    ) -> Result<Subscription<()>, TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.lock();
            inner.connected_mut(peripheral)?;
            let id = inner.next_id();
            inner
                .disconnects
                .entry(peripheral.clone())
                .or_default()
                .push(Listener { id, sender });
            id
        };
        Ok(Subscription::new(
            receiver,
            self.cancel_hook(remove_disconnect_listener, id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_core::{AccessoryType, PowerSourceCategory, VoltageSystem};

    fn outlet() -> AccessoryStatus {
        AccessoryStatus {
            voltage: VoltageSystem::Ac110,
            accessory_type: AccessoryType::Outlet,
            state: PowerState::On,
            active_power: 120,
        }
    }

    #[tokio::test]
    async fn test_scan_lists_only_peripherals_in_range() {
        // Arrange
        let link = SimulatedLink::new();
        let near = link.add_peripheral(
            "sim-a",
            SimulatedPeripheral::accessory(Uuid::new_v4(), "Near", PrivateKey::generate(), outlet()),
        );
        let far = link.add_peripheral(
            "sim-b",
            SimulatedPeripheral::accessory(Uuid::new_v4(), "Far", PrivateKey::generate(), outlet()),
        );
        link.set_in_range(&far, false);

        // Act
        let ads = link.scan(Duration::from_millis(1)).await.unwrap();

        // Assert
        assert_eq!(ads.len(), 1);
        assert_eq!(ads[0].peripheral, near);
        assert!(ads[0].services.contains(&ENERGY_SERVICE));
        assert!(ads[0].services.contains(&DeviceService::Accessory.uuid()));
    }

    #[tokio::test]
    async fn test_connect_out_of_range_fails() {
        let link = SimulatedLink::new();
        let id = link.add_peripheral("sim-a", SimulatedPeripheral::controller(Uuid::new_v4(), "Hub"));
        link.set_in_range(&id, false);

        let result = link.connect(&id, Duration::from_secs(1)).await;

        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_read_identity_characteristics() {
        // Arrange
        let device = Uuid::new_v4();
        let link = SimulatedLink::new();
        let id = link.add_peripheral(
            "sim-a",
            SimulatedPeripheral::accessory(device, "Porch light", PrivateKey::generate(), outlet()),
        );
        link.connect(&id, Duration::from_secs(1)).await.unwrap();

        // Act
        let identifier = link
            .read(&id, IDENTIFIER_CHARACTERISTIC, Duration::from_secs(1))
            .await
            .unwrap();
        let name = link
            .read(&id, DEVICE_NAME_CHARACTERISTIC, Duration::from_secs(1))
            .await
            .unwrap();

        // Assert
        assert_eq!(identifier, device.as_bytes().to_vec());
        assert_eq!(name, b"Porch light".to_vec());
    }

    #[tokio::test]
    async fn test_read_requires_connection() {
        let link = SimulatedLink::new();
        let id = link.add_peripheral("sim-a", SimulatedPeripheral::controller(Uuid::new_v4(), "Hub"));
        let result = link
            .read(&id, IDENTIFIER_CHARACTERISTIC, Duration::from_secs(1))
            .await;
        assert_eq!(result, Err(TransportError::NotConnected(id)));
    }

    #[tokio::test]
    async fn test_dropping_subscription_removes_listener() {
        // Arrange
        let link = SimulatedLink::new();
        let id = link.add_peripheral("sim-a", SimulatedPeripheral::controller(Uuid::new_v4(), "Hub"));
        link.connect(&id, Duration::from_secs(1)).await.unwrap();
        let slot = Uuid::new_v4();
        let sub = link.subscribe(&id, slot).await.unwrap();
        let watch = link.on_disconnect(&id).await.unwrap();
        assert_eq!(link.notification_listeners(&id), 1);
        assert_eq!(link.disconnect_listeners(&id), 1);

        // Act
        drop(sub);
        watch.cancel();

        // Assert
        assert_eq!(link.notification_listeners(&id), 0);
        assert_eq!(link.disconnect_listeners(&id), 0);
        assert_eq!(link.notify(&id, slot, b"late"), 0);
    }

    #[tokio::test]
    async fn test_drop_link_signals_disconnect_listeners() {
        let link = SimulatedLink::new();
        let id = link.add_peripheral("sim-a", SimulatedPeripheral::controller(Uuid::new_v4(), "Hub"));
        link.connect(&id, Duration::from_secs(1)).await.unwrap();
        let mut watch = link.on_disconnect(&id).await.unwrap();

        link.drop_link(&id);

        assert_eq!(watch.recv().await, Some(()));
        assert!(!link.is_connected(&id));
    }

    fn generator(key: &PrivateKey) -> SimulatedPeripheral {
        let status = PowerSourceStatus {
            voltage: VoltageSystem::Dc24,
            category: PowerSourceCategory::Solar,
            state: PowerSourceState::On,
            active_power: 300,
            load_percent: 20,
            battery_capacity: Some(90),
        };
        SimulatedPeripheral::power_source(Uuid::new_v4(), "Roof", key.clone(), status)
    }

    fn send_action(
        device: &mut SimulatedPeripheral,
        key: &PrivateKey,
        target: PowerSourceState,
    ) -> ActionResult {
        let slot = DeviceService::PowerSource.slot(MessageKind::ActionRequest);
        let mut response = None;
        for chunk in seal(&target, key, DEFAULT_MAX_CHUNK_PAYLOAD).unwrap() {
            response = device
                .handle_write(slot, &chunk.to_bytes(), &SystemClock)
                .unwrap();
        }
        let (response_slot, chunks) = response.expect("device answers the last chunk");
        assert_eq!(
            response_slot,
            DeviceService::PowerSource.slot(MessageKind::ActionResponse)
        );
        energy_core::open::<ActionResult>(&chunks, key).unwrap().value
    }

    #[test]
    fn test_action_request_switches_device_state() {
        // Arrange
        let key = PrivateKey::generate();
        let mut device = generator(&key);

        // Act
        let result = send_action(&mut device, &key, PowerSourceState::Off);

        // Assert
        assert_eq!(result, ActionResult::success());
        assert_eq!(
            device.state.map(|s| s.power_state()),
            Some(PowerState::Off)
        );
    }

    #[test]
    fn test_rejecting_device_keeps_its_state() {
        let key = PrivateKey::generate();
        let mut device = generator(&key).with_behavior(PeripheralBehavior {
            reject_actions: Some("inverter fault".to_string()),
            ..PeripheralBehavior::default()
        });

        let result = send_action(&mut device, &key, PowerSourceState::Off);

        assert_eq!(result, ActionResult::failure("inverter fault"));
        assert_eq!(device.state.map(|s| s.power_state()), Some(PowerState::On));
    }
}
