//! In-memory cache of the last state read from each device.
//!
//! Owned by the automation engine.  Cleared at the start of every reading
//! phase, so an entry only exists for devices that answered in the current
//! cycle.  A missing entry means "unknown", never "off".

use std::collections::HashMap;
use std::time::Instant;

use energy_core::{DeviceId, DeviceState, PowerState};

/// One cached reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedState {
    pub state: DeviceState,
    pub read_at: Instant,
}

/// Latest [`DeviceState`] per device.
#[derive(Debug, Default)]
pub struct DeviceStateCache {
    entries: HashMap<DeviceId, CachedState>,
}

impl DeviceStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the state for `id`.
    pub fn insert(&mut self, id: DeviceId, state: DeviceState) {
        self.entries.insert(
            id,
            CachedState {
                state,
                read_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, id: DeviceId) -> Option<&DeviceState> {
        self.entries.get(&id).map(|entry| &entry.state)
    }

    pub fn entry(&self, id: DeviceId) -> Option<&CachedState> {
        self.entries.get(&id)
    }

    /// Records that `id` was switched to `state` by an action.
    ///
    /// Returns `false` if the device has no cached state or the state does
    /// not apply to its kind.
    pub fn record_action(&mut self, id: DeviceId, state: PowerState) -> bool {
        self.entries
            .get_mut(&id)
            .map(|entry| entry.state.set_power_state(state))
            .unwrap_or(false)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn device_ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.entries.keys().copied()
    }
}
