//! Integration tests for the automation engine.
//!
//! # Purpose
//!
//! A full evaluation cycle (discover, read, evaluate) runs against
//! simulated devices on a `SimulatedLink`.  The tests verify:
//!
//! - A true condition switches its target exactly once; the next cycle sees
//!   the target already in state and writes nothing.
//! - One failing action does not stop the others.
//! - Configuration problems (missing key or device, a state the target
//!   cannot take) skip the automation without touching the link.
//! - Unknown and mismatched devices are ignored during discovery.
//! - The scheduler stops when its flag is cleared.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use energy_controller::infrastructure::link::{PeripheralBehavior, SimulatedLink, SimulatedPeripheral};
use energy_controller::{
    AutomationEngine, AutomationOutcome, ConfigurationError, CyclePhase, EngineSettings, Link,
    PeripheralId, SessionError, SessionSettings, TransportError,
};
use energy_core::domain::automation::{Action, Condition};
use energy_core::protocol::{DeviceService, MessageKind};
use energy_core::{
    AccessoryStatus, AccessoryType, Automation, Comparison, Device, DeviceId, DeviceKind,
    EnergyConfiguration, PowerSourceCategory, PowerSourceState, PowerSourceStatus, PowerState,
    Predicate, PrivateKey, VoltageSystem,
};
use uuid::Uuid;

// ── Fixture ───────────────────────────────────────────────────────────────────

const REQUEST_TIMEOUT: Duration = Duration::from_millis(150);

/// Devices, keys and automations assembled for one test.
#[derive(Default)]
struct Site {
    link: SimulatedLink,
    devices: Vec<Device>,
    keys: HashMap<DeviceId, PrivateKey>,
    automations: Vec<Automation>,
    next_address: usize,
}

impl Site {
    fn new() -> Self {
        Self::default()
    }

    fn address(&mut self) -> String {
        self.next_address += 1;
        format!("sim-{}", self.next_address)
    }

    /// A grid power source currently delivering `active_power` watts.
    fn power_source(&mut self, active_power: u16) -> (DeviceId, PeripheralId) {
        let id = Uuid::new_v4();
        let key = PrivateKey::generate();
        let status = PowerSourceStatus {
            voltage: VoltageSystem::Dc48,
            category: PowerSourceCategory::Grid,
            state: PowerSourceState::On,
            active_power,
            load_percent: 40,
            battery_capacity: Some(80),
        };
        let address = self.address();
        let peripheral = self.link.add_peripheral(
            &address,
            SimulatedPeripheral::power_source(id, "Grid tie", key.clone(), status),
        );
        self.devices.push(Device::PowerSource {
            id,
            name: "Grid tie".to_string(),
            voltage: VoltageSystem::Dc48,
            category: PowerSourceCategory::Grid,
        });
        self.keys.insert(id, key);
        (id, peripheral)
    }

    /// An outlet that is on, with the given failure behaviour.
    fn outlet(&mut self, behavior: PeripheralBehavior) -> (DeviceId, PeripheralId) {
        let id = Uuid::new_v4();
        let key = PrivateKey::generate();
        let status = AccessoryStatus {
            voltage: VoltageSystem::Dc48,
            accessory_type: AccessoryType::Outlet,
            state: PowerState::On,
            active_power: 25,
        };
        let address = self.address();
        let peripheral = self.link.add_peripheral(
            &address,
            SimulatedPeripheral::accessory(id, "Outlet", key.clone(), status).with_behavior(behavior),
        );
        self.devices.push(Device::Accessory {
            id,
            name: "Outlet".to_string(),
            voltage: VoltageSystem::Dc48,
            accessory_type: AccessoryType::Outlet,
        });
        self.keys.insert(id, key);
        (id, peripheral)
    }

    /// Adds "when `watched` draws more than `watts`, set `target` to `state`".
    fn when_power_above(&mut self, watched: DeviceId, watts: u16, target: DeviceId, state: PowerState) -> Uuid {
        let id = Uuid::new_v4();
        self.automations.push(Automation {
            id,
            name: format!("shed {target}"),
            condition: Condition {
                device: watched,
                predicate: Predicate::ActivePower {
                    op: Comparison::Greater,
                    value: watts,
                },
            },
            action: Action {
                device: target,
                state,
            },
        });
        id
    }

    fn engine(&self) -> AutomationEngine {
        let config = EnergyConfiguration::new(
            self.devices.clone(),
            self.keys.clone(),
            self.automations.clone(),
        );
        let settings = EngineSettings {
            scan_duration: Duration::from_millis(1),
            session: SessionSettings {
                request_timeout: REQUEST_TIMEOUT,
                ..SessionSettings::default()
            },
        };
        let link: Arc<dyn Link> = Arc::new(self.link.clone());
        AutomationEngine::new(link, Arc::new(config), settings)
    }
}

fn action_writes(link: &SimulatedLink, peripheral: &PeripheralId) -> usize {
    link.writes_to(peripheral, DeviceService::Accessory.slot(MessageKind::ActionRequest))
}

// ── Load shedding scenario ────────────────────────────────────────────────────

/// A 50 W reading above a 40 W threshold switches the outlet off once; the
/// next cycle finds it already off and sends nothing.
#[tokio::test]
async fn test_true_condition_switches_target_once() {
    // Arrange
    let mut site = Site::new();
    let (source, _) = site.power_source(50);
    let (outlet, outlet_peripheral) = site.outlet(PeripheralBehavior::default());
    let rule = site.when_power_above(source, 40, outlet, PowerState::Off);
    let mut engine = site.engine();

    // Act
    let first = engine.run_cycle().await;

    // Assert
    assert_eq!(first.outcome(rule), Some(&AutomationOutcome::Applied));
    assert_eq!(first.actions_applied(), 1);
    assert!(action_writes(&site.link, &outlet_peripheral) > 0);
    assert_eq!(
        site.link.device_state(&outlet_peripheral).map(|s| s.power_state()),
        Some(PowerState::Off)
    );
    assert_eq!(
        engine.cache().get(outlet).map(|s| s.power_state()),
        Some(PowerState::Off),
        "cache follows the applied action"
    );
    assert_eq!(engine.phase(), CyclePhase::Idle);

    // Act
    site.link.clear_writes();
    let second = engine.run_cycle().await;

    // Assert
    assert_eq!(second.outcome(rule), Some(&AutomationOutcome::AlreadyInState));
    assert_eq!(action_writes(&site.link, &outlet_peripheral), 0);
}

/// A false condition leaves the target alone.
#[tokio::test]
async fn test_false_condition_writes_nothing() {
    let mut site = Site::new();
    let (source, _) = site.power_source(30);
    let (outlet, outlet_peripheral) = site.outlet(PeripheralBehavior::default());
    let rule = site.when_power_above(source, 40, outlet, PowerState::Off);
    let mut engine = site.engine();

    let report = engine.run_cycle().await;

    assert_eq!(report.outcome(rule), Some(&AutomationOutcome::ConditionFalse));
    assert_eq!(action_writes(&site.link, &outlet_peripheral), 0);
}

/// Connections opened during a cycle are all closed at the end of it.
#[tokio::test]
async fn test_cycle_disconnects_every_device() {
    let mut site = Site::new();
    let (source, source_peripheral) = site.power_source(50);
    let (outlet, outlet_peripheral) = site.outlet(PeripheralBehavior::default());
    site.when_power_above(source, 40, outlet, PowerState::Off);
    let mut engine = site.engine();

    let report = engine.run_cycle().await;

    assert_eq!(report.discovered.len(), 2);
    assert_eq!(report.read.len(), 2);
    assert!(!site.link.is_connected(&source_peripheral));
    assert!(!site.link.is_connected(&outlet_peripheral));
}

// ── Partial failure ───────────────────────────────────────────────────────────

/// A rejecting and a silent target fail, the healthy one in between still
/// gets switched.
#[tokio::test]
async fn test_failed_action_does_not_stop_later_automations() {
    // Arrange
    let mut site = Site::new();
    let (source, _) = site.power_source(50);
    let (rejecting, _) = site.outlet(PeripheralBehavior {
        reject_actions: Some("relay stuck".to_string()),
        ..PeripheralBehavior::default()
    });
    let (healthy, healthy_peripheral) = site.outlet(PeripheralBehavior::default());
    let (silent, _) = site.outlet(PeripheralBehavior {
        silent: true,
        ..PeripheralBehavior::default()
    });
    let a = site.when_power_above(source, 40, rejecting, PowerState::Off);
    let b = site.when_power_above(source, 40, healthy, PowerState::Off);
    let c = site.when_power_above(source, 40, silent, PowerState::Off);
    let mut engine = site.engine();

    // Act
    let report = engine.run_cycle().await;

    // Assert
    assert_eq!(
        report.outcome(a),
        Some(&AutomationOutcome::Failed(SessionError::Rejected(
            "relay stuck".to_string()
        )))
    );
    assert_eq!(report.outcome(b), Some(&AutomationOutcome::Applied));
    assert!(matches!(
        report.outcome(c),
        Some(AutomationOutcome::Failed(SessionError::Transport(
            TransportError::Timeout { .. }
        )))
    ));
    assert_eq!(report.actions_applied(), 1);
    assert_eq!(report.actions_failed(), 2);
    assert!(report.read_failures.iter().any(|(id, _)| *id == silent));
    assert_eq!(
        site.link.device_state(&healthy_peripheral).map(|s| s.power_state()),
        Some(PowerState::Off)
    );
}

/// B's read fails; A and C are cached and their automations still evaluate.
#[tokio::test]
async fn test_read_failure_is_isolated_to_one_device() {
    // Arrange
    let mut site = Site::new();
    let (a, _) = site.power_source(50);
    let (b, _) = site.outlet(PeripheralBehavior {
        silent: true,
        ..PeripheralBehavior::default()
    });
    let (c, c_peripheral) = site.outlet(PeripheralBehavior::default());
    let from_b = site.when_power_above(b, 0, c, PowerState::Off);
    let from_a = site.when_power_above(a, 40, c, PowerState::LowPowerMode);
    let mut engine = site.engine();

    // Act
    let report = engine.run_cycle().await;

    // Assert
    assert!(engine.cache().get(a).is_some());
    assert!(engine.cache().get(b).is_none());
    assert!(engine.cache().get(c).is_some());
    assert_eq!(report.read_failures.len(), 1);
    assert_eq!(report.outcome(from_b), Some(&AutomationOutcome::ConditionUnknown));
    assert_eq!(report.outcome(from_a), Some(&AutomationOutcome::Applied));
    assert_eq!(
        site.link.device_state(&c_peripheral).map(|s| s.power_state()),
        Some(PowerState::LowPowerMode)
    );
}

// ── Configuration problems ────────────────────────────────────────────────────

/// A target without a key is skipped before anything is written.
#[tokio::test]
async fn test_missing_key_skips_automation() {
    let mut site = Site::new();
    let (source, _) = site.power_source(50);
    let (outlet, outlet_peripheral) = site.outlet(PeripheralBehavior::default());
    site.keys.remove(&outlet);
    let rule = site.when_power_above(source, 40, outlet, PowerState::Off);
    let mut engine = site.engine();

    let report = engine.run_cycle().await;

    assert_eq!(
        report.outcome(rule),
        Some(&AutomationOutcome::Skipped(ConfigurationError::MissingKey(outlet)))
    );
    assert_eq!(action_writes(&site.link, &outlet_peripheral), 0);
}

/// A target that is not configured is skipped.
#[tokio::test]
async fn test_missing_device_skips_automation() {
    let mut site = Site::new();
    let (source, _) = site.power_source(50);
    let ghost = Uuid::new_v4();
    let rule = site.when_power_above(source, 40, ghost, PowerState::Off);
    let mut engine = site.engine();

    let report = engine.run_cycle().await;

    assert_eq!(
        report.outcome(rule),
        Some(&AutomationOutcome::Skipped(ConfigurationError::MissingDevice(ghost)))
    );
}

/// A configured target that is out of range is skipped as missing.
#[tokio::test]
async fn test_unreachable_target_skips_automation() {
    let mut site = Site::new();
    let (source, _) = site.power_source(50);
    let (outlet, outlet_peripheral) = site.outlet(PeripheralBehavior::default());
    site.link.set_in_range(&outlet_peripheral, false);
    let rule = site.when_power_above(source, 40, outlet, PowerState::Off);
    let mut engine = site.engine();

    let report = engine.run_cycle().await;

    assert_eq!(
        report.outcome(rule),
        Some(&AutomationOutcome::Skipped(ConfigurationError::MissingDevice(outlet)))
    );
}

/// Low-power mode is not a power source state; the action is never attempted.
#[tokio::test]
async fn test_low_power_mode_on_power_source_is_invalid() {
    // Arrange
    let mut site = Site::new();
    let (watched, _) = site.power_source(50);
    let (target, target_peripheral) = site.power_source(10);
    let rule = site.when_power_above(watched, 40, target, PowerState::LowPowerMode);
    let mut engine = site.engine();

    // Act
    let report = engine.run_cycle().await;

    // Assert
    assert_eq!(
        report.outcome(rule),
        Some(&AutomationOutcome::Skipped(
            ConfigurationError::InvalidActionForKind {
                device: target,
                kind: DeviceKind::PowerSource,
                state: PowerState::LowPowerMode,
            }
        ))
    );
    let slot = DeviceService::PowerSource.slot(MessageKind::ActionRequest);
    assert_eq!(site.link.writes_to(&target_peripheral, slot), 0);
}

/// With the watched device out of range the condition is unknown and nothing happens.
#[tokio::test]
async fn test_unknown_condition_state_takes_no_action() {
    let mut site = Site::new();
    let (source, source_peripheral) = site.power_source(50);
    let (outlet, outlet_peripheral) = site.outlet(PeripheralBehavior::default());
    site.link.set_in_range(&source_peripheral, false);
    let rule = site.when_power_above(source, 40, outlet, PowerState::Off);
    let mut engine = site.engine();

    let report = engine.run_cycle().await;

    assert_eq!(report.outcome(rule), Some(&AutomationOutcome::ConditionUnknown));
    assert_eq!(action_writes(&site.link, &outlet_peripheral), 0);
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// Unconfigured devices and devices reporting the wrong kind are ignored.
#[tokio::test]
async fn test_discovery_ignores_unknown_and_mismatched_devices() {
    // Arrange
    let mut site = Site::new();
    let (source, _) = site.power_source(50);
    site.link.add_peripheral(
        "stranger",
        SimulatedPeripheral::controller(Uuid::new_v4(), "Neighbour hub"),
    );
    let impostor = Uuid::new_v4();
    site.devices.push(Device::Accessory {
        id: impostor,
        name: "Impostor".to_string(),
        voltage: VoltageSystem::Dc12,
        accessory_type: AccessoryType::Light,
    });
    let lamp = AccessoryStatus {
        voltage: VoltageSystem::Dc12,
        accessory_type: AccessoryType::Light,
        state: PowerState::On,
        active_power: 5,
    };
    site.link.add_peripheral(
        "impostor",
        SimulatedPeripheral::accessory(impostor, "Impostor", PrivateKey::generate(), lamp)
            .reporting_kind(DeviceKind::PowerSource),
    );
    let mut engine = site.engine();

    // Act
    let report = engine.run_cycle().await;

    // Assert
    assert_eq!(report.discovered, vec![source]);
    assert_eq!(engine.cache().len(), 1);
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// Clearing the running flag ends the loop after the current cycle.
#[tokio::test]
async fn test_run_until_stopped_honours_flag() {
    // Arrange
    let mut site = Site::new();
    let (source, _) = site.power_source(50);
    let (outlet, _) = site.outlet(PeripheralBehavior::default());
    site.when_power_above(source, 40, outlet, PowerState::Off);
    let mut engine = site.engine();
    let running = Arc::new(AtomicBool::new(true));
    let stopper = Arc::clone(&running);
    let stop = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        stopper.store(false, Ordering::Release);
    });

    // Act
    let cycles = tokio::time::timeout(
        Duration::from_secs(5),
        engine.run_until_stopped(Duration::from_millis(20), running),
    )
    .await
    .expect("engine stops once the flag is cleared");

    // Assert
    stop.await.unwrap();
    assert!(cycles >= 1);
    assert_eq!(engine.phase(), CyclePhase::Idle);
}
