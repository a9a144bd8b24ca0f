//! AutomationEngine: discover devices, read their state, apply automations.
//!
//! # The evaluation cycle (for beginners)
//!
//! ```text
//!  Idle ──► Discovering ──► Reading ──► Evaluating ──► Idle
//! ```
//!
//! - **Discovering**: scan for devices advertising the energy service, connect
//!   to each, read its identity, and keep the ones that match configuration.
//! - **Reading**: clear the state cache, then ask every discovered device for
//!   its state.  Reads run in parallel; a device that fails is logged and left
//!   out of the cache.
//! - **Evaluating**: walk the automations in configuration order.  Each one is
//!   evaluated against the cache and, if its condition holds and the target is
//!   not already in the desired state, the target is switched.
//!
//! One failing device or automation never aborts the cycle.  Nothing is
//! retried; the next cycle simply tries again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use energy_core::crypto::freshness::{Clock, SystemClock};
use energy_core::domain::automation::Action;
use energy_core::protocol::messages::ENERGY_SERVICE;
use energy_core::{
    Automation, DeviceId, DeviceKind, EnergyConfiguration, PowerState, PredicateError,
    PrivateKey,
};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::link::{Advertisement, Link};
use super::session::{DeviceSession, SessionError, SessionSettings};
use super::state_cache::DeviceStateCache;

/// Longest sleep between checks of the stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An automation refers to something configuration cannot provide.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no private key configured for device {0}")]
    MissingKey(DeviceId),

    /// Not configured, or not found during discovery this cycle.
    #[error("device {0} is not configured or not reachable")]
    MissingDevice(DeviceId),

    #[error("{state:?} is not a valid action for {kind} {device}")]
    InvalidActionForKind {
        device: DeviceId,
        kind: DeviceKind,
        state: PowerState,
    },
}

/// Where the engine is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    Discovering,
    Reading,
    Evaluating,
}

/// What happened to one automation during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationOutcome {
    /// The condition device has no state this cycle.
    ConditionUnknown,
    /// The predicate could not be evaluated; treated as false.
    PredicateFailed(PredicateError),
    ConditionFalse,
    /// The target already has the desired state; nothing was written.
    AlreadyInState,
    /// The action could not be resolved and was not attempted.
    Skipped(ConfigurationError),
    Applied,
    /// The action was attempted and failed.
    Failed(SessionError),
}

/// Per-automation line of a [`CycleReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationReport {
    pub automation: Uuid,
    pub outcome: AutomationOutcome,
}

/// Summary of one evaluation cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Configured devices found and identified.
    pub discovered: Vec<DeviceId>,
    /// Devices whose state was read successfully.
    pub read: Vec<DeviceId>,
    pub read_failures: Vec<(DeviceId, SessionError)>,
    pub automations: Vec<AutomationReport>,
}

impl CycleReport {
    pub fn actions_applied(&self) -> usize {
        self.count(|o| matches!(o, AutomationOutcome::Applied))
    }

    pub fn actions_failed(&self) -> usize {
        self.count(|o| matches!(o, AutomationOutcome::Failed(_)))
    }

    pub fn outcome(&self, automation: Uuid) -> Option<&AutomationOutcome> {
        self.automations
            .iter()
            .find(|r| r.automation == automation)
            .map(|r| &r.outcome)
    }

    fn count(&self, predicate: impl Fn(&AutomationOutcome) -> bool) -> usize {
        self.automations
            .iter()
            .filter(|r| predicate(&r.outcome))
            .count()
    }
}

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub scan_duration: Duration,
    pub session: SessionSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(3),
            session: SessionSettings::default(),
        }
    }
}

type Sessions = HashMap<DeviceId, Arc<DeviceSession>>;

/// Runs evaluation cycles against the devices reachable over a [`Link`].
pub struct AutomationEngine {
    link: Arc<dyn Link>,
    config: Arc<EnergyConfiguration>,
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    cache: DeviceStateCache,
    phase: CyclePhase,
}

impl AutomationEngine {
    pub fn new(
        link: Arc<dyn Link>,
        config: Arc<EnergyConfiguration>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            link,
            config,
            settings,
            clock: Arc::new(SystemClock),
            cache: DeviceStateCache::new(),
            phase: CyclePhase::Idle,
        }
    }

    /// Replaces the clock used for response freshness checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// State read during the most recent cycle.
    pub fn cache(&self) -> &DeviceStateCache {
        &self.cache
    }

    /// Runs cycles back to back, `interval` apart, until `running` is cleared.
    ///
    /// Returns the number of cycles completed.
    pub async fn run_until_stopped(&mut self, interval: Duration, running: Arc<AtomicBool>) -> u64 {
        let mut cycles = 0u64;
        while running.load(Ordering::Acquire) {
            let report = self.run_cycle().await;
            cycles += 1;
            info!(
                cycle = cycles,
                discovered = report.discovered.len(),
                read = report.read.len(),
                applied = report.actions_applied(),
                failed = report.actions_failed(),
                "evaluation cycle complete"
            );

            let next = Instant::now() + interval;
            while running.load(Ordering::Acquire) {
                let now = Instant::now();
                if now >= next {
                    break;
                }
                sleep(STOP_POLL_INTERVAL.min(next - now)).await;
            }
        }
        info!(cycles, "automation engine stopped");
        cycles
    }

    /// Runs one discover → read → evaluate cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let sessions = self.discover(&mut report).await;
        self.read_states(&sessions, &mut report).await;
        self.evaluate(&sessions, &mut report).await;

        for (id, session) in sessions {
            if let Err(e) = self.link.disconnect(session.peripheral()).await {
                debug!(device = %id, error = %e, "disconnect failed");
            }
        }
        self.set_phase(CyclePhase::Idle);
        report
    }

    fn set_phase(&mut self, phase: CyclePhase) {
        debug!(from = ?self.phase, to = ?phase, "cycle phase");
        self.phase = phase;
    }

    // ── Discovering ───────────────────────────────────────────────────────────

    async fn discover(&mut self, report: &mut CycleReport) -> Sessions {
        self.set_phase(CyclePhase::Discovering);
        let mut sessions = Sessions::new();

        let advertisements = match self.link.scan(self.settings.scan_duration).await {
            Ok(ads) => ads,
            Err(e) => {
                warn!(error = %e, "scan failed");
                return sessions;
            }
        };

        for ad in advertisements.into_iter().filter(advertises_energy_service) {
            if let Some((id, session)) = self.identify(&ad).await {
                if sessions.contains_key(&id) {
                    warn!(device = %id, peripheral = %ad.peripheral, "device seen twice, keeping first");
                    close_quietly(session).await;
                    continue;
                }
                report.discovered.push(id);
                sessions.insert(id, Arc::new(session));
            }
        }
        debug!(count = sessions.len(), "discovery finished");
        sessions
    }

    /// Connects and matches the peripheral against configuration.
    async fn identify(&self, ad: &Advertisement) -> Option<(DeviceId, DeviceSession)> {
        let session = match DeviceSession::connect(
            Arc::clone(&self.link),
            ad.peripheral.clone(),
            self.settings.session,
        )
        .await
        {
            Ok(session) => session.with_clock(Arc::clone(&self.clock)),
            Err(e) => {
                warn!(peripheral = %ad.peripheral, error = %e, "connect failed");
                return None;
            }
        };

        let info = match session.read_identity().await {
            Ok(info) => info,
            Err(e) => {
                warn!(peripheral = %ad.peripheral, error = %e, "identity read failed");
                close_quietly(session).await;
                return None;
            }
        };

        match self.config.device(info.id) {
            Some(device) if device.kind() == info.kind => Some((info.id, session)),
            Some(device) => {
                warn!(
                    device = %info.id,
                    configured = %device.kind(),
                    reported = %info.kind,
                    "device kind does not match configuration"
                );
                close_quietly(session).await;
                None
            }
            None => {
                debug!(device = %info.id, name = %info.name, "ignoring unconfigured device");
                close_quietly(session).await;
                None
            }
        }
    }

    // ── Reading ───────────────────────────────────────────────────────────────

    async fn read_states(&mut self, sessions: &Sessions, report: &mut CycleReport) {
        self.set_phase(CyclePhase::Reading);
        self.cache.clear();

        let mut tasks = JoinSet::new();
        for (&id, session) in sessions {
            let Some(kind) = self.config.device(id).map(|d| d.kind()) else {
                continue;
            };
            if kind == DeviceKind::Controller {
                continue;
            }
            let Some(key) = self.config.key(id).cloned() else {
                warn!(device = %id, "no key configured, state not read");
                continue;
            };
            let session = Arc::clone(session);
            tasks.spawn(async move { (id, session.read_state(kind, &key).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(state))) => {
                    self.cache.insert(id, state);
                    report.read.push(id);
                }
                Ok((id, Err(e))) => {
                    warn!(device = %id, error = %e, "state read failed");
                    report.read_failures.push((id, e));
                }
                Err(e) => error!(error = %e, "state read task aborted"),
            }
        }
    }

    // ── Evaluating ────────────────────────────────────────────────────────────

    async fn evaluate(&mut self, sessions: &Sessions, report: &mut CycleReport) {
        self.set_phase(CyclePhase::Evaluating);
        let config = Arc::clone(&self.config);

        for automation in config.automations() {
            let outcome = self.evaluate_one(automation, sessions).await;
            log_outcome(automation, &outcome);
            report.automations.push(AutomationReport {
                automation: automation.id,
                outcome,
            });
        }
    }

    async fn evaluate_one(&mut self, automation: &Automation, sessions: &Sessions) -> AutomationOutcome {
        let condition = &automation.condition;
        let Some(state) = self.cache.get(condition.device) else {
            return AutomationOutcome::ConditionUnknown;
        };
        match condition.predicate.evaluate(state) {
            Ok(true) => {}
            Ok(false) => return AutomationOutcome::ConditionFalse,
            Err(e) => return AutomationOutcome::PredicateFailed(e),
        }

        let action = automation.action;
        if self.cache.get(action.device).map(|s| s.power_state()) == Some(action.state) {
            return AutomationOutcome::AlreadyInState;
        }

        let (session, kind, key) = match self.resolve(&action, sessions) {
            Ok(resolved) => resolved,
            Err(e) => return AutomationOutcome::Skipped(e),
        };

        match session.apply_state(kind, action.state, &key).await {
            Ok(()) => {
                self.cache.record_action(action.device, action.state);
                AutomationOutcome::Applied
            }
            Err(e) => AutomationOutcome::Failed(e),
        }
    }

    fn resolve(
        &self,
        action: &Action,
        sessions: &Sessions,
    ) -> Result<(Arc<DeviceSession>, DeviceKind, PrivateKey), ConfigurationError> {
        let device = self
            .config
            .device(action.device)
            .ok_or(ConfigurationError::MissingDevice(action.device))?;
        let session = sessions
            .get(&action.device)
            .ok_or(ConfigurationError::MissingDevice(action.device))?;
        let key = self
            .config
            .key(action.device)
            .ok_or(ConfigurationError::MissingKey(action.device))?;

        let kind = device.kind();
        let valid = match kind {
            DeviceKind::Accessory => true,
            DeviceKind::PowerSource => action.state != PowerState::LowPowerMode,
            DeviceKind::Controller => false,
        };
        if !valid {
            return Err(ConfigurationError::InvalidActionForKind {
                device: action.device,
                kind,
                state: action.state,
            });
        }
        Ok((Arc::clone(session), kind, key.clone()))
    }
}

fn advertises_energy_service(ad: &Advertisement) -> bool {
    ad.services.contains(&ENERGY_SERVICE)
}

async fn close_quietly(session: DeviceSession) {
    let peripheral = session.peripheral().clone();
    if let Err(e) = session.close().await {
        debug!(peripheral = %peripheral, error = %e, "disconnect failed");
    }
}

fn log_outcome(automation: &Automation, outcome: &AutomationOutcome) {
    let id = automation.id;
    let name = automation.name.as_str();
    match outcome {
        AutomationOutcome::Applied => {
            info!(automation = %id, name, target = %automation.action.device, state = ?automation.action.state, "automation applied");
        }
        AutomationOutcome::Failed(e) => {
            warn!(automation = %id, name, target = %automation.action.device, error = %e, "automation action failed");
        }
        AutomationOutcome::Skipped(e) => {
            warn!(automation = %id, name, error = %e, "automation skipped");
        }
        AutomationOutcome::PredicateFailed(e) => {
            warn!(automation = %id, name, error = %e, "automation condition could not be evaluated");
        }
        AutomationOutcome::ConditionUnknown => {
            debug!(automation = %id, name, device = %automation.condition.device, "condition device state unknown");
        }
        AutomationOutcome::ConditionFalse | AutomationOutcome::AlreadyInState => {
            debug!(automation = %id, name, outcome = ?outcome, "automation not applied");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
