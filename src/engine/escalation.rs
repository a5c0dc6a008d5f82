//! Alert escalation: one timer-driven state machine per cause.
//!
//! ```text
//! Idle ──[reported]──▶ Pending ──[onset delay elapsed]──▶ Active ──┐
//!  ▲                      │                                │  ▲     │ repeat interval
//!  │                      │ resolved                       │  └─────┘
//!  ├──────────────────────┘                                │ tap
//!  │                                                       ▼
//!  └───────────────[resolved]─────────────────────── Acknowledged
//! ```
//!
//! Timers compare monotonic instants, so they fire at the right moment no
//! matter how often the controller is polled. Acknowledged is the silenced
//! form of Idle: it only leaves through resolution, so an acknowledged cause
//! cannot re-alert until it resolves and re-triggers.

use super::evaluator::{Breaches, PlantCondition};
use crate::clock::Moment;
use crate::config::DeviceRuntimeConfig;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Why an alert exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    NeedsWater,
    NeedsLight,
    Critical,
}

impl Cause {
    pub const ALL: [Cause; 3] = [Cause::NeedsWater, Cause::NeedsLight, Cause::Critical];

    pub fn of(condition: PlantCondition) -> Option<Cause> {
        match condition {
            PlantCondition::Healthy => None,
            PlantCondition::NeedsWater => Some(Cause::NeedsWater),
            PlantCondition::NeedsLight => Some(Cause::NeedsLight),
            PlantCondition::Critical => Some(Cause::Critical),
        }
    }

    /// Critical alerts are urgent and skip the onset delay.
    fn onset_delay(self, config: &DeviceRuntimeConfig) -> Duration {
        match self {
            Cause::Critical => Duration::ZERO,
            Cause::NeedsWater | Cause::NeedsLight => config.alert_onset_delay,
        }
    }

    fn index(self) -> usize {
        match self {
            Cause::NeedsWater => 0,
            Cause::NeedsLight => 1,
            Cause::Critical => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    Idle,
    Pending,
    Active,
    Acknowledged,
}

/// A notified, unacknowledged alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub cause: Cause,
    pub onset_at: DateTime<Utc>,
    pub last_notified_at: DateTime<Utc>,
    pub repeat_count: u32,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    Pending(Cause),
    /// First notification for a record.
    Raised(AlertRecord),
    Repeated(AlertRecord),
    Acknowledged(AlertRecord),
    /// The cause resolved after reaching Pending or later.
    Solved(Cause),
}

/// What the evaluator reported this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub critical: bool,
    /// Threshold breaches without the safety overrides; `None` keeps the
    /// water/light machines on their last known state.
    pub plant: Option<Breaches>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertStats {
    pub notifications: u64,
    pub acknowledgments: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Idle,
    Pending { onset: Moment },
    Active {
        last_notified: Instant,
        record: AlertRecord,
    },
    Acknowledged,
}

#[derive(Debug)]
struct Machine {
    cause: Cause,
    state: State,
    holding: bool,
    /// Holding, but outranked by another cause: no notifications.
    suppressed: bool,
}

impl Machine {
    fn new(cause: Cause) -> Self {
        Self {
            cause,
            state: State::Idle,
            holding: false,
            suppressed: false,
        }
    }

    fn phase(&self) -> AlertPhase {
        match self.state {
            State::Idle => AlertPhase::Idle,
            State::Pending { .. } => AlertPhase::Pending,
            State::Active { .. } => AlertPhase::Active,
            State::Acknowledged => AlertPhase::Acknowledged,
        }
    }

    fn report(&mut self, holding: bool, suppressed: bool, now: Moment, events: &mut Vec<AlertEvent>) {
        self.holding = holding;
        self.suppressed = holding && suppressed;
        if holding {
            if self.state == State::Idle && !self.suppressed {
                tracing::debug!("Escalation: {:?} pending", self.cause);
                self.state = State::Pending { onset: now };
                events.push(AlertEvent::Pending(self.cause));
            }
        } else if self.state != State::Idle {
            tracing::info!("Escalation: {:?} resolved", self.cause);
            self.state = State::Idle;
            events.push(AlertEvent::Solved(self.cause));
        }
    }

    fn fire_due(
        &mut self,
        now: Moment,
        config: &DeviceRuntimeConfig,
        stats: &mut AlertStats,
        events: &mut Vec<AlertEvent>,
    ) {
        if !self.holding || self.suppressed {
            return;
        }

        match &mut self.state {
            State::Pending { onset } => {
                if now.at >= onset.at + self.cause.onset_delay(config) {
                    let onset = *onset;
                    let record = AlertRecord {
                        cause: self.cause,
                        onset_at: onset.wall,
                        last_notified_at: now.wall,
                        repeat_count: 0,
                        acknowledged: false,
                    };
                    tracing::info!("Escalation: {:?} alert raised", self.cause);
                    stats.notifications += 1;
                    events.push(AlertEvent::Raised(record.clone()));
                    self.state = State::Active {
                        last_notified: now.at,
                        record,
                    };
                }
            }
            State::Active {
                last_notified,
                record,
            } => {
                let cap_reached = record.repeat_count + 1 >= config.max_repeat_count;
                if !cap_reached && now.at >= *last_notified + config.repeat_interval {
                    *last_notified = now.at;
                    record.last_notified_at = now.wall;
                    record.repeat_count += 1;
                    tracing::info!(
                        "Escalation: {:?} alert repeated ({})",
                        self.cause,
                        record.repeat_count
                    );
                    stats.notifications += 1;
                    events.push(AlertEvent::Repeated(record.clone()));
                }
            }
            State::Idle | State::Acknowledged => {}
        }
    }

    fn deadline(&self, config: &DeviceRuntimeConfig) -> Option<Instant> {
        if !self.holding || self.suppressed {
            return None;
        }
        match &self.state {
            State::Pending { onset } => Some(onset.at + self.cause.onset_delay(config)),
            State::Active {
                last_notified,
                record,
            } if record.repeat_count + 1 < config.max_repeat_count => {
                Some(*last_notified + config.repeat_interval)
            }
            _ => None,
        }
    }
}

/// Owns the per-cause machines and their timers.
#[derive(Debug)]
pub struct AlertController {
    machines: [Machine; 3],
    stats: AlertStats,
}

impl Default for AlertController {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertController {
    pub fn new() -> Self {
        Self {
            machines: Cause::ALL.map(Machine::new),
            stats: AlertStats::default(),
        }
    }

    /// Feed one cycle's classification, then fire any timers due at `now`.
    pub fn observe(
        &mut self,
        observation: Observation,
        now: Moment,
        config: &DeviceRuntimeConfig,
    ) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        if let Some(breaches) = observation.plant {
            // Light wins a double breach; water stays recorded but silent.
            let latent = breaches.water && breaches.light;
            self.machines[Cause::NeedsWater.index()].report(breaches.water, latent, now, &mut events);
            self.machines[Cause::NeedsLight.index()].report(breaches.light, false, now, &mut events);
        }
        self.machines[Cause::Critical.index()].report(observation.critical, false, now, &mut events);

        events.extend(self.poll(now, config));
        events
    }

    /// Fire onset and repeat timers that are due at `now`.
    pub fn poll(&mut self, now: Moment, config: &DeviceRuntimeConfig) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        for machine in &mut self.machines {
            machine.fire_due(now, config, &mut self.stats, &mut events);
        }
        events
    }

    /// Silence every Active alert.
    pub fn acknowledge(&mut self, now: Moment) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        for machine in &mut self.machines {
            let State::Active { record, .. } = &machine.state else {
                continue;
            };
            let mut record = record.clone();
            record.acknowledged = true;
            tracing::info!(
                "Escalation: {:?} acknowledged at {}",
                machine.cause,
                now.wall.format("%H:%M:%S")
            );
            self.stats.acknowledgments += 1;
            events.push(AlertEvent::Acknowledged(record));

            if machine.holding {
                machine.state = State::Acknowledged;
            } else {
                machine.state = State::Idle;
                events.push(AlertEvent::Solved(machine.cause));
            }
        }
        events
    }

    /// Earliest instant at which `poll` would produce an event.
    pub fn next_deadline(&self, config: &DeviceRuntimeConfig) -> Option<Instant> {
        self.machines.iter().filter_map(|m| m.deadline(config)).min()
    }

    pub fn phase(&self, cause: Cause) -> AlertPhase {
        self.machines[cause.index()].phase()
    }

    /// Phase of the alert backing the displayed condition.
    pub fn phase_for(&self, condition: PlantCondition) -> AlertPhase {
        Cause::of(condition)
            .map(|c| self.phase(c))
            .unwrap_or(AlertPhase::Idle)
    }

    pub fn active_records(&self) -> Vec<AlertRecord> {
        self.machines
            .iter()
            .filter_map(|m| match &m.state {
                State::Active { record, .. } => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stats(&self) -> AlertStats {
        self.stats
    }
}
