//! Decision and alerting engine.
//!
//! [`Controller`] runs one evaluation cycle at a time: validate the raw
//! sample, let the supervisor assess faults and power, classify, advance
//! the alert machines and render feedback. It owns all mutable decision
//! state and is driven from a single task.

mod escalation;
mod evaluator;
mod feedback;

pub use escalation::*;
pub use evaluator::*;
pub use feedback::*;

use crate::clock::Moment;
use crate::config::{ConfigFault, ConfigUpdate, DeviceRuntimeConfig};
use crate::db::PersistedSnapshot;
use crate::gateway::TelemetrySnapshot;
use crate::sensor::{RawSample, SensorFault, TouchEvent, Validator};
use crate::supervisor::{
    ConnectivityState, PowerMode, PowerReading, PowerTransition, ResilienceSupervisor,
};

use std::time::Duration;
use tokio::time::Instant;

/// What one evaluation cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub condition: PlantCondition,
    pub command: Option<FeedbackCommand>,
    pub events: Vec<AlertEvent>,
    pub power: Option<PowerTransition>,
    /// Battery went critical this cycle: persist and shut down.
    pub emergency: bool,
}

pub struct Controller {
    device_id: String,
    config: DeviceRuntimeConfig,
    staged_config: Option<DeviceRuntimeConfig>,
    validator: Validator,
    alerts: AlertController,
    supervisor: ResilienceSupervisor,
    emitter: FeedbackEmitter,
    condition: PlantCondition,
    latent: Vec<PlantCondition>,
    faults: Vec<SensorFault>,
}

impl Controller {
    pub fn new(device_id: impl Into<String>, config: DeviceRuntimeConfig) -> Self {
        Self {
            device_id: device_id.into(),
            config,
            staged_config: None,
            validator: Validator::default(),
            alerts: AlertController::new(),
            supervisor: ResilienceSupervisor::new(),
            emitter: FeedbackEmitter::new(),
            condition: PlantCondition::Healthy,
            latent: Vec::new(),
            faults: Vec::new(),
        }
    }

    /// Run one evaluation cycle.
    pub fn run_cycle(&mut self, raw: &RawSample, power: PowerReading, now: Moment) -> CycleOutcome {
        if let Some(config) = self.staged_config.take() {
            tracing::info!("Controller: runtime config applied");
            self.config = config;
        }

        let sample = self.validator.validate(raw);
        let assessment = self.supervisor.assess_sensors(&sample);
        let power_transition = self.supervisor.update_power(power, &self.config);
        let overrides = self.supervisor.overrides();

        let condition = evaluate(&sample, overrides, &self.config);
        let breaches = Breaches::of(&sample, &self.config);

        // A hard fault means the sample itself is untrusted; the water and
        // light machines keep their last known state.
        let observation = Observation {
            critical: overrides.any(),
            plant: (!overrides.hard_fault).then_some(breaches),
        };
        let events = self.alerts.observe(observation, now, &self.config);

        if condition != self.condition {
            tracing::info!("Controller: {:?} -> {:?}", self.condition, condition);
        }
        self.condition = condition;
        self.latent = if overrides.hard_fault {
            Vec::new()
        } else {
            breaches.latent()
        };
        self.faults = sample.faults;

        let mut cues = cues_for(&events);
        if !assessment.new_faults.is_empty() && !assessment.entered_safe_mode {
            cues.push(Cue::SensorDegraded);
        }
        if matches!(power_transition, Some(t) if t.to == PowerMode::PowerSave) {
            cues.push(Cue::LowBattery);
        }

        tracing::debug!(
            "Controller: cycle soil={:.1} light={:.0} -> {:?} ({} events)",
            sample.soil_moisture,
            sample.light,
            condition,
            events.len()
        );

        CycleOutcome {
            condition,
            command: self.render(&cues),
            events,
            power: power_transition,
            emergency: matches!(power_transition, Some(t) if t.to == PowerMode::Emergency),
        }
    }

    /// Fire alert timers due at `now`.
    pub fn on_timer(&mut self, now: Moment) -> Option<FeedbackCommand> {
        let events = self.alerts.poll(now, &self.config);
        if events.is_empty() {
            return None;
        }
        self.render(&cues_for(&events))
    }

    /// Handle a touch; only a qualifying tap acknowledges.
    pub fn on_touch(&mut self, touch: TouchEvent, now: Moment) -> Option<FeedbackCommand> {
        if !touch.is_acknowledgment() {
            tracing::debug!("Controller: ignoring touch {:?}", touch);
            return None;
        }
        self.acknowledge(now)
    }

    /// Silence all active alerts (tap or remote acknowledgment).
    pub fn acknowledge(&mut self, now: Moment) -> Option<FeedbackCommand> {
        let events = self.alerts.acknowledge(now);
        if events.is_empty() {
            return None;
        }
        self.render(&cues_for(&events))
    }

    /// Validate an update against the newest accepted config. Accepted
    /// updates take effect at the start of the next cycle.
    pub fn apply_config(
        &mut self,
        update: &ConfigUpdate,
    ) -> (Result<DeviceRuntimeConfig, ConfigFault>, Option<FeedbackCommand>) {
        let base = self.staged_config.as_ref().unwrap_or(&self.config);
        match base.apply(update) {
            Ok(next) => {
                tracing::info!("Controller: runtime config accepted");
                self.staged_config = Some(next.clone());
                (Ok(next), None)
            }
            Err(fault) => {
                tracing::warn!("Controller: runtime config rejected: {}", fault);
                let command = self.render(&[Cue::ConfigRejected]);
                (Err(fault), command)
            }
        }
    }

    pub fn set_connectivity(&mut self, state: ConnectivityState) {
        self.supervisor.set_connectivity(state);
    }

    fn render(&mut self, cues: &[Cue]) -> Option<FeedbackCommand> {
        let phase = self.alerts.phase_for(self.condition);
        // Critical owns the LED and speaker; other causes keep their timers
        // but stay quiet underneath it.
        let cues: Vec<Cue> = if self.condition == PlantCondition::Critical {
            cues.iter()
                .copied()
                .filter(|c| {
                    !matches!(
                        c,
                        Cue::Notify(Cause::NeedsWater | Cause::NeedsLight) | Cue::Solved
                    )
                })
                .collect()
        } else {
            cues.to_vec()
        };
        self.emitter
            .update(self.condition, phase, self.supervisor.power_mode(), &cues)
    }

    pub fn snapshot(&self, now: Moment) -> TelemetrySnapshot {
        TelemetrySnapshot {
            device_id: self.device_id.clone(),
            timestamp: now.wall,
            condition: self.condition,
            alerts: self.alerts.active_records(),
            latent_conditions: self.latent.clone(),
            power_mode: self.supervisor.power_mode(),
            battery_percent: self.supervisor.battery_percent(),
            connectivity: self.supervisor.connectivity(),
            safe_mode: self.supervisor.safe_mode(),
            faults: self.faults.clone(),
        }
    }

    /// State written to non-volatile storage before an emergency shutdown.
    pub fn persisted(&self, now: Moment, reason: &str) -> PersistedSnapshot {
        PersistedSnapshot {
            saved_at: now.wall,
            reason: reason.to_string(),
            device_id: self.device_id.clone(),
            condition: self.condition,
            alerts: self.alerts.active_records(),
            latent_conditions: self.latent.clone(),
            power_mode: self.supervisor.power_mode(),
            battery_percent: self.supervisor.battery_percent(),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.alerts.next_deadline(&self.config)
    }

    pub fn sample_interval(&self) -> Duration {
        self.supervisor.sample_interval(&self.config)
    }

    pub fn config(&self) -> &DeviceRuntimeConfig {
        self.staged_config.as_ref().unwrap_or(&self.config)
    }

    pub fn alert_stats(&self) -> AlertStats {
        self.alerts.stats()
    }

    #[cfg(test)]
    pub fn condition(&self) -> PlantCondition {
        self.condition
    }

    pub fn power_mode(&self) -> PowerMode {
        self.supervisor.power_mode()
    }
}

fn cues_for(events: &[AlertEvent]) -> Vec<Cue> {
    events
        .iter()
        .filter_map(|e| match e {
            AlertEvent::Raised(r) | AlertEvent::Repeated(r) => Some(Cue::Notify(r.cause)),
            AlertEvent::Solved(_) => Some(Cue::Solved),
            AlertEvent::Pending(_) | AlertEvent::Acknowledged(_) => None,
        })
        .collect()
}
