//! Resilience supervisor.
//!
//! Coordinates sensor-fault, power and connectivity policy. It never changes
//! how a sample is classified; it only raises the overrides that force a
//! Critical result and decides the operating profile.

mod connectivity;
mod power;

pub use connectivity::*;
pub use power::*;

use crate::config::DeviceRuntimeConfig;
use crate::engine::SafetyOverrides;
use crate::sensor::{Channel, ValidatedSample};

use std::time::Duration;

/// Result of checking one validated sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultAssessment {
    pub entered_safe_mode: bool,
    pub left_safe_mode: bool,
    /// Channels that started faulting this cycle.
    pub new_faults: Vec<Channel>,
}

/// A power-mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerTransition {
    pub from: PowerMode,
    pub to: PowerMode,
    pub fault: Option<PowerFault>,
}

#[derive(Debug)]
pub struct ResilienceSupervisor {
    power_mode: PowerMode,
    battery_percent: Option<u8>,
    connectivity: ConnectivityState,
    safe_mode: bool,
    faulted: Vec<Channel>,
}

impl Default for ResilienceSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceSupervisor {
    pub fn new() -> Self {
        Self {
            power_mode: PowerMode::Normal,
            battery_percent: None,
            connectivity: ConnectivityState::Online,
            safe_mode: false,
            faulted: Vec::new(),
        }
    }

    /// Track sensor faults and enter or leave safe mode.
    pub fn assess_sensors(&mut self, sample: &ValidatedSample) -> FaultAssessment {
        let current: Vec<Channel> = sample.faults.iter().map(|f| f.channel).collect();
        let new_faults: Vec<Channel> = current
            .iter()
            .copied()
            .filter(|c| !self.faulted.contains(c))
            .collect();
        for channel in self.faulted.iter().filter(|c| !current.contains(c)) {
            tracing::info!("Supervisor: {} recovered", channel);
        }
        self.faulted = current;

        let mut assessment = FaultAssessment {
            new_faults,
            ..Default::default()
        };

        if sample.hard_fault && !self.safe_mode {
            tracing::error!(
                "Supervisor: entering safe mode, faults: {:?}",
                sample.faults
            );
            self.safe_mode = true;
            assessment.entered_safe_mode = true;
        } else if !sample.hard_fault && self.safe_mode {
            tracing::info!("Supervisor: leaving safe mode");
            self.safe_mode = false;
            assessment.left_safe_mode = true;
        }

        assessment
    }

    /// Apply a battery reading; returns the transition if the mode changed.
    pub fn update_power(
        &mut self,
        reading: PowerReading,
        config: &DeviceRuntimeConfig,
    ) -> Option<PowerTransition> {
        self.battery_percent = Some(reading.battery_percent);
        let next = mode_for(reading, config);
        if next == self.power_mode {
            return None;
        }

        let transition = PowerTransition {
            from: self.power_mode,
            to: next,
            fault: fault_for(next, reading),
        };
        match transition.fault {
            Some(PowerFault::Critical(_)) => {
                tracing::error!("Supervisor: {:?} -> {:?} ({})", transition.from, next, reading.battery_percent)
            }
            Some(fault) => tracing::warn!("Supervisor: {:?} -> {:?} ({})", transition.from, next, fault),
            None => tracing::info!(
                "Supervisor: {:?} -> {:?} (external power: {})",
                transition.from,
                next,
                reading.external_power
            ),
        }
        self.power_mode = next;
        Some(transition)
    }

    pub fn set_connectivity(&mut self, state: ConnectivityState) {
        if state != self.connectivity {
            tracing::info!("Supervisor: connectivity {:?}", state);
            self.connectivity = state;
        }
    }

    pub fn overrides(&self) -> SafetyOverrides {
        SafetyOverrides {
            hard_fault: self.safe_mode,
            battery_critical: self.power_mode == PowerMode::Emergency,
        }
    }

    /// Sampling period for the current power mode.
    pub fn sample_interval(&self, config: &DeviceRuntimeConfig) -> Duration {
        match self.power_mode {
            PowerMode::Normal => config.sample_interval,
            PowerMode::PowerSave | PowerMode::Emergency => config.power_save_sample_interval,
        }
    }

    pub fn power_mode(&self) -> PowerMode {
        self.power_mode
    }

    pub fn battery_percent(&self) -> Option<u8> {
        self.battery_percent
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity
    }

    pub fn safe_mode(&self) -> bool {
        self.safe_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{FaultKind, SensorFault};
    use chrono::Utc;

    fn sample(faults: Vec<SensorFault>, hard_fault: bool) -> ValidatedSample {
        ValidatedSample {
            soil_moisture: 50.0,
            air_humidity: 50.0,
            temperature: 20.0,
            light: 800.0,
            captured_at: Utc::now(),
            estimated: Vec::new(),
            faults,
            hard_fault,
        }
    }

    fn fault(channel: Channel) -> SensorFault {
        SensorFault {
            channel,
            kind: FaultKind::Timeout,
        }
    }

    #[test]
    fn test_safe_mode_enter_and_leave() {
        let mut sup = ResilienceSupervisor::new();
        let hard = sample(vec![fault(Channel::SoilMoisture), fault(Channel::Light)], true);

        let a = sup.assess_sensors(&hard);
        assert!(a.entered_safe_mode);
        assert_eq!(a.new_faults, vec![Channel::SoilMoisture, Channel::Light]);
        assert!(sup.overrides().hard_fault);

        // Same faults again: nothing new.
        let a = sup.assess_sensors(&hard);
        assert_eq!(a, FaultAssessment::default());

        let a = sup.assess_sensors(&sample(Vec::new(), false));
        assert!(a.left_safe_mode);
        assert!(!sup.overrides().any());
    }

    #[test]
    fn test_single_recoverable_fault_keeps_normal_operation() {
        let mut sup = ResilienceSupervisor::new();
        let a = sup.assess_sensors(&sample(vec![fault(Channel::Light)], false));
        assert!(!a.entered_safe_mode);
        assert_eq!(a.new_faults, vec![Channel::Light]);
        assert!(!sup.safe_mode());
    }

    #[test]
    fn test_power_transitions_and_cadence() {
        let cfg = DeviceRuntimeConfig::default();
        let mut sup = ResilienceSupervisor::new();
        let low = PowerReading {
            battery_percent: 15,
            external_power: false,
        };

        let t = sup.update_power(low, &cfg).unwrap();
        assert_eq!(t.to, PowerMode::PowerSave);
        assert_eq!(t.fault, Some(PowerFault::Low(15)));
        assert_eq!(sup.sample_interval(&cfg), cfg.power_save_sample_interval);
        assert!(!sup.overrides().battery_critical);
        assert!(sup.update_power(low, &cfg).is_none());

        let plugged = PowerReading {
            battery_percent: 15,
            external_power: true,
        };
        let t = sup.update_power(plugged, &cfg).unwrap();
        assert_eq!(t.to, PowerMode::Normal);
        assert_eq!(sup.sample_interval(&cfg), cfg.sample_interval);
    }

    #[test]
    fn test_emergency_sets_battery_override() {
        let cfg = DeviceRuntimeConfig::default();
        let mut sup = ResilienceSupervisor::new();
        let t = sup
            .update_power(
                PowerReading {
                    battery_percent: 3,
                    external_power: false,
                },
                &cfg,
            )
            .unwrap();
        assert_eq!(t.fault, Some(PowerFault::Critical(3)));
        assert!(sup.overrides().battery_critical);
    }
}
