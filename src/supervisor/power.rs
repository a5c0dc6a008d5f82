//! Battery monitoring and power-mode policy.

use crate::config::DeviceRuntimeConfig;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    Normal,
    PowerSave,
    Emergency,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerFault {
    #[error("battery low: {0}%")]
    Low(u8),
    #[error("battery critical: {0}%")]
    Critical(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PowerReading {
    pub battery_percent: u8,
    pub external_power: bool,
}

/// Pick the power mode for a battery reading. External power always wins.
pub fn mode_for(reading: PowerReading, config: &DeviceRuntimeConfig) -> PowerMode {
    if reading.external_power {
        PowerMode::Normal
    } else if reading.battery_percent < config.battery_critical_threshold {
        PowerMode::Emergency
    } else if reading.battery_percent < config.battery_low_threshold {
        PowerMode::PowerSave
    } else {
        PowerMode::Normal
    }
}

/// The fault reported when entering `mode`, if any.
pub fn fault_for(mode: PowerMode, reading: PowerReading) -> Option<PowerFault> {
    match mode {
        PowerMode::Normal => None,
        PowerMode::PowerSave => Some(PowerFault::Low(reading.battery_percent)),
        PowerMode::Emergency => Some(PowerFault::Critical(reading.battery_percent)),
    }
}

/// Battery gauge and USB-detect hardware.
pub trait PowerMonitor: Send {
    fn read(&mut self) -> PowerReading;
}

/// Battery that drains while unplugged and recharges on external power.
pub struct SimulatedBattery {
    rng: StdRng,
    level: f64,
    external_power: bool,
}

impl SimulatedBattery {
    pub fn new(level: f64, external_power: bool) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            level: level.clamp(0.0, 100.0),
            external_power,
        }
    }
}

impl PowerMonitor for SimulatedBattery {
    fn read(&mut self) -> PowerReading {
        if self.external_power {
            self.level = (self.level + 1.0).min(100.0);
        } else {
            self.level = (self.level - self.rng.gen_range(0.0..0.2)).max(0.0);
        }
        PowerReading {
            battery_percent: self.level.round() as u8,
            external_power: self.external_power,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battery(percent: u8) -> PowerReading {
        PowerReading {
            battery_percent: percent,
            external_power: false,
        }
    }

    #[test]
    fn test_mode_thresholds() {
        let cfg = DeviceRuntimeConfig::default();
        assert_eq!(mode_for(battery(100), &cfg), PowerMode::Normal);
        assert_eq!(mode_for(battery(20), &cfg), PowerMode::Normal);
        assert_eq!(mode_for(battery(15), &cfg), PowerMode::PowerSave);
        assert_eq!(mode_for(battery(5), &cfg), PowerMode::PowerSave);
        assert_eq!(mode_for(battery(3), &cfg), PowerMode::Emergency);
    }

    #[test]
    fn test_external_power_overrides_battery() {
        let cfg = DeviceRuntimeConfig::default();
        let plugged = PowerReading {
            battery_percent: 1,
            external_power: true,
        };
        assert_eq!(mode_for(plugged, &cfg), PowerMode::Normal);
    }

    #[test]
    fn test_fault_for_mode() {
        assert_eq!(fault_for(PowerMode::Normal, battery(50)), None);
        assert_eq!(
            fault_for(PowerMode::Emergency, battery(3)),
            Some(PowerFault::Critical(3))
        );
    }

    #[test]
    fn test_simulated_battery_charges_when_plugged() {
        let mut b = SimulatedBattery::new(50.0, true);
        let first = b.read();
        let second = b.read();
        assert!(second.battery_percent >= first.battery_percent);
        assert!(second.external_power);
    }
}
