//! Classification of a validated sample into a plant condition.
//!
//! Everything here is a pure function of its arguments.

use crate::config::DeviceRuntimeConfig;
use crate::sensor::ValidatedSample;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlantCondition {
    Healthy,
    NeedsWater,
    NeedsLight,
    Critical,
}

/// Flags raised by the resilience supervisor that force a Critical result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyOverrides {
    pub hard_fault: bool,
    pub battery_critical: bool,
}

impl SafetyOverrides {
    pub fn any(&self) -> bool {
        self.hard_fault || self.battery_critical
    }
}

/// Which thresholds the sample breaches, independent of precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Breaches {
    pub water: bool,
    pub light: bool,
}

impl Breaches {
    pub fn of(sample: &ValidatedSample, config: &DeviceRuntimeConfig) -> Self {
        Self {
            water: sample.soil_moisture < config.moisture_threshold,
            light: sample.light < config.light_threshold,
        }
    }

    /// The single condition surfaced for these breaches. Light wins a tie.
    pub fn surfaced(&self) -> PlantCondition {
        if self.light {
            PlantCondition::NeedsLight
        } else if self.water {
            PlantCondition::NeedsWater
        } else {
            PlantCondition::Healthy
        }
    }

    /// Breached conditions that lost the tie-break.
    pub fn latent(&self) -> Vec<PlantCondition> {
        if self.light && self.water {
            vec![PlantCondition::NeedsWater]
        } else {
            Vec::new()
        }
    }
}

/// Classify a sample.
pub fn evaluate(
    sample: &ValidatedSample,
    overrides: SafetyOverrides,
    config: &DeviceRuntimeConfig,
) -> PlantCondition {
    if overrides.any() {
        return PlantCondition::Critical;
    }
    Breaches::of(sample, config).surfaced()
}
