//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{AlertRecord, PlantCondition};
use crate::supervisor::PowerMode;

/// Decision state saved to storage, restored (for logging) on next boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub saved_at: DateTime<Utc>,
    pub reason: String,
    pub device_id: String,
    pub condition: PlantCondition,
    pub alerts: Vec<AlertRecord>,
    #[serde(default)]
    pub latent_conditions: Vec<PlantCondition>,
    pub power_mode: PowerMode,
    pub battery_percent: Option<u8>,
}
