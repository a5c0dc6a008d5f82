//! Configuration module for the plant-care device.
//!
//! `ServerConfig` is process-level and loaded from environment variables.
//! `DeviceRuntimeConfig` is the tunable decision policy; it can be replaced
//! at runtime through the gateway and is validated before it takes effect.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the gateway inbound surface (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "plantcare.db")
    pub db_path: String,
    /// Identifier reported in every telemetry snapshot
    pub device_id: String,
    /// Telemetry endpoint; telemetry is dropped when unset
    pub gateway_url: Option<String>,
    /// Overrides the runtime config's sample interval when set
    pub sample_interval_override: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "plantcare.db".to_string(),
            device_id: "PlantCareRobot".to_string(),
            gateway_url: None,
            sample_interval_override: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PLANTCARE_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PLANTCARE_DB_PATH`: Database file path (default: "plantcare.db")
    /// - `PLANTCARE_DEVICE_ID`: Device identifier (default: "PlantCareRobot")
    /// - `PLANTCARE_GATEWAY_URL`: Telemetry endpoint (default: unset)
    /// - `PLANTCARE_SAMPLE_INTERVAL_SECS`: Sampling period override
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("PLANTCARE_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("PLANTCARE_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(device_id) = env::var("PLANTCARE_DEVICE_ID") {
            if !device_id.trim().is_empty() {
                cfg.device_id = device_id;
            }
        }

        if let Ok(url) = env::var("PLANTCARE_GATEWAY_URL") {
            if !url.trim().is_empty() {
                cfg.gateway_url = Some(url);
            }
        }

        if let Ok(secs) = env::var("PLANTCARE_SAMPLE_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                if secs > 0 {
                    cfg.sample_interval_override = Some(Duration::from_secs(secs));
                }
            }
        }

        cfg
    }
}

/// A rejected runtime configuration update.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigFault {
    #[error("moisture threshold {0} outside 0-100%")]
    MoistureThreshold(f64),
    #[error("light threshold {0} outside 0-10000 lux")]
    LightThreshold(f64),
    #[error("battery thresholds invalid: critical {critical}% must be below low {low}% and both within 0-100%")]
    BatteryThresholds { low: u8, critical: u8 },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("max repeat count must be at least 1")]
    MaxRepeatCount,
}

/// Decision policy used by the evaluator, escalation controller and supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRuntimeConfig {
    /// Soil moisture below this percentage means the plant needs water
    pub moisture_threshold: f64,
    /// Light below this lux level means the plant needs light
    pub light_threshold: f64,
    #[serde(with = "duration_secs")]
    pub alert_onset_delay: Duration,
    #[serde(with = "duration_secs")]
    pub repeat_interval: Duration,
    pub battery_low_threshold: u8,
    pub battery_critical_threshold: u8,
    #[serde(with = "duration_secs")]
    pub sample_interval: Duration,
    #[serde(with = "duration_secs")]
    pub power_save_sample_interval: Duration,
    pub max_repeat_count: u32,
    /// How long telemetry stays quiet after going Offline
    #[serde(with = "duration_secs")]
    pub offline_retry_window: Duration,
}

impl Default for DeviceRuntimeConfig {
    fn default() -> Self {
        Self {
            moisture_threshold: 30.0,
            light_threshold: 500.0,
            alert_onset_delay: Duration::from_secs(30 * 60),
            repeat_interval: Duration::from_secs(2 * 60 * 60),
            battery_low_threshold: 20,
            battery_critical_threshold: 5,
            sample_interval: Duration::from_secs(300),
            power_save_sample_interval: Duration::from_secs(900),
            max_repeat_count: 10,
            offline_retry_window: Duration::from_secs(30),
        }
    }
}

/// A partial update arriving from the gateway. Absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    pub moisture_threshold: Option<f64>,
    pub light_threshold: Option<f64>,
    pub alert_onset_delay_secs: Option<u64>,
    pub repeat_interval_secs: Option<u64>,
    pub battery_low_threshold: Option<u8>,
    pub battery_critical_threshold: Option<u8>,
    pub sample_interval_secs: Option<u64>,
    pub power_save_sample_interval_secs: Option<u64>,
    pub max_repeat_count: Option<u32>,
    pub offline_retry_window_secs: Option<u64>,
}

impl DeviceRuntimeConfig {
    /// Merge an update into a copy of this config and validate the result.
    ///
    /// On error `self` is untouched, so callers keep running on the previous
    /// configuration.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<DeviceRuntimeConfig, ConfigFault> {
        let mut next = self.clone();

        if let Some(v) = update.moisture_threshold {
            next.moisture_threshold = v;
        }
        if let Some(v) = update.light_threshold {
            next.light_threshold = v;
        }
        if let Some(v) = update.alert_onset_delay_secs {
            next.alert_onset_delay = Duration::from_secs(v);
        }
        if let Some(v) = update.repeat_interval_secs {
            next.repeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = update.battery_low_threshold {
            next.battery_low_threshold = v;
        }
        if let Some(v) = update.battery_critical_threshold {
            next.battery_critical_threshold = v;
        }
        if let Some(v) = update.sample_interval_secs {
            next.sample_interval = Duration::from_secs(v);
        }
        if let Some(v) = update.power_save_sample_interval_secs {
            next.power_save_sample_interval = Duration::from_secs(v);
        }
        if let Some(v) = update.max_repeat_count {
            next.max_repeat_count = v;
        }
        if let Some(v) = update.offline_retry_window_secs {
            next.offline_retry_window = Duration::from_secs(v);
        }

        next.validate()?;
        Ok(next)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigFault> {
        if !(0.0..=100.0).contains(&self.moisture_threshold) {
            return Err(ConfigFault::MoistureThreshold(self.moisture_threshold));
        }
        if !(0.0..=10000.0).contains(&self.light_threshold) {
            return Err(ConfigFault::LightThreshold(self.light_threshold));
        }
        if self.battery_low_threshold > 100
            || self.battery_critical_threshold >= self.battery_low_threshold
        {
            return Err(ConfigFault::BatteryThresholds {
                low: self.battery_low_threshold,
                critical: self.battery_critical_threshold,
            });
        }

        let durations = [
            ("alert_onset_delay", self.alert_onset_delay),
            ("repeat_interval", self.repeat_interval),
            ("sample_interval", self.sample_interval),
            ("power_save_sample_interval", self.power_save_sample_interval),
            ("offline_retry_window", self.offline_retry_window),
        ];
        for (name, d) in durations {
            if d.is_zero() {
                return Err(ConfigFault::ZeroDuration(name));
            }
        }

        if self.max_repeat_count == 0 {
            return Err(ConfigFault::MaxRepeatCount);
        }

        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
