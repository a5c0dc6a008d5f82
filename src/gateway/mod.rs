//! Communication gateway, outbound side.
//!
//! The core hands a [`TelemetrySnapshot`] to a [`Publisher`] once per cycle
//! and never waits on the result.

mod http;

pub use http::*;

use crate::engine::{AlertRecord, PlantCondition};
use crate::sensor::SensorFault;
use crate::supervisor::{ConnectivityState, PowerMode};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use thiserror::Error;

/// Network fault taxonomy.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("disconnected: {0}")]
    Disconnect(String),
    #[error("gateway rejected snapshot with status {0}")]
    Rejected(u16),
    #[error("no gateway configured")]
    NotConfigured,
}

/// Logical content of one telemetry publish.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub condition: PlantCondition,
    pub alerts: Vec<AlertRecord>,
    /// Breached conditions that lost the tie-break this cycle.
    pub latent_conditions: Vec<PlantCondition>,
    pub power_mode: PowerMode,
    pub battery_percent: Option<u8>,
    pub connectivity: ConnectivityState,
    pub safe_mode: bool,
    pub faults: Vec<SensorFault>,
}

#[cfg(test)]
impl TelemetrySnapshot {
    pub fn sample() -> Self {
        Self {
            device_id: "test-device".to_string(),
            timestamp: Utc::now(),
            condition: PlantCondition::Healthy,
            alerts: Vec::new(),
            latent_conditions: Vec::new(),
            power_mode: PowerMode::Normal,
            battery_percent: Some(80),
            connectivity: ConnectivityState::Online,
            safe_mode: false,
            faults: Vec::new(),
        }
    }
}

/// Telemetry transport.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        snapshot: &TelemetrySnapshot,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Stand-in when no gateway URL is configured; every publish fails.
#[derive(Debug, Default)]
pub struct Unconfigured;

impl Publisher for Unconfigured {
    async fn publish(&self, _snapshot: &TelemetrySnapshot) -> Result<(), GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}
