//! Sensor acquisition and touch input.
//!
//! A [`SensorSource`] delivers one [`RawSample`] per poll cycle; the
//! [`Validator`] turns it into a [`ValidatedSample`] with fallback values
//! and fault markers.

mod simulated;
mod touch;
mod validator;

pub use simulated::*;
pub use touch::*;
pub use validator::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on a single sensor read before every channel is marked as timed out.
pub const SENSOR_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Measurement channels on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    SoilMoisture,
    AirHumidity,
    Temperature,
    Light,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::SoilMoisture,
        Channel::AirHumidity,
        Channel::Temperature,
        Channel::Light,
    ];

    /// Range of physically plausible readings.
    pub fn valid_range(self) -> RangeInclusive<f64> {
        match self {
            Channel::SoilMoisture | Channel::AirHumidity => 0.0..=100.0,
            Channel::Temperature => -40.0..=80.0,
            Channel::Light => 0.0..=10000.0,
        }
    }

    fn index(self) -> usize {
        match self {
            Channel::SoilMoisture => 0,
            Channel::AirHumidity => 1,
            Channel::Temperature => 2,
            Channel::Light => 3,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Channel::SoilMoisture => "soil-moisture",
            Channel::AirHumidity => "air-humidity",
            Channel::Temperature => "temperature",
            Channel::Light => "light",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    OutOfRange,
    Timeout,
    StuckValue,
}

/// A single channel failing validation in one cycle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Serialize)]
#[error("sensor fault on {channel}: {kind:?}")]
pub struct SensorFault {
    pub channel: Channel,
    pub kind: FaultKind,
}

/// One channel as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    /// False when the driver itself reported a failed read.
    pub ok: bool,
}

impl Reading {
    pub fn ok(value: f64) -> Self {
        Self { value, ok: true }
    }

    pub fn failed() -> Self {
        Self {
            value: 0.0,
            ok: false,
        }
    }
}

/// Unvalidated readings for one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub soil_moisture: Reading,
    pub air_humidity: Reading,
    pub temperature: Reading,
    pub light: Reading,
    pub captured_at: DateTime<Utc>,
}

impl RawSample {
    /// A sample where every channel failed, used when the read timed out.
    pub fn timed_out(captured_at: DateTime<Utc>) -> Self {
        Self {
            soil_moisture: Reading::failed(),
            air_humidity: Reading::failed(),
            temperature: Reading::failed(),
            light: Reading::failed(),
            captured_at,
        }
    }

    pub fn reading(&self, channel: Channel) -> Reading {
        match channel {
            Channel::SoilMoisture => self.soil_moisture,
            Channel::AirHumidity => self.air_humidity,
            Channel::Temperature => self.temperature,
            Channel::Light => self.light,
        }
    }
}

/// Hardware sensor driver.
pub trait SensorSource: Send {
    fn read(&mut self) -> impl Future<Output = RawSample> + Send;
}

/// Read from `source`, substituting an all-channel timeout sample if the
/// driver does not answer within `limit`.
pub async fn read_bounded<S: SensorSource>(source: &mut S, limit: Duration) -> RawSample {
    match tokio::time::timeout(limit, source.read()).await {
        Ok(sample) => sample,
        Err(_) => {
            tracing::warn!("Sensor read timed out after {:?}", limit);
            RawSample::timed_out(Utc::now())
        }
    }
}
