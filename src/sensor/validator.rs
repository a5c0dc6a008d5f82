//! Per-channel validation with fallback substitution.

use super::{Channel, FaultKind, RawSample, SensorFault};

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::f64::consts::PI;

/// Consecutive bit-identical readings after which a channel counts as stuck.
pub const STUCK_LIMIT: u32 = 120;

/// Peak of the light estimate curve at solar noon.
const DAYLIGHT_PEAK_LUX: f64 = 1000.0;
const SUNRISE_HOUR: f64 = 6.0;
const SUNSET_HOUR: f64 = 18.0;

/// A sample that is safe to classify.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedSample {
    pub soil_moisture: f64,
    pub air_humidity: f64,
    pub temperature: f64,
    pub light: f64,
    pub captured_at: DateTime<Utc>,
    /// Channels whose value was substituted by a fallback.
    pub estimated: Vec<Channel>,
    pub faults: Vec<SensorFault>,
    /// Set when the faults cannot be covered by fallbacks; the supervisor
    /// reacts by entering safe mode.
    pub hard_fault: bool,
}

impl ValidatedSample {
    /// True when the channel passed validation this cycle.
    #[cfg(test)]
    pub fn is_valid(&self, channel: Channel) -> bool {
        !self.faults.iter().any(|f| f.channel == channel)
    }

    #[cfg(test)]
    pub fn is_estimated(&self, channel: Channel) -> bool {
        self.estimated.contains(&channel)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ChannelHistory {
    last_valid: Option<f64>,
    last_raw: Option<f64>,
    repeats: u32,
}

/// Validates raw samples, remembering the last valid value per channel.
#[derive(Debug)]
pub struct Validator {
    history: [ChannelHistory; 4],
    stuck_limit: u32,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(STUCK_LIMIT)
    }
}

impl Validator {
    pub fn new(stuck_limit: u32) -> Self {
        Self {
            history: [ChannelHistory::default(); 4],
            stuck_limit: stuck_limit.max(2),
        }
    }

    /// Validate one raw sample. Never fails: faulty channels get a fallback
    /// value (or the last known one) and a fault marker.
    pub fn validate(&mut self, raw: &RawSample) -> ValidatedSample {
        let mut values = [0.0; 4];
        let mut faults = Vec::new();

        for channel in Channel::ALL {
            match self.check(channel, raw) {
                Ok(v) => {
                    self.history[channel.index()].last_valid = Some(v);
                    values[channel.index()] = v;
                }
                Err(kind) => {
                    tracing::warn!("Validator: {} fault ({:?})", channel, kind);
                    faults.push(SensorFault { channel, kind });
                    values[channel.index()] =
                        self.history[channel.index()].last_valid.unwrap_or(0.0);
                }
            }
        }

        let mut estimated = Vec::new();
        let mut hard_fault = faults.len() >= 2;

        for fault in &faults {
            match fault.channel {
                Channel::SoilMoisture => {
                    if self.history[Channel::SoilMoisture.index()].last_valid.is_some() {
                        estimated.push(Channel::SoilMoisture);
                    } else {
                        // Nothing to fall back on yet.
                        hard_fault = true;
                    }
                }
                Channel::Light => {
                    values[Channel::Light.index()] = estimate_light(raw.captured_at);
                    estimated.push(Channel::Light);
                }
                Channel::AirHumidity | Channel::Temperature => hard_fault = true,
            }
        }

        ValidatedSample {
            soil_moisture: values[Channel::SoilMoisture.index()],
            air_humidity: values[Channel::AirHumidity.index()],
            temperature: values[Channel::Temperature.index()],
            light: values[Channel::Light.index()],
            captured_at: raw.captured_at,
            estimated,
            faults,
            hard_fault,
        }
    }

    fn check(&mut self, channel: Channel, raw: &RawSample) -> Result<f64, FaultKind> {
        let reading = raw.reading(channel);
        if !reading.ok {
            return Err(FaultKind::Timeout);
        }
        if !reading.value.is_finite() || !channel.valid_range().contains(&reading.value) {
            return Err(FaultKind::OutOfRange);
        }

        let history = &mut self.history[channel.index()];
        // Darkness or saturated soil can pin a channel to the edge of its
        // range for hours.
        let range = channel.valid_range();
        if reading.value == *range.start() || reading.value == *range.end() {
            history.last_raw = None;
            history.repeats = 0;
            return Ok(reading.value);
        }
        if history.last_raw.map(f64::to_bits) == Some(reading.value.to_bits()) {
            history.repeats = history.repeats.saturating_add(1);
        } else {
            history.last_raw = Some(reading.value);
            history.repeats = 1;
        }
        if history.repeats >= self.stuck_limit {
            return Err(FaultKind::StuckValue);
        }

        Ok(reading.value)
    }
}

/// Estimate ambient light from the time of day: a half-sine between
/// sunrise and sunset, dark otherwise. The device clock runs on local time.
pub fn estimate_light(at: DateTime<Utc>) -> f64 {
    let hour = at.hour() as f64 + at.minute() as f64 / 60.0;
    if !(SUNRISE_HOUR..SUNSET_HOUR).contains(&hour) {
        return 0.0;
    }
    let phase = (hour - SUNRISE_HOUR) / (SUNSET_HOUR - SUNRISE_HOUR);
    DAYLIGHT_PEAK_LUX * (phase * PI).sin()
}
