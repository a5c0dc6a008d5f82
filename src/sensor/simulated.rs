//! Simulated sensor driver for running the device on a host.

use super::{RawSample, Reading, SensorSource};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Soil dries a little every read and gets "watered" back when it runs low.
pub struct SimulatedSensors {
    rng: StdRng,
    soil_moisture: f64,
    /// Probability that any single channel read fails.
    failure_rate: f64,
}

impl SimulatedSensors {
    pub fn new(failure_rate: f64) -> Self {
        Self::with_rng(StdRng::from_entropy(), failure_rate)
    }

    pub fn with_rng(rng: StdRng, failure_rate: f64) -> Self {
        Self {
            rng,
            soil_moisture: 65.0,
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    fn channel(&mut self, value: f64) -> Reading {
        if self.rng.gen_bool(self.failure_rate) {
            Reading::failed()
        } else {
            Reading::ok(value)
        }
    }

    fn next_sample(&mut self) -> RawSample {
        self.soil_moisture -= self.rng.gen_range(0.2..1.5);
        if self.soil_moisture < 15.0 {
            tracing::debug!("SimulatedSensors: watering event");
            self.soil_moisture = 70.0;
        }

        let soil = self.soil_moisture;
        let air = 45.0 + self.rng.gen_range(-5.0..5.0);
        let temp = 22.0 + self.rng.gen_range(-2.0..2.0);
        let light = 700.0 + self.rng.gen_range(-400.0..400.0);

        RawSample {
            soil_moisture: self.channel(soil),
            air_humidity: self.channel(air),
            temperature: self.channel(temp),
            light: self.channel(light),
            captured_at: Utc::now(),
        }
    }
}

impl SensorSource for SimulatedSensors {
    async fn read(&mut self) -> RawSample {
        self.next_sample()
    }
}
