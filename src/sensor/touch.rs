//! Capacitive touch input.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum filtered pressure (12-bit ADC scale) that counts as a touch.
pub const TOUCH_PRESSURE_THRESHOLD: u16 = 2000;
/// Touches held at least this long are holds, not taps.
pub const HOLD_THRESHOLD: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchPhase {
    Press,
    Release,
    Tap,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchEvent {
    pub phase: TouchPhase,
    pub pressure: u16,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl TouchEvent {
    /// Only a completed, firm, short tap acknowledges an alert.
    pub fn is_acknowledgment(&self) -> bool {
        self.phase == TouchPhase::Tap
            && self.pressure >= TOUCH_PRESSURE_THRESHOLD
            && self.duration < HOLD_THRESHOLD
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(phase: TouchPhase, pressure: u16, ms: u64) -> TouchEvent {
        TouchEvent {
            phase,
            pressure,
            duration: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_only_firm_short_taps_acknowledge() {
        assert!(touch(TouchPhase::Tap, 2500, 200).is_acknowledgment());
        assert!(!touch(TouchPhase::Press, 2500, 200).is_acknowledgment());
        assert!(!touch(TouchPhase::Release, 2500, 200).is_acknowledgment());
        assert!(!touch(TouchPhase::Hold, 2500, 1500).is_acknowledgment());
        assert!(!touch(TouchPhase::Tap, 1200, 200).is_acknowledgment());
        assert!(!touch(TouchPhase::Tap, 2500, 1000).is_acknowledgment());
    }

    #[test]
    fn test_touch_event_json() {
        let ev: TouchEvent =
            serde_json::from_str(r#"{"phase":"tap","pressure":2400,"duration_ms":150}"#).unwrap();
        assert_eq!(ev, touch(TouchPhase::Tap, 2400, 150));
    }
}
