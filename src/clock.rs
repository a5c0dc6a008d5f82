//! Time source for the control loop.
//!
//! Alert timers run on the monotonic clock; wall-clock time only labels
//! telemetry and persisted snapshots.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// A single reading of both clocks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moment {
    pub at: Instant,
    pub wall: DateTime<Utc>,
}

impl Moment {
    pub fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }

    /// The moment `d` later on both clocks.
    #[cfg(test)]
    pub fn after(&self, d: Duration) -> Self {
        let wall = chrono::Duration::from_std(d)
            .map(|cd| self.wall + cd)
            .unwrap_or(self.wall);
        Self {
            at: self.at + d,
            wall,
        }
    }
}

/// Sleep until `at`, or forever when there is nothing to wait for.
pub async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(t) => tokio::time::sleep_until(t).await,
        None => std::future::pending().await,
    }
}
