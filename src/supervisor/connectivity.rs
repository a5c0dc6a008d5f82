//! Telemetry delivery with bounded retry.
//!
//! Publishing runs on its own task so a slow or absent network never holds
//! up the control loop. Failures back off exponentially up to
//! [`MAX_RETRIES`]; after that the worker goes Offline and waits for the
//! next retry window instead of retrying immediately.

use crate::clock::sleep_until_opt;
use crate::control::ControlEvent;
use crate::gateway::{Publisher, TelemetrySnapshot};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const MAX_RETRIES: u32 = 3;
pub const BASE_BACKOFF: Duration = Duration::from_secs(1);
/// Upper bound on one publish attempt.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectivityState {
    Online,
    Reconnecting { attempt: u32 },
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    /// Ceiling reached; wait for the periodic retry window.
    Offline,
}

/// Counts consecutive publish failures.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    failures: u32,
    max_retries: u32,
    base: Duration,
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(MAX_RETRIES, BASE_BACKOFF)
    }
}

impl RetryTracker {
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self {
            failures: 0,
            max_retries: max_retries.max(1),
            base,
        }
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max_retries {
            RetryDecision::Offline
        } else {
            RetryDecision::RetryAfter(self.base * 2u32.pow(self.failures - 1))
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    #[cfg(test)]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn state(&self) -> ConnectivityState {
        if self.failures == 0 {
            ConnectivityState::Online
        } else if self.failures < self.max_retries {
            ConnectivityState::Reconnecting {
                attempt: self.failures,
            }
        } else {
            ConnectivityState::Offline
        }
    }
}

/// Handle to the background publisher task.
pub struct TelemetryWorker {
    tx: mpsc::Sender<TelemetrySnapshot>,
    stop: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl TelemetryWorker {
    /// Spawn the publisher task. Connectivity changes are reported back on
    /// `events`.
    pub fn spawn<P: Publisher + 'static>(
        publisher: P,
        events: mpsc::Sender<ControlEvent>,
        offline_window: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(8);
        let (stop, _) = broadcast::channel(1);
        let stop_rx = stop.subscribe();

        let task = tokio::spawn(run_publish_loop(
            publisher,
            rx,
            events,
            stop_rx,
            offline_window,
        ));

        Self { tx, stop, task }
    }

    /// Hand a snapshot to the worker without waiting. Dropped if the worker
    /// is backed up; the next cycle carries fresher state anyway.
    pub fn submit(&self, snapshot: TelemetrySnapshot) {
        if let Err(e) = self.tx.try_send(snapshot) {
            tracing::debug!("Telemetry: snapshot dropped ({})", e);
        }
    }

    /// Abort any in-flight publish or backoff and wait for the task to end.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            tracing::error!("Telemetry: worker ended abnormally: {}", e);
        }
    }
}

async fn run_publish_loop<P: Publisher>(
    publisher: P,
    mut rx: mpsc::Receiver<TelemetrySnapshot>,
    events: mpsc::Sender<ControlEvent>,
    mut stop_rx: broadcast::Receiver<()>,
    offline_window: Duration,
) {
    let mut tracker = RetryTracker::default();
    let mut latest: Option<TelemetrySnapshot> = None;
    let mut retry_at: Option<Instant> = None;

    loop {
        let attempt_now = tokio::select! {
            _ = stop_rx.recv() => break,
            msg = rx.recv() => match msg {
                Some(snapshot) => {
                    latest = Some(snapshot);
                    retry_at.is_none()
                }
                None => break,
            },
            _ = sleep_until_opt(retry_at) => {
                retry_at = None;
                true
            }
        };

        if !attempt_now {
            continue;
        }
        let Some(snapshot) = latest.clone() else {
            continue;
        };

        let outcome = tokio::select! {
            _ = stop_rx.recv() => break,
            r = tokio::time::timeout(PUBLISH_TIMEOUT, publisher.publish(&snapshot)) => r,
        };

        let before = tracker.state();
        match outcome {
            Ok(Ok(())) => {
                latest = None;
                tracker.record_success();
            }
            Ok(Err(e)) => {
                tracing::warn!("Telemetry: publish failed: {}", e);
                retry_at = Some(schedule_retry(&mut tracker, offline_window));
            }
            Err(_) => {
                tracing::warn!("Telemetry: publish timed out after {:?}", PUBLISH_TIMEOUT);
                retry_at = Some(schedule_retry(&mut tracker, offline_window));
            }
        }

        let after = tracker.state();
        if after != before {
            tracing::info!("Telemetry: connectivity {:?} -> {:?}", before, after);
            let sent = tokio::select! {
                _ = stop_rx.recv() => break,
                r = events.send(ControlEvent::Connectivity(after)) => r,
            };
            if sent.is_err() {
                break;
            }
        }
    }

    tracing::debug!("Telemetry: worker stopped");
}

fn schedule_retry(tracker: &mut RetryTracker, offline_window: Duration) -> Instant {
    let delay = match tracker.record_failure() {
        RetryDecision::RetryAfter(d) => d,
        RetryDecision::Offline => offline_window,
    };
    Instant::now() + delay
}
