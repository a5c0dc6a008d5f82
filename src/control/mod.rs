//! The device control loop.
//!
//! A single task owns the [`Controller`] and serializes everything that
//! touches decision state: sampling ticks, alert timers, touch input,
//! remote commands and connectivity reports.

use crate::clock::{sleep_until_opt, Moment};
use crate::config::{ConfigFault, ConfigUpdate, DeviceRuntimeConfig};
use crate::db::Store;
use crate::engine::{AlertStats, Controller, FeedbackCommand, FeedbackSink};
use crate::gateway::TelemetrySnapshot;
use crate::sensor::{read_bounded, SensorSource, TouchEvent, SENSOR_READ_TIMEOUT};
use crate::supervisor::{ConnectivityState, PowerMonitor, TelemetryWorker};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

pub type ConfigReply = oneshot::Sender<Result<DeviceRuntimeConfig, ConfigFault>>;

/// Inputs delivered to the control loop.
#[derive(Debug)]
pub enum ControlEvent {
    Touch(TouchEvent),
    RemoteAck,
    ConfigUpdate(ConfigUpdate, ConfigReply),
    Connectivity(ConnectivityState),
    Shutdown,
}

/// Read-only view published after every change.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    #[serde(flatten)]
    pub snapshot: TelemetrySnapshot,
    pub config: DeviceRuntimeConfig,
    pub alert_stats: AlertStats,
    pub sample_interval_secs: u64,
    pub feedback: Option<FeedbackCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Battery reached the critical level; state was persisted.
    PowerShutdown,
    /// Shutdown was requested or every event sender went away.
    Stopped,
}

pub struct ControlLoop<S, M, F> {
    controller: Controller,
    sensors: S,
    power: M,
    sink: F,
    store: Arc<Store>,
    events: mpsc::Receiver<ControlEvent>,
    status: watch::Sender<DeviceStatus>,
    feedback: Option<FeedbackCommand>,
}

fn sampling_interval(period: Duration, first: Instant) -> Interval {
    let mut interval = tokio::time::interval_at(first, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

impl<S, M, F> ControlLoop<S, M, F>
where
    S: SensorSource,
    M: PowerMonitor,
    F: FeedbackSink,
{
    pub fn new(
        controller: Controller,
        sensors: S,
        power: M,
        sink: F,
        store: Arc<Store>,
        events: mpsc::Receiver<ControlEvent>,
    ) -> (Self, watch::Receiver<DeviceStatus>) {
        let initial = DeviceStatus {
            snapshot: controller.snapshot(Moment::now()),
            config: controller.config().clone(),
            alert_stats: controller.alert_stats(),
            sample_interval_secs: controller.sample_interval().as_secs(),
            feedback: None,
        };
        let (status, status_rx) = watch::channel(initial);

        let this = Self {
            controller,
            sensors,
            power,
            sink,
            store,
            events,
            status,
            feedback: None,
        };
        (this, status_rx)
    }

    /// Run until shutdown. The telemetry worker is stopped before returning.
    pub async fn run(mut self, telemetry: TelemetryWorker) -> LoopExit {
        let mut period = self.controller.sample_interval();
        let mut ticker = sampling_interval(period, Instant::now());
        tracing::info!("Control: sampling every {:?}", period);

        let exit = loop {
            let deadline = self.controller.next_deadline();

            tokio::select! {
                _ = ticker.tick() => {
                    if self.cycle(&telemetry).await {
                        break LoopExit::PowerShutdown;
                    }
                    let next = self.controller.sample_interval();
                    if next != period {
                        tracing::info!("Control: sampling period {:?} -> {:?}", period, next);
                        period = next;
                        ticker = sampling_interval(period, Instant::now() + period);
                    }
                }
                _ = sleep_until_opt(deadline) => {
                    let now = Moment::now();
                    let command = self.controller.on_timer(now);
                    self.emit(command);
                    self.publish_status(now);
                }
                event = self.events.recv() => match event {
                    None | Some(ControlEvent::Shutdown) => break LoopExit::Stopped,
                    Some(event) => self.handle(event),
                }
            }
        };

        let reason = match exit {
            LoopExit::PowerShutdown => "battery critical",
            LoopExit::Stopped => "shutdown",
        };
        self.persist(reason);
        telemetry.stop().await;
        tracing::info!("Control: stopped ({})", reason);
        exit
    }

    /// One sampling cycle. Returns true when the device must power down.
    async fn cycle(&mut self, telemetry: &TelemetryWorker) -> bool {
        let raw = read_bounded(&mut self.sensors, SENSOR_READ_TIMEOUT).await;
        let reading = self.power.read();
        let now = Moment::now();

        let outcome = self.controller.run_cycle(&raw, reading, now);
        self.emit(outcome.command);
        telemetry.submit(self.controller.snapshot(now));
        self.publish_status(now);

        if outcome.emergency {
            tracing::error!(
                "Control: battery critical ({}%), shutting down",
                reading.battery_percent
            );
        }
        outcome.emergency
    }

    fn handle(&mut self, event: ControlEvent) {
        let now = Moment::now();
        match event {
            ControlEvent::Touch(touch) => {
                let command = self.controller.on_touch(touch, now);
                self.emit(command);
            }
            ControlEvent::RemoteAck => {
                tracing::info!("Control: remote acknowledgment");
                let command = self.controller.acknowledge(now);
                self.emit(command);
            }
            ControlEvent::ConfigUpdate(update, reply) => {
                let (result, command) = self.controller.apply_config(&update);
                self.emit(command);
                if let Ok(config) = &result {
                    if let Err(e) = self.store.save_config(config) {
                        tracing::error!("Control: failed to persist config: {}", e);
                    }
                }
                // The requester may have given up waiting.
                let _ = reply.send(result);
            }
            ControlEvent::Connectivity(state) => {
                self.controller.set_connectivity(state);
            }
            ControlEvent::Shutdown => {}
        }
        self.publish_status(now);
    }

    fn emit(&mut self, command: Option<FeedbackCommand>) {
        if let Some(command) = command {
            self.sink.write(&command);
            self.feedback = Some(command);
        }
    }

    fn publish_status(&self, now: Moment) {
        self.status.send_replace(DeviceStatus {
            snapshot: self.controller.snapshot(now),
            config: self.controller.config().clone(),
            alert_stats: self.controller.alert_stats(),
            sample_interval_secs: self.controller.sample_interval().as_secs(),
            feedback: self.feedback,
        });
    }

    fn persist(&self, reason: &str) {
        let snapshot = self.controller.persisted(Moment::now(), reason);
        match self.store.save_snapshot(&snapshot) {
            Ok(_) => tracing::info!("Control: snapshot persisted ({})", reason),
            Err(e) => tracing::error!("Control: failed to persist snapshot: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Color, PlantCondition, Sound};
    use crate::gateway::Unconfigured;
    use crate::sensor::{RawSample, Reading, TouchPhase};
    use crate::supervisor::{PowerMode, PowerReading};
    use chrono::Utc;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    /// Always reports the same soil moisture and light.
    struct FixedSensors {
        moisture: f64,
        light: f64,
    }

    impl SensorSource for FixedSensors {
        async fn read(&mut self) -> RawSample {
            // Tiny jitter so the stuck-value detector stays quiet.
            self.moisture += 0.001;
            RawSample {
                soil_moisture: Reading::ok(self.moisture),
                air_humidity: Reading::ok(45.0 + self.moisture / 1000.0),
                temperature: Reading::ok(21.0 + self.moisture / 1000.0),
                light: Reading::ok(self.light + self.moisture / 1000.0),
                captured_at: Utc::now(),
            }
        }
    }

    struct FixedBattery(u8);

    impl PowerMonitor for FixedBattery {
        fn read(&mut self) -> PowerReading {
            PowerReading {
                battery_percent: self.0,
                external_power: false,
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<FeedbackCommand>>>);

    impl FeedbackSink for RecordingSink {
        fn write(&mut self, command: &FeedbackCommand) {
            self.0.lock().unwrap().push(*command);
        }
    }

    struct Harness {
        events: mpsc::Sender<ControlEvent>,
        status: watch::Receiver<DeviceStatus>,
        sink: RecordingSink,
        store: Arc<Store>,
        task: tokio::task::JoinHandle<LoopExit>,
        _db: NamedTempFile,
    }

    fn start(moisture: f64, light: f64, battery: u8, config: DeviceRuntimeConfig) -> Harness {
        let db = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(db.path()).unwrap());
        let (tx, rx) = mpsc::channel(16);
        let sink = RecordingSink::default();

        let (control, status) = ControlLoop::new(
            Controller::new("test-device", config),
            FixedSensors { moisture, light },
            FixedBattery(battery),
            sink.clone(),
            store.clone(),
            rx,
        );
        let worker = TelemetryWorker::spawn(Unconfigured, tx.clone(), Duration::from_secs(30));
        let task = tokio::spawn(control.run(worker));

        Harness {
            events: tx,
            status,
            sink,
            store,
            task,
            _db: db,
        }
    }

    fn short_onset() -> DeviceRuntimeConfig {
        DeviceRuntimeConfig {
            alert_onset_delay: Duration::from_secs(60),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_fires_and_tap_acknowledges() {
        let h = start(25.0, 800.0, 90, short_onset());

        tokio::time::sleep(Duration::from_secs(61)).await;
        let last = *h.sink.0.lock().unwrap().last().unwrap();
        assert_eq!(last.color, Color::Yellow);
        assert_eq!(last.sound, Some(Sound::WaterNeeded));
        assert_eq!(h.status.borrow().snapshot.alerts.len(), 1);

        let tap = TouchEvent {
            phase: TouchPhase::Tap,
            pressure: 2600,
            duration: Duration::from_millis(120),
        };
        h.events.send(ControlEvent::Touch(tap)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let status = h.status.borrow().clone();
        assert!(status.snapshot.alerts.is_empty());
        assert_eq!(status.alert_stats.acknowledgments, 1);
        assert_eq!(status.snapshot.condition, PlantCondition::NeedsWater);

        h.events.send(ControlEvent::Shutdown).await.unwrap();
        assert_eq!(h.task.await.unwrap(), LoopExit::Stopped);
        assert_eq!(h.store.latest_snapshot().unwrap().unwrap().reason, "shutdown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_battery_persists_and_exits() {
        let h = start(50.0, 800.0, 3, DeviceRuntimeConfig::default());

        assert_eq!(h.task.await.unwrap(), LoopExit::PowerShutdown);
        let saved = h.store.latest_snapshot().unwrap().unwrap();
        assert_eq!(saved.reason, "battery critical");
        assert_eq!(saved.power_mode, PowerMode::Emergency);
        assert_eq!(saved.condition, PlantCondition::Critical);

        let last = *h.sink.0.lock().unwrap().last().unwrap();
        assert_eq!(last.color, Color::Orange);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_update_reply_and_persistence() {
        let h = start(50.0, 800.0, 90, DeviceRuntimeConfig::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (reply_tx, reply_rx) = oneshot::channel();
        let bad = ConfigUpdate {
            moisture_threshold: Some(150.0),
            ..Default::default()
        };
        h.events
            .send(ControlEvent::ConfigUpdate(bad, reply_tx))
            .await
            .unwrap();
        assert_eq!(
            reply_rx.await.unwrap(),
            Err(ConfigFault::MoistureThreshold(150.0))
        );
        assert!(h.store.load_config().unwrap().is_none());

        let (reply_tx, reply_rx) = oneshot::channel();
        let good = ConfigUpdate {
            moisture_threshold: Some(60.0),
            ..Default::default()
        };
        h.events
            .send(ControlEvent::ConfigUpdate(good, reply_tx))
            .await
            .unwrap();
        assert_eq!(reply_rx.await.unwrap().unwrap().moisture_threshold, 60.0);
        let (stored, _) = h.store.load_config().unwrap().unwrap();
        assert_eq!(stored.moisture_threshold, 60.0);

        // Takes effect at the next sampling cycle.
        assert_eq!(h.status.borrow().snapshot.condition, PlantCondition::Healthy);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.status.borrow().snapshot.condition, PlantCondition::NeedsWater);

        drop(h.events);
        h.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_save_slows_sampling() {
        let h = start(50.0, 800.0, 15, DeviceRuntimeConfig::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let status = h.status.borrow().clone();
        assert_eq!(status.snapshot.power_mode, PowerMode::PowerSave);
        assert_eq!(status.sample_interval_secs, 900);
        assert_eq!(status.feedback.unwrap().brightness, 128);

        h.events.send(ControlEvent::Shutdown).await.unwrap();
        assert_eq!(h.task.await.unwrap(), LoopExit::Stopped);
    }
}
