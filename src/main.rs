//! PlantCare - plant-care decision and alerting device
//!
//! Samples soil, air and light sensors, decides whether the plant needs
//! attention, escalates alerts over time and reports to a gateway.

mod clock;
mod config;
mod control;
mod db;
mod engine;
mod gateway;
mod sensor;
mod supervisor;
mod web;

use config::{DeviceRuntimeConfig, ServerConfig};
use control::{ControlEvent, ControlLoop, LoopExit};
use db::Store;
use engine::{Controller, LogSink};
use gateway::{HttpPublisher, Unconfigured};
use sensor::SimulatedSensors;
use supervisor::{SimulatedBattery, TelemetryWorker, PUBLISH_TIMEOUT};
use web::Server;

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("plantcare=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting PlantCare device {} on port {}...", cfg.device_id, cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    if let Some(last) = store.latest_snapshot()? {
        tracing::info!(
            "Last snapshot {} ({}): {:?}, {:?}, {} active alerts",
            last.saved_at,
            last.reason,
            last.condition,
            last.power_mode,
            last.alerts.len()
        );
    }

    let mut runtime = match store.load_config()? {
        Some((saved, updated_at)) => match saved.validate() {
            Ok(()) => {
                tracing::info!("Restored runtime config saved at {}", updated_at);
                saved
            }
            Err(e) => {
                tracing::warn!("Stored runtime config invalid ({}), using defaults", e);
                DeviceRuntimeConfig::default()
            }
        },
        None => DeviceRuntimeConfig::default(),
    };
    if let Some(period) = cfg.sample_interval_override {
        runtime.sample_interval = period;
    }

    let (events_tx, events_rx) = mpsc::channel(64);

    let telemetry = match &cfg.gateway_url {
        Some(url) => {
            let publisher = HttpPublisher::new(url, PUBLISH_TIMEOUT)?;
            tracing::info!("Publishing telemetry to {}", publisher.url());
            TelemetryWorker::spawn(publisher, events_tx.clone(), runtime.offline_retry_window)
        }
        None => {
            tracing::warn!("No gateway configured, telemetry will not be delivered");
            TelemetryWorker::spawn(Unconfigured, events_tx.clone(), runtime.offline_retry_window)
        }
    };

    let (control, status) = ControlLoop::new(
        Controller::new(cfg.device_id.clone(), runtime),
        SimulatedSensors::new(0.01),
        SimulatedBattery::new(100.0, false),
        LogSink,
        store,
        events_rx,
    );

    let server = Server::new(cfg, events_tx.clone(), status);
    tokio::spawn(async move {
        if let Err(e) = server.start().await {
            tracing::error!("Web server failed: {}", e);
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = events_tx.send(ControlEvent::Shutdown).await;
        }
    });

    match control.run(telemetry).await {
        LoopExit::PowerShutdown => tracing::warn!("Powered down on critical battery"),
        LoopExit::Stopped => tracing::info!("Stopped"),
    }

    Ok(())
}
