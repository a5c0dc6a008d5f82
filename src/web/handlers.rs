//! HTTP request handlers.

use super::AppState;
use crate::config::ConfigUpdate;
use crate::control::ControlEvent;
use crate::sensor::TouchEvent;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc::error::SendTimeoutError, oneshot};

/// How long a request waits for the control loop to take or answer it.
pub const CONFIG_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

fn unavailable() -> axum::response::Response {
    (StatusCode::SERVICE_UNAVAILABLE, "Control loop unavailable").into_response()
}

/// Queue an event for the control loop without waiting on a full queue forever.
async fn enqueue(state: &AppState, event: ControlEvent) -> bool {
    match state.events.send_timeout(event, CONFIG_REPLY_TIMEOUT).await {
        Ok(()) => true,
        Err(SendTimeoutError::Timeout(_)) => {
            tracing::warn!("Web: control queue full, dropping request");
            false
        }
        Err(SendTimeoutError::Closed(_)) => false,
    }
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    Json(status)
}

pub async fn handle_get_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.status.borrow().config.clone();
    Json(config)
}

pub async fn handle_update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> impl IntoResponse {
    let (reply_tx, reply_rx) = oneshot::channel();
    if !enqueue(&state, ControlEvent::ConfigUpdate(update, reply_tx)).await {
        return unavailable();
    }

    match tokio::time::timeout(CONFIG_REPLY_TIMEOUT, reply_rx).await {
        Ok(Ok(Ok(config))) => Json(config).into_response(),
        Ok(Ok(Err(fault))) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": fault.to_string() }))).into_response()
        }
        Ok(Err(_)) => unavailable(),
        Err(_) => {
            tracing::warn!("Config update timed out waiting for the control loop");
            unavailable()
        }
    }
}

pub async fn handle_touch(
    State(state): State<AppState>,
    Json(touch): Json<TouchEvent>,
) -> impl IntoResponse {
    if enqueue(&state, ControlEvent::Touch(touch)).await {
        StatusCode::ACCEPTED.into_response()
    } else {
        unavailable()
    }
}

pub async fn handle_acknowledge(State(state): State<AppState>) -> impl IntoResponse {
    if enqueue(&state, ControlEvent::RemoteAck).await {
        StatusCode::ACCEPTED.into_response()
    } else {
        unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFault, DeviceRuntimeConfig};
    use crate::control::DeviceStatus;
    use crate::engine::AlertStats;
    use crate::gateway::TelemetrySnapshot;
    use crate::sensor::TouchPhase;
    use tokio::sync::{mpsc, watch};

    fn state() -> (AppState, mpsc::Receiver<ControlEvent>, watch::Sender<DeviceStatus>) {
        let (tx, rx) = mpsc::channel(4);
        let (status_tx, status_rx) = watch::channel(DeviceStatus {
            snapshot: TelemetrySnapshot::sample(),
            config: DeviceRuntimeConfig::default(),
            alert_stats: AlertStats::default(),
            sample_interval_secs: 300,
            feedback: None,
        });
        let state = AppState {
            events: tx,
            status: status_rx,
        };
        (state, rx, status_tx)
    }

    #[tokio::test]
    async fn test_config_update_accepted_and_rejected() {
        let (state, mut rx, _status) = state();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let ControlEvent::ConfigUpdate(update, reply) = event {
                    let _ = reply.send(DeviceRuntimeConfig::default().apply(&update));
                }
            }
        });

        let ok = ConfigUpdate {
            moisture_threshold: Some(45.0),
            ..Default::default()
        };
        let resp = handle_update_config(State(state.clone()), Json(ok))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let bad = ConfigUpdate {
            battery_low_threshold: Some(5),
            battery_critical_threshold: Some(10),
            ..Default::default()
        };
        let resp = handle_update_config(State(state), Json(bad)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let expected = ConfigFault::BatteryThresholds { low: 5, critical: 10 }.to_string();
        assert_eq!(body["error"], expected.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_update_times_out_when_loop_is_stuck() {
        let (state, _rx, _status) = state();
        let resp = handle_update_config(State(state), Json(ConfigUpdate::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_touch_and_ack_are_queued() {
        let (state, mut rx, _status) = state();
        let touch = TouchEvent {
            phase: TouchPhase::Tap,
            pressure: 2500,
            duration: Duration::from_millis(100),
        };

        let resp = handle_touch(State(state.clone()), Json(touch)).await.into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(matches!(rx.recv().await, Some(ControlEvent::Touch(t)) if t == touch));

        let resp = handle_acknowledge(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(matches!(rx.recv().await, Some(ControlEvent::RemoteAck)));
    }

    #[tokio::test]
    async fn test_closed_queue_is_unavailable() {
        let (state, rx, _status) = state();
        drop(rx);
        let resp = handle_acknowledge(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_is_unavailable() {
        let (state, _rx, _status) = state();
        for _ in 0..4 {
            state.events.send(ControlEvent::RemoteAck).await.unwrap();
        }

        let resp = handle_acknowledge(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = handle_update_config(State(state), Json(ConfigUpdate::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_status_reflects_latest_publish() {
        let (state, _rx, status) = state();
        status.send_modify(|s| s.sample_interval_secs = 900);

        let resp = handle_status(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["sample_interval_secs"], 900);
        assert_eq!(body["device_id"], "test-device");
        assert_eq!(body["condition"], "healthy");
    }
}
