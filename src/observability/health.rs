//! Health, readiness and metrics endpoints
//!
//! [`HealthState`] is shared between the transport (connectivity), the
//! workflow core (last processed event) and the HTTP server, which mounts
//! [`health_routes`] next to the task API.

use crate::observability::metrics::metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

const EVENT_STALENESS_THRESHOLD_SECONDS: u64 = 300;

/// Status of a single health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
    Stale,
    /// Component not configured; does not degrade overall health
    Disabled,
}

impl CheckStatus {
    fn is_ok(self) -> bool {
        matches!(self, CheckStatus::Healthy | CheckStatus::Disabled)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: CheckStatus,
    pub message: String,
    pub last_check: u64,
}

impl HealthCheck {
    fn new(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            last_check: current_timestamp(),
        }
    }
}

/// Aggregated health report served on `/health`
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service_id: String,
    pub uptime_seconds: u64,
    pub timestamp: u64,
    pub checks: BTreeMap<String, HealthCheck>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Shared runtime health state
#[derive(Debug)]
pub struct HealthState {
    service_id: String,
    store_backend: String,
    mqtt_enabled: bool,
    mqtt_connected: AtomicBool,
    last_event_processed: AtomicU64,
}

impl HealthState {
    pub fn new(
        service_id: impl Into<String>,
        store_backend: impl Into<String>,
        mqtt_enabled: bool,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            store_backend: store_backend.into(),
            mqtt_enabled,
            mqtt_connected: AtomicBool::new(false),
            last_event_processed: AtomicU64::new(0),
        }
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    /// Record that an event was aggregated just now
    pub fn mark_event_processed(&self) {
        self.last_event_processed
            .store(current_timestamp(), Ordering::Relaxed);
    }

    #[cfg(test)]
    fn set_last_event_processed(&self, timestamp: u64) {
        self.last_event_processed.store(timestamp, Ordering::Relaxed);
    }

    /// Ready when the queue, if configured, is connected
    pub fn is_ready(&self) -> bool {
        !self.mqtt_enabled || self.mqtt_connected.load(Ordering::Relaxed)
    }

    fn mqtt_check(&self) -> HealthCheck {
        if !self.mqtt_enabled {
            HealthCheck::new(CheckStatus::Disabled, "HTTP-only mode")
        } else if self.mqtt_connected.load(Ordering::Relaxed) {
            HealthCheck::new(CheckStatus::Healthy, "MQTT connection established")
        } else {
            HealthCheck::new(CheckStatus::Unhealthy, "MQTT disconnected")
        }
    }

    fn event_processing_check(&self) -> HealthCheck {
        let now = current_timestamp();
        let last = self.last_event_processed.load(Ordering::Relaxed);

        if last == 0 {
            HealthCheck::new(CheckStatus::Healthy, "No events processed yet")
        } else if now.saturating_sub(last) > EVENT_STALENESS_THRESHOLD_SECONDS {
            HealthCheck::new(
                CheckStatus::Stale,
                format!("No event activity for {} seconds", now - last),
            )
        } else {
            HealthCheck::new(CheckStatus::Healthy, "Recent event activity")
        }
    }

    pub fn report(&self) -> HealthReport {
        let mut checks = BTreeMap::new();
        checks.insert("mqtt".to_string(), self.mqtt_check());
        checks.insert("event_processing".to_string(), self.event_processing_check());
        checks.insert(
            "store".to_string(),
            HealthCheck::new(CheckStatus::Healthy, format!("backend: {}", self.store_backend)),
        );

        let healthy = checks.values().all(|c| c.status.is_ok());

        HealthReport {
            status: if healthy { "healthy" } else { "degraded" },
            service_id: self.service_id.clone(),
            uptime_seconds: metrics().get_metrics().uptime_seconds,
            timestamp: current_timestamp(),
            checks,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

/// `GET /health`, `/ready`, `/live` and `/metrics`
pub fn health_routes(
    state: Arc<HealthState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_state = warp::any().map(move || state.clone());

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_state.clone())
        .map(|state: Arc<HealthState>| {
            let report = state.report();
            let status = if report.is_healthy() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            warp::reply::with_status(warp::reply::json(&report), status)
        });

    let ready = warp::path!("ready")
        .and(warp::get())
        .and(with_state)
        .map(|state: Arc<HealthState>| {
            let ready = state.is_ready();
            let body = ReadinessResponse {
                ready,
                timestamp: current_timestamp(),
            };
            let status = if ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            warp::reply::with_status(warp::reply::json(&body), status)
        });

    let live = warp::path!("live").and(warp::get()).map(|| {
        warp::reply::json(&LivenessResponse {
            alive: true,
            timestamp: current_timestamp(),
        })
    });

    let metrics_route = warp::path!("metrics")
        .and(warp::get())
        .map(|| warp::reply::json(&metrics().get_metrics()));

    health.or(ready).or(live).or(metrics_route)
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
