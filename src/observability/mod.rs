//! Observability: structured logging, metrics and health endpoints

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{health_routes, HealthReport, HealthState};
pub use logging::{init_default_logging, init_logging, LogFormat, LogSettings};
pub use metrics::{metrics, EventSource, MetricsCollector, MetricsSnapshot};

pub use logging::{mqtt_span, pipeline_span, request_span, store_span, task_span};
