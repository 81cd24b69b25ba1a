//! Task Aggregator
//!
//! Collects task duration events over HTTP or an MQTT topic and maintains a
//! running aggregate per task identifier, so the average duration of any task
//! can be queried at any time.
//!
//! # Overview
//!
//! - Protocol types and validation ([`protocol`])
//! - Aggregate store with atomic accumulation ([`store`])
//! - Sequential, fail-fast processing pipeline ([`pipeline`])
//! - Workflow dispatch, processing and averaging ([`workflow`])
//! - HTTP adapter ([`api`]) and MQTT queue adapter ([`transport`], [`consumer`])
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use task_aggregator::pipeline::ProcessingPipeline;
//! use task_aggregator::protocol::TaskEvent;
//! use task_aggregator::store::InMemoryAggregateStore;
//! use task_aggregator::workflow::TaskService;
//!
//! # tokio_test::block_on(async {
//! let service = TaskService::new(
//!     Arc::new(InMemoryAggregateStore::new()),
//!     ProcessingPipeline::empty(),
//! );
//!
//! service.submit_task_event(TaskEvent::new("t1", 1000)?).await?;
//! service.submit_task_event(TaskEvent::new("t1", 2000)?).await?;
//!
//! let average = service.request_average("t1").await?;
//! assert_eq!(average.average_duration_ms, 1500);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod api;
pub mod config;
pub mod consumer;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod protocol;
pub mod store;
pub mod testing;
pub mod transport;
pub mod workflow;

pub use config::*;
pub use error::{TrackerError, TrackerResult};
pub use protocol::*;
pub use transport::mqtt::MqttClient;
pub use workflow::TaskService;
