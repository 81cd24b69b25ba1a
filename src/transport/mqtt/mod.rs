//! MQTT transport for task events
//!
//! Pure state and routing logic is kept apart from the I/O:
//!
//! - [`connection`] - connection state, reconnection policy and client options
//! - [`message_handler`] - routing and parsing of inbound traffic
//! - [`client`] - the client and its event loop supervisor
//!
//! # Usage
//!
//! ```rust,no_run
//! use task_aggregator::config::MqttSection;
//! use task_aggregator::protocol::TaskEvent;
//! use task_aggregator::transport::mqtt::MqttClient;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     broker_url: "mqtt://localhost:1883".to_string(),
//!     topic: "task-events".to_string(),
//!     username_env: None,
//!     password_env: None,
//! };
//!
//! let mut client = MqttClient::new("task-aggregator", config)?;
//! client.connect().await?;
//! client.publish_event(&TaskEvent::new("t1", 1500)?).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError, ReconnectConfig, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler};
