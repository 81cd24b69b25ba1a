//! Transport layer for task events
//!
//! [`Transport`] abstracts the message broker so the consumer and the HTTP
//! async path can be tested without one. [`EventPublisher`] is the
//! object-safe slice the HTTP layer holds.

use crate::error::TrackerError;
use crate::protocol::TaskEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::ConnectionState;

/// Broker connection carrying task events
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn connect(&mut self) -> Result<(), Self::Error>;

    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Start receiving events on the configured topic
    async fn subscribe_to_events(&mut self) -> Result<(), Self::Error>;

    async fn publish_event(&self, event: &TaskEvent) -> Result<(), Self::Error>;

    fn is_connected(&self) -> bool;

    fn connection_state(&self) -> Option<ConnectionState>;

    /// Where received events are forwarded
    async fn set_event_sender(&self, sender: mpsc::Sender<TaskEvent>);
}

/// Publish-only view of a transport
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &TaskEvent) -> Result<(), TrackerError>;
}

#[async_trait]
impl<T: Transport> EventPublisher for T {
    async fn publish(&self, event: &TaskEvent) -> Result<(), TrackerError> {
        self.publish_event(event)
            .await
            .map_err(|e| TrackerError::Transport(Box::new(e)))
    }
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
