//! Mock implementations for testing
//!
//! Provides mock processing steps, a failing aggregate store and a mock
//! Transport.

use crate::pipeline::{ProcessingStep, StepError};
use crate::protocol::{AggregateRecord, TaskEvent};
use crate::store::{AggregateStore, StoreError};
use crate::transport::{ConnectionState, Transport};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Step that appends its name to a shared log
pub struct RecordingStep {
    name: String,
    log: Arc<std::sync::Mutex<Vec<String>>>,
}

impl RecordingStep {
    pub fn new(name: &str, log: Arc<std::sync::Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            log,
        }
    }
}

impl ProcessingStep for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _event: &TaskEvent) -> Result<(), StepError> {
        self.log
            .lock()
            .map_err(|_| StepError::failed("recording log poisoned"))?
            .push(self.name.clone());
        Ok(())
    }
}

/// Step that always fails with a fixed message
pub struct FailingStep {
    name: String,
    message: String,
}

impl FailingStep {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

impl ProcessingStep for FailingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _event: &TaskEvent) -> Result<(), StepError> {
        Err(StepError::failed(self.message.clone()))
    }
}

/// Step that panics
pub struct PanickingStep {
    name: String,
}

impl PanickingStep {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl ProcessingStep for PanickingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _event: &TaskEvent) -> Result<(), StepError> {
        panic!("step {} panicked", self.name)
    }
}

/// Step that blocks its worker thread for a fixed time
pub struct SlowStep {
    name: String,
    delay: Duration,
}

impl SlowStep {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

impl ProcessingStep for SlowStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _event: &TaskEvent) -> Result<(), StepError> {
        std::thread::sleep(self.delay);
        Ok(())
    }
}

/// Store whose every call fails as unavailable
pub struct FailingStore {
    message: String,
}

impl FailingStore {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl AggregateStore for FailingStore {
    async fn accumulate(&self, _task_id: &str, _duration_ms: u64) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable(self.message.clone()))
    }

    async fn get(&self, _task_id: &str) -> Result<Option<AggregateRecord>, StoreError> {
        Err(StoreError::Unavailable(self.message.clone()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Store whose accumulate is delayed before reaching `inner`
pub struct SlowStore {
    inner: Arc<dyn AggregateStore>,
    delay: Duration,
}

impl SlowStore {
    pub fn new(inner: Arc<dyn AggregateStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl AggregateStore for SlowStore {
    async fn accumulate(&self, task_id: &str, duration_ms: u64) -> Result<u64, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.accumulate(task_id, duration_ms).await
    }

    async fn get(&self, task_id: &str) -> Result<Option<AggregateRecord>, StoreError> {
        self.inner.get(task_id).await
    }

    fn name(&self) -> &str {
        "slow"
    }
}

#[derive(Debug, Error)]
#[error("mock transport failure: {0}")]
pub struct MockTransportError(pub String);

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    pub published_events: Arc<Mutex<Vec<TaskEvent>>>,
    pub should_fail: bool,
    pub connected: bool,
    pub subscribed: bool,
    pub event_sender: Arc<Mutex<Option<mpsc::Sender<TaskEvent>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn get_published_events(&self) -> Vec<TaskEvent> {
        self.published_events.lock().await.clone()
    }

    /// Deliver `event` as if it arrived from the broker
    pub async fn inject_event(&self, event: TaskEvent) -> Result<(), MockTransportError> {
        let sender = self.event_sender.lock().await.clone();
        let sender = sender.ok_or_else(|| MockTransportError("no event sender".to_string()))?;
        sender
            .send(event)
            .await
            .map_err(|e| MockTransportError(e.to_string()))
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(MockTransportError("connection refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        Ok(())
    }

    async fn subscribe_to_events(&mut self) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(MockTransportError("subscribe refused".to_string()));
        }
        self.subscribed = true;
        Ok(())
    }

    async fn publish_event(&self, event: &TaskEvent) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(MockTransportError("publish refused".to_string()));
        }
        self.published_events.lock().await.push(event.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        Some(if self.connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected("mock".to_string())
        })
    }

    async fn set_event_sender(&self, sender: mpsc::Sender<TaskEvent>) {
        *self.event_sender.lock().await = Some(sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EventPublisher;

    #[tokio::test]
    async fn test_mock_transport_records_events() {
        let transport = MockTransport::new();
        let event = TaskEvent::new("t1", 10).unwrap();
        transport.publish(&event).await.unwrap();
        assert_eq!(transport.get_published_events().await, vec![event]);
    }

    #[tokio::test]
    async fn test_failing_transport_maps_to_tracker_error() {
        let transport = MockTransport::with_failure();
        let err = transport
            .publish(&TaskEvent::new("t1", 10).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_inject_event_reaches_sender() {
        let transport = MockTransport::new();
        let (tx, mut rx) = mpsc::channel(1);
        transport.set_event_sender(tx).await;

        transport
            .inject_event(TaskEvent::new("t2", 5).unwrap())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().task_id(), "t2");
    }
}
