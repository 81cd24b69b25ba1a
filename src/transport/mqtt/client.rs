//! MQTT client I/O: connection supervision, subscription and publishing

use super::connection::{
    configure_mqtt_options, log_state_transition, ConnectionState, MqttError, ReconnectConfig,
    ReconnectionDecision,
};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use crate::config::MqttSection;
use crate::observability::metrics::metrics;
use crate::observability::HealthState;
use crate::protocol::{canonicalize_topic, TaskEvent};
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument};

const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// MQTT transport for task events
pub struct MqttClient {
    service_id: String,
    topic: String,
    client: AsyncClient,
    /// Held until `connect` hands it to the supervisor
    event_loop: Option<Mutex<EventLoop>>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    /// PubAcks seen by the supervisor
    acks_rx: Option<watch::Receiver<u64>>,
    published: AtomicU64,
    reconnect_config: ReconnectConfig,
    subscribed: Arc<AtomicBool>,
    forwarder: Arc<Mutex<MessageForwarder>>,
    health: Option<Arc<HealthState>>,
}

impl MqttClient {
    pub fn new(service_id: &str, config: MqttSection) -> Result<Self, MqttError> {
        let options = configure_mqtt_options(service_id, &config)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        Ok(Self {
            service_id: service_id.to_string(),
            topic: canonicalize_topic(&config.topic),
            client,
            event_loop: Some(Mutex::new(event_loop)),
            event_loop_handle: None,
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            acks_rx: None,
            published: AtomicU64::new(0),
            reconnect_config: ReconnectConfig::default(),
            subscribed: Arc::new(AtomicBool::new(false)),
            forwarder: Arc::new(Mutex::new(MessageForwarder::new())),
            health: None,
        })
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    /// Mirror connectivity into `health`
    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    /// Canonical topic events are consumed from and published to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        (
            watch::channel(ConnectionState::Connecting),
            watch::channel(false),
        )
    }

    /// Resolve once the supervisor reports ConnAck, or fail
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let wait = async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "state channel closed".to_string(),
                    ));
                }
                let state = state_rx.borrow().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason))
                    }
                    // The supervisor keeps retrying through transient failures
                    ConnectionState::Connecting
                    | ConnectionState::Disconnected(_)
                    | ConnectionState::Reconnecting(_) => continue,
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            MqttError::ConnectionFailed("ConnAck timeout - broker did not confirm".to_string())
        })?
    }

    /// Resolve once `target` PubAcks have been counted
    async fn wait_for_ack_count(
        mut acks_rx: watch::Receiver<u64>,
        target: u64,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let wait = async {
            loop {
                if *acks_rx.borrow() >= target {
                    return Ok(());
                }
                if acks_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "event loop stopped before all publishes were acknowledged".to_string(),
                    ));
                }
            }
        };

        let waited = tokio::time::timeout(timeout, wait).await;
        match waited {
            Ok(result) => result,
            Err(_) => Err(MqttError::AckTimeout {
                pending: target.saturating_sub(*acks_rx.borrow()),
            }),
        }
    }

    /// Start the event loop supervisor and wait for the broker's ConnAck
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .take()
            .map(Mutex::into_inner)
            .ok_or_else(|| MqttError::ConnectionFailed("event loop already started".to_string()))?;

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) = Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);
        let (acks_tx, acks_rx) = watch::channel(0);
        self.acks_rx = Some(acks_rx);

        metrics().mqtt_connection_attempt();

        let supervisor = Supervisor {
            topic: self.topic.clone(),
            client: self.client.clone(),
            reconnect_config: self.reconnect_config.clone(),
            subscribed: self.subscribed.clone(),
            forwarder: self.forwarder.clone(),
            health: self.health.clone(),
            state_tx,
            shutdown_rx,
            acks_tx,
            attempts: 0,
        };
        let span = crate::mqtt_span!(service_id = %self.service_id, topic = %self.topic);
        self.event_loop_handle = Some(tokio::spawn(supervisor.run(event_loop).instrument(span)));

        Self::wait_for_connection_confirmation(state_rx, self.reconnect_config.connection_timeout())
            .await
    }

    /// Subscribe to the task event topic; re-issued after every reconnect
    pub async fn subscribe_to_events(&mut self) -> Result<(), MqttError> {
        self.check_connection_state()?;

        self.client
            .subscribe(&self.topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;
        self.subscribed.store(true, Ordering::Relaxed);

        info!(topic = %self.topic, "subscribed to task events");
        Ok(())
    }

    /// Publish one task event (QoS 1, not retained)
    pub async fn publish_event(&self, event: &TaskEvent) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let payload = MessageHandler::format_event_payload(event).map_err(MqttError::Serialization)?;
        let result = self
            .client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .await;

        match result {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                metrics().mqtt_message_published();
                debug!(task_id = event.task_id(), topic = %self.topic, "published task event");
                Ok(())
            }
            Err(e) => {
                metrics().mqtt_publish_failed();
                Err(MqttError::PublishFailed(Box::new(e)))
            }
        }
    }

    pub async fn set_event_sender(&self, sender: mpsc::Sender<TaskEvent>) {
        self.forwarder.lock().await.set_event_sender(sender);
    }

    /// Wait until the broker has acknowledged every event published so far
    ///
    /// `publish_event` only queues the request; this is the delivery point.
    pub async fn wait_for_acks(&self, timeout: Duration) -> Result<(), MqttError> {
        let acks_rx = self.acks_rx.clone().ok_or_else(|| MqttError::NotConnected {
            state: ConnectionState::Disconnected("never connected".to_string()),
        })?;
        Self::wait_for_ack_count(acks_rx, self.published.load(Ordering::Relaxed), timeout).await
    }

    /// Stop the supervisor and disconnect from the broker
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        self.client
            .disconnect()
            .await
            .map_err(|e| MqttError::ConnectionFailed(e.to_string()))?;

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "client disconnected".to_string(),
            ));
        }
        if let Some(health) = &self.health {
            health.set_mqtt_connected(false);
        }

        if let Some(handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!("event loop supervisor stopped"),
                Ok(Err(e)) if !e.is_cancelled() => warn!(error = %e, "event loop supervisor failed"),
                Err(_) => warn!("event loop supervisor did not stop in time"),
                _ => {}
            }
        }

        info!("MQTT client disconnected");
        Ok(())
    }

    /// `None` until `connect` has been called
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state = self
            .connection_state()
            .unwrap_or_else(|| ConnectionState::Disconnected("never connected".to_string()));
        if state.can_publish() {
            Ok(())
        } else {
            Err(MqttError::NotConnected { state })
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn subscribe_to_events(&mut self) -> Result<(), Self::Error> {
        MqttClient::subscribe_to_events(self).await
    }

    async fn publish_event(&self, event: &TaskEvent) -> Result<(), Self::Error> {
        MqttClient::publish_event(self, event).await
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    async fn set_event_sender(&self, sender: mpsc::Sender<TaskEvent>) {
        MqttClient::set_event_sender(self, sender).await
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

/// Owns the event loop: polls it, forwards messages and reconnects
struct Supervisor {
    topic: String,
    client: AsyncClient,
    reconnect_config: ReconnectConfig,
    subscribed: Arc<AtomicBool>,
    forwarder: Arc<Mutex<MessageForwarder>>,
    health: Option<Arc<HealthState>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    acks_tx: watch::Sender<u64>,
    attempts: u32,
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        info!("MQTT event loop supervisor started");

        loop {
            let polled = tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                polled = event_loop.poll() => polled,
            };

            let keep_running = match polled {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    self.on_route(route).await
                }
                Err(e) => {
                    metrics().mqtt_connection_failed();
                    self.set_state(ConnectionState::Disconnected(e.to_string()));
                    self.reconnect().await
                }
            };
            if !keep_running {
                break;
            }
        }

        info!("MQTT event loop supervisor stopped");
    }

    async fn on_route(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.attempts = 0;
                metrics().mqtt_connection_established();
                self.set_state(ConnectionState::Connected);
                if self.subscribed.load(Ordering::Relaxed) {
                    self.resubscribe().await;
                }
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                metrics().mqtt_message_received();
                if MessageHandler::should_process_message(&topic, retain, &self.topic) {
                    if let Err(e) = self.forwarder.lock().await.forward_payload(&payload).await {
                        debug!(error = %e, "task event not forwarded");
                    }
                }
                true
            }
            EventRoute::Disconnected => {
                metrics().mqtt_connection_lost();
                self.set_state(ConnectionState::Disconnected(
                    "broker disconnected".to_string(),
                ));
                self.reconnect().await
            }
            EventRoute::PublishAcknowledged { packet_id } => {
                trace!(packet_id, "publish acknowledged");
                self.acks_tx.send_modify(|acks| *acks += 1);
                true
            }
            EventRoute::SubscriptionConfirmed { packet_id } => {
                debug!(packet_id, "subscription confirmed");
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                trace!(%event, "mqtt event");
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        log_state_transition(&state);
        if let Some(health) = &self.health {
            health.set_mqtt_connected(state == ConnectionState::Connected);
        }
        let _ = self.state_tx.send(state);
    }

    async fn resubscribe(&self) {
        if let Err(e) = self
            .client
            .subscribe(&self.topic, QoS::AtLeastOnce)
            .await
        {
            error!(topic = %self.topic, error = %e, "failed to re-subscribe");
        }
    }

    /// Back off, then let the same event loop reconnect on its next poll
    ///
    /// The event loop owns the request channel and the unacknowledged QoS 1
    /// state; rumqttc resends both after reconnecting, so it is never
    /// replaced.
    async fn reconnect(&mut self) -> bool {
        let shutdown_requested = *self.shutdown_rx.borrow();
        match self.reconnect_config.decide(self.attempts, shutdown_requested) {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.attempts = attempt;
                self.set_state(ConnectionState::Reconnecting(attempt));

                if !interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    return false;
                }

                metrics().mqtt_connection_attempt();
                true
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortMaxAttemptsExceeded(max) => {
                self.set_state(ConnectionState::PermanentlyDisconnected(format!(
                    "max reconnection attempts ({max}) exceeded"
                )));
                false
            }
        }
    }
}

/// Sleep unless shutdown is signalled first; `false` means stop
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
