//! Routing and parsing of inbound MQTT traffic

use crate::observability::metrics::metrics;
use crate::protocol::TaskEvent;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pure routing decisions for MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Parse and validate a task event payload (pure function)
    pub fn parse_task_event(payload: &[u8]) -> Result<TaskEvent, String> {
        serde_json::from_slice::<TaskEvent>(payload)
            .map_err(|e| format!("Invalid task event payload: {e}"))
    }

    /// Retained messages are replays of old events and are never processed
    pub fn should_process_message(topic: &str, retain: bool, expected_topic: &str) -> bool {
        if retain {
            debug!(topic, "ignoring retained message");
            return false;
        }
        if topic != expected_topic {
            debug!(topic, expected_topic, "ignoring message on unexpected topic");
            return false;
        }
        true
    }

    /// Map a raw event loop event to what the supervisor should do with it
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => EventRoute::ConnectionAcknowledged,
            Event::Incoming(Packet::Publish(publish)) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                payload: publish.payload.to_vec(),
                retain: publish.retain,
            },
            Event::Incoming(Packet::Disconnect(_)) => EventRoute::Disconnected,
            Event::Incoming(Packet::SubAck(suback)) => EventRoute::SubscriptionConfirmed {
                packet_id: suback.pkid,
            },
            Event::Incoming(Packet::PubAck(puback)) => EventRoute::PublishAcknowledged {
                packet_id: puback.pkid,
            },
            Event::Incoming(other) => EventRoute::InfrastructureEvent(format!("{other:?}")),
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Serialize an event for publishing (pure function)
    pub fn format_event_payload(event: &TaskEvent) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(event)
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Disconnected,
    SubscriptionConfirmed {
        packet_id: u16,
    },
    PublishAcknowledged {
        packet_id: u16,
    },
    /// PingResp, UnsubAck and similar
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Hands parsed events to the consumer loop
#[derive(Default)]
pub struct MessageForwarder {
    event_sender: Option<mpsc::Sender<TaskEvent>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_event_sender(&mut self, sender: mpsc::Sender<TaskEvent>) {
        self.event_sender = Some(sender);
    }

    /// Parse `payload` and forward it; malformed payloads are dropped
    pub async fn forward_payload(&self, payload: &[u8]) -> Result<(), String> {
        let event = MessageHandler::parse_task_event(payload).map_err(|e| {
            metrics().event_rejected();
            warn!(error = %e, "dropping malformed task event");
            e
        })?;
        self.forward_event(event).await
    }

    pub async fn forward_event(&self, event: TaskEvent) -> Result<(), String> {
        let Some(sender) = &self.event_sender else {
            warn!("task event received but no consumer attached, dropping");
            return Err("No event sender configured".to_string());
        };

        debug!(task_id = event.task_id(), "forwarding task event");
        sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to forward task event: {e}"))
    }
}
