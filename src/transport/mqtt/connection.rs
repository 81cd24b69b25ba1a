//! Connection state, reconnection policy and client options
//!
//! Everything here is pure; the I/O lives in [`super::client`].

use crate::config::MqttSection;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

/// Largest task event payload accepted from the broker
const MAX_PACKET_SIZE: u32 = 64 * 1024;

/// Connection state for the MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected(String),
    /// Reconnection attempt number
    Reconnecting(u32),
    /// Reconnection attempts exhausted
    PermanentlyDisconnected(String),
}

impl ConnectionState {
    pub fn can_publish(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Reconnection backoff policy
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    /// Delays in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![100, 250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given (1-based) attempt
    pub fn backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Sum of every delay when attempts are bounded
    pub fn max_total_time(&self) -> Option<u64> {
        self.max_attempts
            .map(|max| (1..=max).map(|attempt| self.backoff_delay(attempt)).sum())
    }

    /// How long `connect` waits for the first ConnAck
    pub fn connection_timeout(&self) -> Duration {
        match self.max_total_time() {
            Some(total) => Duration::from_millis(total + 30_000),
            None => Duration::from_secs(60),
        }
    }

    /// Decide whether to try again after `attempts` failures
    pub fn decide(&self, attempts: u32, shutdown_requested: bool) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }
        if let Some(max) = self.max_attempts {
            if attempts >= max {
                return ReconnectionDecision::AbortMaxAttemptsExceeded(max);
            }
        }
        ReconnectionDecision::Proceed {
            attempt: attempts + 1,
            delay_ms: self.backoff_delay(attempts + 1),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded(u32),
}

/// Log a state change at a level matching its severity
pub fn log_state_transition(to: &ConnectionState) {
    match to {
        ConnectionState::Connected => info!("MQTT connection established"),
        ConnectionState::Disconnected(reason) => warn!(%reason, "MQTT connection lost"),
        ConnectionState::Reconnecting(attempt) => info!(attempt, "MQTT reconnecting"),
        ConnectionState::PermanentlyDisconnected(reason) => {
            error!(%reason, "MQTT connection permanently failed")
        }
        ConnectionState::Connecting => info!("MQTT connecting"),
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("{pending} publishes still unacknowledged")]
    AckTimeout { pending: u64 },
}

/// Build client options from config
///
/// Each call yields a fresh client id, so two processes started with the same
/// service id never take over each other's session.
pub fn configure_mqtt_options(
    service_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(config.broker_url.clone())),
    };
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let mut options = MqttOptions::new(format!("{service_id}-{millis}"), host, port);

    if tls {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        options.set_credentials(username, config.password().unwrap_or_default());
    }

    options.set_keep_alive(Duration::from_secs(30));
    options.set_max_packet_size(Some(MAX_PACKET_SIZE));
    Ok(options)
}
