//! Service configuration
//!
//! Loaded from a TOML file at startup. Credentials are never stored in the
//! file itself; the config names the environment variables that hold them.

use crate::protocol::validate_service_id;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Main service configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub service: ServiceSection,
    #[serde(default)]
    pub http: HttpSection,
    /// Queue ingestion; HTTP-only when absent
    pub mqtt: Option<MqttSection>,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub features: FeatureSection,
}

/// Service identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// Service identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// HTTP adapter settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpSection {
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Optional per-request timeout applied by the HTTP adapter
    pub request_timeout_ms: Option<u64>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            request_timeout_ms: None,
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Topic task events are published to and consumed from
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

impl MqttSection {
    /// Username read from the variable named by `username_env`
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Password read from the variable named by `password_env`
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn default_topic() -> String {
    "task-events".to_string()
}

/// Processing pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSection {
    /// Ordered step names, executed in declaration order
    #[serde(default = "default_steps")]
    pub steps: Vec<String>,
    /// Maximum number of pipeline runs executing on the worker pool at once
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            max_concurrent_steps: default_max_concurrent_steps(),
        }
    }
}

fn default_steps() -> Vec<String> {
    vec!["math".to_string(), "external_call".to_string()]
}

fn default_max_concurrent_steps() -> usize {
    16
}

/// Feature toggles
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureSection {
    /// Route HTTP submissions through the queue instead of processing inline
    #[serde(default)]
    pub async_enabled: bool,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid service ID format: {0}")]
    InvalidServiceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServiceConfig {
    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: ServiceConfig = toml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides applied after parsing
    fn apply_env_overrides(&mut self) {
        if let Some(port) = std::env::var("HTTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.http.port = port;
        }
    }

    /// Validate field values that TOML typing cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service_id(&self.service.id).map_err(|_| {
            ConfigError::InvalidServiceId(format!(
                "Service ID '{}' must match pattern [a-zA-Z0-9._-]+",
                self.service.id
            ))
        })?;

        if self.pipeline.max_concurrent_steps == 0 {
            return Err(ConfigError::InvalidConfig(
                "pipeline.max_concurrent_steps must be at least 1".to_string(),
            ));
        }

        if let Some(mqtt) = &self.mqtt {
            if mqtt.topic.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "mqtt.topic must not be empty".to_string(),
                ));
            }
        }

        if self.features.async_enabled && self.mqtt.is_none() {
            return Err(ConfigError::InvalidConfig(
                "features.async_enabled requires an [mqtt] section".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[service]
id = "test-service"
description = "A test service"

[http]
port = 18080

[pipeline]
steps = ["math", "external_call"]
max_concurrent_steps = 4
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
