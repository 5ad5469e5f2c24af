//! Reactor configuration, read from the environment (`.env` honored)

use anyhow::{bail, Context, Result};
use std::time::Duration;

pub const DEFAULT_QUALITY_TOPIC: &str = "production-rate-queue";
pub const DEFAULT_ERROR_TOPIC: &str = "emergency-stop-queue";

#[derive(Debug, Clone)]
pub struct ReactorsConfig {
    /// `HostName=..;SharedAccessKeyName=..;SharedAccessKey=..`
    pub service_connection_string: String,
    pub queue: QueueConfig,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub quality_topic: String,
    pub error_topic: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "iotbridge-reactors".to_string(),
            quality_topic: DEFAULT_QUALITY_TOPIC.to_string(),
            error_topic: DEFAULT_ERROR_TOPIC.to_string(),
        }
    }
}

impl ReactorsConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_connection_string =
            lookup("IOTHUB_CONNECTION_STRING").context("IOTHUB_CONNECTION_STRING is not set")?;

        let defaults = QueueConfig::default();
        let port = match lookup("IOTBRIDGE_QUEUE_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("IOTBRIDGE_QUEUE_PORT is not a port: {}", raw))?,
            None => defaults.port,
        };
        let timeout_secs = match lookup("IOTBRIDGE_REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("IOTBRIDGE_REQUEST_TIMEOUT_SECS is not a number: {}", raw))?,
            None => 30,
        };
        if timeout_secs == 0 {
            bail!("IOTBRIDGE_REQUEST_TIMEOUT_SECS must be positive");
        }

        Ok(Self {
            service_connection_string,
            queue: QueueConfig {
                host: lookup("IOTBRIDGE_QUEUE_HOST").unwrap_or(defaults.host),
                port,
                client_id: lookup("IOTBRIDGE_QUEUE_CLIENT_ID").unwrap_or(defaults.client_id),
                quality_topic: lookup("IOTBRIDGE_QUALITY_TOPIC").unwrap_or(defaults.quality_topic),
                error_topic: lookup("IOTBRIDGE_ERROR_TOPIC").unwrap_or(defaults.error_topic),
            },
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([("IOTHUB_CONNECTION_STRING", "HostName=h")]);
        let config = ReactorsConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.queue, QueueConfig::default());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("IOTHUB_CONNECTION_STRING", "HostName=h"),
            ("IOTBRIDGE_QUEUE_PORT", "1884"),
            ("IOTBRIDGE_QUALITY_TOPIC", "quality"),
        ]);
        let config = ReactorsConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.queue.port, 1884);
        assert_eq!(config.queue.quality_topic, "quality");
        assert_eq!(config.queue.error_topic, DEFAULT_ERROR_TOPIC);
    }

    #[test]
    fn test_missing_connection_string() {
        assert!(ReactorsConfig::from_lookup(|_| None).is_err());
    }

    #[test]
    fn test_bad_port() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("IOTHUB_CONNECTION_STRING", "HostName=h"),
            ("IOTBRIDGE_QUEUE_PORT", "eighty"),
        ]);
        assert!(ReactorsConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("IOTHUB_CONNECTION_STRING", "HostName=h"),
            ("IOTBRIDGE_REQUEST_TIMEOUT_SECS", "0"),
        ]);
        let err = ReactorsConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains("IOTBRIDGE_REQUEST_TIMEOUT_SECS"));
    }
}
