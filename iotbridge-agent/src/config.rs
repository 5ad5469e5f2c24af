//! Agent configuration
//!
//! Handles:
//! - OPC UA server endpoint
//! - Ordered hub connection strings (one per machine, first one is the agent's own identity)
//! - MQTT transport settings for the hub
//! - Polling cadence

use crate::error::{BridgeError, Result};
use crate::hub::DeviceCredential;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub server_connection_string: String,
    pub device_connection_strings: Vec<String>,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub port: u16,
    pub tls: bool,
    pub keep_alive_secs: u64,
    pub sas_ttl_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub telemetry_interval_ms: u64,
    pub stop_backoff_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: 8883,
            tls: true,
            keep_alive_secs: 30,
            sas_ttl_secs: 86_400,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            telemetry_interval_ms: crate::state::DEFAULT_TELEMETRY_INTERVAL_MS,
            stop_backoff_ms: 5000,
        }
    }
}

impl AgentConfig {
    /// Load config from `$IOTBRIDGE_CONFIG`, the OS config dir, or `./agent.toml`
    pub async fn load() -> Result<Self> {
        let path = Self::config_file_path();
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BridgeError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: AgentConfig = toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("invalid {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file location
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var("IOTBRIDGE_CONFIG") {
            return PathBuf::from(path);
        }

        if let Some(mut path) = dirs::config_dir() {
            path.push("iotbridge");
            path.push("agent.toml");
            if path.exists() {
                return path;
            }
        }

        PathBuf::from("agent.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_connection_string.trim().is_empty() {
            return Err(BridgeError::Config("server_connection_string is empty".into()));
        }
        if self.device_connection_strings.is_empty() {
            return Err(BridgeError::Config("device_connection_strings is empty".into()));
        }
        if self.polling.telemetry_interval_ms == 0 {
            return Err(BridgeError::Config("telemetry_interval_ms must be positive".into()));
        }
        if self.polling.stop_backoff_ms == 0 {
            return Err(BridgeError::Config("stop_backoff_ms must be positive".into()));
        }
        if self.hub.connect_timeout_secs == 0 {
            return Err(BridgeError::Config("connect_timeout_secs must be positive".into()));
        }
        if self.hub.sas_ttl_secs == 0 {
            return Err(BridgeError::Config("sas_ttl_secs must be positive".into()));
        }
        Ok(())
    }

    /// Parse the connection strings, keeping their order
    pub fn credentials(&self) -> Result<Vec<DeviceCredential>> {
        self.device_connection_strings
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                raw.parse::<DeviceCredential>().map_err(|e| {
                    BridgeError::Config(format!("device_connection_strings[{}]: {}", index, e))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
server_connection_string = "opc.tcp://localhost:4840/"
device_connection_strings = [
    "HostName=plant.azure-devices.net;DeviceId=line-1;SharedAccessKey=a2V5MQ==",
    "HostName=plant.azure-devices.net;DeviceId=line-2;SharedAccessKey=a2V5Mg==",
]
"#;

    #[tokio::test]
    async fn test_load_minimal_config_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = AgentConfig::load_from(file.path()).await.unwrap();
        assert_eq!(config.polling.telemetry_interval_ms, 2000);
        assert_eq!(config.polling.stop_backoff_ms, 5000);
        assert_eq!(config.hub.port, 8883);
        assert!(config.hub.tls);

        let credentials = config.credentials().unwrap();
        assert_eq!(credentials.len(), 2);
        assert_eq!(credentials[0].device_id, "line-1");
        assert_eq!(credentials[1].device_id, "line-2");
    }

    #[tokio::test]
    async fn test_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}\n[hub]\nport = 1883\ntls = false\n[polling]\ntelemetry_interval_ms = 500\n",
            MINIMAL
        )
        .unwrap();

        let config = AgentConfig::load_from(file.path()).await.unwrap();
        assert_eq!(config.hub.port, 1883);
        assert!(!config.hub.tls);
        assert_eq!(config.hub.keep_alive_secs, 30);
        assert_eq!(config.polling.telemetry_interval_ms, 500);
    }

    #[tokio::test]
    async fn test_missing_file_names_path() {
        let err = AgentConfig::load_from(Path::new("/nonexistent/agent.toml")).await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/agent.toml"));
    }

    #[test]
    fn test_validation() {
        let mut config: AgentConfig = toml::from_str(MINIMAL).unwrap();
        assert!(config.validate().is_ok());

        config.polling.telemetry_interval_ms = 0;
        assert!(config.validate().is_err());

        config.polling.telemetry_interval_ms = 1000;
        config.hub.connect_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connect_timeout_secs"));

        config.hub.connect_timeout_secs = 10;
        config.hub.sas_ttl_secs = 0;
        assert!(config.validate().is_err());

        config.hub.sas_ttl_secs = 3600;
        assert!(config.validate().is_ok());
        config.device_connection_strings.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_credential_is_located() {
        let mut config: AgentConfig = toml::from_str(MINIMAL).unwrap();
        config.device_connection_strings.push("DeviceId=orphan".into());
        let err = config.credentials().unwrap_err();
        assert!(err.to_string().contains("device_connection_strings[2]"));
    }
}
