//! Service-side hub interface
//!
//! What the reactors need from the hub: read a device twin, conditionally
//! update its desired section, and invoke a direct method.

use async_trait::async_trait;
use iotbridge_agent::hub::credential::{connection_string_pairs, sas_token};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The twin changed since it was read (stale ETag)
    #[error("twin of {device} changed since it was read")]
    ConcurrencyConflict { device: String },

    #[error("device {device} not found")]
    NotFound { device: String },

    #[error("hub returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("hub request failed: {0}")]
    Transport(String),

    #[error("unexpected hub response: {0}")]
    Decode(String),

    #[error("hub authorization failed: {0}")]
    Auth(String),
}

/// Device twin as seen by the service side
#[derive(Debug, Clone, PartialEq)]
pub struct Twin {
    pub device_id: String,
    /// Opaque version tag for conditional updates
    pub etag: String,
    pub desired: Map<String, Value>,
}

/// Direct method result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodResult {
    pub status: i32,
    #[serde(default)]
    pub payload: Value,
}

#[async_trait]
pub trait ServiceHub: Send + Sync {
    async fn get_twin(&self, device_id: &str) -> Result<Twin, ServiceError>;

    /// Patch the desired section, only if the twin still carries `etag`
    async fn update_desired(
        &self,
        device_id: &str,
        patch: Map<String, Value>,
        etag: &str,
    ) -> Result<(), ServiceError>;

    async fn invoke_method(&self, device_id: &str, method: &str, payload: Value) -> Result<MethodResult, ServiceError>;
}

/// Service connection string `HostName=..;SharedAccessKeyName=..;SharedAccessKey=..`
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceCredential {
    pub host_name: String,
    pub key_name: String,
    key: String,
}

impl ServiceCredential {
    /// Authorization header value valid for `ttl`
    pub fn token(&self, ttl: Duration) -> Result<String, ServiceError> {
        let expiry = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        sas_token(&self.host_name, &self.key, Some(&self.key_name), expiry)
            .map_err(|e| ServiceError::Auth(e.to_string()))
    }
}

impl FromStr for ServiceCredential {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut key_name = None;
        let mut key = None;
        for (k, v) in connection_string_pairs(s) {
            match k {
                "HostName" => host_name = Some(v.to_string()),
                "SharedAccessKeyName" => key_name = Some(v.to_string()),
                "SharedAccessKey" => key = Some(v.to_string()),
                _ => {}
            }
        }

        let missing = |field: &str| ServiceError::Auth(format!("connection string has no {}", field));
        Ok(Self {
            host_name: host_name.ok_or_else(|| missing("HostName"))?,
            key_name: key_name.ok_or_else(|| missing("SharedAccessKeyName"))?,
            key: key.ok_or_else(|| missing("SharedAccessKey"))?,
        })
    }
}

impl fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredential")
            .field("host_name", &self.host_name)
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}
