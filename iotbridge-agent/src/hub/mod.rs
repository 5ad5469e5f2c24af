//! Device-side hub interface
//!
//! Narrow seams over the cloud hub used by the agent:
//! - [`PropertyReporter`]: update-reported-properties on the agent's own identity
//! - [`TelemetryConnector`] / [`TelemetryLink`]: per-send transient device connections
//! - [`CommandSink`]: where inbound direct methods and desired pushes are delivered
//!
//! [`mqtt`] implements them over the hub's MQTT device topics.

pub mod credential;
pub mod mqtt;

pub use credential::DeviceCredential;

use crate::error::HubError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hub REST/MQTT API version
pub const API_VERSION: &str = "2021-04-12";

/// Reported/desired twin keys
pub const KEY_EMERGENCY_STOP: &str = "emergencyStop";
pub const KEY_TELEMETRY_INTERVAL: &str = "telemetryInterval";

/// Inbound direct method call
#[derive(Debug, Clone, PartialEq)]
pub struct MethodRequest {
    pub name: String,
    pub payload: Value,
}

/// Direct method result returned to the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodResponse {
    pub status: u16,
    pub payload: Value,
}

impl MethodResponse {
    pub fn ok(message: &str) -> Self {
        Self {
            status: 200,
            payload: serde_json::json!({ "message": message }),
        }
    }

    pub fn not_found(method: &str) -> Self {
        Self {
            status: 404,
            payload: serde_json::json!({ "message": format!("Unknown method: {}", method) }),
        }
    }
}

/// Update-reported-properties on the agent's hub identity
#[async_trait]
pub trait PropertyReporter: Send + Sync {
    async fn update_reported(&self, patch: Map<String, Value>) -> Result<(), HubError>;
}

/// Receiver of hub-initiated calls (set-method-handler / set-desired-property-callback)
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn on_method(&self, request: MethodRequest) -> MethodResponse;

    async fn on_desired(&self, desired: Value);
}

/// One open device connection, used for a single telemetry send
#[async_trait]
pub trait TelemetryLink: Send {
    async fn send_event(&mut self, payload: Vec<u8>) -> Result<(), HubError>;

    /// Release the connection
    async fn close(self: Box<Self>);
}

/// Opens transient device connections from credentials
#[async_trait]
pub trait TelemetryConnector: Send + Sync {
    async fn open(&self, credential: &DeviceCredential) -> Result<Box<dyn TelemetryLink>, HubError>;
}
