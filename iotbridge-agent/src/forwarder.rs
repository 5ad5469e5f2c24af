//! Upstream telemetry forwarding
//!
//! Each send opens a connection under the machine's own credential, publishes
//! one event and releases the connection whatever the outcome.

use crate::error::{BridgeError, Result};
use crate::hub::{DeviceCredential, TelemetryConnector};
use crate::telemetry::TelemetrySample;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct Forwarder {
    connector: Arc<dyn TelemetryConnector>,
}

impl Forwarder {
    pub fn new(connector: Arc<dyn TelemetryConnector>) -> Self {
        Self { connector }
    }

    pub async fn send(&self, credential: &DeviceCredential, sample: &TelemetrySample) -> Result<()> {
        let send_error = |reason: String| BridgeError::Send {
            device: sample.device_id.clone(),
            reason,
        };

        let payload = serde_json::to_vec(sample).map_err(|e| send_error(e.to_string()))?;

        let mut link = self
            .connector
            .open(credential)
            .await
            .map_err(|e| send_error(e.to_string()))?;
        let sent = link.send_event(payload).await;
        link.close().await;

        sent.map_err(|e| send_error(e.to_string()))?;
        info!(
            "Telemetry sent for {} via {} (status {}, rate {}, temp {})",
            sample.device_id,
            credential.device_id,
            sample.production_status,
            sample.production_rate,
            sample.temperature
        );
        Ok(())
    }
}
