//! Machine telemetry sampling
//!
//! Reads the six fixed tags of one machine. A failed or null read degrades
//! that field to its default; a sample is always produced.

use crate::opc::{tag_node_id, ControlServer, NodeValue};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

pub const TAG_PRODUCTION_STATUS: &str = "ProductionStatus";
pub const TAG_PRODUCTION_RATE: &str = "ProductionRate";
pub const TAG_TEMPERATURE: &str = "Temperature";
pub const TAG_GOOD_COUNT: &str = "GoodCount";
pub const TAG_BAD_COUNT: &str = "BadCount";
pub const TAG_DEVICE_ERROR: &str = "DeviceError";

pub const TAGS: [&str; 6] = [
    TAG_PRODUCTION_STATUS,
    TAG_PRODUCTION_RATE,
    TAG_TEMPERATURE,
    TAG_GOOD_COUNT,
    TAG_BAD_COUNT,
    TAG_DEVICE_ERROR,
];

/// Sentinel used when the error tag reads null
pub const UNKNOWN_DEVICE_ERROR: &str = "Unknown";

/// One poll of one machine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    pub device_id: String,
    pub production_status: i64,
    pub production_rate: i64,
    pub temperature: f64,
    pub good_count: i64,
    pub bad_count: i64,
    /// Passed through as read (string or number)
    pub device_error: Value,
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    /// Sample every tag of `device_id`
    pub async fn collect(server: &dyn ControlServer, device_id: &str) -> Self {
        debug!("Sampling {}", device_id);

        let production_status = read_tag(server, device_id, TAG_PRODUCTION_STATUS).await.as_int();
        let production_rate = read_tag(server, device_id, TAG_PRODUCTION_RATE).await.as_int();
        let temperature = read_tag(server, device_id, TAG_TEMPERATURE).await.as_float();
        let good_count = read_tag(server, device_id, TAG_GOOD_COUNT).await.as_int();
        let bad_count = read_tag(server, device_id, TAG_BAD_COUNT).await.as_int();

        let device_error = match read_tag(server, device_id, TAG_DEVICE_ERROR).await.to_json() {
            Some(value) => value,
            None => {
                warn!("{} returned null for {}, check the server configuration", TAG_DEVICE_ERROR, device_id);
                Value::String(UNKNOWN_DEVICE_ERROR.to_string())
            }
        };

        TelemetrySample {
            device_id: device_id.to_string(),
            production_status,
            production_rate,
            temperature,
            good_count,
            bad_count,
            device_error,
            timestamp: Utc::now(),
        }
    }
}

async fn read_tag(server: &dyn ControlServer, device_id: &str, tag: &str) -> NodeValue {
    match server.read_node(&tag_node_id(device_id, tag)).await {
        Ok(value) => value,
        Err(e) => {
            warn!("Read of {}/{} failed: {}", device_id, tag, e);
            NodeValue::Null
        }
    }
}
