/*!
Payload and credential builders
*/

use iotbridge_agent::hub::DeviceCredential;
use serde_json::{json, Value};

pub const TEST_HUB_HOST: &str = "test-hub.azure-devices.net";
pub const TEST_KEY: &str = "c2VjcmV0LWtleQ==";

/// Device credential for `device_id` on the test hub
pub fn credential(device_id: &str) -> DeviceCredential {
    connection_string(device_id)
        .parse()
        .expect("test connection string should parse")
}

/// `count` credentials named `hub-device-1..=count`
pub fn credentials(count: usize) -> Vec<DeviceCredential> {
    (1..=count).map(|n| credential(&format!("hub-device-{}", n))).collect()
}

pub fn connection_string(device_id: &str) -> String {
    format!("HostName={};DeviceId={};SharedAccessKey={}", TEST_HUB_HOST, device_id, TEST_KEY)
}

/// Alert queue payloads as the stream analytics job emits them
pub struct AlertBuilder;

impl AlertBuilder {
    pub fn quality(device_id: &str, production_quality: f64) -> Value {
        json!({
            "ConnectionDeviceId": device_id,
            "ProductionQuality": production_quality,
        })
    }

    pub fn errors(device_id: &str, error_count: i64) -> Value {
        json!({
            "ConnectionDeviceId": device_id,
            "ErrorCount": error_count,
        })
    }

    pub fn bytes(payload: &Value) -> Vec<u8> {
        payload.to_string().into_bytes()
    }
}
