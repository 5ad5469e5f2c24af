//! Inbound alert payloads
//!
//! Queue messages are loosely typed JSON. Parsing never fails: a missing or
//! non-numeric number becomes `0`, a missing string becomes empty.

use serde::Serialize;
use serde_json::Value;

/// `{ "ConnectionDeviceId": string, "ProductionQuality": number }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityAlert {
    pub device_id: String,
    pub production_quality: f64,
}

/// `{ "ConnectionDeviceId": string, "ErrorCount": number }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorAlert {
    pub device_id: String,
    pub error_count: i64,
}

const FIELD_DEVICE_ID: &str = "ConnectionDeviceId";
const FIELD_QUALITY: &str = "ProductionQuality";
const FIELD_ERROR_COUNT: &str = "ErrorCount";

impl QualityAlert {
    pub fn parse(payload: &[u8]) -> Self {
        let json = parse_object(payload);
        Self {
            device_id: string_field(&json, FIELD_DEVICE_ID),
            production_quality: number_field(&json, FIELD_QUALITY),
        }
    }
}

impl ErrorAlert {
    pub fn parse(payload: &[u8]) -> Self {
        let json = parse_object(payload);
        Self {
            device_id: string_field(&json, FIELD_DEVICE_ID),
            error_count: number_field(&json, FIELD_ERROR_COUNT) as i64,
        }
    }
}

fn parse_object(payload: &[u8]) -> Value {
    serde_json::from_slice(payload).unwrap_or(Value::Null)
}

fn string_field(json: &Value, key: &str) -> String {
    match json.get(key) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

/// Numbers and numeric strings; everything else is `0`
fn number_field(json: &Value, key: &str) -> f64 {
    let value = match json.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}
