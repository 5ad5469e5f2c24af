//! Control-server tag interface
//!
//! The polling side only needs three things from the OPC UA server: a
//! connection, a browse of a node's children, and a read of a node value.
//! Raw variants are resolved into [`NodeValue`] at the read site so the rest
//! of the agent never handles untyped values.

mod session;

pub use session::OpcSession;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Standard `ObjectsFolder` node, the root browsed for devices
pub const OBJECTS_FOLDER: &str = "i=85";

/// Namespace used by the machine simulator for device tags
pub const DEVICE_NAMESPACE: u16 = 2;

/// Build the node id of a device tag (`ns=2;s=<device>/<tag>`)
pub fn tag_node_id(device_id: &str, tag: &str) -> String {
    format!("ns={};s={}/{}", DEVICE_NAMESPACE, device_id, tag)
}

/// Browse result entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: String,
    pub display_name: String,
}

impl NodeInfo {
    pub fn new(node_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Node value after variant resolution
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl NodeValue {
    /// Integer view of the value; anything that is not an integer in disguise gives `0`
    pub fn as_int(&self) -> i64 {
        match self {
            NodeValue::Int(v) => *v,
            NodeValue::Float(v) if v.is_finite() && v.fract() == 0.0 => *v as i64,
            NodeValue::Text(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Float view of the value; null or unparsable gives `0.0`
    pub fn as_float(&self) -> f64 {
        match self {
            NodeValue::Int(v) => *v as f64,
            NodeValue::Float(v) => *v,
            NodeValue::Text(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// JSON pass-through, `None` for a null node
    pub fn to_json(&self) -> Option<Value> {
        match self {
            NodeValue::Null => None,
            NodeValue::Bool(b) => Some(Value::Bool(*b)),
            NodeValue::Int(v) => Some(Value::from(*v)),
            NodeValue::Float(v) => Some(
                serde_json::Number::from_f64(*v)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(v.to_string())),
            ),
            NodeValue::Text(s) => Some(Value::String(s.clone())),
        }
    }
}

/// Read-only access to the control server
#[async_trait]
pub trait ControlServer: Send + Sync {
    /// Immediate children of `node_id`
    async fn browse_children(&self, node_id: &str) -> Result<Vec<NodeInfo>>;

    /// Current value of `node_id`
    async fn read_node(&self, node_id: &str) -> Result<NodeValue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_node_id() {
        assert_eq!(tag_node_id("Device 1", "Temperature"), "ns=2;s=Device 1/Temperature");
    }

    #[test]
    fn test_int_conversion_defaults() {
        assert_eq!(NodeValue::Null.as_int(), 0);
        assert_eq!(NodeValue::Int(42).as_int(), 42);
        assert_eq!(NodeValue::Float(42.0).as_int(), 42);
        assert_eq!(NodeValue::Float(42.5).as_int(), 0);
        assert_eq!(NodeValue::Text(" 17 ".into()).as_int(), 17);
        assert_eq!(NodeValue::Text("n/a".into()).as_int(), 0);
        assert_eq!(NodeValue::Bool(true).as_int(), 0);
    }

    #[test]
    fn test_float_conversion_defaults() {
        assert_eq!(NodeValue::Null.as_float(), 0.0);
        assert_eq!(NodeValue::Int(3).as_float(), 3.0);
        assert_eq!(NodeValue::Float(71.25).as_float(), 71.25);
        assert_eq!(NodeValue::Text("12.5".into()).as_float(), 12.5);
        assert_eq!(NodeValue::Text("hot".into()).as_float(), 0.0);
    }

    #[test]
    fn test_json_pass_through() {
        assert_eq!(NodeValue::Null.to_json(), None);
        assert_eq!(NodeValue::Int(6).to_json(), Some(Value::from(6)));
        assert_eq!(NodeValue::Text("Sensor Failure".into()).to_json(), Some(Value::from("Sensor Failure")));
        assert_eq!(NodeValue::Float(f64::NAN).to_json(), Some(Value::from("NaN")));
    }
}
