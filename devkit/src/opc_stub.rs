/*!
Mock control server

Holds a flat set of root children and tag values. Every read is recorded
so tests can check what was sampled, and in which order.
*/

use async_trait::async_trait;
use iotbridge_agent::error::{BridgeError, Result};
use iotbridge_agent::opc::{tag_node_id, ControlServer, NodeInfo, NodeValue, OBJECTS_FOLDER};
use iotbridge_agent::telemetry::{
    TAG_BAD_COUNT, TAG_DEVICE_ERROR, TAG_GOOD_COUNT, TAG_PRODUCTION_RATE, TAG_PRODUCTION_STATUS, TAG_TEMPERATURE,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    children: Vec<NodeInfo>,
    values: HashMap<String, NodeValue>,
    failing: HashSet<String>,
    browse_fails: bool,
    reads: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MockControlServer {
    inner: Arc<Mutex<Inner>>,
}

impl MockControlServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root child with the given display name
    pub fn with_node(self, display_name: &str) -> Self {
        self.inner
            .lock()
            .children
            .push(NodeInfo::new(format!("ns=2;s={}", display_name), display_name));
        self
    }

    /// Add a machine with a plausible running set of tag values
    pub fn with_device(self, name: &str) -> Self {
        let server = self.with_node(name);
        server.set_tag(name, TAG_PRODUCTION_STATUS, NodeValue::Int(1));
        server.set_tag(name, TAG_PRODUCTION_RATE, NodeValue::Int(90));
        server.set_tag(name, TAG_TEMPERATURE, NodeValue::Float(61.5));
        server.set_tag(name, TAG_GOOD_COUNT, NodeValue::Int(120));
        server.set_tag(name, TAG_BAD_COUNT, NodeValue::Int(3));
        server.set_tag(name, TAG_DEVICE_ERROR, NodeValue::Int(0));
        server
    }

    pub fn set_tag(&self, device: &str, tag: &str, value: NodeValue) {
        self.inner.lock().values.insert(tag_node_id(device, tag), value);
    }

    /// Make reads of one tag fail
    pub fn fail_tag(&self, device: &str, tag: &str) {
        self.inner.lock().failing.insert(tag_node_id(device, tag));
    }

    pub fn fail_browse(&self) {
        self.inner.lock().browse_fails = true;
    }

    /// Node ids read so far, in call order
    pub fn reads(&self) -> Vec<String> {
        self.inner.lock().reads.clone()
    }

    /// Machines whose tags were read, in first-read order without repeats
    pub fn sampled_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = Vec::new();
        for node_id in self.inner.lock().reads.iter() {
            let name = node_id
                .split_once(";s=")
                .and_then(|(_, path)| path.rsplit_once('/'))
                .map(|(device, _)| device.to_string());
            if let Some(name) = name {
                if devices.last() != Some(&name) {
                    devices.push(name);
                }
            }
        }
        devices
    }

    pub fn clear_reads(&self) {
        self.inner.lock().reads.clear();
    }
}

#[async_trait]
impl ControlServer for MockControlServer {
    async fn browse_children(&self, node_id: &str) -> Result<Vec<NodeInfo>> {
        let inner = self.inner.lock();
        if inner.browse_fails {
            return Err(BridgeError::Connectivity("browse refused".to_string()));
        }
        if node_id == OBJECTS_FOLDER {
            Ok(inner.children.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn read_node(&self, node_id: &str) -> Result<NodeValue> {
        let mut inner = self.inner.lock();
        inner.reads.push(node_id.to_string());
        if inner.failing.contains(node_id) {
            return Err(BridgeError::Connectivity(format!("read of {} failed", node_id)));
        }
        Ok(inner.values.get(node_id).cloned().unwrap_or(NodeValue::Null))
    }
}
