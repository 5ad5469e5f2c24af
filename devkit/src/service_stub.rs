/*!
Mock service-side hub

Twins carry a numeric version rendered as the ETag. A conditional update
only lands when the caller's ETag matches; `inject_conflicts` simulates
another writer touching the twin right before the next updates.
*/

use async_trait::async_trait;
use iotbridge_reactors::service::{MethodResult, ServiceError, ServiceHub, Twin};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A conditional update that was accepted
#[derive(Debug, Clone, PartialEq)]
pub struct TwinUpdate {
    pub device_id: String,
    pub patch: Map<String, Value>,
    pub etag: String,
}

struct StoredTwin {
    version: u64,
    desired: Map<String, Value>,
}

impl StoredTwin {
    fn etag(&self) -> String {
        format!("AAAAAAAAAA{}=", self.version)
    }
}

#[derive(Default)]
struct Inner {
    twins: HashMap<String, StoredTwin>,
    pending_conflicts: usize,
    /// Value the simulated concurrent writer sets on each conflict
    conflict_patch: Map<String, Value>,
    method_status: Option<i32>,
    methods_fail: bool,
    twin_reads: usize,
    updates: Vec<TwinUpdate>,
    rejected_updates: usize,
    invocations: Vec<(String, String, Value)>,
}

#[derive(Clone, Default)]
pub struct MockServiceHub {
    inner: Arc<Mutex<Inner>>,
}

impl MockServiceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device whose desired section is `desired` (an object)
    pub fn with_twin(self, device_id: &str, desired: Value) -> Self {
        let desired = match desired {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.inner
            .lock()
            .twins
            .insert(device_id.to_string(), StoredTwin { version: 1, desired });
        self
    }

    /// The next `count` updates find the twin changed underneath them
    pub fn inject_conflicts(&self, count: usize, concurrent_patch: Value) {
        let mut inner = self.inner.lock();
        inner.pending_conflicts = count;
        inner.conflict_patch = match concurrent_patch {
            Value::Object(map) => map,
            _ => Map::new(),
        };
    }

    /// Status returned by every direct method (200 when unset)
    pub fn set_method_status(&self, status: i32) {
        self.inner.lock().method_status = Some(status);
    }

    pub fn set_methods_failing(&self, fail: bool) {
        self.inner.lock().methods_fail = fail;
    }

    pub fn desired(&self, device_id: &str) -> Option<Map<String, Value>> {
        self.inner.lock().twins.get(device_id).map(|twin| twin.desired.clone())
    }

    pub fn twin_reads(&self) -> usize {
        self.inner.lock().twin_reads
    }

    pub fn updates(&self) -> Vec<TwinUpdate> {
        self.inner.lock().updates.clone()
    }

    pub fn rejected_updates(&self) -> usize {
        self.inner.lock().rejected_updates
    }

    /// `(device, method, payload)` per invocation
    pub fn invocations(&self) -> Vec<(String, String, Value)> {
        self.inner.lock().invocations.clone()
    }
}

#[async_trait]
impl ServiceHub for MockServiceHub {
    async fn get_twin(&self, device_id: &str) -> Result<Twin, ServiceError> {
        let mut inner = self.inner.lock();
        inner.twin_reads += 1;
        let twin = inner.twins.get(device_id).ok_or_else(|| ServiceError::NotFound {
            device: device_id.to_string(),
        })?;
        Ok(Twin {
            device_id: device_id.to_string(),
            etag: twin.etag(),
            desired: twin.desired.clone(),
        })
    }

    async fn update_desired(
        &self,
        device_id: &str,
        patch: Map<String, Value>,
        etag: &str,
    ) -> Result<(), ServiceError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let twin = inner.twins.get_mut(device_id).ok_or_else(|| ServiceError::NotFound {
            device: device_id.to_string(),
        })?;

        if inner.pending_conflicts > 0 {
            inner.pending_conflicts -= 1;
            for (key, value) in &inner.conflict_patch {
                twin.desired.insert(key.clone(), value.clone());
            }
            twin.version += 1;
            debug!("[MOCK] Concurrent writer bumped {} to version {}", device_id, twin.version);
        }

        if twin.etag() != etag {
            inner.rejected_updates += 1;
            return Err(ServiceError::ConcurrencyConflict {
                device: device_id.to_string(),
            });
        }

        for (key, value) in &patch {
            twin.desired.insert(key.clone(), value.clone());
        }
        twin.version += 1;
        inner.updates.push(TwinUpdate {
            device_id: device_id.to_string(),
            patch,
            etag: etag.to_string(),
        });
        Ok(())
    }

    async fn invoke_method(&self, device_id: &str, method: &str, payload: Value) -> Result<MethodResult, ServiceError> {
        let mut inner = self.inner.lock();
        inner
            .invocations
            .push((device_id.to_string(), method.to_string(), payload));
        if inner.methods_fail {
            return Err(ServiceError::Http {
                status: 504,
                body: "device timed out".to_string(),
            });
        }
        Ok(MethodResult {
            status: inner.method_status.unwrap_or(200),
            payload: Value::Null,
        })
    }
}
