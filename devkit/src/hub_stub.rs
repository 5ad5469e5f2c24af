/*!
Mock device-side hub

- `MockPropertyReporter` records every reported-properties patch, with
  optional per-call delays to interleave concurrent reports
- `MockTelemetryConnector` hands out links that record opens, events and
  closes; an optional hook runs on each send to simulate commands that
  land while a machine is being forwarded
*/

use async_trait::async_trait;
use iotbridge_agent::error::HubError;
use iotbridge_agent::hub::{DeviceCredential, PropertyReporter, TelemetryConnector, TelemetryLink};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Default)]
pub struct MockPropertyReporter {
    patches: Arc<Mutex<Vec<Map<String, Value>>>>,
    fail: Arc<AtomicBool>,
    delays: Arc<Mutex<VecDeque<Duration>>>,
}

impl MockPropertyReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Hold the next not-yet-delayed report for `delay` before recording it
    pub fn push_delay(&self, delay: Duration) {
        self.delays.lock().push_back(delay);
    }

    pub fn patches(&self) -> Vec<Map<String, Value>> {
        self.patches.lock().clone()
    }

    /// Last value reported for `key`, across all patches
    pub fn last_value(&self, key: &str) -> Option<Value> {
        self.patches.lock().iter().rev().find_map(|patch| patch.get(key).cloned())
    }

    pub fn clear(&self) {
        self.patches.lock().clear();
    }
}

#[async_trait]
impl PropertyReporter for MockPropertyReporter {
    async fn update_reported(&self, patch: Map<String, Value>) -> Result<(), HubError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HubError::Transport("reported properties rejected".to_string()));
        }
        let delay = self.delays.lock().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        debug!("[MOCK] Reported {:?}", patch);
        self.patches.lock().push(patch);
        Ok(())
    }
}

/// One telemetry event as it reached the hub
#[derive(Debug, Clone, PartialEq)]
pub struct SentEvent {
    /// Hub identity the link was opened under
    pub hub_device_id: String,
    pub payload: Value,
}

impl SentEvent {
    /// Machine name carried in the payload
    pub fn machine(&self) -> &str {
        self.payload.get("deviceId").and_then(Value::as_str).unwrap_or_default()
    }
}

type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type SendHook = Arc<dyn Fn(SentEvent) -> HookFuture + Send + Sync>;

#[derive(Default)]
struct Recorder {
    opens: Vec<String>,
    events: Vec<SentEvent>,
    closes: usize,
}

#[derive(Clone, Default)]
pub struct MockTelemetryConnector {
    recorder: Arc<Mutex<Recorder>>,
    fail_open: Arc<AtomicBool>,
    fail_send: Arc<AtomicBool>,
    hook: Arc<Mutex<Option<SendHook>>>,
}

impl MockTelemetryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Run `hook` on every send, before the event is recorded
    pub fn on_send<F>(&self, hook: F)
    where
        F: Fn(&SentEvent) + Send + Sync + 'static,
    {
        self.on_send_async(move |event| {
            hook(&event);
            async {}
        });
    }

    /// Await `hook` on every send, e.g. to deliver a command mid-forward
    pub fn on_send_async<F, Fut>(&self, hook: F)
    where
        F: Fn(SentEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: SendHook = Arc::new(move |event: SentEvent| -> HookFuture { Box::pin(hook(event)) });
        *self.hook.lock() = Some(hook);
    }

    pub fn opens(&self) -> Vec<String> {
        self.recorder.lock().opens.clone()
    }

    pub fn events(&self) -> Vec<SentEvent> {
        self.recorder.lock().events.clone()
    }

    pub fn closes(&self) -> usize {
        self.recorder.lock().closes
    }

    pub fn clear(&self) {
        *self.recorder.lock() = Recorder::default();
    }
}

#[async_trait]
impl TelemetryConnector for MockTelemetryConnector {
    async fn open(&self, credential: &DeviceCredential) -> Result<Box<dyn TelemetryLink>, HubError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(HubError::Connection(format!("{} refused", credential.device_id)));
        }
        self.recorder.lock().opens.push(credential.device_id.clone());
        Ok(Box::new(MockTelemetryLink {
            hub_device_id: credential.device_id.clone(),
            connector: self.clone(),
            sends: 0,
        }))
    }
}

struct MockTelemetryLink {
    hub_device_id: String,
    connector: MockTelemetryConnector,
    sends: usize,
}

#[async_trait]
impl TelemetryLink for MockTelemetryLink {
    async fn send_event(&mut self, payload: Vec<u8>) -> Result<(), HubError> {
        self.sends += 1;
        let event = SentEvent {
            hub_device_id: self.hub_device_id.clone(),
            payload: serde_json::from_slice(&payload)?,
        };

        let hook = self.connector.hook.lock().clone();
        if let Some(hook) = hook {
            hook(event.clone()).await;
        }

        if self.connector.fail_send.load(Ordering::SeqCst) {
            return Err(HubError::Transport("event rejected".to_string()));
        }
        self.connector.recorder.lock().events.push(event);
        Ok(())
    }

    async fn close(self: Box<Self>) {
        debug!("[MOCK] Closing link for {} after {} send(s)", self.hub_device_id, self.sends);
        self.connector.recorder.lock().closes += 1;
    }
}
