//! Hub-initiated commands
//!
//! Handles:
//! - `EmergencyStop` / `ResetErrorStatus` direct methods
//! - `telemetryInterval` desired-property pushes
//! - Echoing every change back as reported state (best-effort)
//!
//! A change and its echo run under one lock, so concurrent commands report
//! in the order they were applied.

use crate::hub::{
    CommandSink, MethodRequest, MethodResponse, PropertyReporter, KEY_EMERGENCY_STOP, KEY_TELEMETRY_INTERVAL,
};
use crate::state::DeviceState;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const METHOD_EMERGENCY_STOP: &str = "EmergencyStop";
pub const METHOD_RESET_ERROR_STATUS: &str = "ResetErrorStatus";

/// Command handlers bound to the shared state and the agent's hub identity
pub struct CommandHandlers {
    state: DeviceState,
    reporter: Arc<dyn PropertyReporter>,
    apply_lock: Mutex<()>,
}

impl CommandHandlers {
    pub fn new(state: DeviceState, reporter: Arc<dyn PropertyReporter>) -> Self {
        Self {
            state,
            reporter,
            apply_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Halt all sampling until reset
    pub async fn emergency_stop(&self) -> MethodResponse {
        info!("Direct method {} received", METHOD_EMERGENCY_STOP);
        self.apply_stopped(true).await;
        MethodResponse::ok("Emergency Stop activated")
    }

    /// Resume sampling
    pub async fn reset_error_status(&self) -> MethodResponse {
        info!("Direct method {} received", METHOD_RESET_ERROR_STATUS);
        self.apply_stopped(false).await;
        MethodResponse::ok("Error status reset")
    }

    async fn apply_stopped(&self, stopped: bool) {
        let _guard = self.apply_lock.lock().await;
        self.state.set_stopped(stopped);
        self.report_property(KEY_EMERGENCY_STOP, Value::Bool(stopped)).await;
    }

    /// Apply a desired-state push; returns the new interval when one was applied
    pub async fn on_desired_changed(&self, desired: &Value) -> Option<u64> {
        debug!("Desired properties update: {}", desired);

        let raw = match desired.get(KEY_TELEMETRY_INTERVAL) {
            Some(raw) => raw,
            None => {
                debug!("No {} in desired update", KEY_TELEMETRY_INTERVAL);
                return None;
            }
        };

        let interval_ms = match raw.as_u64().filter(|ms| *ms > 0) {
            Some(ms) => ms,
            None => {
                warn!("Ignoring invalid {}: {} (expected a positive integer)", KEY_TELEMETRY_INTERVAL, raw);
                return None;
            }
        };

        let _guard = self.apply_lock.lock().await;
        if let Err(e) = self.state.set_interval(interval_ms) {
            warn!("Telemetry interval not applied: {}", e);
            return None;
        }
        info!("Telemetry interval updated to {} ms", interval_ms);
        self.report_property(KEY_TELEMETRY_INTERVAL, Value::from(interval_ms)).await;
        Some(interval_ms)
    }

    /// Push a single reported key; failures are logged, never retried
    pub async fn report_property(&self, name: &str, value: Value) {
        let mut patch = Map::new();
        patch.insert(name.to_string(), value.clone());
        match self.reporter.update_reported(patch).await {
            Ok(()) => info!("Reported property {} = {}", name, value),
            Err(e) => warn!("Failed to report {}: {}", name, e),
        }
    }

    /// Report both keys with their current values
    pub async fn report_initial(&self) {
        let _guard = self.apply_lock.lock().await;
        let snapshot = self.state.get();
        let mut patch = Map::new();
        patch.insert(KEY_EMERGENCY_STOP.to_string(), Value::Bool(snapshot.stopped));
        patch.insert(KEY_TELEMETRY_INTERVAL.to_string(), Value::from(snapshot.interval_ms));
        match self.reporter.update_reported(patch).await {
            Ok(()) => info!("Initial reported properties sent"),
            Err(e) => warn!("Failed to send initial reported properties: {}", e),
        }
    }
}

#[async_trait]
impl CommandSink for CommandHandlers {
    async fn on_method(&self, request: MethodRequest) -> MethodResponse {
        match request.name.as_str() {
            METHOD_EMERGENCY_STOP => self.emergency_stop().await,
            METHOD_RESET_ERROR_STATUS => self.reset_error_status().await,
            other => {
                warn!("Unknown direct method: {}", other);
                MethodResponse::not_found(other)
            }
        }
    }

    async fn on_desired(&self, desired: Value) {
        self.on_desired_changed(&desired).await;
    }
}
