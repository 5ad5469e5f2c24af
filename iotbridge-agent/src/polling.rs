//! Telemetry polling loop
//!
//! Round-robin over the discovered machines in discovery order. Each visit
//! checks the shared state once:
//! - `Paused`: skip the machine and wait the stop back-off
//! - `Running`: sample, forward, then wait the current telemetry interval
//!
//! Machines are sampled strictly one after another.

use crate::discovery::Device;
use crate::forwarder::Forwarder;
use crate::opc::ControlServer;
use crate::state::{DeviceState, RunMode};
use crate::telemetry::TelemetrySample;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// What one full pass over the machines did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub sampled: usize,
    pub forwarded: usize,
    pub paused: usize,
}

pub struct PollingLoop {
    server: Arc<dyn ControlServer>,
    devices: Vec<Device>,
    state: DeviceState,
    forwarder: Forwarder,
    stop_backoff: Duration,
}

impl PollingLoop {
    pub fn new(
        server: Arc<dyn ControlServer>,
        devices: Vec<Device>,
        state: DeviceState,
        forwarder: Forwarder,
        stop_backoff: Duration,
    ) -> Self {
        Self {
            server,
            devices,
            state,
            forwarder,
            stop_backoff,
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Visit every machine once
    pub async fn run_pass(&self) -> PassReport {
        let mut report = PassReport::default();

        for device in &self.devices {
            match self.state.get().mode() {
                RunMode::Paused => {
                    info!("Emergency stop active, pausing telemetry ({} skipped)", device.name);
                    report.paused += 1;
                    sleep(self.stop_backoff).await;
                }
                RunMode::Running => {
                    let sample = TelemetrySample::collect(self.server.as_ref(), &device.name).await;
                    report.sampled += 1;
                    debug!(
                        "Read {}: status {}, temperature {}",
                        device.name, sample.production_status, sample.temperature
                    );

                    match self.forwarder.send(&device.credential, &sample).await {
                        Ok(()) => report.forwarded += 1,
                        Err(e) => error!("{}", e),
                    }

                    // re-read so an interval pushed during the send applies now
                    sleep(self.state.get().interval()).await;
                }
            }
        }

        report
    }

    /// Poll forever
    pub async fn run(&self) {
        if self.devices.is_empty() {
            warn!("No devices to poll");
            return;
        }
        info!("Starting telemetry loop over {} devices", self.devices.len());
        loop {
            let report = self.run_pass().await;
            debug!("Pass complete: {:?}", report);
        }
    }
}
