//! IoT Bridge Agent - entry point
//!
//! Startup order: config, hub command session, control-server connection,
//! discovery, then the polling loop. Only the control-server connection and
//! discovery can abort the process.

use anyhow::{Context, Result};
use iotbridge_agent::hub::mqtt::{DeviceSession, MqttTelemetryConnector};
use iotbridge_agent::opc::OpcSession;
use iotbridge_agent::{discover_devices, AgentConfig, CommandHandlers, DeviceState, Forwarder, PollingLoop};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("iotbridge_agent=info")),
        )
        .init();

    info!("IoT Bridge Agent starting...");

    let config = AgentConfig::load().await.context("Failed to load agent configuration")?;
    let credentials = config.credentials().context("Invalid device connection strings")?;

    let state = DeviceState::new(config.polling.telemetry_interval_ms)
        .context("Invalid initial telemetry interval")?;

    // the first identity receives direct methods and desired pushes
    let primary = credentials.first().context("No device connection strings configured")?;
    let (session, events) = DeviceSession::connect(primary, &config.hub)
        .await
        .context("Failed to create hub command session")?;
    let handlers = Arc::new(CommandHandlers::new(state.clone(), Arc::new(session)));
    events.spawn(handlers.clone());
    info!("Direct methods registered");
    handlers.report_initial().await;

    let server = OpcSession::connect(&config.server_connection_string)
        .await
        .context("OPC UA server is offline")?;
    info!("Polling machines on {}", server.endpoint());

    let devices = discover_devices(&server, credentials)
        .await
        .context("Device discovery failed")?;

    let forwarder = Forwarder::new(Arc::new(MqttTelemetryConnector::new(config.hub.clone())));
    let polling = PollingLoop::new(
        Arc::new(server),
        devices,
        state,
        forwarder,
        Duration::from_millis(config.polling.stop_backoff_ms),
    );

    polling.run().await;
    Ok(())
}
