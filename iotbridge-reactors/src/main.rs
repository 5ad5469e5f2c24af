use anyhow::{Context, Result};
use iotbridge_reactors::config::ReactorsConfig;
use iotbridge_reactors::http::RestServiceHub;
use iotbridge_reactors::queue::run_listener;
use iotbridge_reactors::service::ServiceCredential;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("iotbridge_reactors=info")),
        )
        .init();

    info!("IoT Bridge Reactors starting...");

    let config = ReactorsConfig::from_env()?;
    let credential: ServiceCredential = config
        .service_connection_string
        .parse()
        .context("Invalid IOTHUB_CONNECTION_STRING")?;
    let hub = RestServiceHub::new(credential, config.request_timeout).context("Failed to build hub client")?;

    run_listener(Arc::new(hub), config.queue).await;
    Ok(())
}
