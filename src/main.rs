use anyhow::{Context, Result};
use clap::Parser;
use cmdrelay_shared::{shutdown_signal, BrokerLink};
use edge_device::settings::DeviceSettings;
use edge_device::start_device;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = DeviceSettings::parse();
    let qos = settings.qos()?;

    info!("Edge device starting: {}", settings.id);
    info!("  Broker: {}", settings.broker);

    // No device identity without connectivity: a failed connect is fatal
    let link = BrokerLink::connect(settings.link_config())
        .await
        .context("failed to connect to broker")?;

    let report = settings.report_results.then(|| settings.ack_timeout());
    let dispatcher = start_device(&link, &settings.id, qos, report).await?;

    shutdown_signal().await;
    info!("Shutdown requested");

    link.disconnect(settings.shutdown_grace()).await;
    dispatcher.abort();

    info!("Device {} disconnected", settings.id);
    Ok(())
}
