use anyhow::Context;
use clap::Parser;
use cmdrelay_shared::{shutdown_signal, BrokerLink};
use command_server::{app, command::results, settings::ServerSettings};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = ServerSettings::parse();
    let qos = settings.qos().context("invalid --qos")?;

    info!("Command server starting");
    info!("  Broker: {}", settings.broker);
    info!("  Client ID: {}", settings.client_id);

    // The broker may come up after us; keep trying until asked to stop
    let link = tokio::select! {
        link = BrokerLink::connect_with_retry(settings.link_config()) => {
            link.context("failed to connect to broker")?
        }
        _ = shutdown_signal() => {
            info!("Shutdown requested before broker connection");
            return Ok(());
        }
    };

    let monitor = if settings.watch_results {
        Some(
            results::watch_results(&link, qos)
                .await
                .context("failed to subscribe to results")?,
        )
    } else {
        None
    };

    let listener = tokio::net::TcpListener::bind(&settings.listen)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen))?;
    info!("HTTP API listening on {}", listener.local_addr()?);

    let served = axum::serve(listener, app(&link, qos, settings.ack_timeout()))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        warn!(error = %e, "HTTP server error");
    }

    info!("Shutting down");
    link.disconnect(settings.shutdown_grace()).await;
    if let Some(monitor) = monitor {
        monitor.abort();
    }

    served.context("axum serve error")
}
