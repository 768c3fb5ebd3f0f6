//! Edge device side of the command relay
//!
//! Subscribes to `devices/{id}/commands`, runs each command through the action
//! registry and reports outcomes on `devices/{id}/results`.

pub mod command;
pub mod settings;

use anyhow::{Context, Result};
use cmdrelay_shared::{topics, BrokerLink, QoS};
use command::handlers::{self, DeviceState};
use command::{ActionRegistry, CommandDispatcher, ResultPublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Wire the built-in actions, subscribe to the device's command topic and start
/// dispatching. Returns the dispatcher task.
pub async fn start_device(
    link: &BrokerLink,
    device_id: &str,
    qos: QoS,
    report: Option<Duration>,
) -> Result<JoinHandle<()>> {
    let registry = Arc::new(ActionRegistry::new());
    handlers::register_builtin(&registry, Arc::new(DeviceState::new()))
        .await
        .context("failed to register device actions")?;

    let mut dispatcher = CommandDispatcher::new(registry);
    if let Some(ack_timeout) = report {
        dispatcher = dispatcher.with_sink(Arc::new(ResultPublisher::new(
            link.clone(),
            qos,
            ack_timeout,
        )));
    }

    let topic = topics::command_topic(device_id);
    let inbound = link
        .subscribe(&topic, qos)
        .await
        .with_context(|| format!("failed to subscribe to {topic}"))?;

    info!(%device_id, %topic, "listening for commands");
    Ok(tokio::spawn(Arc::new(dispatcher).run(inbound)))
}
