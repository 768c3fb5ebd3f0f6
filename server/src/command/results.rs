//! Result monitor - logs outcomes devices report on their result topics

use cmdrelay_shared::{
    codec, topics, BrokerLink, DispatchOutcome, InboundMessage, QoS, SubscribeError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Subscribe to `devices/+/results` and log every outcome in the background
pub async fn watch_results(link: &BrokerLink, qos: QoS) -> Result<JoinHandle<()>, SubscribeError> {
    let inbound = link.subscribe(&topics::all_results_filter(), qos).await?;
    Ok(tokio::spawn(log_results(inbound)))
}

/// Log outcomes until the subscription closes
pub async fn log_results(mut inbound: mpsc::Receiver<InboundMessage>) {
    while let Some(message) = inbound.recv().await {
        let Some((device_id, outcome)) = parse_result(&message) else {
            continue;
        };

        if outcome.is_ok() {
            info!(
                %device_id,
                action = %outcome.action,
                detail = %outcome.detail,
                elapsed_ms = outcome.elapsed_ms,
                "<<< Outcome"
            );
        } else {
            warn!(
                %device_id,
                action = %outcome.action,
                detail = %outcome.detail,
                elapsed_ms = outcome.elapsed_ms,
                "<<< Outcome"
            );
        }
    }
}

/// Extract the device id and outcome from a result message
pub fn parse_result(message: &InboundMessage) -> Option<(String, DispatchOutcome)> {
    let Some(device_id) = topics::device_id_from_topic(&message.topic) else {
        warn!(topic = %message.topic, "result on unexpected topic");
        return None;
    };

    match codec::decode_outcome(&message.payload) {
        Ok(outcome) => Some((device_id.to_string(), outcome)),
        Err(e) => {
            warn!(%device_id, error = %e, "undecodable outcome");
            None
        }
    }
}
