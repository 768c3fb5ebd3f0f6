//! Outcome reporting back to the broker

use async_trait::async_trait;
use cmdrelay_shared::{codec, topics, BrokerLink, DispatchOutcome, QoS};
use std::time::Duration;
use tracing::{debug, warn};

/// Destination for dispatch outcomes
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn report(&self, device_id: &str, outcome: &DispatchOutcome);
}

/// Publishes outcomes to `devices/{id}/results`
pub struct ResultPublisher {
    link: BrokerLink,
    qos: QoS,
    ack_timeout: Duration,
}

impl ResultPublisher {
    pub fn new(link: BrokerLink, qos: QoS, ack_timeout: Duration) -> Self {
        Self {
            link,
            qos,
            ack_timeout,
        }
    }
}

#[async_trait]
impl OutcomeSink for ResultPublisher {
    async fn report(&self, device_id: &str, outcome: &DispatchOutcome) {
        let payload = match codec::encode_outcome(outcome) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%device_id, error = %e, "failed to encode outcome");
                return;
            }
        };

        let topic = topics::result_topic(device_id);
        match self
            .link
            .publish(&topic, payload, self.qos, self.ack_timeout)
            .await
        {
            Ok(()) => debug!(%topic, status = %outcome.status, "outcome reported"),
            Err(e) => warn!(%topic, error = %e, "failed to report outcome"),
        }
    }
}
