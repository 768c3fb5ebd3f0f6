//! Command publisher for sending commands to devices

use async_trait::async_trait;
use bytes::Bytes;
use cmdrelay_shared::{
    codec, topics, BrokerLink, CommandEnvelope, DecodeError, LinkState, PublishError, QoS,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// The publish half of a broker link
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        wait: Duration,
    ) -> Result<(), PublishError>;

    fn link_state(&self) -> LinkState;
}

#[async_trait]
impl CommandTransport for BrokerLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        wait: Duration,
    ) -> Result<(), PublishError> {
        BrokerLink::publish(self, topic, payload, qos, wait).await
    }

    fn link_state(&self) -> LinkState {
        self.state()
    }
}

/// Why a submitted command was not delivered
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The caller sent something that is not a command
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The device id is not a single topic level
    #[error("invalid device id {0:?}")]
    InvalidDevice(String),

    /// A valid command could not be handed to the broker
    #[error("delivery failed: {0}")]
    Delivery(#[from] PublishError),

    #[error("failed to encode command: {0}")]
    Encode(serde_json::Error),
}

impl SubmitError {
    /// True when the caller is at fault rather than the relay
    pub fn is_client_error(&self) -> bool {
        matches!(self, SubmitError::Decode(_) | SubmitError::InvalidDevice(_))
    }
}

/// Validates externally submitted commands and publishes them to devices
///
/// Exactly one publish is attempted per submission; retrying is the caller's
/// decision so a transient failure never duplicates a device-side action.
pub struct CommandPublisher {
    transport: Arc<dyn CommandTransport>,
    qos: QoS,
    ack_timeout: Duration,
}

impl CommandPublisher {
    pub fn new(transport: Arc<dyn CommandTransport>, qos: QoS, ack_timeout: Duration) -> Self {
        Self {
            transport,
            qos,
            ack_timeout,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.transport.link_state()
    }

    /// Decode `body` and publish it to `device_id`'s command topic
    pub async fn submit(
        &self,
        device_id: &str,
        body: &[u8],
    ) -> Result<CommandEnvelope, SubmitError> {
        let envelope = codec::decode(body)?;

        let topic = topics::command_topic(device_id);
        if device_id.is_empty()
            || device_id.contains('/')
            || !topics::is_valid_publish_topic(&topic)
        {
            return Err(SubmitError::InvalidDevice(device_id.to_string()));
        }

        let payload = codec::encode(&envelope).map_err(SubmitError::Encode)?;

        match self
            .transport
            .publish(&topic, payload, self.qos, self.ack_timeout)
            .await
        {
            Ok(()) => {
                info!(
                    %device_id,
                    action = %envelope.action(),
                    qos = ?self.qos,
                    ">>> Sent command"
                );
                Ok(envelope)
            }
            Err(e) => {
                warn!(
                    %device_id,
                    action = %envelope.action(),
                    error = %e,
                    "failed to publish command"
                );
                Err(SubmitError::Delivery(e))
            }
        }
    }
}
