//! Broker link errors

use std::time::Duration;
use thiserror::Error;

use super::config::ConfigError;

/// Failure to establish a broker session
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("timed out connecting to broker after {0:?}")]
    Timeout(Duration),

    #[error("broker rejected the session: {0}")]
    Rejected(String),

    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ConnectError {
    /// Bad configuration and broker rejections never succeed on retry
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectError::Config(_) | ConnectError::Rejected(_))
    }
}

/// Failure to hand a message to the broker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("broker did not acknowledge within {0:?}")]
    Timeout(Duration),

    #[error("publish rejected: {0}")]
    BrokerRejected(String),

    #[error("not connected to broker")]
    NotConnected,
}

/// Failure to register a subscription
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("invalid topic filter: {0:?}")]
    InvalidFilter(String),

    #[error("broker link is closed")]
    LinkClosed,
}
