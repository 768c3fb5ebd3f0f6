//! Broker link: one MQTT session per process with reconnect and resubscribe
//!
//! This module handles:
//! - Establishing the session with a bounded connect timeout
//! - Automatic reconnection with exponential backoff after link loss
//! - Replaying every registered subscription whenever a session is (re)established
//! - Publishing with optional, bounded waits for broker acknowledgement
//! - Delivering inbound messages through per-subscription channels

mod acks;
mod broker;
mod config;
mod error;

pub use broker::{BrokerLink, InboundMessage};
pub use config::{parse_broker_url, parse_qos, ConfigError, LinkConfig, DEFAULT_BROKER_PORT};
pub use error::{ConnectError, PublishError, SubscribeError};
