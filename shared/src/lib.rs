//! Command relay shared types
//!
//! This crate provides the pieces used by both the command server and edge
//! devices: the command envelope and its JSON codec, device topic naming, the
//! link state machine and the MQTT broker link itself.

pub mod codec;
pub mod envelope;
pub mod link;
pub mod shutdown;
pub mod state_machine;
pub mod topics;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use codec::DecodeError;
pub use envelope::{CommandEnvelope, DispatchOutcome, OutcomeStatus, ParamValue, Params};
pub use link::{
    BrokerLink, ConfigError, ConnectError, InboundMessage, LinkConfig, PublishError,
    SubscribeError,
};
pub use rumqttc::QoS;
pub use shutdown::shutdown_signal;
pub use state_machine::LinkState;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters shared by both roles
pub mod timeouts {
    /// Upper bound for the initial broker connect
    pub const CONNECT_TIMEOUT_MS: u64 = 5000;

    /// How long a publish waits for the broker acknowledgement
    pub const PUBLISH_ACK_TIMEOUT_MS: u64 = 5000;

    /// Grace period for flushing acknowledgements on shutdown
    pub const SHUTDOWN_GRACE_MS: u64 = 250;

    /// First reconnect delay; doubles on each failed attempt
    pub const RECONNECT_DELAY_MS: u64 = 1000;

    /// Reconnect delay cap
    pub const MAX_RECONNECT_DELAY_MS: u64 = 30000;

    /// MQTT keep-alive interval
    pub const KEEP_ALIVE_SECS: u64 = 30;
}
