//! Broker link configuration

use rumqttc::{MqttOptions, QoS};
use std::time::Duration;
use thiserror::Error;

use crate::timeouts;

/// Default MQTT port when the broker URL omits one
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported broker URL scheme in {0:?} (expected tcp:// or mqtt://)")]
    UnsupportedScheme(String),

    #[error("broker URL {0:?} has no host")]
    MissingHost(String),

    #[error("invalid broker port in {0:?}")]
    InvalidPort(String),

    #[error("client id must not be empty")]
    EmptyClientId,

    #[error("invalid QoS level {0} (expected 0, 1 or 2)")]
    InvalidQos(u8),
}

/// Configuration for one broker session
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Broker URL, e.g. `tcp://localhost:1883`
    pub broker_url: String,
    /// MQTT client id; also the device identity on the device side
    pub client_id: String,
    /// Start every session without broker-side state
    pub clean_session: bool,
    pub keep_alive: Duration,
    /// Upper bound for the initial connect
    pub connect_timeout: Duration,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Capacity of the client request queue
    pub request_capacity: usize,
    /// Capacity of each subscription's delivery channel
    pub inbound_capacity: usize,
    pub credentials: Option<(String, String)>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".into(),
            client_id: "cmdrelay".into(),
            clean_session: true,
            keep_alive: Duration::from_secs(timeouts::KEEP_ALIVE_SECS),
            connect_timeout: Duration::from_millis(timeouts::CONNECT_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(timeouts::RECONNECT_DELAY_MS),
            max_reconnect_delay: Duration::from_millis(timeouts::MAX_RECONNECT_DELAY_MS),
            request_capacity: 64,
            inbound_capacity: 64,
            credentials: None,
        }
    }
}

impl LinkConfig {
    pub fn new(broker_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Split the broker URL into host and port
    pub fn broker_address(&self) -> Result<(String, u16), ConfigError> {
        parse_broker_url(&self.broker_url)
    }

    /// Delay before reconnect attempt `attempt` (1-based), doubling up to the cap
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.reconnect_delay.saturating_mul(1u32 << exponent);
        std::cmp::min(delay, self.max_reconnect_delay)
    }

    pub(crate) fn mqtt_options(&self) -> Result<MqttOptions, ConfigError> {
        if self.client_id.is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        let (host, port) = self.broker_address()?;

        let mut options = MqttOptions::new(self.client_id.clone(), host, port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(self.clean_session);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username.clone(), password.clone());
        }
        Ok(options)
    }
}

/// Parse `tcp://host:port`, `mqtt://host:port` or bare `host[:port]`
pub fn parse_broker_url(url: &str) -> Result<(String, u16), ConfigError> {
    let rest = match url.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some(_) => return Err(ConfigError::UnsupportedScheme(url.to_string())),
        None => url,
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(url.to_string()))?;
            (host, port)
        }
        None => (rest, DEFAULT_BROKER_PORT),
    };

    if host.is_empty() {
        return Err(ConfigError::MissingHost(url.to_string()));
    }
    Ok((host.to_string(), port))
}

/// Map a numeric QoS level onto the MQTT QoS enum
pub fn parse_qos(level: u8) -> Result<QoS, ConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::InvalidQos(other)),
    }
}
