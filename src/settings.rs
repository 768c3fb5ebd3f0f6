//! Device process settings

use clap::{ArgAction, Parser};
use cmdrelay_shared::link::parse_qos;
use cmdrelay_shared::{timeouts, ConfigError, LinkConfig, QoS};
use std::time::Duration;

/// Command-line flags, each with an environment fallback
#[derive(Parser, Debug, Clone)]
#[command(name = "edge-device", about = "Receives commands over MQTT and runs them locally")]
pub struct DeviceSettings {
    /// MQTT broker URL
    #[arg(long, env = "CMDRELAY_BROKER", default_value = "tcp://localhost:1883")]
    pub broker: String,

    /// Device ID; also used as the MQTT client id
    #[arg(long, env = "CMDRELAY_DEVICE_ID", default_value = "device123")]
    pub id: String,

    /// QoS for the command subscription and result reports
    #[arg(long, env = "CMDRELAY_QOS", default_value_t = 1)]
    pub qos: u8,

    /// Start each session without broker-side state
    #[arg(long, env = "CMDRELAY_CLEAN_SESSION", default_value_t = true, action = ArgAction::Set)]
    pub clean_session: bool,

    /// Publish every outcome to devices/{id}/results
    #[arg(long, env = "CMDRELAY_REPORT_RESULTS", default_value_t = true, action = ArgAction::Set)]
    pub report_results: bool,

    /// How long a result report waits for the broker
    #[arg(long, default_value_t = timeouts::PUBLISH_ACK_TIMEOUT_MS)]
    pub ack_timeout_ms: u64,

    /// Grace period for in-flight acknowledgements on shutdown
    #[arg(long, default_value_t = timeouts::SHUTDOWN_GRACE_MS)]
    pub shutdown_grace_ms: u64,
}

impl DeviceSettings {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            clean_session: self.clean_session,
            ..LinkConfig::new(self.broker.clone(), self.id.clone())
        }
    }

    pub fn qos(&self) -> Result<QoS, ConfigError> {
        parse_qos(self.qos)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
