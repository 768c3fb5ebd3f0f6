//! Server process settings

use clap::Parser;
use cmdrelay_shared::link::parse_qos;
use cmdrelay_shared::{timeouts, ConfigError, LinkConfig, QoS};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "command-server",
    about = "Publishes HTTP-submitted commands to devices over MQTT"
)]
pub struct ServerSettings {
    /// MQTT broker URL
    #[arg(long, env = "CMDRELAY_BROKER", default_value = "tcp://localhost:1883")]
    pub broker: String,

    /// MQTT client id for the server session
    #[arg(long, env = "CMDRELAY_CLIENT_ID", default_value = "command-server")]
    pub client_id: String,

    /// HTTP listen address
    #[arg(long, env = "CMDRELAY_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// QoS for command publishes
    #[arg(long, env = "CMDRELAY_QOS", default_value_t = 1)]
    pub qos: u8,

    /// How long a command publish waits for the broker
    #[arg(long, default_value_t = timeouts::PUBLISH_ACK_TIMEOUT_MS)]
    pub ack_timeout_ms: u64,

    /// Log outcomes reported on devices/+/results
    #[arg(long, env = "CMDRELAY_WATCH_RESULTS")]
    pub watch_results: bool,

    /// Grace period for in-flight acknowledgements on shutdown
    #[arg(long, default_value_t = timeouts::SHUTDOWN_GRACE_MS)]
    pub shutdown_grace_ms: u64,
}

impl ServerSettings {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::new(self.broker.clone(), self.client_id.clone())
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
