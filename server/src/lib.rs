//! Command server
//!
//! Accepts commands over HTTP and publishes them to `devices/{id}/commands`.

pub mod command;
pub mod http;
pub mod settings;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use cmdrelay_shared::{BrokerLink, QoS};

use command::CommandPublisher;

/// Build the HTTP router publishing over `link`
pub fn app(link: &BrokerLink, qos: QoS, ack_timeout: Duration) -> Router {
    let publisher = CommandPublisher::new(Arc::new(link.clone()), qos, ack_timeout);
    http::router(Arc::new(publisher))
}
