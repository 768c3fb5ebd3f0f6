//! Command publishing and result tracking for the server
//!
//! This module handles:
//! - Validating commands submitted over HTTP
//! - Publishing them to the target device's command topic
//! - Logging outcomes devices report on their result topics

mod publisher;
pub mod results;

pub use publisher::{CommandPublisher, CommandTransport, SubmitError};
