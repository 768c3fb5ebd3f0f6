//! Command execution for the device
//!
//! This module handles:
//! - Registering the actions a device supports
//! - Decoding commands received on the device's command topic
//! - Dispatching them to handlers with per-command isolation
//! - Reporting outcomes on the device's result topic

mod dispatcher;
pub mod handlers;
mod registry;
mod report;

pub use dispatcher::{CommandDispatcher, DispatchError, DEFAULT_WORKER_CAPACITY};
pub use registry::{ActionHandler, ActionRegistry, DuplicateActionError, FnHandler, HandlerContext};
pub use report::{OutcomeSink, ResultPublisher};
