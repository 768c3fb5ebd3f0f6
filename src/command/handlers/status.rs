//! Status request command handler

use super::DeviceState;
use crate::command::{ActionHandler, HandlerContext};
use anyhow::Result;
use async_trait::async_trait;
use cmdrelay_shared::{now_ms, Params};
use serde_json::json;
use std::sync::Arc;

/// Handle STATUS
///
/// Always valid; reports a JSON snapshot of the device as the outcome detail.
pub struct StatusHandler {
    state: Arc<DeviceState>,
}

impl StatusHandler {
    pub fn new(state: Arc<DeviceState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ActionHandler for StatusHandler {
    async fn execute(&self, ctx: &HandlerContext, _params: Params) -> Result<String> {
        let settings = self.state.settings().await;
        let reboot_pending = self.state.reboot_pending().await;

        let status = json!({
            "device_id": ctx.device_id,
            "uptime_s": self.state.uptime_secs(),
            "settings": settings.len(),
            "reboot_pending": reboot_pending,
            "time_ms": now_ms(),
        });
        Ok(status.to_string())
    }
}
