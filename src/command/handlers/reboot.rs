//! Reboot command handler

use super::DeviceState;
use crate::command::{ActionHandler, HandlerContext};
use anyhow::{bail, Result};
use async_trait::async_trait;
use cmdrelay_shared::{now_ms, Params};
use std::sync::Arc;
use tracing::warn;

/// Longest delay a reboot may be scheduled out (one day)
const MAX_DELAY_SECS: u64 = 24 * 60 * 60;

/// Handle REBOOT
///
/// The reboot is simulated: the handler records when it is due and reports it
/// through `status`. An optional `delay_s` postpones it.
pub struct RebootHandler {
    state: Arc<DeviceState>,
}

impl RebootHandler {
    pub fn new(state: Arc<DeviceState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ActionHandler for RebootHandler {
    async fn execute(&self, ctx: &HandlerContext, params: Params) -> Result<String> {
        let delay_s = match params.get("delay_s") {
            None => 0,
            Some(value) => match value.as_u64() {
                Some(secs) if secs <= MAX_DELAY_SECS => secs,
                _ => bail!(
                    "delay_s must be a whole number of seconds between 0 and {MAX_DELAY_SECS}"
                ),
            },
        };

        let mut reboot_at = self.state.reboot_at_ms.write().await;
        if super::is_pending(*reboot_at) {
            return Ok("reboot already scheduled".into());
        }
        *reboot_at = Some(now_ms() + delay_s * 1000);

        warn!(device_id = %ctx.device_id, delay_s, "reboot scheduled");
        Ok(format!("reboot scheduled in {delay_s}s"))
    }
}
