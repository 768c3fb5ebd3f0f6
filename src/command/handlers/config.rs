//! Configuration update command handler

use super::DeviceState;
use crate::command::{ActionHandler, HandlerContext};
use anyhow::{bail, Result};
use async_trait::async_trait;
use cmdrelay_shared::Params;
use std::sync::Arc;
use tracing::info;

/// Handle CONFIG: merge every param into the device settings
pub struct ConfigHandler {
    state: Arc<DeviceState>,
}

impl ConfigHandler {
    pub fn new(state: Arc<DeviceState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ActionHandler for ConfigHandler {
    async fn execute(&self, ctx: &HandlerContext, params: Params) -> Result<String> {
        if params.is_empty() {
            bail!("no settings supplied");
        }

        let count = params.len();
        let mut settings = self.state.settings.write().await;
        for (key, value) in params {
            info!(device_id = %ctx.device_id, %key, %value, "setting applied");
            settings.insert(key, value);
        }

        Ok(format!("applied {count} settings"))
    }
}
