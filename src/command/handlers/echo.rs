//! Echo command handler

use crate::command::{ActionHandler, HandlerContext};
use anyhow::Result;
use async_trait::async_trait;
use cmdrelay_shared::Params;

/// Handle ECHO: reply with the params as JSON text
pub struct EchoHandler;

#[async_trait]
impl ActionHandler for EchoHandler {
    async fn execute(&self, _ctx: &HandlerContext, params: Params) -> Result<String> {
        Ok(serde_json::to_string(&params)?)
    }
}
