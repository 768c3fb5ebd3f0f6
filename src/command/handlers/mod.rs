//! Built-in device actions

mod config;
mod echo;
mod reboot;
mod status;

pub use config::ConfigHandler;
pub use echo::EchoHandler;
pub use reboot::RebootHandler;
pub use status::StatusHandler;

use super::registry::{ActionRegistry, DuplicateActionError};
use cmdrelay_shared::{now_ms, Params};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Mutable device-local state the built-in actions operate on
#[derive(Debug)]
pub struct DeviceState {
    started_at: Instant,
    settings: RwLock<Params>,
    /// Unix time (ms) a simulated reboot is due
    reboot_at_ms: RwLock<Option<u64>>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            settings: RwLock::new(Params::new()),
            reboot_at_ms: RwLock::new(None),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Snapshot of the applied settings
    pub async fn settings(&self) -> Params {
        self.settings.read().await.clone()
    }

    pub async fn reboot_at_ms(&self) -> Option<u64> {
        *self.reboot_at_ms.read().await
    }

    /// A reboot is pending until its due time has passed
    pub async fn reboot_pending(&self) -> bool {
        is_pending(*self.reboot_at_ms.read().await)
    }
}

fn is_pending(reboot_at_ms: Option<u64>) -> bool {
    reboot_at_ms.is_some_and(|at| at > now_ms())
}

/// Register `reboot`, `status`, `config` and `echo`
pub async fn register_builtin(
    registry: &ActionRegistry,
    state: Arc<DeviceState>,
) -> Result<(), DuplicateActionError> {
    registry
        .register("reboot", RebootHandler::new(state.clone()))
        .await?;
    registry
        .register("status", StatusHandler::new(state.clone()))
        .await?;
    registry.register("config", ConfigHandler::new(state)).await?;
    registry.register("echo", EchoHandler).await?;
    Ok(())
}
