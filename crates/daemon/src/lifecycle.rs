//! Start/stop contract for long-lived daemon components.

use anyhow::Result;

/// A component the orchestrator starts at boot and stops at shutdown.
///
/// `stop` must be safe to call on a component that was never started.
#[allow(async_fn_in_trait)]
pub trait Lifecycle: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Acquires resources and spawns background tasks.
    async fn start(&self) -> Result<()>;

    /// Releases everything `start` acquired.
    async fn stop(&self) -> Result<()>;
}
