// # Dispatcher
//
// The task/RPC framework the daemon is registered with. Only the outbound
// half is consumed here: publishing notifications and calling other
// services synchronously.

use crate::events::NetworkEvent;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for the RPC / event bus
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Publish a notification
    ///
    /// Publishing is fire-and-forget for callers; a failure is logged by the
    /// caller and never aborts the operation that produced the event.
    async fn emit_event(&self, event: NetworkEvent) -> Result<()>;

    /// Call a method of another service and wait for its result
    ///
    /// # Parameters
    ///
    /// - `method`: Fully qualified method name (e.g. `service.restart`)
    /// - `args`: Positional arguments
    /// - `timeout`: Upper bound on the call
    async fn call_sync(
        &self,
        method: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value>;
}
