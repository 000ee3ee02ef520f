// # Local Dispatcher
//
// Stand-in for the dispatch framework when the daemon runs on its own.
// Notifications are logged; `service.restart` is the only outbound call
// the network service makes, and it is acknowledged without effect.

use async_trait::async_trait;
use networkd_core::traits::Dispatcher;
use networkd_core::{Error, NetworkEvent, Result};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct LocalDispatcher;

#[async_trait]
impl Dispatcher for LocalDispatcher {
    async fn emit_event(&self, event: NetworkEvent) -> Result<()> {
        debug!("Event {}: {}", event.name(), event.payload());
        Ok(())
    }

    async fn call_sync(
        &self,
        method: &str,
        args: serde_json::Value,
        _timeout: Duration,
    ) -> Result<serde_json::Value> {
        match method {
            "service.restart" => {
                info!("Restart of {} requested", args);
                Ok(serde_json::Value::Null)
            }
            other => Err(Error::dispatch(format!("Unknown method {}", other))),
        }
    }
}
