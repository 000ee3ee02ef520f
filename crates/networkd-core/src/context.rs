//! Shared collaborator handles

use crate::events::NetworkEvent;
use crate::traits::{DesiredStateStore, Dispatcher, KernelNetwork, Resolver};
use std::sync::Arc;
use tracing::{debug, warn};

/// The external collaborators every component talks to
#[derive(Clone)]
pub struct Context {
    pub kernel: Arc<dyn KernelNetwork>,
    pub store: Arc<dyn DesiredStateStore>,
    pub resolver: Arc<dyn Resolver>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl Context {
    pub fn new(
        kernel: Arc<dyn KernelNetwork>,
        store: Arc<dyn DesiredStateStore>,
        resolver: Arc<dyn Resolver>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            kernel,
            store,
            resolver,
            dispatcher,
        }
    }

    /// Publish a notification, logging instead of failing
    pub async fn emit(&self, event: NetworkEvent) {
        debug!("Emitting {}", event.name());
        if let Err(e) = self.dispatcher.emit_event(event).await {
            warn!("Failed to emit event: {}", e);
        }
    }
}
