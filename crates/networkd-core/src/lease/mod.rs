//! DHCP lease lifecycle management
//!
//! The [`LeaseManager`] owns one DHCP client per interface. Clients are
//! created on demand, keyed by interface name, and registered under a single
//! lock so that checking for an existing client and registering a new one is
//! one atomic step.
//!
//! ## Rejection
//!
//! When a server rejects a request the client is torn down. Unless the start
//! was blocking, exactly one new attempt is scheduled after the retry delay,
//! with a fresh client instance. Each scheduled attempt holds a generation
//! token; an explicit start or stop in the meantime invalidates the token so
//! the attempt becomes a no-op.

mod binding;

use crate::config::LeaseConfig;
use crate::context::Context;
use crate::dhcp::ClientState;
use crate::error::{Error, Result};
use crate::traits::{DhcpClient, DhcpClientFactory};
use binding::LeaseBinding;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// DHCP status of one interface, as reported by `query_interfaces`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseStatus {
    pub state: ClientState,
    pub server_address: Option<Ipv4Addr>,
    pub lease_start_time: Option<DateTime<Utc>>,
    pub lease_end_time: Option<DateTime<Utc>>,
}

struct Registration {
    id: u64,
    client: Arc<dyn DhcpClient>,
}

#[derive(Default)]
struct Registry {
    clients: HashMap<String, Registration>,
    /// Pending retry token per interface
    retries: HashMap<String, u64>,
    next_id: u64,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Remove the registration of `interface` if it is still client `id`
    fn take_if(&mut self, interface: &str, id: u64) -> Option<Arc<dyn DhcpClient>> {
        match self.clients.get(interface) {
            Some(registration) if registration.id == id => {
                self.clients.remove(interface).map(|r| r.client)
            }
            _ => None,
        }
    }
}

/// Per-interface DHCP clients
pub struct LeaseManager {
    this: Weak<LeaseManager>,
    ctx: Context,
    factory: Arc<dyn DhcpClientFactory>,
    config: LeaseConfig,
    registry: Mutex<Registry>,
}

impl LeaseManager {
    pub fn new(ctx: Context, factory: Arc<dyn DhcpClientFactory>, config: LeaseConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            ctx,
            factory,
            config,
            registry: Mutex::new(Registry::default()),
        })
    }

    /// Start DHCP on `interface`
    ///
    /// Succeeds immediately when a client already exists. A non-blocking
    /// start returns once the client runs; the first bind happens in the
    /// background.
    ///
    /// # Parameters
    ///
    /// - `block`: Wait up to `timeout` for the first bind
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The client runs (and, when blocking, has bound)
    /// - `Err(Error::Unreachable)`: Blocking start without a lease in time
    pub async fn start(&self, interface: &str, block: bool, timeout: Duration) -> Result<()> {
        let (client, id) = {
            let mut registry = self.registry.lock().await;
            if registry.clients.contains_key(interface) {
                info!("Interface {} already configured by DHCP", interface);
                return Ok(());
            }
            registry.retries.remove(interface);

            let id = registry.next_id();
            let binding = Arc::new(LeaseBinding {
                interface: interface.to_string(),
                id,
                blocking: block,
                ctx: self.ctx.clone(),
                manager: self.this.clone(),
            });

            let client = self.factory.create(interface, &self.hostname(), binding)?;
            client.start().await?;
            registry.clients.insert(
                interface.to_string(),
                Registration {
                    id,
                    client: client.clone(),
                },
            );
            (client, id)
        };

        debug!("Started DHCP client on {}", interface);
        if !block {
            return Ok(());
        }

        if client.wait_for_bind(timeout).await.is_some() {
            return Ok(());
        }

        client.stop();
        self.registry.lock().await.take_if(interface, id);
        warn!("No DHCP lease on {} within {:?}", interface, timeout);
        Err(Error::Unreachable(format!(
            "Cannot obtain a DHCP lease on {}",
            interface
        )))
    }

    /// Tear down DHCP on `interface`
    ///
    /// Releases the lease, stops the client and strips every IPv4 address
    /// from the interface. A pending retry is cancelled.
    ///
    /// # Returns
    ///
    /// - `Err(Error::NotConfigured)`: No client was registered
    pub async fn stop(&self, interface: &str) -> Result<()> {
        let client = {
            let mut registry = self.registry.lock().await;
            registry.retries.remove(interface);
            registry.clients.remove(interface).map(|r| r.client)
        };

        let Some(client) = client else {
            return Err(Error::not_configured(format!(
                "Interface {} is not configured for DHCP",
                interface
            )));
        };

        if let Err(e) = client.release().await {
            warn!("Cannot release DHCP lease on {}: {}", interface, e);
        }
        client.stop();
        info!("Stopped DHCP client on {}", interface);

        if let Ok(Some(iface)) = self.ctx.kernel.get_interface(interface).await {
            for alias in iface.ipv4_addresses() {
                if let Err(e) = self.ctx.kernel.remove_address(interface, alias).await {
                    debug!("Cannot remove alias {} from {}: {}", alias, interface, e);
                }
            }
        }
        Ok(())
    }

    /// Ask the server of `interface` to renew its lease
    pub async fn renew(&self, interface: &str) -> Result<()> {
        let client = self.client(interface).await.ok_or_else(|| {
            Error::not_configured(format!("Interface {} is not configured for DHCP", interface))
        })?;

        if client.lease().is_none() {
            return Err(Error::NoLease("Cannot renew without a lease".to_string()));
        }

        client.renew(self.config.renew_timeout()).await.map(|_| ())
    }

    /// Whether `interface` has a registered client
    pub async fn is_running(&self, interface: &str) -> bool {
        self.registry.lock().await.clients.contains_key(interface)
    }

    /// Whether a retry is scheduled for `interface`
    pub async fn retry_pending(&self, interface: &str) -> bool {
        self.registry.lock().await.retries.contains_key(interface)
    }

    /// Client status of `interface`, if a client is registered
    pub async fn status(&self, interface: &str) -> Option<LeaseStatus> {
        let client = self.client(interface).await?;
        let lease = client.lease();
        Some(LeaseStatus {
            state: client.state(),
            server_address: client.server_address(),
            lease_start_time: lease.as_ref().map(|l| l.obtained_at),
            lease_end_time: lease.as_ref().map(|l| l.expires_at()),
        })
    }

    /// Stop every client without releasing leases (daemon shutdown)
    pub async fn shutdown(&self) {
        let mut registry = self.registry.lock().await;
        registry.retries.clear();
        for (interface, registration) in registry.clients.drain() {
            debug!("Stopping DHCP client on {}", interface);
            registration.client.stop();
        }
    }

    /// Whether client `id` is still the registered client of `interface`
    pub(crate) async fn is_current(&self, interface: &str, id: u64) -> bool {
        self.registry
            .lock()
            .await
            .clients
            .get(interface)
            .is_some_and(|r| r.id == id)
    }

    async fn client(&self, interface: &str) -> Option<Arc<dyn DhcpClient>> {
        self.registry
            .lock()
            .await
            .clients
            .get(interface)
            .map(|r| r.client.clone())
    }

    fn hostname(&self) -> String {
        self.config.hostname.clone().unwrap_or_default()
    }

    /// Reject callback of client `id`
    ///
    /// Runs on the client's own task, so the client is only signalled to
    /// stop, never awaited.
    pub(crate) async fn rejected(&self, interface: &str, id: u64, blocking: bool) {
        let token = {
            let mut registry = self.registry.lock().await;
            let Some(client) = registry.take_if(interface, id) else {
                return;
            };
            client.stop();

            if blocking {
                return;
            }
            let token = registry.next_id();
            registry.retries.insert(interface.to_string(), token);
            token
        };

        let delay = self.config.retry_delay();
        info!("Retrying DHCP on {} in {:?}", interface, delay);

        let manager = self.this.clone();
        let interface = interface.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = manager.upgrade() else {
                return;
            };

            {
                let mut registry = manager.registry.lock().await;
                if registry.retries.get(&interface) != Some(&token) {
                    return;
                }
                registry.retries.remove(&interface);
            }

            if let Err(e) = manager.start(&interface, false, Duration::ZERO).await {
                warn!("DHCP retry on {} failed: {}", interface, e);
            }
        });
    }
}
