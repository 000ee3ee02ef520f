// # Lease Binding
//
// The LeaseObserver the lease manager hands to each DHCP client. A binding
// belongs to exactly one client instance (identified by its registration
// id) and applies that client's lease to the kernel, the routing table and
// the resolver list.

use std::net::IpAddr;
use std::sync::Weak;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::LeaseManager;
use crate::context::Context;
use crate::dhcp::{ClientState, Lease, UnbindReason};
use crate::events::NetworkEvent;
use crate::reconcile::routes::converge_default_route;
use crate::traits::{LeaseObserver, ResolverConfig};

pub(crate) struct LeaseBinding {
    pub(crate) interface: String,
    pub(crate) id: u64,
    pub(crate) blocking: bool,
    pub(crate) ctx: Context,
    pub(crate) manager: Weak<LeaseManager>,
}

impl LeaseBinding {
    /// Whether this binding's client is still registered
    async fn is_current(&self) -> bool {
        match self.manager.upgrade() {
            Some(manager) => manager.is_current(&self.interface, self.id).await,
            None => false,
        }
    }

    /// Undo an address assignment that raced with `stop`
    async fn withdraw(&self, lease: &Lease) {
        let alias = lease.client_alias();
        if let Err(e) = self.ctx.kernel.remove_address(&self.interface, &alias).await {
            debug!("Cannot withdraw alias {} from {}: {}", alias, self.interface, e);
        }
    }

    async fn assign_address(&self, old: Option<&Lease>, lease: &Lease) {
        if old.is_some_and(|old| old.client_alias() == lease.client_alias()) {
            return;
        }

        let kernel = &self.ctx.kernel;
        let current = match kernel.get_interface(&self.interface).await {
            Ok(Some(iface)) => iface.addresses,
            Ok(None) => {
                warn!("Interface {} disappeared before its lease was applied", self.interface);
                return;
            }
            Err(e) => {
                error!("Cannot query interface {}: {}", self.interface, e);
                return;
            }
        };

        if let Some(old) = old {
            let stale = current
                .iter()
                .find(|a| a.address == IpAddr::V4(old.client_ip));
            if let Some(stale) = stale {
                if let Err(e) = kernel.remove_address(&self.interface, stale).await {
                    error!("Cannot remove alias {}: {}", old.client_ip, e);
                }
            }
        }

        let alias = lease.client_alias();
        if current.contains(&alias) {
            debug!("{} already carries {}", self.interface, alias);
            return;
        }

        info!("Assigning IP address {} to interface {}", alias, self.interface);
        if let Err(e) = kernel.add_address(&self.interface, &alias).await {
            error!("Cannot add alias to {}: {}", self.interface, e);
        }
    }

    async fn apply_dns(&self, lease: &Lease, assign_dns: bool) {
        let addresses = lease.usable_dns_addresses();

        let applied: Vec<IpAddr> = if assign_dns && !addresses.is_empty() {
            let addresses: Vec<IpAddr> = addresses.into_iter().map(IpAddr::V4).collect();
            let config = ResolverConfig::new(
                addresses.clone(),
                lease.domain_name.iter().cloned().collect(),
            );
            if let Err(e) = self.ctx.resolver.add(&self.interface, &config).await {
                error!("Cannot update DNS configuration from {}: {}", self.interface, e);
                return;
            }
            info!("Updated DNS configuration from {}", self.interface);
            addresses
        } else {
            if let Err(e) = self.ctx.resolver.delete(&self.interface).await {
                error!("Cannot delete DNS configuration of {}: {}", self.interface, e);
                return;
            }
            info!("Deleted DNS configuration of {}", self.interface);
            Vec::new()
        };

        self.ctx
            .emit(NetworkEvent::DnsConfigured { addresses: applied })
            .await;
    }
}

#[async_trait]
impl LeaseObserver for LeaseBinding {
    async fn on_bind(&self, old: Option<Lease>, lease: Lease) {
        info!(
            "{} DHCP lease on {} from {}, valid for {} seconds",
            if old.is_some() { "Renewed" } else { "Acquired" },
            self.interface,
            lease.server_address,
            lease.lifetime
        );

        if !self.is_current().await {
            debug!("Ignoring lease on {} for a stopped client", self.interface);
            return;
        }

        self.assign_address(old.as_ref(), &lease).await;
        if !self.is_current().await {
            info!(
                "DHCP on {} stopped while binding, withdrawing {}",
                self.interface, lease.client_ip
            );
            self.withdraw(&lease).await;
            return;
        }

        let settings = match self.ctx.store.settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Cannot read network settings, using defaults: {}", e);
                Default::default()
            }
        };

        if let Some(router) = lease.router {
            if settings.dhcp.assign_gateway {
                if let Err(e) =
                    converge_default_route(self.ctx.kernel.as_ref(), true, Some(IpAddr::V4(router)))
                        .await
                {
                    error!("Cannot configure default route: {}", e);
                }
            }
        }

        self.apply_dns(&lease, settings.dhcp.assign_dns).await;
    }

    async fn on_unbind(&self, lease: Lease, reason: UnbindReason) {
        info!(
            "DHCP lease {} on {}: {}",
            lease.client_ip, self.interface, reason
        );
    }

    async fn on_reject(&self, reason: String) {
        info!("DHCP request rejected on {}: {}", self.interface, reason);
        if let Some(manager) = self.manager.upgrade() {
            manager
                .rejected(&self.interface, self.id, self.blocking)
                .await;
        }
    }

    async fn on_state_change(&self, state: ClientState) {
        debug!("DHCP client on {} is {}", self.interface, state);
        self.ctx
            .emit(NetworkEvent::interface_changed(&self.interface))
            .await;
    }
}
