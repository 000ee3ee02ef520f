// # Network Service
//
// The operations the dispatch framework calls, wired over the three core
// components:
//
// ```text
//                 ┌──────────────────┐
//  RPC calls ───▶ │  NetworkService  │
//                 └──┬──────┬──────┬─┘
//                    │      │      │
//           Reconciler  LeaseManager  EventMonitor (own task)
//                    │      │      │
//                    └──────┴──────┴──▶ KernelNetwork / store / resolver / bus
// ```
//
// The service owns the monitor task. `start_monitor` spawns it; `shutdown`
// stops it and every DHCP client.

use crate::config::{DaemonConfig, MonitorConfig};
use crate::context::Context;
use crate::default_iface::DefaultInterfaceSignal;
use crate::error::{Diagnostic, Error, Result};
use crate::lease::{LeaseManager, LeaseStatus};
use crate::model::{InterfaceFilter, InterfaceType, KernelInterface, LinkState, Route};
use crate::monitor::EventMonitor;
use crate::reconcile::routes::default_route;
use crate::reconcile::Reconciler;
use crate::traits::{DhcpClientFactory, ResolverConfig};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Highest clone unit number handed out by `get_next_name`
const MAX_CLONE_UNIT: u32 = 999;

/// Kernel snapshot of one interface plus its DHCP client status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceStatus {
    #[serde(flatten)]
    pub interface: KernelInterface,
    pub dhcp: Option<LeaseStatus>,
}

/// Gateways of the kernel default routes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DefaultRoutes {
    pub ipv4: Option<IpAddr>,
    pub ipv6: Option<IpAddr>,
}

struct MonitorTask {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

/// Network configuration service
pub struct NetworkService {
    ctx: Context,
    leases: Arc<LeaseManager>,
    reconciler: Reconciler,
    default_interface: Arc<DefaultInterfaceSignal>,
    monitor_config: MonitorConfig,
    monitor: Mutex<Option<MonitorTask>>,
}

impl NetworkService {
    pub fn new(ctx: Context, factory: Arc<dyn DhcpClientFactory>, config: &DaemonConfig) -> Self {
        let leases = LeaseManager::new(ctx.clone(), factory, config.leases.clone());
        let reconciler = Reconciler::new(
            ctx.clone(),
            leases.clone(),
            config.engine.clone(),
            config.scan.clone(),
        );

        Self {
            ctx,
            leases,
            reconciler,
            default_interface: Arc::new(DefaultInterfaceSignal::new()),
            monitor_config: config.monitor.clone(),
            monitor: Mutex::new(None),
        }
    }

    pub fn leases(&self) -> &Arc<LeaseManager> {
        &self.leases
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Spawn the event monitor task (no-op when already running)
    pub async fn start_monitor(&self) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }

        let task = EventMonitor::new(
            self.ctx.clone(),
            self.leases.clone(),
            self.default_interface.clone(),
            &self.monitor_config,
        );
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(task.run_until(shutdown_rx));

        *monitor = Some(MonitorTask {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the event monitor and every DHCP client
    pub async fn shutdown(&self) {
        if let Some(task) = self.monitor.lock().await.take() {
            let _ = task.shutdown_tx.send(());
            match task.handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Event monitor failed: {}", e),
                Err(e) => error!("Event monitor task panicked: {}", e),
            }
        }

        self.leases.shutdown().await;
        info!("Network service stopped");
    }

    /// Create desired records for newly found physical interfaces
    pub async fn scan_interfaces(&self) -> Result<()> {
        self.reconciler.scan_interfaces().await
    }

    /// Converge the whole network configuration
    pub async fn configure_network(&self) -> Result<Vec<Diagnostic>> {
        self.reconciler.reconcile_all().await
    }

    pub async fn configure_interface(
        &self,
        name: &str,
        restart_router_solicitation: bool,
    ) -> Result<Vec<Diagnostic>> {
        self.reconciler
            .reconcile_interface(name, restart_router_solicitation)
            .await
    }

    pub async fn configure_routes(&self) -> Result<Vec<Diagnostic>> {
        self.reconciler.reconcile_routes().await
    }

    pub async fn configure_dns(&self) -> Result<Vec<Diagnostic>> {
        self.reconciler.reconcile_dns().await
    }

    /// Configure one interface, then the routing table
    pub async fn up_interface(&self, name: &str) -> Result<Vec<Diagnostic>> {
        let mut diagnostics = self.reconciler.reconcile_interface(name, true).await?;
        diagnostics.extend(self.reconciler.reconcile_routes().await?);
        Ok(diagnostics)
    }

    /// Strip every address from `name` and bring it down
    pub async fn down_interface(&self, name: &str) -> Result<()> {
        let kernel = &self.ctx.kernel;
        let iface = kernel
            .get_interface(name)
            .await?
            .ok_or_else(|| Error::not_found(format!("Interface {} not found", name)))?;

        for alias in &iface.addresses {
            if let Err(e) = kernel.remove_address(name, alias).await {
                warn!("Cannot remove address {} from {}: {}", alias, name, e);
            }
        }

        kernel.set_up(name, false).await
    }

    pub async fn renew_lease(&self, name: &str) -> Result<()> {
        self.leases.renew(name).await
    }

    /// Interface of the kernel IPv4 default route
    pub async fn get_default_interface(&self) -> Result<Option<String>> {
        Ok(default_route(self.ctx.kernel.as_ref(), true)
            .await?
            .and_then(|r| r.interface))
    }

    pub async fn get_default_routes(&self) -> Result<DefaultRoutes> {
        let kernel = self.ctx.kernel.as_ref();
        Ok(DefaultRoutes {
            ipv4: default_route(kernel, true).await?.and_then(|r| r.gateway),
            ipv6: default_route(kernel, false).await?.and_then(|r| r.gateway),
        })
    }

    /// Longest-prefix route for `address`
    pub async fn get_route(&self, address: IpAddr) -> Result<Option<Route>> {
        self.ctx.kernel.lookup_route(address).await
    }

    /// Wait until the event monitor has seen an IPv4 default route
    ///
    /// Returns whether it was observed within `timeout`; `None` waits forever.
    pub async fn wait_for_default_interface(&self, timeout: Option<Duration>) -> bool {
        self.default_interface.wait(timeout).await
    }

    pub async fn query_interfaces(&self) -> Result<Vec<InterfaceStatus>> {
        let mut statuses = Vec::new();
        for mut interface in self.ctx.kernel.list_interfaces().await? {
            if interface.kind == InterfaceType::Bridge {
                interface.link_state = LinkState::Up;
            }
            let dhcp = self.leases.status(&interface.name).await;
            statuses.push(InterfaceStatus { interface, dhcp });
        }
        Ok(statuses)
    }

    pub async fn query_routes(&self) -> Result<Vec<Route>> {
        self.ctx.kernel.routes().await
    }

    /// Merged resolver configuration of every source
    pub async fn get_dns_config(&self) -> Result<ResolverConfig> {
        self.ctx.resolver.list().await
    }

    /// Lowest free clone name for `kind` (`VLAN`, `LAGG` or `BRIDGE`)
    ///
    /// A name is free when neither the kernel nor the desired store knows it.
    /// Bridge units start at 2 and skip units taken by `brgN` interfaces.
    ///
    /// # Returns
    ///
    /// - `Err(Error::InvalidArgument)`: `kind` is not a cloned type
    /// - `Err(Error::Busy)`: Every unit up to 999 is taken
    pub async fn get_next_name(&self, kind: &str) -> Result<String> {
        let invalid = || Error::invalid_argument(format!("Invalid type: {}", kind));
        let parsed: InterfaceType = kind.parse().map_err(|_| invalid())?;
        let prefix = parsed.clone_prefix().ok_or_else(invalid)?;

        let kernel_names: Vec<String> = self
            .ctx
            .kernel
            .list_interfaces()
            .await?
            .into_iter()
            .map(|i| i.name)
            .collect();

        let start = if parsed == InterfaceType::Bridge { 2 } else { 0 };
        for unit in start..=MAX_CLONE_UNIT {
            if parsed == InterfaceType::Bridge && kernel_names.contains(&format!("brg{}", unit)) {
                continue;
            }

            let name = format!("{}{}", prefix, unit);
            if kernel_names.contains(&name) {
                continue;
            }
            if self
                .ctx
                .store
                .exists(&InterfaceFilter::Id(name.clone()))
                .await?
            {
                continue;
            }
            return Ok(name);
        }

        Err(Error::Busy("No free interfaces left".to_string()))
    }
}
