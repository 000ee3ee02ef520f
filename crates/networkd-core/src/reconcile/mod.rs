//! Network reconciliation engine
//!
//! Converges the kernel toward the desired state held in the store:
//! interfaces, routing table and resolver list.
//!
//! ## Full Pass
//!
//! ```text
//! physical ──▶ LAGG ──▶ VLAN ──▶ BRIDGE ──▶ orphans ──▶ routes ──▶ DNS ──▶ rtsold
//! ```
//!
//! Physical interfaces go first so that ports, parents and members exist
//! before their owners are wired up. A failure on one interface is logged
//! and the pass moves on to the next.
//!
//! ## Diagnostics
//!
//! Best-effort failures are returned as an ordered list of [`Diagnostic`]s.
//! Only failures that make the whole operation meaningless (no desired
//! record, store unreachable) are returned as `Err`.

mod dns;
mod interface;
pub(crate) mod routes;

use crate::config::{EngineConfig, ScanConfig};
use crate::context::Context;
use crate::error::{Diagnostic, Result};
use crate::events::NetworkEvent;
use crate::lease::LeaseManager;
use crate::model::{InterfaceConfig, InterfaceFilter, InterfaceType};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Network reconciliation engine
pub struct Reconciler {
    ctx: Context,
    leases: Arc<LeaseManager>,
    engine: EngineConfig,
    scan: ScanConfig,
}

impl Reconciler {
    pub fn new(
        ctx: Context,
        leases: Arc<LeaseManager>,
        engine: EngineConfig,
        scan: ScanConfig,
    ) -> Self {
        Self {
            ctx,
            leases,
            engine,
            scan,
        }
    }

    /// Converge the whole network configuration
    ///
    /// In autoconfiguration mode, tries DHCP on every eligible interface
    /// instead and stops at the first lease.
    pub async fn reconcile_all(&self) -> Result<Vec<Diagnostic>> {
        let settings = self.ctx.store.settings().await?;
        if settings.autoconfigure {
            return self.autoconfigure().await;
        }

        let mut records = self
            .ctx
            .store
            .query_interfaces(&InterfaceFilter::Cloned(false))
            .await?;
        for kind in [InterfaceType::Lagg, InterfaceType::Vlan, InterfaceType::Bridge] {
            records.extend(
                self.ctx
                    .store
                    .query_interfaces(&InterfaceFilter::Kind(kind))
                    .await?,
            );
        }

        let mut diagnostics = Vec::new();
        for record in &records {
            info!("Configuring interface {}...", record.id);
            match self.reconcile_interface(&record.id, false).await {
                Ok(steps) => diagnostics.extend(steps),
                Err(e) => warn!("Cannot configure {}: {}", record.id, e),
            }
        }

        diagnostics.extend(self.destroy_orphans().await?);

        match self.reconcile_routes().await {
            Ok(steps) => diagnostics.extend(steps),
            Err(e) => diagnostics.push(Diagnostic::from_error("Cannot configure routes", &e)),
        }

        match self.reconcile_dns().await {
            Ok(steps) => diagnostics.extend(steps),
            Err(e) => diagnostics.push(Diagnostic::from_error("Cannot configure DNS", &e)),
        }

        if let Some(diagnostic) = self.restart_router_solicitation().await {
            diagnostics.push(diagnostic);
        }

        self.ctx.emit(NetworkEvent::NetworkChanged).await;
        Ok(diagnostics)
    }

    /// Converge the routing table
    pub async fn reconcile_routes(&self) -> Result<Vec<Diagnostic>> {
        routes::reconcile_routes(&self.ctx).await
    }

    /// Converge the resolver list
    pub async fn reconcile_dns(&self) -> Result<Vec<Diagnostic>> {
        dns::reconcile_dns(&self.ctx).await
    }

    /// Sync desired records of physical interfaces with the kernel
    ///
    /// New interfaces get a disabled record; records of interfaces that are
    /// gone are deleted.
    pub async fn scan_interfaces(&self) -> Result<()> {
        info!("Scanning available network interfaces...");
        let interfaces = self.ctx.kernel.list_interfaces().await?;

        for iface in interfaces.iter().filter(|i| !i.cloned) {
            if self.scan.is_ignored(&iface.name) {
                continue;
            }

            if self
                .ctx
                .store
                .exists(&InterfaceFilter::Id(iface.name.clone()))
                .await?
            {
                continue;
            }

            info!("Found new interface {} ({})", iface.name, iface.kind);
            let record = InterfaceConfig::new(iface.name.clone(), iface.kind).with_mtu(iface.mtu);
            self.ctx.store.insert_interface(record).await?;
        }

        let present: HashSet<&str> = interfaces.iter().map(|i| i.name.as_str()).collect();
        for record in self
            .ctx
            .store
            .query_interfaces(&InterfaceFilter::Cloned(false))
            .await?
        {
            if !present.contains(record.id.as_str()) {
                info!("Interface {} is gone, removing its configuration", record.id);
                self.ctx.store.delete_interface(&record.id).await?;
            }
        }

        Ok(())
    }

    async fn autoconfigure(&self) -> Result<Vec<Diagnostic>> {
        warn!("Network in autoconfiguration mode");
        let kernel = &self.ctx.kernel;

        for iface in kernel.list_interfaces().await? {
            if iface.kind == InterfaceType::Loopback
                || iface.cloned
                || self.scan.is_ignored(&iface.name)
            {
                continue;
            }

            info!("Trying to acquire DHCP lease on interface {}...", iface.name);
            if let Err(e) = kernel.set_up(&iface.name, true).await {
                warn!("Cannot bring {} up: {}", iface.name, e);
                continue;
            }

            match self
                .leases
                .start(&iface.name, true, self.engine.initial_dhcp_timeout())
                .await
            {
                Ok(()) => {
                    let store = &self.ctx.store;
                    match store.get_interface(&iface.name).await? {
                        Some(record) => {
                            store
                                .update_interface(record.with_enabled(true).with_dhcp(true))
                                .await?
                        }
                        None => {
                            let record = InterfaceConfig::new(iface.name.clone(), iface.kind)
                                .with_enabled(true)
                                .with_dhcp(true);
                            store.insert_interface(record).await?
                        }
                    }

                    let mut settings = store.settings().await?;
                    settings.autoconfigure = false;
                    store.update_settings(settings).await?;

                    info!("Successfully configured interface {}", iface.name);
                    return Ok(Vec::new());
                }
                Err(e) => {
                    debug!("No lease on {}: {}", iface.name, e);
                    if let Err(e) = kernel.set_up(&iface.name, false).await {
                        warn!("Cannot bring {} down: {}", iface.name, e);
                    }
                }
            }
        }

        Ok(vec![Diagnostic::new(
            libc::ENOENT,
            "Failed to configure any network interface",
        )])
    }

    async fn destroy_orphans(&self) -> Result<Vec<Diagnostic>> {
        let mut diagnostics = Vec::new();

        for iface in self.ctx.kernel.list_interfaces().await? {
            if !iface.kind.is_cloned() {
                continue;
            }

            if self
                .ctx
                .store
                .exists(&InterfaceFilter::Id(iface.name.clone()))
                .await?
            {
                continue;
            }

            info!("Destroying orphaned interface {}", iface.name);
            if let Err(e) = self.ctx.kernel.destroy_interface(&iface.name).await {
                diagnostics.push(Diagnostic::from_error(
                    format!("Cannot destroy interface {}", iface.name),
                    &e,
                ));
            }
        }

        Ok(diagnostics)
    }

    /// Restart the router solicitation daemon
    async fn restart_router_solicitation(&self) -> Option<Diagnostic> {
        let service = &self.engine.router_solicitation_service;
        debug!("Restarting {}", service);

        self.ctx
            .dispatcher
            .call_sync(
                "service.restart",
                serde_json::json!([service]),
                self.engine.service_restart_timeout(),
            )
            .await
            .err()
            .map(Diagnostic::from)
    }
}
