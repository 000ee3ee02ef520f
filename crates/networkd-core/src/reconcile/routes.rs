//! Routing table convergence
//!
//! Default routes follow a three-way decision per address family: delete when
//! only the kernel has one, add when only the configuration has one, change
//! when both exist and differ. Static routes converge by set difference.

use crate::context::Context;
use crate::error::{Diagnostic, Error, Result};
use crate::model::{InterfaceFilter, KernelInterface, NetworkSettings, Route, RouteFlag};
use crate::traits::KernelNetwork;
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::{debug, info};

/// Current default route of one address family
pub(crate) async fn default_route(kernel: &dyn KernelNetwork, ipv4: bool) -> Result<Option<Route>> {
    Ok(kernel
        .routes()
        .await?
        .into_iter()
        .find(|r| r.is_default() && r.is_ipv4() == ipv4))
}

/// Converge the default route of one family toward `gateway`
///
/// `None` removes the kernel default route, if any.
pub(crate) async fn converge_default_route(
    kernel: &dyn KernelNetwork,
    ipv4: bool,
    gateway: Option<IpAddr>,
) -> Result<()> {
    let current = default_route(kernel, ipv4).await?;
    let desired = gateway.map(Route::default_via);

    match (current, desired) {
        (Some(current), None) => {
            info!("Removing default route {}", current);
            kernel.delete_route(&current).await.map_err(|e| {
                Error::os(e.errno(), format!("Cannot remove default route: {}", e))
            })
        }
        (None, Some(desired)) => {
            info!("Adding default route {}", desired);
            kernel
                .add_route(&desired)
                .await
                .map_err(|e| Error::os(e.errno(), format!("Cannot add default route: {}", e)))
        }
        (Some(current), Some(desired)) if current != desired => {
            info!("Changing default route from {} to {}", current, desired);
            kernel.change_route(&desired).await.map_err(|e| {
                Error::os(e.errno(), format!("Cannot change default route: {}", e))
            })
        }
        _ => Ok(()),
    }
}

/// Whether a DHCP lease owns the IPv4 default route
pub(crate) async fn using_dhcp_for_gateway(ctx: &Context, settings: &NetworkSettings) -> Result<bool> {
    Ok(settings.dhcp.assign_gateway && ctx.store.exists(&InterfaceFilter::Dhcp(true)).await?)
}

/// Whether `route` is a machine-managed static route
///
/// Applies to kernel entries and desired records alike. Default routes have
/// their own decision and routes into a locally attached subnet are left
/// alone.
fn is_managed_static(route: &Route, local: &[IpNet]) -> bool {
    route.flags.contains(&RouteFlag::Static)
        && !route.is_default()
        && !local.iter().any(|net| net.contains(&route.destination))
}

fn local_subnets(interfaces: &[KernelInterface]) -> Vec<IpNet> {
    interfaces
        .iter()
        .flat_map(|i| i.ipv4_addresses())
        .filter_map(|a| a.network())
        .collect()
}

/// Converge the routing table to the configured gateways and static routes
pub async fn reconcile_routes(ctx: &Context) -> Result<Vec<Diagnostic>> {
    let settings = ctx.store.settings().await?;
    let kernel = ctx.kernel.as_ref();
    let mut diagnostics = Vec::new();

    if using_dhcp_for_gateway(ctx, &settings).await? {
        info!("Not configuring default route as using DHCP");
    } else if let Err(e) = converge_default_route(kernel, true, settings.gateway.ipv4()).await {
        diagnostics.push(Diagnostic::from(e));
    }

    if let Err(e) = converge_default_route(kernel, false, settings.gateway.ipv6()).await {
        diagnostics.push(Diagnostic::from(e));
    }

    let local = local_subnets(&kernel.list_interfaces().await?);
    let current: HashSet<Route> = kernel
        .routes()
        .await?
        .into_iter()
        .filter(|r| is_managed_static(r, &local))
        .collect();

    let mut desired = HashSet::new();
    for record in ctx.store.query_routes().await? {
        match record.to_route() {
            Ok(route) if !is_managed_static(&route, &local) => {
                debug!("Ignoring route record {}, not a managed static route", route)
            }
            Ok(route) => {
                desired.insert(route);
            }
            Err(e) => diagnostics.push(Diagnostic::from_error(
                format!("Cannot convert route {}", record.network),
                &e,
            )),
        }
    }

    for route in current.difference(&desired) {
        info!("Removing static route to {}", route);
        if let Err(e) = kernel.delete_route(route).await {
            diagnostics.push(Diagnostic::from_error(
                format!("Cannot remove static route to {}", route),
                &e,
            ));
        }
    }

    for route in desired.difference(&current) {
        info!("Adding static route to {}", route);
        if let Err(e) = kernel.add_route(route).await {
            diagnostics.push(Diagnostic::from_error(
                format!("Cannot add static route to {}", route),
                &e,
            ));
        }
    }

    Ok(diagnostics)
}
