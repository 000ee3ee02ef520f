// # Interface Convergence
//
// One pass over a single interface. Each step compares the kernel with the
// desired record and only mutates what differs, so a second pass right after
// the first issues no kernel operations.
//
// Step failures become diagnostics; the remaining steps still run.

use std::collections::BTreeSet;
use tracing::{debug, info};

use super::Reconciler;
use crate::error::{Diagnostic, Error, Result};
use crate::events::NetworkEvent;
use crate::model::{InterfaceConfig, InterfaceType, KernelInterface, Nd6Flag};

impl Reconciler {
    /// Converge one interface to its desired record
    ///
    /// # Parameters
    ///
    /// - `name`: Interface id
    /// - `restart_router_solicitation`: Restart rtsold when router
    ///   advertisements are accepted
    ///
    /// # Returns
    ///
    /// - `Ok(diagnostics)`: Pass completed; failed steps are listed in order
    /// - `Err(Error::NotFound)`: No desired record, or a non-cloned interface
    ///   missing from the kernel
    pub async fn reconcile_interface(
        &self,
        name: &str,
        restart_router_solicitation: bool,
    ) -> Result<Vec<Diagnostic>> {
        let kernel = &self.ctx.kernel;
        let record = self.ctx.store.get_interface(name).await?.ok_or_else(|| {
            Error::not_found(format!("Configuration for interface {} not found", name))
        })?;

        let iface = match kernel.get_interface(name).await? {
            Some(iface) => iface,
            None if record.cloned => {
                info!("Creating interface {}", name);
                kernel.create_interface(name).await?;
                kernel
                    .get_interface(name)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("Interface {} not found", name)))?
            }
            None => return Err(Error::not_found(format!("Interface {} not found", name))),
        };

        if !record.enabled {
            info!("Interface {} is disabled", name);
            return Ok(Vec::new());
        }

        let lagg_member = kernel
            .list_interfaces()
            .await?
            .iter()
            .any(|i| i.lagg_ports.iter().any(|p| p == name));

        let mut diagnostics = Vec::new();

        if !iface.is_up() {
            info!("Bringing interface {} up", name);
            if let Err(e) = kernel.set_up(name, true).await {
                diagnostics.push(Diagnostic::from_error(format!("Cannot bring {} up", name), &e));
            }
        }

        match record.kind {
            InterfaceType::Vlan => self.converge_vlan(&record, &iface, &mut diagnostics).await,
            InterfaceType::Lagg => self.converge_lagg(&record, &iface, &mut diagnostics).await,
            InterfaceType::Bridge => self.converge_bridge(&record, &iface, &mut diagnostics).await,
            _ => {}
        }

        if record.dhcp {
            self.converge_dhcp(&iface, &mut diagnostics).await;
        } else {
            self.converge_aliases(&record, &mut diagnostics).await;
        }

        self.converge_nd6(&record, &iface, restart_router_solicitation, &mut diagnostics)
            .await;

        if let Some(mtu) = record.mtu {
            if record.kind != InterfaceType::Lagg && !lagg_member && iface.mtu != mtu {
                if let Err(e) = kernel.set_mtu(name, mtu).await {
                    diagnostics.push(Diagnostic::from_error(
                        format!("Cannot set MTU of {}", name),
                        &e,
                    ));
                }
            }
        }

        if let Some(media) = &record.media {
            if iface.media.as_ref() != Some(media) {
                if let Err(e) = kernel.set_media(name, media).await {
                    diagnostics.push(Diagnostic::from_error(
                        format!("Cannot set media of {}", name),
                        &e,
                    ));
                }
            }
        }

        if !record.capabilities.is_empty()
            && !matches!(record.kind, InterfaceType::Vlan | InterfaceType::Bridge)
        {
            let capabilities = record.capabilities.apply(&iface.capabilities);
            if capabilities != iface.capabilities {
                if let Err(e) = kernel.set_capabilities(name, &capabilities).await {
                    diagnostics.push(Diagnostic::from_error(
                        format!("Cannot set capabilities of {}", name),
                        &e,
                    ));
                }
            }
        }

        self.ctx
            .emit(NetworkEvent::InterfaceConfigured {
                interface: name.to_string(),
            })
            .await;

        Ok(diagnostics)
    }

    async fn converge_vlan(
        &self,
        record: &InterfaceConfig,
        iface: &KernelInterface,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let Some(vlan) = &record.vlan else {
            return;
        };

        if vlan.parent == iface.vlan_parent && vlan.tag == iface.vlan_tag {
            return;
        }

        let (Some(parent), Some(tag)) = (&vlan.parent, vlan.tag) else {
            diagnostics.push(Diagnostic::new(
                libc::EINVAL,
                format!("VLAN interface {} needs both a parent and a tag", record.id),
            ));
            return;
        };

        let kernel = &self.ctx.kernel;
        let result = async {
            if iface.vlan_parent.is_some() {
                kernel.unconfigure_vlan(&record.id).await?;
            }
            kernel.configure_vlan(&record.id, parent, tag).await
        }
        .await;

        if let Err(e) = result {
            diagnostics.push(Diagnostic::from_error(
                format!("Failed to configure VLAN interface {}", record.id),
                &e,
            ));
        }
    }

    async fn converge_lagg(
        &self,
        record: &InterfaceConfig,
        iface: &KernelInterface,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let Some(lagg) = &record.lagg else {
            return;
        };
        let kernel = &self.ctx.kernel;
        let name = &record.id;

        if iface.lagg_protocol != Some(lagg.protocol) {
            if let Err(e) = kernel.set_lagg_protocol(name, lagg.protocol).await {
                diagnostics.push(Diagnostic::from_error(
                    format!("Cannot set protocol of {}", name),
                    &e,
                ));
            }
        }

        // Stale ports leave before new ones join
        for port in iface.lagg_ports.iter().filter(|p| !lagg.ports.contains(p)) {
            info!("Removing port {} from {}", port, name);
            if let Err(e) = kernel.delete_lagg_port(name, port).await {
                diagnostics.push(Diagnostic::from_error(
                    format!("Cannot remove port {} from {}", port, name),
                    &e,
                ));
            }
        }

        for port in lagg.ports.iter().filter(|p| !iface.lagg_ports.contains(p)) {
            info!("Adding port {} to {}", port, name);
            if let Err(e) = kernel.add_lagg_port(name, port).await {
                diagnostics.push(Diagnostic::from_error(
                    format!("Cannot add port {} to {}", port, name),
                    &e,
                ));
            }
        }
    }

    async fn converge_bridge(
        &self,
        record: &InterfaceConfig,
        iface: &KernelInterface,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let Some(bridge) = &record.bridge else {
            return;
        };
        let kernel = &self.ctx.kernel;
        let name = &record.id;

        for member in iface.bridge_members.iter().filter(|m| !bridge.members.contains(m)) {
            info!("Removing member {} from {}", member, name);
            if let Err(e) = kernel.delete_bridge_member(name, member).await {
                diagnostics.push(Diagnostic::from_error(
                    format!("Cannot remove member {} from {}", member, name),
                    &e,
                ));
            }
        }

        for member in bridge.members.iter().filter(|m| !iface.bridge_members.contains(m)) {
            info!("Adding member {} to {}", member, name);
            if let Err(e) = kernel.add_bridge_member(name, member).await {
                diagnostics.push(Diagnostic::from_error(
                    format!("Cannot add member {} to {}", member, name),
                    &e,
                ));
            }
        }
    }

    async fn converge_dhcp(&self, iface: &KernelInterface, diagnostics: &mut Vec<Diagnostic>) {
        let name = &iface.name;
        if self.leases.is_running(name).await {
            info!("Interface {} already configured using DHCP", name);
            return;
        }

        for alias in &iface.addresses {
            if let Err(e) = self.ctx.kernel.remove_address(name, alias).await {
                diagnostics.push(Diagnostic::from_error(
                    format!("Cannot remove address {} from {}", alias, name),
                    &e,
                ));
            }
        }

        info!("Trying to acquire DHCP lease on interface {}...", name);
        if let Err(e) = self
            .leases
            .start(name, true, self.engine.initial_dhcp_timeout())
            .await
        {
            debug!("DHCP start on {} failed: {}", name, e);
            diagnostics.push(Diagnostic::new(
                libc::ENETUNREACH,
                format!("Failed to configure interface {} using DHCP", name),
            ));
        }
    }

    async fn converge_aliases(&self, record: &InterfaceConfig, diagnostics: &mut Vec<Diagnostic>) {
        let kernel = &self.ctx.kernel;
        let name = &record.id;

        if self.leases.is_running(name).await {
            info!("Stopping DHCP client on interface {}", name);
            if let Err(e) = self.leases.stop(name).await {
                debug!("Stopping DHCP on {}: {}", name, e);
            }
        }

        let (desired, errors) = record.desired_aliases();
        for e in errors {
            diagnostics.push(Diagnostic::from_error(
                format!("Invalid address on {}", name),
                &e,
            ));
        }

        let existing = match kernel.get_interface(name).await {
            Ok(Some(iface)) => iface.addresses,
            Ok(None) => Vec::new(),
            Err(e) => {
                diagnostics.push(Diagnostic::from_error(
                    format!("Cannot query interface {}", name),
                    &e,
                ));
                return;
            }
        };

        for alias in existing.iter().filter(|a| !desired.contains(a)) {
            if alias.is_link_local_v6() {
                continue;
            }

            info!("Removing address from interface {}: {}", name, alias);
            if let Err(e) = kernel.remove_address(name, alias).await {
                diagnostics.push(Diagnostic::from_error(
                    format!("Cannot remove address {} from {}", alias, name),
                    &e,
                ));
            }
        }

        for alias in desired.iter().filter(|a| !existing.contains(a)) {
            info!("Adding new address to interface {}: {}", name, alias);
            if let Err(e) = kernel.add_address(name, alias).await {
                diagnostics.push(Diagnostic::from_error(
                    format!("Cannot add address {} to {}", alias, name),
                    &e,
                ));
            }
        }
    }

    async fn converge_nd6(
        &self,
        record: &InterfaceConfig,
        iface: &KernelInterface,
        restart_router_solicitation: bool,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let mut flags: BTreeSet<Nd6Flag> = iface.nd6_flags.clone();

        if record.rtadv {
            flags.insert(Nd6Flag::AcceptRtadv);
        } else {
            flags.remove(&Nd6Flag::AcceptRtadv);
        }

        if record.noipv6 {
            flags.insert(Nd6Flag::IfDisabled);
            flags.remove(&Nd6Flag::AutoLinklocal);
        } else {
            flags.remove(&Nd6Flag::IfDisabled);
            flags.insert(Nd6Flag::AutoLinklocal);
        }

        if flags != iface.nd6_flags {
            if let Err(e) = self.ctx.kernel.set_nd6_flags(&record.id, &flags).await {
                diagnostics.push(Diagnostic::from_error(
                    format!("Cannot set ND6 flags of {}", record.id),
                    &e,
                ));
            }
        }

        if record.rtadv && restart_router_solicitation {
            if let Some(diagnostic) = self.restart_router_solicitation().await {
                diagnostics.push(diagnostic);
            }
        }
    }
}
