// # Memory Kernel
//
// A simulated network stack implementing KernelNetwork.
//
// ## Purpose
//
// - Drives the daemon's simulation backend when no routing socket is available
// - Gives tests full control over kernel state, a log of every mutation, and
//   injectable failures per (operation, target)
//
// ## Notifications
//
// Every mutation publishes the routing messages a BSD kernel would emit for
// it to all `watch()` subscribers: announces for create/destroy, interface
// info for flag/MTU/link changes, address messages, and route messages.
// Adding an address also installs the connected (link) route of its subnet.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::model::{
    AddressAction, Alias, AnnounceKind, InterfaceFlag, InterfaceType, KernelInterface,
    LaggProtocol, LinkState, Nd6Flag, Route, RouteAction, RoutingMessage,
};
use crate::traits::{KernelNetwork, RoutingStream};
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 1024;

/// One recorded kernel mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Operation name, matching the `KernelNetwork` method
    pub op: String,
    /// Interface name, or `route` for routing table operations
    pub target: String,
    /// Operation argument in text form
    pub detail: String,
}

impl std::fmt::Display for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.op, self.target, self.detail)
    }
}

#[derive(Default)]
struct KernelState {
    interfaces: Vec<KernelInterface>,
    routes: Vec<Route>,
    mutations: Vec<Mutation>,
    faults: HashMap<(String, String), i32>,
    next_mac: u32,
}

impl KernelState {
    fn get(&self, name: &str) -> Option<&KernelInterface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut KernelInterface> {
        self.interfaces
            .iter_mut()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::os(libc::ENXIO, format!("Interface {} does not exist", name)))
    }

    /// Fail with the injected errno, or record the mutation
    fn mutate(&mut self, op: &str, target: &str, detail: impl Into<String>) -> Result<()> {
        if let Some(errno) = self.faults.get(&(op.to_string(), target.to_string())) {
            return Err(Error::os(
                *errno,
                format!("{} on {} failed: injected fault", op, target),
            ));
        }

        self.mutations.push(Mutation {
            op: op.to_string(),
            target: target.to_string(),
            detail: detail.into(),
        });
        Ok(())
    }

    fn allocate_mac(&mut self) -> [u8; 6] {
        self.next_mac += 1;
        let n = self.next_mac.to_be_bytes();
        [0x02, 0x00, n[0], n[1], n[2], n[3]]
    }

    fn lagg_owner(&self, port: &str) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|i| i.lagg_ports.iter().any(|p| p == port))
            .map(|i| i.name.as_str())
    }

    fn bridge_owner(&self, member: &str) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|i| i.bridge_members.iter().any(|m| m == member))
            .map(|i| i.name.as_str())
    }

    fn route_interface(&self, gateway: IpAddr) -> Option<String> {
        self.interfaces
            .iter()
            .find(|i| {
                i.addresses
                    .iter()
                    .filter_map(|a| a.network())
                    .any(|net| net.contains(&gateway))
            })
            .map(|i| i.name.clone())
    }
}

/// Simulated kernel network stack
pub struct MemoryKernel {
    state: Mutex<KernelState>,
    events: broadcast::Sender<RoutingMessage>,
}

impl MemoryKernel {
    /// Create a kernel with only a loopback interface
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let kernel = Self {
            state: Mutex::new(KernelState::default()),
            events,
        };

        let mut lo = KernelInterface::new("lo0", InterfaceType::Loopback);
        lo.flags.insert(InterfaceFlag::Up);
        lo.addresses.push(Alias::new(IpAddr::from([127, 0, 0, 1]), 8));
        kernel.lock().interfaces.push(lo);
        kernel
    }

    /// Create a kernel with loopback plus the given physical interfaces
    ///
    /// Interfaces get a unique link address and an UP link state.
    pub fn with_interfaces(names: &[&str]) -> Self {
        let kernel = Self::new();
        for name in names {
            kernel.insert_interface(
                KernelInterface::new(*name, InterfaceType::Ether).with_link_state(LinkState::Up),
            );
        }
        kernel
    }

    fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, message: RoutingMessage) {
        // No subscribers is fine
        let _ = self.events.send(message);
    }

    fn info_message(iface: &KernelInterface) -> RoutingMessage {
        RoutingMessage::InterfaceInfo {
            interface: iface.name.clone(),
            mtu: iface.mtu,
            flags: iface.flags.clone(),
            link_state: iface.link_state,
        }
    }

    fn address_message(name: &str, action: AddressAction, alias: &Alias) -> RoutingMessage {
        RoutingMessage::Address {
            interface: name.to_string(),
            action,
            address: Some(alias.address),
            prefix_len: alias.prefix_len,
            dest_address: alias.dest_address,
        }
    }

    fn route_message(action: RouteAction, route: &Route) -> RoutingMessage {
        RoutingMessage::Route {
            action,
            route: route.clone(),
            errno: 0,
        }
    }

    /// Add an interface without publishing anything (test setup)
    ///
    /// Ethernet interfaces without a link address get a generated one.
    pub fn insert_interface(&self, mut iface: KernelInterface) {
        let mut state = self.lock();
        if iface.link_address.is_none() && iface.kind != InterfaceType::Loopback {
            iface.link_address = Some(state.allocate_mac());
        }
        state.interfaces.retain(|i| i.name != iface.name);
        state.interfaces.push(iface);
    }

    /// Add a route without publishing or logging anything (test setup)
    pub fn insert_route(&self, route: Route) {
        let mut state = self.lock();
        state.routes.retain(|r| r.destination != route.destination);
        state.routes.push(route);
    }

    /// Hot-plug an interface and announce its arrival
    pub fn plug(&self, iface: KernelInterface) {
        let name = iface.name.clone();
        self.insert_interface(iface);
        self.publish(RoutingMessage::Announce {
            interface: name,
            kind: AnnounceKind::Arrival,
        });
    }

    /// Unplug an interface and announce its departure
    pub fn unplug(&self, name: &str) {
        {
            let mut state = self.lock();
            state.interfaces.retain(|i| i.name != name);
            state.routes.retain(|r| r.interface.as_deref() != Some(name));
        }
        self.publish(RoutingMessage::Announce {
            interface: name.to_string(),
            kind: AnnounceKind::Departure,
        });
    }

    /// Change the physical link state and publish interface info
    pub fn set_link_state(&self, name: &str, link_state: LinkState) {
        let message = {
            let mut state = self.lock();
            match state.get_mut(name) {
                Ok(iface) => {
                    iface.link_state = link_state;
                    Self::info_message(iface)
                }
                Err(_) => return,
            }
        };
        self.publish(message);
    }

    /// Publish an arbitrary routing message
    pub fn inject(&self, message: RoutingMessage) {
        self.publish(message);
    }

    /// Make `op` on `target` fail with `errno` until cleared
    pub fn fail_on(&self, op: &str, target: &str, errno: i32) {
        self.lock()
            .faults
            .insert((op.to_string(), target.to_string()), errno);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Every mutation applied so far, in order
    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.lock().mutations.len()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    /// Snapshot of one interface
    pub fn interface(&self, name: &str) -> Option<KernelInterface> {
        self.lock().get(name).cloned()
    }

    /// Addresses currently on `name`
    pub fn addresses(&self, name: &str) -> Vec<Alias> {
        self.interface(name)
            .map(|i| i.addresses)
            .unwrap_or_default()
    }

    /// Current routing table
    pub fn route_table(&self) -> Vec<Route> {
        self.lock().routes.clone()
    }

    /// Current IPv4 default route
    pub fn default_route_v4(&self) -> Option<Route> {
        self.lock()
            .routes
            .iter()
            .find(|r| r.is_default() && r.is_ipv4())
            .cloned()
    }
}

impl Default for MemoryKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KernelNetwork for MemoryKernel {
    async fn list_interfaces(&self) -> Result<Vec<KernelInterface>> {
        Ok(self.lock().interfaces.clone())
    }

    async fn get_interface(&self, name: &str) -> Result<Option<KernelInterface>> {
        Ok(self.lock().get(name).cloned())
    }

    async fn create_interface(&self, name: &str) -> Result<()> {
        let kind = if name.starts_with("vlan") {
            InterfaceType::Vlan
        } else if name.starts_with("lagg") {
            InterfaceType::Lagg
        } else if name.starts_with("bridge") {
            InterfaceType::Bridge
        } else {
            return Err(Error::os(
                libc::EINVAL,
                format!("Cannot create interface {}: unknown clone type", name),
            ));
        };

        {
            let mut state = self.lock();
            if state.get(name).is_some() {
                return Err(Error::os(libc::EEXIST, format!("Interface {} exists", name)));
            }
            state.mutate("create_interface", name, "")?;
            let mac = state.allocate_mac();
            state
                .interfaces
                .push(KernelInterface::new(name, kind).with_link_address(mac));
        }

        debug!("Created interface {}", name);
        self.publish(RoutingMessage::Announce {
            interface: name.to_string(),
            kind: AnnounceKind::Arrival,
        });
        Ok(())
    }

    async fn destroy_interface(&self, name: &str) -> Result<()> {
        {
            let mut state = self.lock();
            let iface = state.get_mut(name)?;
            if !iface.cloned {
                return Err(Error::os(
                    libc::EINVAL,
                    format!("Interface {} is not a cloned interface", name),
                ));
            }
            state.mutate("destroy_interface", name, "")?;
            state.interfaces.retain(|i| i.name != name);
            state.routes.retain(|r| r.interface.as_deref() != Some(name));
        }

        self.publish(RoutingMessage::Announce {
            interface: name.to_string(),
            kind: AnnounceKind::Departure,
        });
        Ok(())
    }

    async fn set_up(&self, name: &str, up: bool) -> Result<()> {
        let message = {
            let mut state = self.lock();
            state.get_mut(name)?;
            state.mutate("set_up", name, if up { "up" } else { "down" })?;
            let iface = state.get_mut(name)?;
            if up {
                iface.flags.insert(InterfaceFlag::Up);
                iface.flags.insert(InterfaceFlag::Running);
            } else {
                iface.flags.remove(&InterfaceFlag::Up);
                iface.flags.remove(&InterfaceFlag::Running);
            }
            Self::info_message(iface)
        };
        self.publish(message);
        Ok(())
    }

    async fn add_address(&self, name: &str, alias: &Alias) -> Result<()> {
        let connected = {
            let mut state = self.lock();
            if state.get_mut(name)?.addresses.contains(alias) {
                return Err(Error::os(
                    libc::EEXIST,
                    format!("Address {} already assigned to {}", alias, name),
                ));
            }
            state.mutate("add_address", name, alias.to_string())?;
            state.get_mut(name)?.addresses.push(alias.clone());

            let connected = alias.network().and_then(|net| {
                if state.routes.iter().any(|r| r.destination == net) {
                    None
                } else {
                    let mut route = Route::new(net, None).with_interface(name);
                    route.flags.clear();
                    state.routes.push(route.clone());
                    Some(route)
                }
            });
            connected
        };

        self.publish(Self::address_message(name, AddressAction::NewAddr, alias));
        if let Some(route) = connected {
            self.publish(Self::route_message(RouteAction::Add, &route));
        }
        Ok(())
    }

    async fn remove_address(&self, name: &str, alias: &Alias) -> Result<()> {
        let removed_routes = {
            let mut state = self.lock();
            if !state.get_mut(name)?.addresses.contains(alias) {
                return Err(Error::os(
                    libc::EADDRNOTAVAIL,
                    format!("Address {} not assigned to {}", alias, name),
                ));
            }
            state.mutate("remove_address", name, alias.to_string())?;
            state.get_mut(name)?.addresses.retain(|a| a != alias);

            let mut removed = Vec::new();
            if let Some(net) = alias.network() {
                let still_connected = state
                    .get(name)
                    .map(|i| i.addresses.iter().any(|a| a.network() == Some(net)))
                    .unwrap_or(false);
                if !still_connected {
                    state.routes.retain(|r| {
                        let connected = r.destination == net
                            && r.gateway.is_none()
                            && r.interface.as_deref() == Some(name);
                        if connected {
                            removed.push(r.clone());
                        }
                        !connected
                    });
                }
            }
            removed
        };

        self.publish(Self::address_message(name, AddressAction::DelAddr, alias));
        for route in removed_routes {
            self.publish(Self::route_message(RouteAction::Delete, &route));
        }
        Ok(())
    }

    async fn set_mtu(&self, name: &str, mtu: u32) -> Result<()> {
        if !(68..=65535).contains(&mtu) {
            return Err(Error::os(libc::EINVAL, format!("Invalid MTU {}", mtu)));
        }

        let message = {
            let mut state = self.lock();
            state.get_mut(name)?;
            state.mutate("set_mtu", name, mtu.to_string())?;
            let iface = state.get_mut(name)?;
            iface.mtu = mtu;
            Self::info_message(iface)
        };
        self.publish(message);
        Ok(())
    }

    async fn set_media(&self, name: &str, media: &str) -> Result<()> {
        let mut state = self.lock();
        state.get_mut(name)?;
        state.mutate("set_media", name, media)?;
        state.get_mut(name)?.media = Some(media.to_string());
        Ok(())
    }

    async fn set_capabilities(&self, name: &str, capabilities: &BTreeSet<String>) -> Result<()> {
        let mut state = self.lock();
        state.get_mut(name)?;
        let detail = capabilities.iter().cloned().collect::<Vec<_>>().join(",");
        state.mutate("set_capabilities", name, detail)?;
        state.get_mut(name)?.capabilities = capabilities.clone();
        Ok(())
    }

    async fn set_nd6_flags(&self, name: &str, flags: &BTreeSet<Nd6Flag>) -> Result<()> {
        let mut state = self.lock();
        state.get_mut(name)?;
        state.mutate("set_nd6_flags", name, format!("{:?}", flags))?;
        state.get_mut(name)?.nd6_flags = flags.clone();
        Ok(())
    }

    async fn configure_vlan(&self, name: &str, parent: &str, tag: u16) -> Result<()> {
        let mut state = self.lock();
        if state.get(parent).is_none() {
            return Err(Error::os(
                libc::ENXIO,
                format!("VLAN parent {} does not exist", parent),
            ));
        }
        if state.get_mut(name)?.kind != InterfaceType::Vlan {
            return Err(Error::os(libc::EINVAL, format!("{} is not a VLAN", name)));
        }
        state.mutate("configure_vlan", name, format!("{}.{}", parent, tag))?;
        let iface = state.get_mut(name)?;
        iface.vlan_parent = Some(parent.to_string());
        iface.vlan_tag = Some(tag);
        Ok(())
    }

    async fn unconfigure_vlan(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.get_mut(name)?;
        state.mutate("unconfigure_vlan", name, "")?;
        let iface = state.get_mut(name)?;
        iface.vlan_parent = None;
        iface.vlan_tag = None;
        Ok(())
    }

    async fn set_lagg_protocol(&self, name: &str, protocol: LaggProtocol) -> Result<()> {
        let mut state = self.lock();
        state.get_mut(name)?;
        state.mutate("set_lagg_protocol", name, format!("{:?}", protocol))?;
        state.get_mut(name)?.lagg_protocol = Some(protocol);
        Ok(())
    }

    async fn add_lagg_port(&self, name: &str, port: &str) -> Result<()> {
        let mut state = self.lock();
        state.get_mut(name)?;
        if state.get(port).is_none() {
            return Err(Error::os(libc::ENXIO, format!("Port {} does not exist", port)));
        }
        if let Some(owner) = state.lagg_owner(port) {
            return Err(Error::os(
                libc::EBUSY,
                format!("Port {} already belongs to {}", port, owner),
            ));
        }
        state.mutate("add_lagg_port", name, port)?;
        state.get_mut(name)?.lagg_ports.push(port.to_string());
        Ok(())
    }

    async fn delete_lagg_port(&self, name: &str, port: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.get_mut(name)?.lagg_ports.iter().any(|p| p == port) {
            return Err(Error::os(
                libc::ENOENT,
                format!("Port {} is not a member of {}", port, name),
            ));
        }
        state.mutate("delete_lagg_port", name, port)?;
        state.get_mut(name)?.lagg_ports.retain(|p| p != port);
        Ok(())
    }

    async fn add_bridge_member(&self, name: &str, member: &str) -> Result<()> {
        let mut state = self.lock();
        state.get_mut(name)?;
        if state.get(member).is_none() {
            return Err(Error::os(
                libc::ENXIO,
                format!("Member {} does not exist", member),
            ));
        }
        if let Some(owner) = state.bridge_owner(member) {
            return Err(Error::os(
                libc::EBUSY,
                format!("Member {} already belongs to {}", member, owner),
            ));
        }
        state.mutate("add_bridge_member", name, member)?;
        state.get_mut(name)?.bridge_members.push(member.to_string());
        Ok(())
    }

    async fn delete_bridge_member(&self, name: &str, member: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.get_mut(name)?.bridge_members.iter().any(|m| m == member) {
            return Err(Error::os(
                libc::ENOENT,
                format!("Member {} is not a member of {}", member, name),
            ));
        }
        state.mutate("delete_bridge_member", name, member)?;
        state.get_mut(name)?.bridge_members.retain(|m| m != member);
        Ok(())
    }

    async fn routes(&self) -> Result<Vec<Route>> {
        Ok(self.lock().routes.clone())
    }

    async fn add_route(&self, route: &Route) -> Result<()> {
        let route = {
            let mut state = self.lock();
            if state.routes.iter().any(|r| r.destination == route.destination) {
                return Err(Error::os(
                    libc::EEXIST,
                    format!("Route to {} exists", route.destination),
                ));
            }
            state.mutate("add_route", "route", route.describe())?;
            let mut route = route.clone();
            if route.interface.is_none() {
                route.interface = route.gateway.and_then(|gw| state.route_interface(gw));
            }
            state.routes.push(route.clone());
            route
        };

        self.publish(Self::route_message(RouteAction::Add, &route));
        Ok(())
    }

    async fn change_route(&self, route: &Route) -> Result<()> {
        let route = {
            let mut state = self.lock();
            if !state.routes.iter().any(|r| r.destination == route.destination) {
                return Err(Error::os(
                    libc::ESRCH,
                    format!("No route to {}", route.destination),
                ));
            }
            state.mutate("change_route", "route", route.describe())?;
            let mut route = route.clone();
            if route.interface.is_none() {
                route.interface = route.gateway.and_then(|gw| state.route_interface(gw));
            }
            for existing in state.routes.iter_mut() {
                if existing.destination == route.destination {
                    *existing = route.clone();
                }
            }
            route
        };

        self.publish(Self::route_message(RouteAction::Change, &route));
        Ok(())
    }

    async fn delete_route(&self, route: &Route) -> Result<()> {
        let removed = {
            let mut state = self.lock();
            let Some(pos) = state.routes.iter().position(|r| r == route) else {
                return Err(Error::os(
                    libc::ESRCH,
                    format!("No route {}", route.describe()),
                ));
            };
            state.mutate("delete_route", "route", route.describe())?;
            state.routes.remove(pos)
        };

        self.publish(Self::route_message(RouteAction::Delete, &removed));
        Ok(())
    }

    async fn lookup_route(&self, address: IpAddr) -> Result<Option<Route>> {
        let state = self.lock();
        Ok(state
            .routes
            .iter()
            .filter(|r| r.destination.contains(&address))
            .max_by_key(|r| r.destination.prefix_len())
            .cloned())
    }

    fn watch(&self) -> RoutingStream {
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(|message| message.ok());
        Box::pin(stream)
    }
}
