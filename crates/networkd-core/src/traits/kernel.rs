// # Kernel Network Capability
//
// The OS-level network primitives the daemon drives: interface enumeration,
// address and route mutation, clone management, and the kernel notification
// stream.
//
// ## Implementations
//
// - `MemoryKernel`: simulated kernel used by tests and the simulation backend
// - A routing-socket binding provides the same surface on the appliance

use crate::model::{Alias, KernelInterface, LaggProtocol, Nd6Flag, Route, RoutingMessage};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::pin::Pin;
use tokio_stream::Stream;

/// Stream of raw kernel notifications
pub type RoutingStream = Pin<Box<dyn Stream<Item = RoutingMessage> + Send + 'static>>;

/// Trait for the kernel network capability
///
/// Every mutation returns `Error::Os` carrying the kernel's errno when it
/// fails. Operations on an interface that does not exist fail with
/// `Error::Os { errno: ENXIO, .. }`.
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from the service loop, the
/// event monitor and DHCP client tasks.
#[async_trait]
pub trait KernelNetwork: Send + Sync {
    /// Snapshot of every interface, in kernel enumeration order
    async fn list_interfaces(&self) -> Result<Vec<KernelInterface>>;

    /// Snapshot of one interface
    ///
    /// # Returns
    ///
    /// - `Ok(Some(KernelInterface))`: The interface exists
    /// - `Ok(None)`: No such interface
    /// - `Err(Error)`: The kernel could not be queried
    async fn get_interface(&self, name: &str) -> Result<Option<KernelInterface>>;

    /// Create a cloned interface (`vlanN`, `laggN`, `bridgeN`)
    async fn create_interface(&self, name: &str) -> Result<()>;

    /// Destroy a cloned interface
    async fn destroy_interface(&self, name: &str) -> Result<()>;

    /// Set or clear the administrative UP flag
    async fn set_up(&self, name: &str, up: bool) -> Result<()>;

    async fn add_address(&self, name: &str, alias: &Alias) -> Result<()>;

    async fn remove_address(&self, name: &str, alias: &Alias) -> Result<()>;

    async fn set_mtu(&self, name: &str, mtu: u32) -> Result<()>;

    /// Set the media subtype (e.g. `1000baseT`)
    async fn set_media(&self, name: &str, media: &str) -> Result<()>;

    /// Replace the enabled capability set
    async fn set_capabilities(&self, name: &str, capabilities: &BTreeSet<String>) -> Result<()>;

    /// Replace the IPv6 neighbor discovery flag set
    async fn set_nd6_flags(&self, name: &str, flags: &BTreeSet<Nd6Flag>) -> Result<()>;

    /// Attach a VLAN interface to its parent with the given tag
    async fn configure_vlan(&self, name: &str, parent: &str, tag: u16) -> Result<()>;

    /// Detach a VLAN interface from its parent
    async fn unconfigure_vlan(&self, name: &str) -> Result<()>;

    async fn set_lagg_protocol(&self, name: &str, protocol: LaggProtocol) -> Result<()>;

    async fn add_lagg_port(&self, name: &str, port: &str) -> Result<()>;

    async fn delete_lagg_port(&self, name: &str, port: &str) -> Result<()>;

    async fn add_bridge_member(&self, name: &str, member: &str) -> Result<()>;

    async fn delete_bridge_member(&self, name: &str, member: &str) -> Result<()>;

    /// Full routing table
    async fn routes(&self) -> Result<Vec<Route>>;

    async fn add_route(&self, route: &Route) -> Result<()>;

    /// Replace the route with the same destination
    async fn change_route(&self, route: &Route) -> Result<()>;

    async fn delete_route(&self, route: &Route) -> Result<()>;

    /// Longest-prefix match for `address`
    async fn lookup_route(&self, address: IpAddr) -> Result<Option<Route>>;

    /// Open the kernel notification stream
    ///
    /// The stream yields every interface announce, interface info, address
    /// and route message from the moment it is opened. It never terminates
    /// under normal conditions; dropping it closes the underlying socket.
    fn watch(&self) -> RoutingStream;
}
