//! Data model shared by the engine, the monitor and the lease manager

mod address;
mod interface;
mod kernel;
mod message;
mod route;
mod settings;

pub use address::{Alias, AliasConfig, Netmask};
pub use interface::{
    BridgeConfig, CapabilityConfig, InterfaceConfig, InterfaceFilter, InterfaceType, LaggConfig,
    LaggProtocol, VlanConfig,
};
pub use kernel::{format_mac, InterfaceFlag, KernelInterface, LinkState, Nd6Flag};
pub use message::{AddressAction, AnnounceKind, RouteAction, RoutingMessage};
pub use route::{default_network_v4, default_network_v6, Route, RouteConfig, RouteFlag};
pub use settings::{DhcpSettings, DnsSettings, GatewaySettings, NetworkSettings};
