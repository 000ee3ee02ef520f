// # networkd-core
//
// Core library of the NAS network configuration daemon.
//
// ## Architecture Overview
//
// - **Reconciler**: Converges kernel interfaces, routes and resolver entries
//   toward the desired state
// - **EventMonitor**: Turns the kernel notification stream into semantic
//   events and drives DHCP on link changes
// - **LeaseManager**: One DHCP client per interface, with bind/reject
//   handling
// - **NetworkService**: The operations exposed to the dispatch framework
//
// Every external collaborator (kernel, desired-state store, resolver tool,
// event bus, DHCP transport) sits behind a trait in `traits`; `memory` holds
// in-process implementations of each.

pub mod config;
pub mod context;
pub mod default_iface;
pub mod dhcp;
pub mod error;
pub mod events;
pub mod lease;
pub mod memory;
pub mod model;
pub mod monitor;
pub mod reconcile;
pub mod service;
pub mod traits;

// Re-export core types for convenience
pub use config::DaemonConfig;
pub use context::Context;
pub use default_iface::DefaultInterfaceSignal;
pub use error::{Diagnostic, Error, Result};
pub use events::NetworkEvent;
pub use lease::{LeaseManager, LeaseStatus};
pub use monitor::EventMonitor;
pub use reconcile::Reconciler;
pub use service::{DefaultRoutes, InterfaceStatus, NetworkService};
pub use traits::{
    DesiredStateStore, DhcpClient, DhcpClientFactory, DhcpTransport, DhcpTransportFactory,
    Dispatcher, KernelNetwork, LeaseObserver, Resolver, ResolverConfig,
};
