//! Collaborator traits
//!
//! The core drives every external collaborator through one of these:
//!
//! - [`KernelNetwork`]: OS network primitives and the notification stream
//! - [`DesiredStateStore`]: Declarative configuration records
//! - [`Resolver`]: Resolver list tooling
//! - [`Dispatcher`]: RPC / event bus
//! - [`DhcpClient`] and friends: DHCP protocol clients and their transports

pub mod dhcp;
pub mod dispatch;
pub mod kernel;
pub mod resolver;
pub mod store;

pub use dhcp::{DhcpClient, DhcpClientFactory, DhcpTransport, DhcpTransportFactory, LeaseObserver};
pub use dispatch::Dispatcher;
pub use kernel::{KernelNetwork, RoutingStream};
pub use resolver::{Resolver, ResolverConfig, LOOPBACK_SOURCE};
pub use store::DesiredStateStore;
