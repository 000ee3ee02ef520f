//! In-memory collaborators
//!
//! Used by tests and by the daemon's simulation backend.

pub mod dhcp;
pub mod kernel;
pub mod resolver;
pub mod store;

pub use dhcp::MemoryDhcpServer;
pub use kernel::{MemoryKernel, Mutation};
pub use resolver::MemoryResolver;
pub use store::{MemoryStore, StoreSeed};
