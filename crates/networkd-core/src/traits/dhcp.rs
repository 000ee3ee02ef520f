// # DHCP Client Seams
//
// A DHCP client is a long-lived protocol state machine bound to one
// interface. It reports progress through a `LeaseObserver`, the single
// four-method callback interface the lease manager implements per
// interface. Clients speak to the network through a `DhcpTransport`.

use crate::dhcp::{ClientState, DhcpMessage, Lease, UnbindReason};
use crate::Result;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

/// Callbacks of one DHCP client
///
/// Callbacks run on the client's own task. Implementations must not block
/// on the client that invokes them; `DhcpClient::stop` and
/// `DhcpClient::release` are safe to call from inside a callback.
#[async_trait]
pub trait LeaseObserver: Send + Sync {
    /// A lease was bound or renewed
    ///
    /// # Parameters
    ///
    /// - `old`: The previously bound lease, `None` on first bind
    /// - `lease`: The lease now in effect
    async fn on_bind(&self, old: Option<Lease>, lease: Lease);

    /// The lease expired or the server revoked it
    async fn on_unbind(&self, lease: Lease, reason: UnbindReason);

    /// The server rejected the request
    async fn on_reject(&self, reason: String);

    /// The protocol state changed
    async fn on_state_change(&self, state: ClientState);
}

/// Trait for DHCP client implementations
#[async_trait]
pub trait DhcpClient: Send + Sync {
    /// Interface the client is bound to
    fn interface(&self) -> &str;

    /// Start the protocol state machine
    async fn start(&self) -> Result<()>;

    /// Signal the state machine to stop
    ///
    /// Returns without waiting for the client task to finish.
    fn stop(&self);

    /// Release the current lease back to the server (no-op without a lease)
    async fn release(&self) -> Result<()>;

    /// Renew the current lease
    ///
    /// # Returns
    ///
    /// - `Ok(Lease)`: The renewed lease
    /// - `Err(Error::NoLease)`: The client never bound
    /// - `Err(Error::Timeout)`: No answer within `timeout`
    /// - `Err(Error::ProtocolRejected)`: The server refused the renewal
    async fn renew(&self, timeout: Duration) -> Result<Lease>;

    /// Wait for the first bind
    ///
    /// Returns `None` if no lease was bound within `timeout`.
    async fn wait_for_bind(&self, timeout: Duration) -> Option<Lease>;

    /// Currently bound lease
    fn lease(&self) -> Option<Lease>;

    fn state(&self) -> ClientState;

    /// Server the current lease was obtained from
    fn server_address(&self) -> Option<Ipv4Addr>;
}

/// Helper trait for constructing DHCP clients
pub trait DhcpClientFactory: Send + Sync {
    /// Create a stopped client for `interface`
    ///
    /// Every call returns a fresh client with fresh protocol state.
    fn create(
        &self,
        interface: &str,
        hostname: &str,
        observer: Arc<dyn LeaseObserver>,
    ) -> Result<Arc<dyn DhcpClient>>;
}

/// Trait for DHCP message transports
#[async_trait]
pub trait DhcpTransport: Send + Sync {
    /// Send a message
    ///
    /// `destination` is the server to unicast to; `None` broadcasts.
    async fn send(&self, message: &DhcpMessage, destination: Option<Ipv4Addr>) -> Result<()>;

    /// Receive the next message addressed to this client's hardware address
    async fn recv(&self) -> Result<DhcpMessage>;
}

/// Helper trait for opening transports
pub trait DhcpTransportFactory: Send + Sync {
    /// Open a transport on `interface` for a client with hardware address `hw_addr`
    fn open(&self, interface: &str, hw_addr: [u8; 6]) -> Result<Arc<dyn DhcpTransport>>;
}
