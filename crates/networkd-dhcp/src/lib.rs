// # networkd-dhcp
//
// The network side of the DHCP client: the BOOTP/DHCP wire codec and a UDP
// transport the protocol state machine in `networkd-core` speaks through.
//
// ## Usage
//
// ```ignore
// let transports = Arc::new(UdpTransportFactory::new());
// let clients = ProtocolClientFactory::new(kernel, transports, config.dhcp_client.clone());
// ```

pub mod codec;
pub mod transport;

pub use codec::{decode, encode, CodecError};
pub use transport::{UdpTransport, UdpTransportFactory, CLIENT_PORT, SERVER_PORT};
