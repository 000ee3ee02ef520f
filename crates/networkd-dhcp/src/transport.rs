// # UDP Transport
//
// One broadcast-capable UDP socket per DHCP client, bound to the client
// port. Every client binds the same port, so the socket is opened with
// SO_REUSEADDR and, where the platform allows it, tied to its device.
// Replies are filtered down to the client's own transaction: a reply must
// carry the xid of the last message sent and the client's hardware address.

use crate::codec;
use async_trait::async_trait;
use networkd_core::dhcp::DhcpMessage;
use networkd_core::traits::{DhcpTransport, DhcpTransportFactory};
use networkd_core::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info};

pub const CLIENT_PORT: u16 = 68;
pub const SERVER_PORT: u16 = 67;

/// Large enough for any unfragmented reply on Ethernet
const RECV_BUFFER: usize = 1500;

fn io_error(context: &str, e: std::io::Error) -> Error {
    Error::os(
        e.raw_os_error().unwrap_or(libc::EIO),
        format!("{}: {}", context, e),
    )
}

/// Opens [`UdpTransport`]s
#[derive(Debug, Clone)]
pub struct UdpTransportFactory {
    /// Local address every transport binds
    pub bind: SocketAddrV4,
    /// Where broadcasts are sent
    pub broadcast: SocketAddrV4,
    /// Port of unicast destinations
    pub server_port: u16,
    /// Tie each socket to its interface
    pub bind_device: bool,
}

impl Default for UdpTransportFactory {
    fn default() -> Self {
        Self {
            bind: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, CLIENT_PORT),
            broadcast: SocketAddrV4::new(Ipv4Addr::BROADCAST, SERVER_PORT),
            server_port: SERVER_PORT,
            bind_device: true,
        }
    }
}

impl UdpTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_socket(&self, interface: &str) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| io_error("Cannot create DHCP socket", e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| io_error("Cannot set SO_REUSEADDR", e))?;
        socket
            .set_broadcast(true)
            .map_err(|e| io_error("Cannot set SO_BROADCAST", e))?;

        if self.bind_device {
            bind_to_device(&socket, interface)?;
        }

        socket
            .bind(&SocketAddr::V4(self.bind).into())
            .map_err(|e| io_error(&format!("Cannot bind DHCP socket to {}", self.bind), e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| io_error("Cannot make DHCP socket non-blocking", e))?;

        UdpSocket::from_std(socket.into()).map_err(|e| io_error("Cannot register DHCP socket", e))
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "fuchsia"))]
fn bind_to_device(socket: &Socket, interface: &str) -> Result<()> {
    socket
        .bind_device(Some(interface.as_bytes()))
        .map_err(|e| io_error(&format!("Cannot bind DHCP socket to {}", interface), e))
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "fuchsia")))]
fn bind_to_device(_socket: &Socket, interface: &str) -> Result<()> {
    debug!("Device binding unsupported, DHCP socket for {} listens on all interfaces", interface);
    Ok(())
}

impl DhcpTransportFactory for UdpTransportFactory {
    fn open(&self, interface: &str, hw_addr: [u8; 6]) -> Result<Arc<dyn DhcpTransport>> {
        let socket = self.open_socket(interface)?;
        info!("Opened DHCP socket on {} ({})", interface, self.bind);

        Ok(Arc::new(UdpTransport {
            interface: interface.to_string(),
            hw_addr,
            socket,
            broadcast: self.broadcast,
            server_port: self.server_port,
            xid: AtomicU32::new(0),
        }))
    }
}

/// UDP transport of one DHCP client
pub struct UdpTransport {
    interface: String,
    hw_addr: [u8; 6],
    socket: UdpSocket,
    broadcast: SocketAddrV4,
    server_port: u16,
    /// Transaction of the last message sent
    xid: AtomicU32,
}

impl UdpTransport {
    /// Decode `packet` if it answers the current transaction
    fn accept(&self, packet: &[u8]) -> Option<DhcpMessage> {
        let message = match codec::decode(packet) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping malformed DHCP packet on {}: {}", self.interface, e);
                return None;
            }
        };

        if !message.answers(self.xid.load(Ordering::SeqCst), &self.hw_addr) {
            debug!(
                "Dropping DHCP {:?} for another transaction on {}",
                message.kind, self.interface
            );
            return None;
        }
        Some(message)
    }
}

#[async_trait]
impl DhcpTransport for UdpTransport {
    async fn send(&self, message: &DhcpMessage, destination: Option<Ipv4Addr>) -> Result<()> {
        let target = match destination {
            Some(server) => SocketAddrV4::new(server, self.server_port),
            None => self.broadcast,
        };

        self.xid.store(message.xid, Ordering::SeqCst);
        let packet = codec::encode(message);
        debug!("Sending DHCP {:?} on {} to {}", message.kind, self.interface, target);

        self.socket
            .send_to(&packet, SocketAddr::V4(target))
            .await
            .map_err(|e| io_error(&format!("Cannot send DHCP message on {}", self.interface), e))?;
        Ok(())
    }

    async fn recv(&self) -> Result<DhcpMessage> {
        let mut buf = [0u8; RECV_BUFFER];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await.map_err(|e| {
                io_error(&format!("Cannot receive DHCP message on {}", self.interface), e)
            })?;

            if let Some(message) = self.accept(&buf[..len]) {
                debug!("DHCP {:?} on {} from {}", message.kind, self.interface, from);
                return Ok(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use networkd_core::dhcp::MessageKind;
    use std::time::Duration;

    const MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

    fn reply(kind: MessageKind, xid: u32, chaddr: [u8; 6]) -> Vec<u8> {
        let mut message = DhcpMessage::new(kind, xid, chaddr);
        message.yiaddr = Ipv4Addr::new(10, 0, 0, 10);
        message.server_id = Some(Ipv4Addr::LOCALHOST);
        codec::encode(&message)
    }

    /// A loopback "server" and a factory pointed at it
    async fn loopback() -> (UdpSocket, UdpTransportFactory) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let SocketAddr::V4(server_addr) = server.local_addr().unwrap() else {
            unreachable!();
        };
        let factory = UdpTransportFactory {
            bind: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            broadcast: server_addr,
            server_port: server_addr.port(),
            bind_device: false,
        };
        (server, factory)
    }

    #[tokio::test]
    async fn test_exchange_filters_foreign_replies() {
        let (server, factory) = loopback().await;
        let transport = factory.open("lo", MAC).unwrap();

        let discover = DhcpMessage::discover(42, MAC, "nas");
        transport.send(&discover, None).await.unwrap();

        let mut buf = [0u8; RECV_BUFFER];
        let (len, client) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(codec::decode(&buf[..len]).unwrap(), discover);

        // Wrong xid, wrong hardware address, garbage, then the real offer
        server.send_to(&reply(MessageKind::Offer, 41, MAC), client).await.unwrap();
        server
            .send_to(&reply(MessageKind::Offer, 42, [9; 6]), client)
            .await
            .unwrap();
        server.send_to(b"not dhcp", client).await.unwrap();
        server.send_to(&reply(MessageKind::Offer, 42, MAC), client).await.unwrap();

        let offer = tokio::time::timeout(Duration::from_secs(5), transport.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(offer.kind, MessageKind::Offer);
        assert_eq!(offer.xid, 42);
        assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 0, 0, 10));
    }

    #[tokio::test]
    async fn test_unicast_goes_to_server_port() {
        let (server, factory) = loopback().await;
        let transport = factory.open("lo", MAC).unwrap();

        let release = DhcpMessage::release(7, MAC, Ipv4Addr::new(10, 0, 0, 10), Ipv4Addr::LOCALHOST);
        transport.send(&release, Some(Ipv4Addr::LOCALHOST)).await.unwrap();

        let mut buf = [0u8; RECV_BUFFER];
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        let received = codec::decode(&buf[..len]).unwrap();
        assert_eq!(received.kind, MessageKind::Release);
        assert_eq!(received.ciaddr, Ipv4Addr::new(10, 0, 0, 10));
    }

    #[test]
    fn test_default_ports() {
        let factory = UdpTransportFactory::new();
        assert_eq!(factory.bind, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68));
        assert_eq!(factory.broadcast, SocketAddrV4::new(Ipv4Addr::BROADCAST, 67));
        assert!(factory.bind_device);
    }
}
