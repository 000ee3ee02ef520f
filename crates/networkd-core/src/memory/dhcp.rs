// # Memory DHCP Server
//
// An in-process DHCP server reachable through DhcpTransportFactory. Each
// opened transport is a private link between one client and the server:
// messages sent by the client are answered synchronously into the client's
// inbox.
//
// The server can be told to stay silent or to NAK every request, which is
// how rejection and timeout paths are exercised.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use ipnet::Ipv4Net;
use tokio::sync::mpsc;

use crate::dhcp::{DhcpMessage, MessageKind};
use crate::traits::{DhcpTransport, DhcpTransportFactory};
use crate::{Error, Result};

struct ServerState {
    network: Ipv4Net,
    server_id: Ipv4Addr,
    router: Option<Ipv4Addr>,
    dns: Vec<Ipv4Addr>,
    domain: Option<String>,
    lease_time: u32,
    reject: bool,
    silent: bool,
    next_host: u32,
    bindings: HashMap<[u8; 6], Ipv4Addr>,
    received: Vec<MessageKind>,
    released: Vec<Ipv4Addr>,
}

impl ServerState {
    fn allocate(&mut self, hw_addr: [u8; 6]) -> Option<Ipv4Addr> {
        if let Some(addr) = self.bindings.get(&hw_addr) {
            return Some(*addr);
        }

        loop {
            self.next_host += 1;
            let candidate = Ipv4Addr::from(u32::from(self.network.network()) + self.next_host);
            if !self.network.contains(&candidate) || candidate == self.network.broadcast() {
                return None;
            }
            if candidate != self.server_id && !self.bindings.values().any(|a| *a == candidate) {
                self.bindings.insert(hw_addr, candidate);
                return Some(candidate);
            }
        }
    }

    fn reply(&self, kind: MessageKind, request: &DhcpMessage, address: Ipv4Addr) -> DhcpMessage {
        let mut reply = DhcpMessage::new(kind, request.xid, request.chaddr);
        reply.server_id = Some(self.server_id);
        if kind == MessageKind::Nak {
            return reply;
        }

        reply.yiaddr = address;
        reply.subnet_mask = Some(self.network.netmask());
        reply.routers = self.router.into_iter().collect();
        reply.dns_servers = self.dns.clone();
        reply.domain_name = self.domain.clone();
        reply.lease_time = Some(self.lease_time);
        reply
    }

    fn handle(&mut self, request: &DhcpMessage) -> Option<DhcpMessage> {
        self.received.push(request.kind);
        if self.silent {
            return None;
        }

        match request.kind {
            MessageKind::Discover => {
                let address = self.allocate(request.chaddr)?;
                Some(self.reply(MessageKind::Offer, request, address))
            }
            MessageKind::Request => {
                if self.reject {
                    let mut nak = self.reply(MessageKind::Nak, request, Ipv4Addr::UNSPECIFIED);
                    nak.message = Some("request rejected".to_string());
                    return Some(nak);
                }

                if let Some(server) = request.server_id {
                    if server != self.server_id {
                        return None;
                    }
                }

                let wanted = request.requested_ip.unwrap_or(request.ciaddr);
                let bound = self.bindings.get(&request.chaddr).copied();
                match bound {
                    Some(address) if address == wanted => {
                        Some(self.reply(MessageKind::Ack, request, address))
                    }
                    None if self.network.contains(&wanted) => {
                        self.bindings.insert(request.chaddr, wanted);
                        Some(self.reply(MessageKind::Ack, request, wanted))
                    }
                    _ => {
                        let mut nak = self.reply(MessageKind::Nak, request, Ipv4Addr::UNSPECIFIED);
                        nak.message = Some("wrong address".to_string());
                        Some(nak)
                    }
                }
            }
            MessageKind::Release => {
                if self.bindings.remove(&request.chaddr).is_some() {
                    self.released.push(request.ciaddr);
                }
                None
            }
            _ => None,
        }
    }
}

/// In-process DHCP server
#[derive(Clone)]
pub struct MemoryDhcpServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryDhcpServer {
    /// Serve addresses out of `network`; the first host is server, router and DNS
    pub fn new(network: Ipv4Net) -> Self {
        let server_id = Ipv4Addr::from(u32::from(network.network()) + 1);
        Self {
            state: Arc::new(Mutex::new(ServerState {
                network,
                server_id,
                router: Some(server_id),
                dns: vec![server_id],
                domain: None,
                lease_time: 3600,
                reject: false,
                silent: false,
                next_host: 9,
                bindings: HashMap::new(),
                received: Vec::new(),
                released: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_router(self, router: Option<Ipv4Addr>) -> Self {
        self.lock().router = router;
        self
    }

    pub fn with_dns(self, dns: Vec<Ipv4Addr>) -> Self {
        self.lock().dns = dns;
        self
    }

    pub fn with_domain(self, domain: impl Into<String>) -> Self {
        self.lock().domain = Some(domain.into());
        self
    }

    pub fn with_lease_time(self, secs: u32) -> Self {
        self.lock().lease_time = secs;
        self
    }

    /// NAK every request from now on
    pub fn set_reject(&self, reject: bool) {
        self.lock().reject = reject;
    }

    /// Ignore every message from now on
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    pub fn server_id(&self) -> Ipv4Addr {
        self.lock().server_id
    }

    /// Number of received messages of `kind`
    pub fn received(&self, kind: MessageKind) -> usize {
        self.lock().received.iter().filter(|k| **k == kind).count()
    }

    /// Addresses released by clients
    pub fn released(&self) -> Vec<Ipv4Addr> {
        self.lock().released.clone()
    }
}

impl DhcpTransportFactory for MemoryDhcpServer {
    fn open(&self, interface: &str, hw_addr: [u8; 6]) -> Result<Arc<dyn DhcpTransport>> {
        let (inbox, receiver) = mpsc::unbounded_channel();
        Ok(Arc::new(MemoryTransport {
            interface: interface.to_string(),
            hw_addr,
            server: self.clone(),
            inbox,
            receiver: tokio::sync::Mutex::new(receiver),
        }))
    }
}

struct MemoryTransport {
    interface: String,
    hw_addr: [u8; 6],
    server: MemoryDhcpServer,
    inbox: mpsc::UnboundedSender<DhcpMessage>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<DhcpMessage>>,
}

#[async_trait]
impl DhcpTransport for MemoryTransport {
    async fn send(&self, message: &DhcpMessage, _destination: Option<Ipv4Addr>) -> Result<()> {
        let reply = self.server.lock().handle(message);
        if let Some(reply) = reply {
            if reply.chaddr == self.hw_addr {
                let _ = self.inbox.send(reply);
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<DhcpMessage> {
        self.receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::Other(format!("DHCP link on {} closed", self.interface)))
    }
}
