//! DHCP messages as the client state machine sees them
//!
//! The wire encoding lives in the `networkd-dhcp` crate; this is the decoded
//! form exchanged with a [`crate::traits::DhcpTransport`].

use std::net::Ipv4Addr;

/// Options the client asks for: subnet mask, router, DNS, domain name,
/// lease time, T1, T2
pub const DEFAULT_PARAMETER_REQUEST_LIST: [u8; 7] = [1, 3, 6, 15, 51, 58, 59];

/// DHCP message type (option 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl MessageKind {
    pub fn code(&self) -> u8 {
        match self {
            MessageKind::Discover => 1,
            MessageKind::Offer => 2,
            MessageKind::Request => 3,
            MessageKind::Decline => 4,
            MessageKind::Ack => 5,
            MessageKind::Nak => 6,
            MessageKind::Release => 7,
            MessageKind::Inform => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MessageKind::Discover),
            2 => Some(MessageKind::Offer),
            3 => Some(MessageKind::Request),
            4 => Some(MessageKind::Decline),
            5 => Some(MessageKind::Ack),
            6 => Some(MessageKind::Nak),
            7 => Some(MessageKind::Release),
            8 => Some(MessageKind::Inform),
            _ => None,
        }
    }
}

/// A decoded DHCP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    pub kind: MessageKind,
    pub xid: u32,
    pub chaddr: [u8; 6],
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    /// Ask the server to broadcast its reply
    pub broadcast: bool,
    pub requested_ip: Option<Ipv4Addr>,
    pub server_id: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub routers: Vec<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub hostname: Option<String>,
    pub lease_time: Option<u32>,
    pub renewal_time: Option<u32>,
    pub rebinding_time: Option<u32>,
    /// Server message (option 56), usually the NAK reason
    pub message: Option<String>,
    pub parameter_request_list: Vec<u8>,
    pub client_id: Option<Vec<u8>>,
}

impl DhcpMessage {
    pub fn new(kind: MessageKind, xid: u32, chaddr: [u8; 6]) -> Self {
        Self {
            kind,
            xid,
            chaddr,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            broadcast: false,
            requested_ip: None,
            server_id: None,
            subnet_mask: None,
            routers: Vec::new(),
            dns_servers: Vec::new(),
            domain_name: None,
            hostname: None,
            lease_time: None,
            renewal_time: None,
            rebinding_time: None,
            message: None,
            parameter_request_list: Vec::new(),
            client_id: None,
        }
    }

    fn client_request(kind: MessageKind, xid: u32, chaddr: [u8; 6], hostname: &str) -> Self {
        let mut msg = Self::new(kind, xid, chaddr);
        msg.broadcast = true;
        msg.parameter_request_list = DEFAULT_PARAMETER_REQUEST_LIST.to_vec();
        if !hostname.is_empty() {
            msg.hostname = Some(hostname.to_string());
        }
        let mut client_id = vec![1u8];
        client_id.extend_from_slice(&chaddr);
        msg.client_id = Some(client_id);
        msg
    }

    /// DHCPDISCOVER
    pub fn discover(xid: u32, chaddr: [u8; 6], hostname: &str) -> Self {
        Self::client_request(MessageKind::Discover, xid, chaddr, hostname)
    }

    /// DHCPREQUEST answering an offer (SELECTING)
    pub fn request_offer(xid: u32, chaddr: [u8; 6], hostname: &str, offer: &DhcpMessage) -> Self {
        let mut msg = Self::client_request(MessageKind::Request, xid, chaddr, hostname);
        msg.requested_ip = Some(offer.yiaddr);
        msg.server_id = offer.server_id;
        msg
    }

    /// DHCPREQUEST verifying a remembered address (INIT-REBOOT)
    pub fn request_reboot(xid: u32, chaddr: [u8; 6], hostname: &str, address: Ipv4Addr) -> Self {
        let mut msg = Self::client_request(MessageKind::Request, xid, chaddr, hostname);
        msg.requested_ip = Some(address);
        msg
    }

    /// DHCPREQUEST extending a bound lease (RENEWING / REBINDING)
    pub fn request_renew(xid: u32, chaddr: [u8; 6], hostname: &str, address: Ipv4Addr) -> Self {
        let mut msg = Self::client_request(MessageKind::Request, xid, chaddr, hostname);
        msg.ciaddr = address;
        msg.broadcast = false;
        msg
    }

    /// DHCPRELEASE
    pub fn release(xid: u32, chaddr: [u8; 6], address: Ipv4Addr, server: Ipv4Addr) -> Self {
        let mut msg = Self::new(MessageKind::Release, xid, chaddr);
        msg.ciaddr = address;
        msg.server_id = Some(server);
        msg
    }

    /// Whether this is a server reply to our transaction
    pub fn answers(&self, xid: u32, chaddr: &[u8; 6]) -> bool {
        self.xid == xid
            && &self.chaddr == chaddr
            && matches!(
                self.kind,
                MessageKind::Offer | MessageKind::Ack | MessageKind::Nak
            )
    }
}
