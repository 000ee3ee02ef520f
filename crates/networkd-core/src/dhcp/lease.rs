//! DHCP leases and client protocol states

use super::message::DhcpMessage;
use crate::model::Alias;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Lease time assumed when the server sends none
const DEFAULT_LEASE_SECS: u32 = 3600;

/// RFC 2131 client states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientState {
    #[default]
    Init,
    Selecting,
    Requesting,
    InitReboot,
    Rebooting,
    Bound,
    Renewing,
    Rebinding,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Init => "INIT",
            ClientState::Selecting => "SELECTING",
            ClientState::Requesting => "REQUESTING",
            ClientState::InitReboot => "INIT_REBOOT",
            ClientState::Rebooting => "REBOOTING",
            ClientState::Bound => "BOUND",
            ClientState::Renewing => "RENEWING",
            ClientState::Rebinding => "REBINDING",
        };
        f.write_str(name)
    }
}

/// Why a bound lease went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnbindReason {
    Expire,
    Revoke,
}

impl fmt::Display for UnbindReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnbindReason::Expire => f.write_str("expired"),
            UnbindReason::Revoke => f.write_str("revoked"),
        }
    }
}

/// The result of a successful DHCP exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub client_ip: Ipv4Addr,
    pub prefix_len: u8,
    pub server_address: Ipv4Addr,
    pub router: Option<Ipv4Addr>,
    pub dns_addresses: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    /// Validity in seconds
    pub lifetime: u32,
    /// Renewal time (T1) in seconds
    pub t1: u32,
    /// Rebinding time (T2) in seconds
    pub t2: u32,
    pub obtained_at: DateTime<Utc>,
}

impl Lease {
    /// Build a lease from a DHCPACK
    ///
    /// Fails if the ACK carries no address or no server identifier.
    pub fn from_ack(ack: &DhcpMessage) -> crate::Result<Self> {
        if ack.yiaddr.is_unspecified() {
            return Err(crate::Error::ProtocolRejected(
                "ACK without an assigned address".to_string(),
            ));
        }

        let server_address = ack.server_id.ok_or_else(|| {
            crate::Error::ProtocolRejected("ACK without a server identifier".to_string())
        })?;

        let prefix_len = match ack.subnet_mask {
            Some(mask) => ipnet::ipv4_mask_to_prefix(mask).unwrap_or(24),
            None => classful_prefix(ack.yiaddr),
        };

        let lifetime = ack.lease_time.unwrap_or(DEFAULT_LEASE_SECS);
        let t1 = ack.renewal_time.unwrap_or(lifetime / 2);
        let t2 = ack.rebinding_time.unwrap_or(lifetime / 8 * 7);

        Ok(Self {
            client_ip: ack.yiaddr,
            prefix_len,
            server_address,
            router: ack.routers.first().copied(),
            dns_addresses: ack.dns_servers.clone(),
            domain_name: ack.domain_name.clone(),
            lifetime,
            t1: t1.min(t2),
            t2: t2.min(lifetime),
            obtained_at: Utc::now(),
        })
    }

    /// Kernel alias for the leased address
    pub fn client_alias(&self) -> Alias {
        Alias::new(IpAddr::V4(self.client_ip), self.prefix_len)
    }

    pub fn renewal_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.t1))
    }

    pub fn rebinding_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.t2))
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(u64::from(self.lifetime))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.obtained_at + chrono::Duration::seconds(i64::from(self.lifetime))
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    /// DNS servers worth handing to the resolver
    ///
    /// Loopback, broadcast and all-zero addresses are dropped.
    pub fn usable_dns_addresses(&self) -> Vec<Ipv4Addr> {
        self.dns_addresses
            .iter()
            .copied()
            .filter(|a| !a.is_loopback() && !a.is_broadcast() && !a.is_unspecified())
            .collect()
    }
}

fn classful_prefix(addr: Ipv4Addr) -> u8 {
    match addr.octets()[0] {
        0..=127 => 8,
        128..=191 => 16,
        _ => 24,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhcp::MessageKind;

    fn ack() -> DhcpMessage {
        let mut ack = DhcpMessage::new(MessageKind::Ack, 7, [0, 1, 2, 3, 4, 5]);
        ack.yiaddr = Ipv4Addr::new(192, 168, 1, 50);
        ack.server_id = Some(Ipv4Addr::new(192, 168, 1, 1));
        ack.subnet_mask = Some(Ipv4Addr::new(255, 255, 255, 0));
        ack.routers = vec![Ipv4Addr::new(192, 168, 1, 1)];
        ack.lease_time = Some(7200);
        ack
    }

    #[test]
    fn test_lease_from_ack() {
        let lease = Lease::from_ack(&ack()).unwrap();
        assert_eq!(lease.prefix_len, 24);
        assert_eq!(lease.router, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(lease.t1, 3600);
        assert_eq!(lease.t2, 6300);
        assert_eq!(lease.client_alias().to_string(), "192.168.1.50/24");
    }

    #[test]
    fn test_ack_without_server_id_is_rejected() {
        let mut ack = ack();
        ack.server_id = None;
        assert!(Lease::from_ack(&ack).is_err());
    }

    #[test]
    fn test_bogus_dns_addresses_filtered() {
        let mut ack = ack();
        ack.dns_servers = vec![
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(8, 8, 8, 8),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
        ];
        let lease = Lease::from_ack(&ack).unwrap();
        assert_eq!(lease.usable_dns_addresses(), vec![Ipv4Addr::new(8, 8, 8, 8)]);
    }
}
