//! Interface addresses (aliases)

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// An address assigned to an interface
///
/// Equality is by value over every field, so alias convergence is a plain
/// set difference between the kernel's aliases and the desired ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alias {
    pub address: IpAddr,
    pub prefix_len: u8,
    /// IPv4 broadcast address; the network broadcast unless overridden
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<Ipv4Addr>,
    /// Remote end of a point-to-point link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_address: Option<IpAddr>,
}

impl Alias {
    /// Create an alias with the broadcast address derived from the prefix
    pub fn new(address: IpAddr, prefix_len: u8) -> Self {
        let broadcast = match address {
            IpAddr::V4(v4) => Ipv4Net::new(v4, prefix_len).ok().map(|n| n.broadcast()),
            IpAddr::V6(_) => None,
        };

        Self {
            address,
            prefix_len,
            broadcast,
            dest_address: None,
        }
    }

    /// The subnet this alias makes locally reachable
    pub fn network(&self) -> Option<IpNet> {
        IpNet::new(self.address, self.prefix_len)
            .ok()
            .map(|net| net.trunc())
    }

    pub fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    /// fe80::/10
    pub fn is_link_local_v6(&self) -> bool {
        match self.address {
            IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
            IpAddr::V4(_) => false,
        }
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// Netmask as stored in desired-state records
///
/// Records carry either a prefix length (`24` or `"24"`) or a dotted mask
/// (`"255.255.255.0"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Netmask {
    Prefix(u8),
    Text(String),
}

impl Netmask {
    /// Resolve to a prefix length, validated against the address family
    pub fn prefix_len(&self, ipv4: bool) -> crate::Result<u8> {
        let max = if ipv4 { 32 } else { 128 };
        let prefix = match self {
            Netmask::Prefix(p) => *p,
            Netmask::Text(text) => {
                let text = text.trim();
                if let Ok(p) = text.parse::<u8>() {
                    p
                } else if let Ok(mask) = text.parse::<IpAddr>() {
                    match mask {
                        IpAddr::V4(m) => ipnet::ipv4_mask_to_prefix(m),
                        IpAddr::V6(m) => ipnet::ipv6_mask_to_prefix(m),
                    }
                    .map_err(|_| {
                        crate::Error::invalid_argument(format!("Non-contiguous netmask {}", text))
                    })?
                } else {
                    return Err(crate::Error::invalid_argument(format!(
                        "Invalid netmask {}",
                        text
                    )));
                }
            }
        };

        if prefix > max {
            return Err(crate::Error::invalid_argument(format!(
                "Prefix length {} out of range",
                prefix
            )));
        }

        Ok(prefix)
    }
}

impl From<u8> for Netmask {
    fn from(prefix: u8) -> Self {
        Netmask::Prefix(prefix)
    }
}

/// An alias as stored in an interface record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasConfig {
    pub address: IpAddr,
    pub netmask: Netmask,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<Ipv4Addr>,
    #[serde(
        default,
        rename = "dest-address",
        alias = "dest_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub dest_address: Option<IpAddr>,
}

impl AliasConfig {
    pub fn new(address: IpAddr, netmask: impl Into<Netmask>) -> Self {
        Self {
            address,
            netmask: netmask.into(),
            broadcast: None,
            dest_address: None,
        }
    }

    /// Convert to the kernel representation
    pub fn to_alias(&self) -> crate::Result<Alias> {
        let prefix = self.netmask.prefix_len(self.address.is_ipv4())?;
        let mut alias = Alias::new(self.address, prefix);
        if self.broadcast.is_some() {
            alias.broadcast = self.broadcast;
        }
        alias.dest_address = self.dest_address;
        Ok(alias)
    }
}
