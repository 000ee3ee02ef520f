//! Global network settings from the desired-state source

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// The `network.*` configuration keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Try DHCP on every eligible interface until one binds
    #[serde(default)]
    pub autoconfigure: bool,

    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub dns: DnsSettings,

    #[serde(default)]
    pub dhcp: DhcpSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default)]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default)]
    pub ipv6: Option<Ipv6Addr>,
}

impl GatewaySettings {
    pub fn ipv4(&self) -> Option<IpAddr> {
        self.ipv4.map(IpAddr::V4)
    }

    pub fn ipv6(&self) -> Option<IpAddr> {
        self.ipv6.map(IpAddr::V6)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsSettings {
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
    #[serde(default)]
    pub search: Vec<String>,
}

/// What a DHCP lease is allowed to configure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpSettings {
    #[serde(default = "default_true")]
    pub assign_gateway: bool,
    #[serde(default = "default_true")]
    pub assign_dns: bool,
}

impl Default for DhcpSettings {
    fn default() -> Self {
        Self {
            assign_gateway: true,
            assign_dns: true,
        }
    }
}

fn default_true() -> bool {
    true
}
