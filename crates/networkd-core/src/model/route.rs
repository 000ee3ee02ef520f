//! Routing table entries

use super::address::Netmask;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteFlag {
    Static,
    Host,
    Gateway,
}

/// A routing table entry
///
/// Identity is `(destination, gateway)`: two entries that differ only in
/// owning interface or flags are the same route for set-difference purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Destination network; the prefix length carries the netmask
    pub destination: IpNet,
    /// Next hop; `None` for link (interface) routes
    #[serde(default)]
    pub gateway: Option<IpAddr>,
    /// Owning interface
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub flags: BTreeSet<RouteFlag>,
}

impl Route {
    pub fn new(destination: IpNet, gateway: Option<IpAddr>) -> Self {
        let mut flags = BTreeSet::new();
        flags.insert(RouteFlag::Static);
        if destination.prefix_len() == destination.max_prefix_len() {
            flags.insert(RouteFlag::Host);
        }
        if gateway.is_some() {
            flags.insert(RouteFlag::Gateway);
        }

        Self {
            destination: destination.trunc(),
            gateway,
            interface: None,
            flags,
        }
    }

    /// Default route via `gateway`, in the gateway's address family
    pub fn default_via(gateway: IpAddr) -> Self {
        let destination = match gateway {
            IpAddr::V4(_) => default_network_v4(),
            IpAddr::V6(_) => default_network_v6(),
        };

        let mut flags = BTreeSet::new();
        flags.insert(RouteFlag::Static);
        flags.insert(RouteFlag::Gateway);

        Self {
            destination,
            gateway: Some(gateway),
            interface: None,
            flags,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn is_default(&self) -> bool {
        self.destination.prefix_len() == 0
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self.destination, IpNet::V4(_))
    }

    /// Human readable `network/prefix via gateway`
    pub fn describe(&self) -> String {
        match self.gateway {
            Some(gw) => format!("{} via {}", self.destination, gw),
            None => match &self.interface {
                Some(iface) => format!("{} via {}", self.destination, iface),
                None => self.destination.to_string(),
            },
        }
    }
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.destination == other.destination && self.gateway == other.gateway
    }
}

impl Eq for Route {}

impl Hash for Route {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.destination.hash(state);
        self.gateway.hash(state);
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

pub const DEFAULT_NET_V4: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::UNSPECIFIED, 0);
pub const DEFAULT_NET_V6: Ipv6Net = Ipv6Net::new_assert(Ipv6Addr::UNSPECIFIED, 0);

pub fn default_network_v4() -> IpNet {
    IpNet::V4(DEFAULT_NET_V4)
}

pub fn default_network_v6() -> IpNet {
    IpNet::V6(DEFAULT_NET_V6)
}

/// A static route as stored in the desired-state source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    #[serde(default)]
    pub id: Option<String>,
    /// Network address, or `"default"`
    pub network: String,
    #[serde(default = "default_route_netmask")]
    pub netmask: Netmask,
    #[serde(default)]
    pub gateway: Option<IpAddr>,
    #[serde(default)]
    pub interface: Option<String>,
}

impl RouteConfig {
    /// Convert to a routing table entry
    pub fn to_route(&self) -> crate::Result<Route> {
        let destination = if self.network == "default" {
            match self.gateway {
                Some(IpAddr::V6(_)) => default_network_v6(),
                _ => default_network_v4(),
            }
        } else {
            let address: IpAddr = self.network.parse().map_err(|_| {
                crate::Error::invalid_argument(format!("Invalid route network {}", self.network))
            })?;
            let prefix = self.netmask.prefix_len(address.is_ipv4())?;
            IpNet::new(address, prefix)
                .map_err(|e| crate::Error::invalid_argument(e.to_string()))?
        };

        let mut route = Route::new(destination, self.gateway);
        route.interface = self.interface.clone();
        Ok(route)
    }
}

fn default_route_netmask() -> Netmask {
    Netmask::Prefix(0)
}
