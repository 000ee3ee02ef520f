//! Desired interface records

use super::address::{Alias, AliasConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Interface type as stored in desired-state records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InterfaceType {
    Ether,
    Loopback,
    Vlan,
    Lagg,
    Bridge,
}

impl InterfaceType {
    /// Whether interfaces of this type are created on demand
    pub fn is_cloned(&self) -> bool {
        matches!(
            self,
            InterfaceType::Vlan | InterfaceType::Lagg | InterfaceType::Bridge
        )
    }

    /// Prefix of synthesized clone names
    pub fn clone_prefix(&self) -> Option<&'static str> {
        match self {
            InterfaceType::Vlan => Some("vlan"),
            InterfaceType::Lagg => Some("lagg"),
            InterfaceType::Bridge => Some("bridge"),
            InterfaceType::Ether | InterfaceType::Loopback => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Ether => "ETHER",
            InterfaceType::Loopback => "LOOPBACK",
            InterfaceType::Vlan => "VLAN",
            InterfaceType::Lagg => "LAGG",
            InterfaceType::Bridge => "BRIDGE",
        }
    }
}

impl std::str::FromStr for InterfaceType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ETHER" => Ok(InterfaceType::Ether),
            "LOOPBACK" => Ok(InterfaceType::Loopback),
            "VLAN" => Ok(InterfaceType::Vlan),
            "LAGG" => Ok(InterfaceType::Lagg),
            "BRIDGE" => Ok(InterfaceType::Bridge),
            other => Err(crate::Error::invalid_argument(format!(
                "Invalid type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability names to add to / remove from the kernel's current set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub del: Vec<String>,
}

impl CapabilityConfig {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.del.is_empty()
    }

    /// `current + add - del`
    pub fn apply(&self, current: &BTreeSet<String>) -> BTreeSet<String> {
        let mut caps = current.clone();
        caps.extend(self.add.iter().cloned());
        for cap in &self.del {
            caps.remove(cap);
        }
        caps
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanConfig {
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub tag: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaggConfig {
    #[serde(default)]
    pub protocol: LaggProtocol,
    #[serde(default)]
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub members: Vec<String>,
}

/// Link aggregation protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LaggProtocol {
    None,
    RoundRobin,
    #[default]
    Failover,
    Loadbalance,
    Lacp,
    Ethernet,
}

/// Desired configuration of one interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Kernel name or clone name
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub cloned: bool,

    #[serde(rename = "type", default = "default_type")]
    pub kind: InterfaceType,

    /// Address assignment through DHCP; supersedes `aliases` while set
    #[serde(default)]
    pub dhcp: bool,

    /// Accept IPv6 router advertisements
    #[serde(default)]
    pub rtadv: bool,

    #[serde(default)]
    pub noipv6: bool,

    #[serde(default)]
    pub mtu: Option<u32>,

    #[serde(default)]
    pub media: Option<String>,

    #[serde(default)]
    pub mediaopts: Vec<String>,

    #[serde(default)]
    pub aliases: Vec<AliasConfig>,

    #[serde(default)]
    pub capabilities: CapabilityConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<VlanConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lagg: Option<LaggConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeConfig>,
}

impl InterfaceConfig {
    /// Create a disabled record with no addresses
    pub fn new(id: impl Into<String>, kind: InterfaceType) -> Self {
        Self {
            id: id.into(),
            name: None,
            enabled: false,
            cloned: kind.is_cloned(),
            kind,
            dhcp: false,
            rtadv: false,
            noipv6: false,
            mtu: None,
            media: None,
            mediaopts: Vec::new(),
            aliases: Vec::new(),
            capabilities: CapabilityConfig::default(),
            vlan: None,
            lagg: None,
            bridge: None,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_dhcp(mut self, dhcp: bool) -> Self {
        self.dhcp = dhcp;
        self
    }

    pub fn with_alias(mut self, alias: AliasConfig) -> Self {
        self.aliases.push(alias);
        self
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Desired aliases in kernel form
    ///
    /// Entries that do not convert are reported and skipped.
    pub fn desired_aliases(&self) -> (Vec<Alias>, Vec<crate::Error>) {
        let mut aliases = Vec::new();
        let mut errors = Vec::new();
        for config in &self.aliases {
            match config.to_alias() {
                Ok(alias) => aliases.push(alias),
                Err(e) => errors.push(e),
            }
        }
        (aliases, errors)
    }
}

fn default_type() -> InterfaceType {
    InterfaceType::Ether
}

/// Predicate over desired interface records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceFilter {
    All,
    Id(String),
    Kind(InterfaceType),
    Cloned(bool),
    Dhcp(bool),
}

impl InterfaceFilter {
    pub fn matches(&self, record: &InterfaceConfig) -> bool {
        match self {
            InterfaceFilter::All => true,
            InterfaceFilter::Id(id) => &record.id == id,
            InterfaceFilter::Kind(kind) => record.kind == *kind,
            InterfaceFilter::Cloned(cloned) => record.cloned == *cloned,
            InterfaceFilter::Dhcp(dhcp) => record.dhcp == *dhcp,
        }
    }
}
