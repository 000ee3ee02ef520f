//! Kernel-side interface snapshot

use super::address::Alias;
use super::interface::{InterfaceType, LaggProtocol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InterfaceFlag {
    Up,
    Broadcast,
    Loopback,
    #[serde(rename = "POINTOPOINT")]
    PointToPoint,
    Running,
    Promisc,
    Multicast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    #[serde(rename = "LINK_STATE_UNKNOWN")]
    Unknown,
    #[serde(rename = "LINK_STATE_DOWN")]
    Down,
    #[serde(rename = "LINK_STATE_UP")]
    Up,
}

/// IPv6 neighbor discovery flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Nd6Flag {
    PerformNud,
    AcceptRtadv,
    IfDisabled,
    AutoLinklocal,
    NoRadr,
}

/// Live state of one kernel interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInterface {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InterfaceType,
    pub cloned: bool,
    pub flags: BTreeSet<InterfaceFlag>,
    pub link_state: LinkState,
    pub mtu: u32,
    #[serde(default)]
    pub link_address: Option<[u8; 6]>,
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub nd6_flags: BTreeSet<Nd6Flag>,
    #[serde(default)]
    pub addresses: Vec<Alias>,
    #[serde(default)]
    pub vlan_parent: Option<String>,
    #[serde(default)]
    pub vlan_tag: Option<u16>,
    #[serde(default)]
    pub lagg_protocol: Option<LaggProtocol>,
    #[serde(default)]
    pub lagg_ports: Vec<String>,
    #[serde(default)]
    pub bridge_members: Vec<String>,
}

impl KernelInterface {
    /// A down interface with no addresses
    pub fn new(name: impl Into<String>, kind: InterfaceType) -> Self {
        let mut flags = BTreeSet::new();
        match kind {
            InterfaceType::Loopback => {
                flags.insert(InterfaceFlag::Loopback);
            }
            _ => {
                flags.insert(InterfaceFlag::Broadcast);
            }
        }
        flags.insert(InterfaceFlag::Multicast);

        let mut nd6_flags = BTreeSet::new();
        nd6_flags.insert(Nd6Flag::PerformNud);
        nd6_flags.insert(Nd6Flag::AutoLinklocal);

        Self {
            name: name.into(),
            kind,
            cloned: kind.is_cloned(),
            flags,
            link_state: LinkState::Unknown,
            mtu: if kind == InterfaceType::Loopback { 16384 } else { 1500 },
            link_address: None,
            media: None,
            capabilities: BTreeSet::new(),
            nd6_flags,
            addresses: Vec::new(),
            vlan_parent: None,
            vlan_tag: None,
            lagg_protocol: if kind == InterfaceType::Lagg {
                Some(LaggProtocol::default())
            } else {
                None
            },
            lagg_ports: Vec::new(),
            bridge_members: Vec::new(),
        }
    }

    pub fn with_link_address(mut self, mac: [u8; 6]) -> Self {
        self.link_address = Some(mac);
        self
    }

    pub fn with_link_state(mut self, state: LinkState) -> Self {
        self.link_state = state;
        self
    }

    pub fn with_address(mut self, alias: Alias) -> Self {
        self.addresses.push(alias);
        self
    }

    pub fn is_up(&self) -> bool {
        self.flags.contains(&InterfaceFlag::Up)
    }

    /// Addresses in the IPv4 family
    pub fn ipv4_addresses(&self) -> impl Iterator<Item = &Alias> {
        self.addresses.iter().filter(|a| a.is_ipv4())
    }
}

/// `aa:bb:cc:dd:ee:ff`
pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
