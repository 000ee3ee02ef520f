//! Raw kernel notification messages

use super::kernel::{InterfaceFlag, LinkState};
use super::route::Route;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnnounceKind {
    Arrival,
    Departure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AddressAction {
    NewAddr,
    DelAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteAction {
    Add,
    Delete,
    Change,
}

/// One message read from the kernel notification stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum RoutingMessage {
    /// Interface arrival or departure
    Announce {
        interface: String,
        kind: AnnounceKind,
    },

    /// Current MTU, flags and link state of an interface
    InterfaceInfo {
        interface: String,
        mtu: u32,
        flags: BTreeSet<InterfaceFlag>,
        link_state: LinkState,
    },

    /// Alias added to or removed from an interface
    Address {
        interface: String,
        action: AddressAction,
        address: Option<IpAddr>,
        prefix_len: u8,
        dest_address: Option<IpAddr>,
    },

    /// Routing table change
    Route {
        action: RouteAction,
        route: Route,
        /// Transport-level error reported with the message; 0 when none
        errno: i32,
    },
}

impl RoutingMessage {
    /// Interface the message is about, if any
    pub fn interface(&self) -> Option<&str> {
        match self {
            RoutingMessage::Announce { interface, .. }
            | RoutingMessage::InterfaceInfo { interface, .. }
            | RoutingMessage::Address { interface, .. } => Some(interface),
            RoutingMessage::Route { route, .. } => route.interface.as_deref(),
        }
    }
}
