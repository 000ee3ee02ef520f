//! Notifications published on the event bus

use crate::model::{InterfaceFlag, Route};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// A semantic network change notification
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    InterfaceAttached { name: String },
    InterfaceDetached { name: String },
    InterfaceUp { interface: String },
    InterfaceDown { interface: String },
    LinkUp { interface: String },
    LinkDown { interface: String },
    MtuChanged { interface: String, old_mtu: u32, new_mtu: u32 },
    FlagsChanged {
        interface: String,
        old_flags: BTreeSet<InterfaceFlag>,
        new_flags: BTreeSet<InterfaceFlag>,
    },
    /// Generic update of one or more interfaces
    InterfaceChanged { ids: Vec<String> },
    InterfaceConfigured { interface: String },
    RouteAdded { route: Route },
    RouteDeleted { route: Route },
    DnsConfigured { addresses: Vec<IpAddr> },
    NetworkChanged,
}

impl NetworkEvent {
    pub fn interface_changed(interface: impl Into<String>) -> Self {
        NetworkEvent::InterfaceChanged {
            ids: vec![interface.into()],
        }
    }

    /// Event name on the bus
    pub fn name(&self) -> &'static str {
        match self {
            NetworkEvent::InterfaceAttached { .. } => "network.interface.attached",
            NetworkEvent::InterfaceDetached { .. } => "network.interface.detached",
            NetworkEvent::InterfaceUp { .. } => "network.interface.up",
            NetworkEvent::InterfaceDown { .. } => "network.interface.down",
            NetworkEvent::LinkUp { .. } => "network.interface.link_up",
            NetworkEvent::LinkDown { .. } => "network.interface.link_down",
            NetworkEvent::MtuChanged { .. } => "network.interface.mtu_changed",
            NetworkEvent::FlagsChanged { .. } => "network.interface.flags_changed",
            NetworkEvent::InterfaceChanged { .. } => "network.interface.changed",
            NetworkEvent::InterfaceConfigured { .. } => "network.interface.configured",
            NetworkEvent::RouteAdded { .. } => "network.route.added",
            NetworkEvent::RouteDeleted { .. } => "network.route.deleted",
            NetworkEvent::DnsConfigured { .. } => "network.dns.configured",
            NetworkEvent::NetworkChanged => "network.changed",
        }
    }

    /// Event payload on the bus
    pub fn payload(&self) -> Value {
        match self {
            NetworkEvent::InterfaceAttached { name } | NetworkEvent::InterfaceDetached { name } => {
                json!({ "name": name })
            }
            NetworkEvent::InterfaceUp { interface }
            | NetworkEvent::InterfaceDown { interface }
            | NetworkEvent::LinkUp { interface }
            | NetworkEvent::LinkDown { interface }
            | NetworkEvent::InterfaceConfigured { interface } => {
                json!({ "interface": interface })
            }
            NetworkEvent::MtuChanged {
                interface,
                old_mtu,
                new_mtu,
            } => json!({
                "interface": interface,
                "old_mtu": old_mtu,
                "new_mtu": new_mtu,
            }),
            NetworkEvent::FlagsChanged {
                interface,
                old_flags,
                new_flags,
            } => json!({
                "interface": interface,
                "old_flags": old_flags,
                "new_flags": new_flags,
            }),
            NetworkEvent::InterfaceChanged { ids } => json!({
                "operation": "update",
                "ids": ids,
            }),
            NetworkEvent::RouteAdded { route } | NetworkEvent::RouteDeleted { route } => {
                serde_json::to_value(route).unwrap_or(Value::Null)
            }
            NetworkEvent::DnsConfigured { addresses } => json!({ "addresses": addresses }),
            NetworkEvent::NetworkChanged => json!({ "operation": "update" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_changed_payload() {
        let event = NetworkEvent::interface_changed("em0");
        assert_eq!(event.name(), "network.interface.changed");
        assert_eq!(
            event.payload(),
            json!({"operation": "update", "ids": ["em0"]})
        );
    }

    #[test]
    fn test_flags_payload_uses_flag_names() {
        let mut new_flags = BTreeSet::new();
        new_flags.insert(InterfaceFlag::Up);
        let event = NetworkEvent::FlagsChanged {
            interface: "em0".into(),
            old_flags: BTreeSet::new(),
            new_flags,
        };
        assert_eq!(event.payload()["new_flags"], json!(["UP"]));
    }
}
