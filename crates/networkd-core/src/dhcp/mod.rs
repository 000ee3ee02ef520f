//! DHCPv4 client protocol

mod client;
mod lease;
mod message;

pub use client::{ProtocolClient, ProtocolClientFactory};
pub use lease::{ClientState, Lease, UnbindReason};
pub use message::{DhcpMessage, MessageKind, DEFAULT_PARAMETER_REQUEST_LIST};
