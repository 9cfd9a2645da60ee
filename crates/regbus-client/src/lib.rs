#![warn(missing_docs)]

//! regbus-client: the stateful client stack over transport and codecs.
//!
//! This crate assembles the user-facing pieces of the library:
//! - `node`: the address tree describing a device's register map
//! - `val`: deferred value handles that become valid after a dispatch
//! - `client`: the client interface, its protocol-layer seam and the bare
//!   IPbus layer
//! - `controlhub`: the preamble layer used when reaching devices through
//!   the ControlHub relay
//! - `socket`: UDP and TCP transports
//! - `hw`: the hardware-interface façade binding a tree to a client
//! - `registry`: scheme-keyed client construction

/// Client interface, protocol-layer seam and the bare IPbus layer.
pub mod client;
/// ControlHub preamble layer and target-id extraction.
pub mod controlhub;
/// Hardware-interface façade.
pub mod hw;
/// Address-tree node.
pub mod node;
/// Scheme-keyed client registry.
pub mod registry;
/// UDP and TCP transport implementations.
pub mod socket;
/// Deferred value handles.
pub mod val;

pub use client::{
    ClientInterface, IpbusLayer, ProtocolLayer, StreamFramingLayer, TransactionRecord,
};
pub use controlhub::{extract_target_id, ControlHubLayer};
pub use hw::HardwareInterface;
pub use node::{BlockMode, Node, Permission};
pub use registry::ClientRegistry;
pub use socket::{TcpTransport, UdpTransport};
pub use val::{ValHeader, ValVector, ValWord};
