#![warn(missing_docs)]

//! Regbus: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types for talking to memory-mapped registers over IPbus,
//! directly or through the ControlHub relay:
//!
//! - Address tree and access semantics (`Node`, `Permission`, `BlockMode`)
//! - Clients and the façade binding a tree to one (`ClientInterface`,
//!   `HardwareInterface`, `ClientRegistry`)
//! - Deferred values (`ValHeader`, `ValWord`, `ValVector`)
//! - Core configuration and errors (`ClientConfig`, `ErrorKind`, `Result`)
//!
//! Example
//! ```ignore
//! use regbus::{ClientRegistry, HardwareInterface, Node, Permission};
//!
//! let registry = ClientRegistry::new();
//! let client = registry
//!     .create("board0", "chtcp-2.0://hub:10203?target=192.168.0.1:50001")
//!     .unwrap();
//!
//! let mut top = Node::new("TOP");
//! top.add_child(Node::new("csr").with_partial_addr(0x1000).with_permission(Permission::Read));
//! let hw = HardwareInterface::new(client, top);
//!
//! // Queue a read, flush, resolve the deferred word.
//! let status = hw.get_node("csr").unwrap().read().unwrap();
//! hw.dispatch().unwrap();
//! println!("csr = {:#010x}", status.value().unwrap());
//! ```

// Core configuration and errors
pub use regbus_core::{
    config::ClientConfig,
    constants,
    error::{ErrorKind, Result},
    transport::Transport,
};
// Client stack: tree, deferred values, clients, façade
pub use regbus_client::{
    extract_target_id, BlockMode, ClientInterface, ClientRegistry, ControlHubLayer,
    HardwareInterface, IpbusLayer, Node, Permission, ProtocolLayer, StreamFramingLayer,
    TcpTransport, UdpTransport, ValHeader, ValVector, ValWord,
};
// Wire codecs
pub use regbus_protocol::{
    framing::{self, ReplyFraming},
    header::{TransactionHeader, TransactionType},
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        BlockMode, ClientConfig, ClientInterface, ClientRegistry, ErrorKind, HardwareInterface,
        Node, Permission, Result, ValHeader, ValVector, ValWord,
    };
}
