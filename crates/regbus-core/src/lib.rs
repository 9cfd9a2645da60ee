#![warn(missing_docs)]

//! regbus-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core utilities shared across all layers:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Transport abstraction for pluggable I/O
//!
//! Protocol-specific logic lives in specialized crates:
//! - `regbus-protocol`: transaction-header and ControlHub framing codecs
//! - `regbus-client`: address tree, deferred values, client stack, socket transports

/// Protocol constants shared across layers.
pub mod constants {
    /// IPbus protocol version carried in every transaction header.
    pub const PROTOCOL_VERSION: u8 = 2;
    /// Size of one IPbus transaction header in bytes.
    pub const HEADER_SIZE: usize = 4;
    /// Size of one IPbus word in bytes.
    pub const WORD_SIZE: usize = 4;
    /// Largest payload a single transaction can carry; the header's
    /// word-count field is 8 bits wide.
    pub const MAX_TRANSACTION_WORDS: usize = 255;
    /// Outgoing ControlHub framing per logical packet:
    /// byte count (4) + device IP (4) + device port (2) + word count (2).
    pub const PREAMBLE_SIZE: usize = 12;
    /// Incoming ControlHub framing per logical packet:
    /// total bytes (4) + chunk bytes (4) + device IP (4) + device port (2) + error code (2).
    pub const REPLY_FRAMING_SIZE: usize = 16;
    /// Mask sentinel meaning "no masking": all 32 bits significant.
    pub const NOMASK: u32 = 0xFFFF_FFFF;
    /// Logical packets assembled before the client flushes implicitly.
    pub const DEFAULT_BUFFER_WINDOW: usize = 16;
}

/// Configuration options for clients and their sockets.
pub mod config;
/// Error types and results.
pub mod error;
/// Transport abstraction for pluggable I/O.
pub mod transport;
