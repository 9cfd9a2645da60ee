//! Transport abstraction for pluggable I/O.

use std::time::Duration;

use crate::error::Result;

/// Low-level framed-buffer transport abstraction.
///
/// This trait allows various transports (UDP, TCP, emulator, etc.) to be
/// plugged into the client stack without coupling to a concrete
/// implementation. A transport moves opaque byte buffers; all framing is the
/// business of the protocol layers above it.
pub trait Transport {
    /// Returns the URI this transport was created from.
    fn uri(&self) -> &str;

    /// Sets the per-operation receive timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Enqueues a buffer for sending. Must not block on the remote end.
    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receives one reply buffer of at most `max_bytes`, waiting up to the
    /// configured timeout. Times out with `ErrorKind::TransportTimeout`.
    fn receive_bytes(&mut self, max_bytes: usize) -> Result<Vec<u8>>;

    /// Blocks until all outstanding sends have left this host or the timeout
    /// elapses.
    fn flush_and_wait(&mut self) -> Result<()>;
}
