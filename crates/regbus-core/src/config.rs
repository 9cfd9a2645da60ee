use std::{default::Default, time::Duration};

#[derive(Clone, Debug)]
/// Configuration options to tune client and socket behavior.
pub struct ClientConfig {
    /// How long `dispatch` waits for a reply before giving up.
    pub timeout: Duration,
    /// Max bytes accepted in a single reply read.
    pub max_reply_size: usize,
    /// Socket receive buffer size in bytes (None = use system default).
    /// Corresponds to SO_RCVBUF socket option.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = use system default).
    /// Corresponds to SO_SNDBUF socket option.
    pub socket_send_buffer_size: Option<usize>,
    /// Disable Nagle's algorithm on TCP transports (default: true).
    /// Request packets are small and latency-sensitive.
    pub tcp_nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            max_reply_size: 1024 * 1024, // 1 MiB bounds a full pipeline of block reads
            socket_recv_buffer_size: None, // Use system default
            socket_send_buffer_size: None, // Use system default
            tcp_nodelay: true,
        }
    }
}
