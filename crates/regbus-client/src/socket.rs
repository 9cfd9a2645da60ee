//! UDP and TCP transport implementations.

use std::{
    io::{self, Read, Write},
    net::{TcpStream, UdpSocket},
    time::Duration,
};

use socket2::Socket as Socket2;
use tracing::trace;

use regbus_core::{
    config::ClientConfig,
    error::{ErrorKind, Result},
    transport::Transport,
};

/// Strips scheme and query from a URI, leaving the `host:port` authority.
fn authority(uri: &str) -> Result<&str> {
    let after_scheme = uri.split_once("://").map(|(_, rest)| rest).unwrap_or(uri);
    let authority = after_scheme.split_once('?').map(|(a, _)| a).unwrap_or(after_scheme);
    if authority.rsplit_once(':').is_none() {
        return Err(ErrorKind::XmlFileMissingRequiredParameters(format!(
            "no host:port in '{}'",
            uri
        )));
    }
    Ok(authority)
}

/// Applies socket options from configuration to a UDP socket.
fn apply_socket_options(socket: &UdpSocket, config: &ClientConfig) -> io::Result<()> {
    // Create socket2::Socket from UdpSocket for advanced options
    let socket2 = Socket2::from(socket.try_clone()?);

    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }

    Ok(())
}

/// Transport over a connected UDP socket, one datagram per buffer.
#[derive(Debug)]
pub struct UdpTransport {
    uri: String,
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds an ephemeral local socket and connects it to the URI's
    /// authority.
    pub fn new(uri: &str, config: &ClientConfig) -> Result<Self> {
        let remote = authority(uri)?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        apply_socket_options(&socket, config)?;
        socket.connect(remote)?;
        socket.set_read_timeout(Some(config.timeout))?;
        Ok(Self { uri: uri.to_string(), socket })
    }
}

impl Transport for UdpTransport {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.socket.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.socket.send(bytes)?;
        Ok(())
    }

    fn receive_bytes(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; max_bytes];
        let received = self.socket.recv(&mut buffer)?;
        buffer.truncate(received);
        Ok(buffer)
    }

    fn flush_and_wait(&mut self) -> Result<()> {
        // Datagrams leave on send; there is nothing to drain.
        Ok(())
    }
}

/// Transport over a TCP stream, connected lazily on first use. The
/// ControlHub relay speaks TCP.
///
/// A byte stream has no datagram boundaries, so every logical packet the
/// stack sends through this transport must start with a 32-bit big-endian
/// count of the bytes that follow it (the ControlHub preamble's first
/// field, or the stream framing header of the bare stack). Both directions
/// carry the same shape; the receive side reads exactly one framed reply
/// per packet sent, reassembling across however many segments the network
/// splits them into.
#[derive(Debug)]
pub struct TcpTransport {
    uri: String,
    remote: String,
    timeout: Duration,
    nodelay: bool,
    stream: Option<TcpStream>,
    expected_replies: usize,
}

/// Counts the length-prefixed logical packets in an outgoing buffer.
fn count_framed_packets(bytes: &[u8]) -> Result<usize> {
    let mut position = 0usize;
    let mut packets = 0usize;
    while position < bytes.len() {
        let header: [u8; 4] = bytes
            .get(position..position + 4)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(framing_error)?;
        position += 4 + u32::from_be_bytes(header) as usize;
        packets += 1;
    }
    if position != bytes.len() {
        return Err(framing_error());
    }
    Ok(packets)
}

fn framing_error() -> ErrorKind {
    ErrorKind::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        "logical packets on a TCP stream must be length-prefixed",
    ))
}

impl TcpTransport {
    /// Prepares a transport for the URI's authority without connecting.
    pub fn new(uri: &str, config: &ClientConfig) -> Result<Self> {
        let remote = authority(uri)?.to_string();
        Ok(Self {
            uri: uri.to_string(),
            remote,
            timeout: config.timeout,
            nodelay: config.tcp_nodelay,
            stream: None,
            expected_replies: 0,
        })
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            trace!("Connecting to {}", self.remote);
            let stream = TcpStream::connect(self.remote.as_str())?;
            stream.set_nodelay(self.nodelay)?;
            stream.set_read_timeout(Some(self.timeout))?;
            self.stream = Some(stream);
        }
        self.stream.as_mut().ok_or_else(|| {
            ErrorKind::Io(io::Error::new(io::ErrorKind::NotConnected, "stream not connected"))
        })
    }
}

impl Transport for TcpTransport {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        if let Some(stream) = self.stream.as_mut() {
            stream.set_read_timeout(Some(timeout))?;
        }
        Ok(())
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.expected_replies = count_framed_packets(bytes)?;
        self.stream()?.write_all(bytes)?;
        Ok(())
    }

    fn receive_bytes(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let expected = self.expected_replies;
        let stream = self.stream()?;
        let mut reply = Vec::new();
        for _ in 0..expected {
            let mut header = [0u8; 4];
            stream.read_exact(&mut header)?;
            let length = u32::from_be_bytes(header) as usize;
            if reply.len() + 4 + length > max_bytes {
                return Err(ErrorKind::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "reply exceeds the receive limit",
                )));
            }
            reply.extend_from_slice(&header);
            let body_start = reply.len();
            reply.resize(body_start + length, 0);
            stream.read_exact(&mut reply[body_start..])?;
        }
        Ok(reply)
    }

    fn flush_and_wait(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_strips_scheme_and_query() {
        assert_eq!(
            authority("chtcp-2.0://hub.example.org:10203?target=192.168.0.1:50001").unwrap(),
            "hub.example.org:10203"
        );
        assert_eq!(authority("ipbusudp-2.0://127.0.0.1:50001").unwrap(), "127.0.0.1:50001");
        assert!(matches!(
            authority("ipbusudp-2.0://nohostport"),
            Err(ErrorKind::XmlFileMissingRequiredParameters(_))
        ));
    }

    #[test]
    fn test_udp_transport_round_trip() {
        let echo = UdpSocket::bind("127.0.0.1:0").unwrap();
        let uri = format!("ipbusudp-2.0://{}", echo.local_addr().unwrap());
        let mut transport = UdpTransport::new(&uri, &ClientConfig::default()).unwrap();

        transport.send_bytes(&[1, 2, 3, 4]).unwrap();
        let mut buffer = [0u8; 16];
        let (received, from) = echo.recv_from(&mut buffer).unwrap();
        echo.send_to(&buffer[..received], from).unwrap();

        let reply = transport.receive_bytes(16).unwrap();
        assert_eq!(reply, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_tcp_transport_reassembles_split_replies() {
        use std::{net::TcpListener, thread};

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("ipbustcp-2.0://{}", listener.local_addr().unwrap());

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut header = [0u8; 4];
            stream.read_exact(&mut header).unwrap();
            let length = u32::from_be_bytes(header) as usize;
            let mut body = vec![0u8; length];
            stream.read_exact(&mut body).unwrap();

            // Echo the framed packet back, split mid-body so the client
            // needs more than one read to assemble it.
            stream.write_all(&header).unwrap();
            stream.write_all(&body[..2]).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(20));
            stream.write_all(&body[2..]).unwrap();
        });

        let mut transport = TcpTransport::new(&uri, &ClientConfig::default()).unwrap();
        let mut request = Vec::new();
        request.extend_from_slice(&8u32.to_be_bytes());
        request.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        transport.send_bytes(&request).unwrap();

        let reply = transport.receive_bytes(64).unwrap();
        assert_eq!(reply, request);
        server.join().unwrap();
    }

    #[test]
    fn test_tcp_transport_rejects_unframed_buffers() {
        // Rejected before any connection is attempted.
        let mut transport =
            TcpTransport::new("ipbustcp-2.0://127.0.0.1:50010", &ClientConfig::default()).unwrap();
        assert!(matches!(transport.send_bytes(&[1, 2, 3]), Err(ErrorKind::Io(_))));
    }

    #[test]
    fn test_udp_transport_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let uri = format!("ipbusudp-2.0://{}", silent.local_addr().unwrap());
        let mut transport = UdpTransport::new(&uri, &ClientConfig::default()).unwrap();
        transport.set_timeout(Duration::from_millis(20)).unwrap();

        assert!(matches!(transport.receive_bytes(16), Err(ErrorKind::TransportTimeout)));
    }
}
