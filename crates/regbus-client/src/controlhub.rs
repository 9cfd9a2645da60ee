//! ControlHub preamble layer and target-id extraction.
//!
//! When devices are reached through the ControlHub relay, every logical
//! packet is wrapped in a framing layer naming the target device. This
//! layer owns the bare IPbus layer and chains the protocol hooks in order:
//! its preamble goes out before the inner layer's words, its predispatch
//! patches the byte counts once sizes are final, and its validation
//! consumes the reply framing before handing the remaining words to the
//! inner layer.

use std::{collections::VecDeque, io::Cursor, net::Ipv4Addr};

use tracing::warn;

use regbus_core::{
    constants::{PREAMBLE_SIZE, REPLY_FRAMING_SIZE},
    error::{ErrorKind, Result},
};
use regbus_protocol::framing::{
    self, PreambleOffsets, ERROR_CODE_INTERNAL_TIMEOUT, ERROR_CODE_SUCCESS,
    ERROR_CODE_TARGET_TIMEOUT,
};

use crate::client::{IpbusLayer, ProtocolLayer, TransactionRecord};

/// Extracts the target device identity from a URI.
///
/// ControlHub URIs name the hub as host and the device in a `target`
/// argument (`chtcp-2.0://hub:10203?target=192.168.0.1:50001`); direct
/// URIs name the device itself as a dotted-quad host. Anything that cannot
/// yield an IPv4 address and port is rejected.
pub fn extract_target_id(uri: &str) -> Result<(u32, u16)> {
    let after_scheme = uri.split_once("://").map(|(_, rest)| rest).unwrap_or(uri);
    let (authority, query) = match after_scheme.split_once('?') {
        Some((authority, query)) => (authority, Some(query)),
        None => (after_scheme, None),
    };
    let target = query
        .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("target=")))
        .unwrap_or(authority);

    let (host, port) = target.rsplit_once(':').ok_or_else(|| {
        ErrorKind::XmlFileMissingRequiredParameters(format!("no port in '{}'", uri))
    })?;
    let ip: Ipv4Addr = host.parse().map_err(|_| {
        ErrorKind::XmlFileMissingRequiredParameters(format!(
            "'{}' is not an IPv4 address in '{}'",
            host, uri
        ))
    })?;
    let port: u16 = port.parse().map_err(|_| {
        ErrorKind::XmlFileMissingRequiredParameters(format!(
            "'{}' is not a port number in '{}'",
            port, uri
        ))
    })?;
    Ok((u32::from(ip), port))
}

/// Protocol layer speaking the ControlHub preamble framing around the bare
/// IPbus layer.
///
/// The queue of preamble offsets persists from assembly until each logical
/// packet validates, keeping patch targets addressable across the dispatch.
#[derive(Debug)]
pub struct ControlHubLayer {
    inner: IpbusLayer,
    device_ip: u32,
    device_port: u16,
    preambles: VecDeque<PreambleOffsets>,
}

impl ControlHubLayer {
    /// Creates the layer for the device identified by the URI.
    pub fn new(uri: &str) -> Result<Self> {
        let (device_ip, device_port) = extract_target_id(uri)?;
        Ok(Self {
            inner: IpbusLayer::new(),
            device_ip,
            device_port,
            preambles: VecDeque::new(),
        })
    }

    /// The target device IPv4 address.
    pub fn device_ip(&self) -> u32 {
        self.device_ip
    }

    /// The target device port.
    pub fn device_port(&self) -> u16 {
        self.device_port
    }
}

impl ProtocolLayer for ControlHubLayer {
    fn preamble(&mut self, buffer: &mut Vec<u8>) {
        self.inner.preamble(buffer);
        let offsets = framing::append_preamble(buffer, self.device_ip, self.device_port);
        self.preambles.push_back(offsets);
    }

    fn preamble_size(&self) -> usize {
        PREAMBLE_SIZE + self.inner.preamble_size()
    }

    fn predispatch(&mut self, buffer: &mut [u8]) {
        self.inner.predispatch(buffer);
        let ends: Vec<usize> = self
            .preambles
            .iter()
            .skip(1)
            .map(|offsets| offsets.packet_at)
            .chain(std::iter::once(buffer.len()))
            .collect();
        for (offsets, end) in self.preambles.iter().zip(ends) {
            // Byte count covers the device-id fields plus the IPbus words;
            // word count covers the IPbus words alone.
            let byte_count = (end - offsets.byte_count_at - 4) as u32;
            let word_count = ((end - offsets.word_count_at - 2) / 4) as u16;
            framing::patch_preamble(buffer, offsets, byte_count, word_count);
        }
    }

    fn validate(
        &mut self,
        sent: &[u8],
        reply: &[u8],
        pending: &mut VecDeque<TransactionRecord>,
    ) -> Result<()> {
        let boundaries: Vec<usize> =
            self.preambles.iter().map(|offsets| offsets.packet_at).collect();
        let mut cursor = Cursor::new(reply);
        for (i, packet_at) in boundaries.iter().enumerate() {
            let send_start = packet_at + PREAMBLE_SIZE;
            let send_end = boundaries.get(i + 1).copied().unwrap_or(sent.len());

            let framing = framing::read_reply_framing(&mut cursor).map_err(|_| {
                ErrorKind::IpbusValidationFailed("ControlHub reply framing truncated".to_string())
            })?;
            match framing.error_code {
                ERROR_CODE_SUCCESS => {}
                ERROR_CODE_TARGET_TIMEOUT => return Err(ErrorKind::ControlHubTargetTimeout),
                ERROR_CODE_INTERNAL_TIMEOUT => return Err(ErrorKind::ControlHubInternalTimeout),
                code => return Err(ErrorKind::ControlHubReportedError(code)),
            }
            if framing.device_ip != self.device_ip || framing.device_port != self.device_port {
                warn!(
                    "ControlHub reply names device {}:{}, expected {}:{}",
                    Ipv4Addr::from(framing.device_ip),
                    framing.device_port,
                    Ipv4Addr::from(self.device_ip),
                    self.device_port
                );
            }

            let ipbus_bytes = (framing.total_bytes as usize)
                .checked_sub(REPLY_FRAMING_SIZE - 4)
                .ok_or_else(|| {
                    ErrorKind::IpbusValidationFailed(
                        "ControlHub reply byte count smaller than its framing".to_string(),
                    )
                })?;
            let position = cursor.position() as usize;
            let reply_region = reply.get(position..position + ipbus_bytes).ok_or_else(|| {
                ErrorKind::IpbusValidationFailed(
                    "ControlHub reply shorter than its byte count".to_string(),
                )
            })?;

            self.inner.validate(&sent[send_start..send_end], reply_region, pending)?;
            cursor.set_position((position + ipbus_bytes) as u64);
            self.preambles.pop_front();
        }

        if (cursor.position() as usize) != reply.len() {
            return Err(ErrorKind::IpbusValidationFailed(
                "ControlHub reply holds trailing bytes".to_string(),
            ));
        }
        Ok(())
    }

    fn max_buffers(&self) -> usize {
        16
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.inner.next_transaction_id()
    }

    fn clear(&mut self) {
        self.inner.clear();
        self.preambles.clear();
    }
}
