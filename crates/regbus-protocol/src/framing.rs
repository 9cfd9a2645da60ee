//! ControlHub framing: outgoing preamble and reply framing codec.
//!
//! When a logical packet travels through the ControlHub relay it is wrapped
//! in a framing layer that names the target device and carries byte counts,
//! all in network byte order:
//!
//! ```text
//! client -> hub:  u32 total_byte_count (excluding itself)
//!                 u32 target_ip_v4
//!                 u16 target_port
//!                 u16 ipbus_word_count
//!                 u32 ipbus_words[...]
//!
//! hub -> client:  u32 total_byte_count
//!                 u32 chunk_byte_count
//!                 u32 target_ip_v4
//!                 u16 target_port
//!                 u16 error_code
//!                 u32 ipbus_words[...]
//! ```
//!
//! The two outgoing counts are not known until the packet is finalised, so
//! they are appended as placeholders and patched in place during
//! predispatch.

use std::io::{self, Cursor};

use byteorder::{BigEndian, ReadBytesExt};

/// Reply error code: the request was relayed and answered.
pub const ERROR_CODE_SUCCESS: u16 = 0x0;
/// Reply error code: the target device did not respond to the hub.
pub const ERROR_CODE_TARGET_TIMEOUT: u16 = 0x1;
/// Reply error code: communication between hub processes timed out.
pub const ERROR_CODE_INTERNAL_TIMEOUT: u16 = 0x2;

/// Buffer offsets of the patchable fields of one outgoing preamble.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PreambleOffsets {
    /// Where this logical packet's framing begins.
    pub packet_at: usize,
    /// Offset of the 32-bit total-byte-count placeholder.
    pub byte_count_at: usize,
    /// Offset of the 16-bit word-count placeholder.
    pub word_count_at: usize,
}

/// Appends an outgoing preamble with zeroed placeholders to the send buffer
/// and returns the offsets needed to patch it later.
pub fn append_preamble(buffer: &mut Vec<u8>, device_ip: u32, device_port: u16) -> PreambleOffsets {
    let packet_at = buffer.len();
    let byte_count_at = buffer.len();
    buffer.extend_from_slice(&0u32.to_be_bytes()); // placeholder for total byte count
    buffer.extend_from_slice(&device_ip.to_be_bytes());
    buffer.extend_from_slice(&device_port.to_be_bytes());
    let word_count_at = buffer.len();
    buffer.extend_from_slice(&0u16.to_be_bytes()); // placeholder for word count
    PreambleOffsets { packet_at, byte_count_at, word_count_at }
}

/// Patches the placeholders of a previously appended preamble.
///
/// `byte_count` counts everything after the count field itself (device id
/// fields plus IPbus words); `word_count` counts the IPbus words alone.
pub fn patch_preamble(
    buffer: &mut [u8],
    offsets: &PreambleOffsets,
    byte_count: u32,
    word_count: u16,
) {
    buffer[offsets.byte_count_at..offsets.byte_count_at + 4]
        .copy_from_slice(&byte_count.to_be_bytes());
    buffer[offsets.word_count_at..offsets.word_count_at + 2]
        .copy_from_slice(&word_count.to_be_bytes());
}

/// One parsed hub-to-client reply framing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReplyFraming {
    /// Total bytes following the count field in this logical packet.
    pub total_bytes: u32,
    /// Bytes in this chunk (legacy counter, echoed by the hub).
    pub chunk_bytes: u32,
    /// Echo of the target device IP address.
    pub device_ip: u32,
    /// Echo of the target device port.
    pub device_port: u16,
    /// Hub status for this logical packet; see the `ERROR_CODE_*` constants.
    pub error_code: u16,
}

/// Reads one reply framing from the cursor.
pub fn read_reply_framing(cursor: &mut Cursor<&[u8]>) -> io::Result<ReplyFraming> {
    let total_bytes = cursor.read_u32::<BigEndian>()?;
    let chunk_bytes = cursor.read_u32::<BigEndian>()?;
    let device_ip = cursor.read_u32::<BigEndian>()?;
    let device_port = cursor.read_u16::<BigEndian>()?;
    let error_code = cursor.read_u16::<BigEndian>()?;
    Ok(ReplyFraming { total_bytes, chunk_bytes, device_ip, device_port, error_code })
}

#[cfg(test)]
mod tests {
    use super::*;
    use regbus_core::constants::PREAMBLE_SIZE;

    #[test]
    fn test_preamble_layout_and_patch() {
        let mut buffer = Vec::new();
        let offsets = append_preamble(&mut buffer, 0xC0A8_0001, 50001);
        assert_eq!(buffer.len(), PREAMBLE_SIZE);
        assert_eq!(offsets.packet_at, 0);

        // Two IPbus words follow the framing.
        buffer.extend_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        buffer.extend_from_slice(&0x0000_1000u32.to_be_bytes());

        // byte count covers ip + port + word count + words = 8 + 8
        patch_preamble(&mut buffer, &offsets, 16, 2);

        assert_eq!(&buffer[0..4], &16u32.to_be_bytes());
        assert_eq!(&buffer[4..8], &0xC0A8_0001u32.to_be_bytes());
        assert_eq!(&buffer[8..10], &50001u16.to_be_bytes());
        assert_eq!(&buffer[10..12], &2u16.to_be_bytes());
    }

    #[test]
    fn test_reply_framing_round_trip() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&20u32.to_be_bytes());
        bytes.extend_from_slice(&20u32.to_be_bytes());
        bytes.extend_from_slice(&0x0A00_0002u32.to_be_bytes());
        bytes.extend_from_slice(&50002u16.to_be_bytes());
        bytes.extend_from_slice(&ERROR_CODE_TARGET_TIMEOUT.to_be_bytes());

        let mut cursor = Cursor::new(bytes.as_slice());
        let framing = read_reply_framing(&mut cursor).unwrap();

        assert_eq!(
            framing,
            ReplyFraming {
                total_bytes: 20,
                chunk_bytes: 20,
                device_ip: 0x0A00_0002,
                device_port: 50002,
                error_code: ERROR_CODE_TARGET_TIMEOUT,
            }
        );
        assert_eq!(cursor.position(), 16);
    }

    #[test]
    fn test_reply_framing_rejects_truncated_input() {
        let bytes = vec![0u8; 10];
        let mut cursor = Cursor::new(bytes.as_slice());
        assert!(read_reply_framing(&mut cursor).is_err());
    }
}
