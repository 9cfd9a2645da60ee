//! IPbus transaction header codec.
//!
//! Every transaction starts with one 32-bit header:
//!
//! ```text
//! bits 31..28  protocol version
//! bits 27..16  transaction id
//! bits 15..8   word count
//! bits  7..4   transaction type
//! bits  3..0   info code  (0 = request or success reply)
//! ```

use std::convert::TryFrom;

use regbus_core::{
    constants::PROTOCOL_VERSION,
    error::{ErrorKind, Result},
};

/// Info code carried by requests and by successful replies.
pub const INFO_SUCCESS: u8 = 0x0;

/// Id to identify a transaction type on the wire.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Eq)]
pub enum TransactionType {
    /// Read from an incrementing address range
    Read = 0x0,
    /// Write to an incrementing address range
    Write = 0x1,
    /// Read the same address repeatedly (FIFO)
    NonIncrementalRead = 0x2,
    /// Write the same address repeatedly (FIFO)
    NonIncrementalWrite = 0x3,
    /// Read-modify-write: new = (old & AND) | OR
    RmwBits = 0x4,
    /// Read-modify-write: new = old + addend
    RmwSum = 0x5,
    /// Protocol status / alive check
    Status = 0x6,
}

impl TransactionType {
    /// Converts the type to its 4-bit wire value.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for TransactionType {
    type Error = ErrorKind;

    /// Gets the `TransactionType` enum instance from its wire value.
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(TransactionType::Read),
            0x1 => Ok(TransactionType::Write),
            0x2 => Ok(TransactionType::NonIncrementalRead),
            0x3 => Ok(TransactionType::NonIncrementalWrite),
            0x4 => Ok(TransactionType::RmwBits),
            0x5 => Ok(TransactionType::RmwSum),
            0x6 => Ok(TransactionType::Status),
            _ => Err(ErrorKind::IpbusValidationFailed(format!(
                "unknown transaction type {:#03x}",
                value
            ))),
        }
    }
}

/// One decoded IPbus transaction header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransactionHeader {
    /// Protocol version (4 bits).
    pub version: u8,
    /// Transaction id. Only the low 12 bits travel on the wire.
    pub transaction_id: u16,
    /// Payload length in 32-bit words.
    pub word_count: u8,
    /// Transaction type.
    pub transaction_type: TransactionType,
    /// Info code; 0 for requests and successful replies.
    pub info_code: u8,
}

impl TransactionHeader {
    /// Builds a request header for the current protocol version.
    pub fn request(
        transaction_id: u16,
        word_count: u8,
        transaction_type: TransactionType,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            transaction_id,
            word_count,
            transaction_type,
            info_code: INFO_SUCCESS,
        }
    }

    /// Packs the header into its 32-bit wire form.
    pub fn pack(&self) -> u32 {
        (u32::from(self.version & 0xF) << 28)
            | (u32::from(self.transaction_id & 0x0FFF) << 16)
            | (u32::from(self.word_count) << 8)
            | (u32::from(self.transaction_type.to_u8()) << 4)
            | u32::from(self.info_code & 0xF)
    }

    /// Parses a 32-bit wire word into a header.
    pub fn parse(word: u32) -> Result<Self> {
        let transaction_type = TransactionType::try_from(((word >> 4) & 0xF) as u8)?;
        Ok(Self {
            version: ((word >> 28) & 0xF) as u8,
            transaction_id: ((word >> 16) & 0x0FFF) as u16,
            word_count: ((word >> 8) & 0xFF) as u8,
            transaction_type,
            info_code: (word & 0xF) as u8,
        })
    }

    /// Returns whether this header reports success.
    pub fn is_success(&self) -> bool {
        self.info_code == INFO_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        for (tid, wc, tt) in [
            (0u16, 1u8, TransactionType::Read),
            (42, 255, TransactionType::Write),
            (0x0FFF, 0, TransactionType::NonIncrementalRead),
            (7, 3, TransactionType::RmwBits),
            (8, 2, TransactionType::RmwSum),
            (9, 0, TransactionType::Status),
        ] {
            let header = TransactionHeader::request(tid, wc, tt);
            let parsed = TransactionHeader::parse(header.pack()).unwrap();
            assert_eq!(parsed, header);
            assert_eq!(parsed.version, PROTOCOL_VERSION);
            assert_eq!(parsed.info_code, INFO_SUCCESS);
        }
    }

    #[test]
    fn test_transaction_id_truncates_to_twelve_bits() {
        let header = TransactionHeader::request(0xF123, 1, TransactionType::Read);
        let parsed = TransactionHeader::parse(header.pack()).unwrap();
        assert_eq!(parsed.transaction_id, 0x0123);
    }

    #[test]
    fn test_bit_layout() {
        let header = TransactionHeader::request(0x0ABC, 0x12, TransactionType::Write);
        assert_eq!(header.pack(), 0x2ABC_1210);
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        // Type nibble 0xF is not assigned.
        let word = 0x2000_01F0;
        let result = TransactionHeader::parse(word);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unknown transaction type"));
    }

    #[test]
    fn test_error_info_code_survives_parse() {
        let mut header = TransactionHeader::request(5, 1, TransactionType::Read);
        header.info_code = 0x4;
        let parsed = TransactionHeader::parse(header.pack()).unwrap();
        assert_eq!(parsed.info_code, 0x4);
        assert!(!parsed.is_success());
    }
}
