//! Frame encoding/decoding
//!
//! Implements the two-wire word and data-block formats.
//!
//! A command is one word: the command code in the high nibble and the pump
//! nibble in the low nibble. A status reply mirrors that layout with the
//! status code in the high nibble. Transaction-style responses are data
//! blocks framed by DCW control words:
//!
//! - `0xFF` STX ... `0xF0` ETX
//! - `0xF8` pump identifier next (5 bytes)
//! - `0xF6` grade next (1 byte)
//! - `0xF7` PPU next (4 BCD bytes)
//! - `0xF9` volume next (6 BCD bytes)
//! - `0xFA` money next (6 BCD bytes)
//! - `0xFB` LRC check character next (1 byte, 4-bit XOR of the preceding
//!   block bytes after STX)

use serde::Serialize;

use super::{DecodeError, PumpAddress, PumpCommand, PumpStatus};

/// Start of text.
pub const DCW_STX: u8 = 0xFF;
/// End of text.
pub const DCW_ETX: u8 = 0xF0;
/// LRC check character next.
pub const DCW_LRC_NEXT: u8 = 0xFB;
/// Pump identifier next.
pub const DCW_PUMP_ID_NEXT: u8 = 0xF8;
/// Grade data next.
pub const DCW_GRADE_NEXT: u8 = 0xF6;
/// PPU data next.
pub const DCW_PPU_NEXT: u8 = 0xF7;
/// Volume data next.
pub const DCW_VOLUME_NEXT: u8 = 0xF9;
/// Money data next.
pub const DCW_MONEY_NEXT: u8 = 0xFA;

/// Fixed wire word for the bus-wide all-stop ('F' 'C').
pub const ALL_STOP_WORD: u8 = 0xFC;

/// An addressed command ready for encoding. Consumed once by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Target pump.
    pub address: PumpAddress,
    /// Command to issue.
    pub command: PumpCommand,
    /// Trailing payload bytes (empty for every command except send-data).
    pub payload: Vec<u8>,
}

impl CommandFrame {
    /// A command with no payload.
    pub fn new(address: PumpAddress, command: PumpCommand) -> Self {
        Self {
            address,
            command,
            payload: Vec::new(),
        }
    }

    /// A command carrying payload bytes after the command word.
    pub fn with_payload(address: PumpAddress, command: PumpCommand, payload: Vec<u8>) -> Self {
        Self {
            address,
            command,
            payload,
        }
    }
}

/// A decoded, validated response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Pump the response came from. Decoding rejects frames whose address
    /// does not match the command's target.
    pub address: PumpAddress,
    /// Parsed status; present for status-word responses.
    pub status: Option<PumpStatus>,
    /// Raw 4-bit status code; present for status-word responses.
    pub status_code: Option<u8>,
    /// Raw bytes as read off the wire (for data blocks, the whole block).
    pub raw: Vec<u8>,
}

/// Wire format seam. The executor is written against this trait so the
/// framing scheme can be swapped for other dispenser families.
pub trait WireCodec: Send {
    /// Encode a command frame into wire bytes.
    fn encode(&self, frame: &CommandFrame) -> Vec<u8>;

    /// Decode and validate a single status word.
    fn decode_status(
        &self,
        raw: &[u8],
        expected: PumpAddress,
    ) -> Result<ResponseFrame, DecodeError>;

    /// Decode and validate a DCW data block.
    fn decode_block(&self, raw: &[u8], expected: PumpAddress)
        -> Result<ResponseFrame, DecodeError>;
}

/// The Gilbarco two-wire framing scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoWireCodec;

impl WireCodec for TwoWireCodec {
    fn encode(&self, frame: &CommandFrame) -> Vec<u8> {
        let word = match frame.command {
            PumpCommand::AllStop => ALL_STOP_WORD,
            command => (command.code() << 4) | frame.address.to_nibble(),
        };
        let mut bytes = Vec::with_capacity(1 + frame.payload.len());
        bytes.push(word);
        bytes.extend_from_slice(&frame.payload);
        bytes
    }

    fn decode_status(
        &self,
        raw: &[u8],
        expected: PumpAddress,
    ) -> Result<ResponseFrame, DecodeError> {
        if raw.len() != 1 {
            return Err(DecodeError::Malformed("status response must be one word"));
        }

        let word = raw[0];
        let status_code = (word >> 4) & 0xF;
        let nibble = word & 0xF;

        // Every nibble maps to an address, so a length-1 frame is always
        // structurally valid; only the source address can disqualify it.
        let actual = PumpAddress::from_nibble(nibble)
            .ok_or(DecodeError::Malformed("status nibble out of range"))?;
        if actual != expected {
            return Err(DecodeError::AddressMismatch { expected, actual });
        }

        Ok(ResponseFrame {
            address: actual,
            status: Some(PumpStatus::from_code(status_code)),
            status_code: Some(status_code),
            raw: raw.to_vec(),
        })
    }

    fn decode_block(
        &self,
        raw: &[u8],
        expected: PumpAddress,
    ) -> Result<ResponseFrame, DecodeError> {
        if raw.len() < 2 {
            return Err(DecodeError::Malformed("data block too short"));
        }
        if raw[0] != DCW_STX {
            return Err(DecodeError::Malformed("data block must start with STX"));
        }
        if !raw.contains(&DCW_ETX) {
            return Err(DecodeError::Malformed("data block missing ETX"));
        }

        // If the block carries an LRC check character, verify it over the
        // bytes between STX and the LRC tag.
        if let Some(tag_pos) = raw.iter().position(|&b| b == DCW_LRC_NEXT) {
            let actual = raw
                .get(tag_pos + 1)
                .copied()
                .ok_or(DecodeError::Malformed("LRC tag without check character"))?
                & 0xF;
            let expected_lrc = calculate_lrc(&raw[1..tag_pos]);
            if actual != expected_lrc {
                return Err(DecodeError::LrcMismatch {
                    expected: expected_lrc,
                    actual,
                });
            }
        }

        Ok(ResponseFrame {
            address: expected,
            status: None,
            status_code: None,
            raw: raw.to_vec(),
        })
    }
}

/// Calculate the 4-bit LRC (XOR) over a data block slice.
pub fn calculate_lrc(data: &[u8]) -> u8 {
    let mut lrc = 0u8;
    for byte in data {
        lrc ^= byte;
    }
    lrc & 0xF
}

/// Fields recovered from a transaction data block.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct TransactionRecord {
    /// Dispensed volume (XXX.XXX units).
    pub volume: Option<f64>,
    /// Price per unit.
    pub price_per_unit: Option<f64>,
    /// Total transaction amount.
    pub total_amount: Option<f64>,
    /// Fuel grade.
    pub grade: Option<u8>,
}

/// Walk a validated data block and extract the tagged fields. Unknown DCWs
/// are skipped together with one data byte, matching dispenser behavior of
/// interleaving vendor-specific sections.
pub fn parse_transaction_block(block: &[u8]) -> Result<TransactionRecord, DecodeError> {
    if block.first() != Some(&DCW_STX) {
        return Err(DecodeError::Malformed("data block must start with STX"));
    }

    let mut record = TransactionRecord::default();
    let mut pos = 1;

    while pos < block.len() {
        let dcw = block[pos];
        pos += 1;

        match dcw {
            DCW_ETX => break,
            DCW_PUMP_ID_NEXT => pos += 5,
            DCW_GRADE_NEXT => {
                if let Some(&byte) = block.get(pos) {
                    record.grade = Some(byte & 0xF);
                }
                pos += 1;
            }
            DCW_VOLUME_NEXT => {
                if let Some(bcd) = block.get(pos..pos + 6) {
                    record.volume = Some(parse_bcd(bcd, 1000.0));
                }
                pos += 6;
            }
            DCW_MONEY_NEXT => {
                if let Some(bcd) = block.get(pos..pos + 6) {
                    record.total_amount = Some(parse_bcd(bcd, 100.0));
                }
                pos += 6;
            }
            DCW_PPU_NEXT => {
                if let Some(bcd) = block.get(pos..pos + 4) {
                    record.price_per_unit = Some(parse_bcd(bcd, 1000.0));
                }
                pos += 4;
            }
            DCW_LRC_NEXT => pos += 1,
            _ => pos += 1,
        }
    }

    Ok(record)
}

/// Parse least-significant-digit-first BCD bytes and apply a decimal scale.
fn parse_bcd(bcd: &[u8], divisor: f64) -> f64 {
    let mut value = 0u64;
    for (i, byte) in bcd.iter().enumerate() {
        value += u64::from(byte & 0xF) * 10u64.pow(i as u32);
    }
    value as f64 / divisor
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr(n: u8) -> PumpAddress {
        PumpAddress::new(n).unwrap()
    }

    #[test]
    fn test_encode_status_poll() {
        let codec = TwoWireCodec;
        let frame = CommandFrame::new(addr(5), PumpCommand::StatusPoll);
        assert_eq!(codec.encode(&frame), vec![0x05]);
    }

    #[test]
    fn test_encode_authorize_pump_16_uses_zero_nibble() {
        let codec = TwoWireCodec;
        let frame = CommandFrame::new(addr(16), PumpCommand::Authorize);
        assert_eq!(codec.encode(&frame), vec![0x10]);
    }

    #[test]
    fn test_encode_send_data_with_payload() {
        let codec = TwoWireCodec;
        let frame =
            CommandFrame::with_payload(addr(3), PumpCommand::SendData, vec![0xE1, 0xE2]);
        assert_eq!(codec.encode(&frame), vec![0x23, 0xE1, 0xE2]);
    }

    #[test]
    fn test_encode_all_stop() {
        let codec = TwoWireCodec;
        let frame = CommandFrame::new(addr(1), PumpCommand::AllStop);
        assert_eq!(codec.encode(&frame), vec![ALL_STOP_WORD]);
    }

    #[test]
    fn test_decode_status_word() {
        let codec = TwoWireCodec;
        // Authorized (0x8), pump 1
        let frame = codec.decode_status(&[0x81], addr(1)).unwrap();
        assert_eq!(frame.address, addr(1));
        assert_eq!(frame.status, Some(PumpStatus::Authorized));
        assert_eq!(frame.status_code, Some(0x8));
    }

    #[test]
    fn test_decode_status_wrong_length() {
        let codec = TwoWireCodec;
        assert!(matches!(
            codec.decode_status(&[], addr(1)),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            codec.decode_status(&[0x81, 0x81], addr(1)),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_status_address_mismatch() {
        let codec = TwoWireCodec;
        // Pump 2 answered but pump 1 was asked
        let err = codec.decode_status(&[0x82], addr(1)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::AddressMismatch {
                expected: addr(1),
                actual: addr(2),
            }
        );
    }

    #[test]
    fn test_decode_block_requires_stx_and_etx() {
        let codec = TwoWireCodec;
        assert!(codec.decode_block(&[0x00, DCW_ETX], addr(1)).is_err());
        assert!(codec.decode_block(&[DCW_STX, 0xE1], addr(1)).is_err());
        assert!(codec.decode_block(&[DCW_STX, DCW_ETX], addr(1)).is_ok());
    }

    #[test]
    fn test_decode_block_lrc() {
        let codec = TwoWireCodec;
        let body = [DCW_GRADE_NEXT, 0xE2];
        let lrc = calculate_lrc(&body);
        let mut block = vec![DCW_STX];
        block.extend_from_slice(&body);
        block.extend_from_slice(&[DCW_LRC_NEXT, lrc, DCW_ETX]);
        assert!(codec.decode_block(&block, addr(1)).is_ok());

        // Corrupt the check character
        let pos = block.len() - 2;
        block[pos] ^= 0x1;
        assert!(matches!(
            codec.decode_block(&block, addr(1)),
            Err(DecodeError::LrcMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_transaction_block() {
        // STX, grade 2, volume 12.345, money 45.67, PPU 1.459, ETX
        let mut block = vec![DCW_STX, DCW_GRADE_NEXT, 0xE2];
        block.push(DCW_VOLUME_NEXT);
        block.extend_from_slice(&[0x5, 0x4, 0x3, 0x2, 0x1, 0x0]); // 012345 LSB-first
        block.push(DCW_MONEY_NEXT);
        block.extend_from_slice(&[0x7, 0x6, 0x5, 0x4, 0x0, 0x0]); // 004567
        block.push(DCW_PPU_NEXT);
        block.extend_from_slice(&[0x9, 0x5, 0x4, 0x1]); // 1459
        block.push(DCW_ETX);

        let record = parse_transaction_block(&block).unwrap();
        assert_eq!(record.grade, Some(2));
        assert_eq!(record.volume, Some(12.345));
        assert_eq!(record.total_amount, Some(45.67));
        assert_eq!(record.price_per_unit, Some(1.459));
    }

    #[test]
    fn test_parse_transaction_block_skips_unknown_dcw() {
        let block = vec![DCW_STX, 0xF5, 0xE0, DCW_GRADE_NEXT, 0xE1, DCW_ETX];
        let record = parse_transaction_block(&block).unwrap();
        assert_eq!(record.grade, Some(1));
    }

    #[test]
    fn test_calculate_lrc() {
        assert_eq!(calculate_lrc(&[]), 0);
        assert_eq!(calculate_lrc(&[0xF6, 0xE2]), (0xF6u8 ^ 0xE2) & 0xF);
    }
}
