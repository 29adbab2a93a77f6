//! The ISO-TP PCI (protocol control information) codec.
//!
//! The high nibble of the first byte selects the frame type; the remaining
//! bits carry type-specific fields. This mirrors the explicit,
//! bounds-checked `Codec` discipline used for other bit-packed headers in
//! this codebase: a fixed-shape type with `encode`/`decode` rather than ad
//! hoc indexing inline in the session loop.

use crate::error::IsoTpError;
use crate::types::ISO_TP_PAD_BYTE;

const PCI_SINGLE: u8 = 0x0;
const PCI_FIRST: u8 = 0x1;
const PCI_CONSECUTIVE: u8 = 0x2;
const PCI_FLOW_CONTROL: u8 = 0x3;

/// Flow Control status flag, byte 0 low nibble of a Flow Control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowStatus {
    ContinueToSend = 0x0,
    Wait = 0x1,
    Overflow = 0x2,
}

impl TryFrom<u8> for FlowStatus {
    type Error = IsoTpError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::ContinueToSend),
            0x1 => Ok(Self::Wait),
            0x2 => Ok(Self::Overflow),
            _ => Err(IsoTpError::UnexpectedFrame),
        }
    }
}

/// One decoded ISO-TP frame, still bounded by the 8-byte CAN payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsoTpFrame {
    /// Complete payload of up to 7 bytes.
    Single { data: Vec<u8> },
    /// Declares the total payload length (8..=4095) and carries the first 6 bytes.
    First { total_len: u16, data: Vec<u8> },
    /// Carries up to 7 bytes, `index` rolling 1..=15 then wrapping to 0.
    Consecutive { index: u8, data: Vec<u8> },
    /// Receiver-to-sender flow control.
    FlowControl { status: FlowStatus, block_size: u8, st_min: u8 },
}

impl IsoTpFrame {
    /// Encode this frame into an 8-byte CAN payload, padding unused trailing
    /// bytes with [`ISO_TP_PAD_BYTE`].
    pub fn encode(&self) -> Result<[u8; 8], IsoTpError> {
        let mut buf = [ISO_TP_PAD_BYTE; 8];
        match self {
            IsoTpFrame::Single { data } => {
                if data.len() > 7 {
                    return Err(IsoTpError::Overflow);
                }
                buf[0] = (PCI_SINGLE << 4) | (data.len() as u8);
                buf[1..1 + data.len()].copy_from_slice(data);
            }
            IsoTpFrame::First { total_len, data } => {
                if data.len() != 6 || *total_len > 0x0FFF {
                    return Err(IsoTpError::Overflow);
                }
                buf[0] = (PCI_FIRST << 4) | ((*total_len >> 8) as u8 & 0x0F);
                buf[1] = (*total_len & 0xFF) as u8;
                buf[2..8].copy_from_slice(data);
            }
            IsoTpFrame::Consecutive { index, data } => {
                if data.len() > 7 || *index > 0x0F {
                    return Err(IsoTpError::Overflow);
                }
                buf[0] = (PCI_CONSECUTIVE << 4) | index;
                buf[1..1 + data.len()].copy_from_slice(data);
            }
            IsoTpFrame::FlowControl { status, block_size, st_min } => {
                buf[0] = (PCI_FLOW_CONTROL << 4) | (*status as u8);
                buf[1] = *block_size;
                buf[2] = *st_min;
            }
        }
        Ok(buf)
    }

    /// Decode an 8-byte (or shorter, for a short Single Frame) CAN payload.
    pub fn decode(buf: &[u8]) -> Result<Self, IsoTpError> {
        if buf.is_empty() {
            return Err(IsoTpError::UnexpectedFrame);
        }
        let pci_type = buf[0] >> 4;
        match pci_type {
            PCI_SINGLE => {
                let len = (buf[0] & 0x0F) as usize;
                if len == 0 || len > 7 || buf.len() < 1 + len {
                    return Err(IsoTpError::UnexpectedFrame);
                }
                Ok(IsoTpFrame::Single { data: buf[1..1 + len].to_vec() })
            }
            PCI_FIRST => {
                if buf.len() < 8 {
                    return Err(IsoTpError::UnexpectedFrame);
                }
                let total_len = (((buf[0] & 0x0F) as u16) << 8) | buf[1] as u16;
                Ok(IsoTpFrame::First { total_len, data: buf[2..8].to_vec() })
            }
            PCI_CONSECUTIVE => {
                let index = buf[0] & 0x0F;
                Ok(IsoTpFrame::Consecutive { index, data: buf[1..].to_vec() })
            }
            PCI_FLOW_CONTROL => {
                if buf.len() < 3 {
                    return Err(IsoTpError::UnexpectedFrame);
                }
                let status = FlowStatus::try_from(buf[0] & 0x0F)?;
                Ok(IsoTpFrame::FlowControl { status, block_size: buf[1], st_min: buf[2] })
            }
            _ => Err(IsoTpError::UnexpectedFrame),
        }
    }
}

/// Converts an `st_min` byte into a delay. `0x00..=0x7F` is milliseconds;
/// `0xF1..=0xF9` is a multiple of 100 microseconds; anything else is treated
/// as the maximum-safe value of 127 ms, matching common ECU tolerances.
pub fn st_min_to_duration(st_min: u8) -> std::time::Duration {
    match st_min {
        0x00..=0x7F => std::time::Duration::from_millis(st_min as u64),
        0xF1..=0xF9 => std::time::Duration::from_micros((st_min as u64 - 0xF0) * 100),
        _ => std::time::Duration::from_millis(127),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame_roundtrip() {
        let frame = IsoTpFrame::Single { data: vec![0x10, 0x02] };
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded[0], 0x02);
        assert_eq!(&encoded[1..3], &[0x10, 0x02]);
        assert_eq!(encoded[3], ISO_TP_PAD_BYTE);
        assert_eq!(IsoTpFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_first_frame_roundtrip() {
        let frame = IsoTpFrame::First { total_len: 0x014D, data: vec![1, 2, 3, 4, 5, 6] };
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded[0], 0x11);
        assert_eq!(encoded[1], 0x4D);
        assert_eq!(IsoTpFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_consecutive_frame_index_wraps_in_range() {
        let frame = IsoTpFrame::Consecutive { index: 0x0F, data: vec![0xAB; 7] };
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded[0], 0x2F);
        assert_eq!(IsoTpFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_flow_control_continue_to_send() {
        let frame = IsoTpFrame::FlowControl { status: FlowStatus::ContinueToSend, block_size: 8, st_min: 0x0A };
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded, [0x30, 0x08, 0x0A, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA]);
        assert_eq!(IsoTpFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_st_min_conversion() {
        assert_eq!(st_min_to_duration(0x0A).as_millis(), 10);
        assert_eq!(st_min_to_duration(0xF5).as_micros(), 500);
        assert_eq!(st_min_to_duration(0xFA).as_millis(), 127);
    }

    #[test]
    fn test_single_frame_overflow_rejected() {
        let frame = IsoTpFrame::Single { data: vec![0; 8] };
        assert!(matches!(frame.encode(), Err(IsoTpError::Overflow)));
    }
}
