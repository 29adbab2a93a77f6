//! UDS (ISO 14229) service identifiers and request/response PDU encoding
//! (§6's service table).
//!
//! Follows the same manual, bounds-checked binary codec discipline as the
//! segmented-transfer command layer this crate's structure is patterned on:
//! explicit size constants, slice-bounds checks that return a typed error
//! rather than panicking, and comments citing the spec table the byte
//! layout comes from.

use crate::error::{DiagnosticError, NegativeResponseCode};

pub const SID_DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
pub const SID_ECU_RESET: u8 = 0x11;
pub const SID_SECURITY_ACCESS: u8 = 0x27;
pub const SID_TESTER_PRESENT: u8 = 0x3E;
pub const SID_READ_MEMORY_BY_ADDRESS: u8 = 0x23;
pub const SID_ROUTINE_CONTROL: u8 = 0x31;
pub const SID_REQUEST_DOWNLOAD: u8 = 0x34;
pub const SID_TRANSFER_DATA: u8 = 0x36;
pub const SID_REQUEST_TRANSFER_EXIT: u8 = 0x37;

/// First byte of any negative response.
pub const NEGATIVE_RESPONSE_SID: u8 = 0x7F;

/// Sub-function: enter the Programming diagnostic session.
pub const SUB_SESSION_PROGRAMMING: u8 = 0x02;
/// Sub-function: hard reset.
pub const SUB_ECU_RESET_HARD: u8 = 0x01;
/// Sub-function: suppress positive response on TesterPresent.
pub const SUB_TESTER_PRESENT_NO_RESPONSE: u8 = 0x00;
/// Sub-function: start a routine.
pub const SUB_ROUTINE_START: u8 = 0x01;
/// Sub-function: request routine results.
pub const SUB_ROUTINE_REQUEST_RESULTS: u8 = 0x03;

/// Routine identifier: controller checksum recalculation ("finalize").
pub const ROUTINE_ID_CHECKSUM_RECALC: u16 = 0xFF01;
/// Routine identifier: erase calibration sector(s).
pub const ROUTINE_ID_ERASE: u16 = 0xFF02;

/// Address-and-length-format identifier byte used by `ReadMemoryByAddress`
/// and `RequestDownload` (4-byte address, 4-byte length).
pub const ALFID_4_4: u8 = 0x44;
/// `dataFormatIdentifier` for an unencrypted, uncompressed transfer.
pub const DATA_FORMAT_RAW: u8 = 0x00;

/// Security access sub-function pairs: (request-seed, send-key), one per
/// algorithm slot. Slot 0 is algorithm A, slot 1 is B, slot 2 is C, slot 3
/// is RFTX.
pub const SECURITY_ACCESS_SUBFUNCTIONS: [(u8, u8); 4] =
    [(0x01, 0x02), (0x03, 0x04), (0x05, 0x06), (0x07, 0x08)];

/// The internal service PDU, per the data model: `{ service_id, sub, payload }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticFrame {
    pub service_id: u8,
    pub sub: Option<u8>,
    pub payload: Vec<u8>,
}

impl DiagnosticFrame {
    pub fn new(service_id: u8, sub: Option<u8>, payload: Vec<u8>) -> Self {
        Self { service_id, sub, payload }
    }

    /// Encode into the raw bytes sent over ISO-TP: SID, optional sub-function, payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.payload.len());
        buf.push(self.service_id);
        if let Some(sub) = self.sub {
            buf.push(sub);
        }
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// A decoded response: either a positive response to `expected_sid` (the
/// request SID + 0x40, by UDS convention) or a negative response carrying
/// an NRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticResponse {
    Positive { sid: u8, data: Vec<u8> },
    Negative { request_sid: u8, nrc: NegativeResponseCode },
}

impl DiagnosticResponse {
    /// Decode a raw ISO-TP payload. `0x7F req-sid nrc` is a negative
    /// response (byte 3 carries the NRC, per §4.3); otherwise the first
    /// byte must be `request_sid + 0x40`.
    pub fn decode(raw: &[u8], request_sid: u8) -> Result<Self, DiagnosticError> {
        if raw.is_empty() {
            return Err(DiagnosticError::MismatchedResponse);
        }
        if raw[0] == NEGATIVE_RESPONSE_SID {
            if raw.len() < 3 {
                return Err(DiagnosticError::MismatchedResponse);
            }
            if raw[1] != request_sid {
                return Err(DiagnosticError::MismatchedResponse);
            }
            return Ok(DiagnosticResponse::Negative {
                request_sid: raw[1],
                nrc: NegativeResponseCode(raw[2]),
            });
        }
        let expected_positive = request_sid.wrapping_add(0x40);
        if raw[0] != expected_positive {
            return Err(DiagnosticError::MismatchedResponse);
        }
        Ok(DiagnosticResponse::Positive { sid: raw[0], data: raw[1..].to_vec() })
    }
}

/// Builds `RequestDownload(addr=calibration_base, size=calibration_len, format=0x00, alfid=0x44)`.
pub fn request_download(addr: u32, size: u32) -> DiagnosticFrame {
    let mut payload = vec![DATA_FORMAT_RAW, ALFID_4_4];
    payload.extend_from_slice(&addr.to_be_bytes());
    payload.extend_from_slice(&size.to_be_bytes());
    DiagnosticFrame::new(SID_REQUEST_DOWNLOAD, None, payload)
}

/// Builds one `TransferData` block with the 1-byte rolling block counter.
pub fn transfer_data(block_counter: u8, chunk: &[u8]) -> DiagnosticFrame {
    DiagnosticFrame::new(SID_TRANSFER_DATA, Some(block_counter), chunk.to_vec())
}

/// Builds `RequestTransferExit`.
pub fn request_transfer_exit() -> DiagnosticFrame {
    DiagnosticFrame::new(SID_REQUEST_TRANSFER_EXIT, None, Vec::new())
}

/// Builds `ReadMemoryByAddress(addr, len)`.
pub fn read_memory_by_address(addr: u32, len: u32) -> DiagnosticFrame {
    let mut payload = vec![ALFID_4_4];
    payload.extend_from_slice(&addr.to_be_bytes());
    payload.extend_from_slice(&len.to_be_bytes());
    DiagnosticFrame::new(SID_READ_MEMORY_BY_ADDRESS, None, payload)
}

/// Builds `DiagnosticSessionControl(Programming)`.
pub fn diagnostic_session_control_programming() -> DiagnosticFrame {
    DiagnosticFrame::new(SID_DIAGNOSTIC_SESSION_CONTROL, Some(SUB_SESSION_PROGRAMMING), Vec::new())
}

/// Builds `ECUReset(hard)`.
pub fn ecu_reset_hard() -> DiagnosticFrame {
    DiagnosticFrame::new(SID_ECU_RESET, Some(SUB_ECU_RESET_HARD), Vec::new())
}

/// Builds `TesterPresent` with the positive response suppressed.
pub fn tester_present() -> DiagnosticFrame {
    DiagnosticFrame::new(SID_TESTER_PRESENT, Some(SUB_TESTER_PRESENT_NO_RESPONSE), Vec::new())
}

/// Builds `RoutineControl(start, routine_id)`.
pub fn routine_control_start(routine_id: u16, args: &[u8]) -> DiagnosticFrame {
    let mut payload = routine_id.to_be_bytes().to_vec();
    payload.extend_from_slice(args);
    DiagnosticFrame::new(SID_ROUTINE_CONTROL, Some(SUB_ROUTINE_START), payload)
}

/// Builds `RoutineControl(requestRoutineResults, routine_id)`, used to poll
/// for erase/checksum-routine completion.
pub fn routine_control_request_results(routine_id: u16) -> DiagnosticFrame {
    DiagnosticFrame::new(SID_ROUTINE_CONTROL, Some(SUB_ROUTINE_REQUEST_RESULTS), routine_id.to_be_bytes().to_vec())
}

/// Builds a `SecurityAccess` request-seed frame for the given algorithm slot (0..3).
pub fn security_access_request_seed(slot: usize) -> DiagnosticFrame {
    DiagnosticFrame::new(SID_SECURITY_ACCESS, Some(SECURITY_ACCESS_SUBFUNCTIONS[slot].0), Vec::new())
}

/// Builds a `SecurityAccess` send-key frame for the given algorithm slot (0..3).
pub fn security_access_send_key(slot: usize, key: u32) -> DiagnosticFrame {
    DiagnosticFrame::new(SID_SECURITY_ACCESS, Some(SECURITY_ACCESS_SUBFUNCTIONS[slot].1), key.to_be_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_download_encoding() {
        let frame = request_download(0x800000 + 0x100000, 0x80000);
        let encoded = frame.encode();
        assert_eq!(encoded[0], SID_REQUEST_DOWNLOAD);
        assert_eq!(encoded[1], DATA_FORMAT_RAW);
        assert_eq!(encoded[2], ALFID_4_4);
        assert_eq!(&encoded[3..7], &0x900000u32.to_be_bytes());
        assert_eq!(&encoded[7..11], &0x80000u32.to_be_bytes());
    }

    #[test]
    fn test_decode_positive_response() {
        let raw = [0x50, 0x02];
        let resp = DiagnosticResponse::decode(&raw, SID_DIAGNOSTIC_SESSION_CONTROL).unwrap();
        assert_eq!(resp, DiagnosticResponse::Positive { sid: 0x50, data: vec![0x02] });
    }

    #[test]
    fn test_decode_negative_response_invalid_key() {
        let raw = [0x7F, SID_SECURITY_ACCESS, 0x35];
        let resp = DiagnosticResponse::decode(&raw, SID_SECURITY_ACCESS).unwrap();
        assert_eq!(resp, DiagnosticResponse::Negative {
            request_sid: SID_SECURITY_ACCESS,
            nrc: NegativeResponseCode::INVALID_KEY,
        });
    }

    #[test]
    fn test_decode_rejects_mismatched_sid() {
        let raw = [0x51, 0x01];
        assert!(DiagnosticResponse::decode(&raw, SID_DIAGNOSTIC_SESSION_CONTROL).is_err());
    }
}
