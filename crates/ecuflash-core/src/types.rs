//! Protocol-level primitive types and constants shared across layers.
//!
//! Mirrors the convention of keeping wire-level constants (frame sizes,
//! default identifiers, alias types) in one small module that the rest of
//! the crate imports from, rather than scattering magic numbers.

/// Maximum ISO-TP payload length per direction (ISO 15765-2, 12-bit length field).
pub const ISO_TP_MAX_PAYLOAD: usize = 4095;

/// Maximum payload carried by a Single Frame (PCI nibble 0x0).
pub const ISO_TP_SINGLE_FRAME_MAX: usize = 7;

/// Bytes of payload carried by a First Frame.
pub const ISO_TP_FIRST_FRAME_PAYLOAD: usize = 6;

/// Bytes of payload carried by a Consecutive Frame.
pub const ISO_TP_CONSECUTIVE_FRAME_PAYLOAD: usize = 7;

/// Byte used to pad unused trailing bytes of a CAN frame.
pub const ISO_TP_PAD_BYTE: u8 = 0xAA;

/// `N_BS`: default timeout waiting for a Flow Control frame after First Frame, in ms.
pub const N_BS_MS: u64 = 1000;

/// `N_BR`: maximum delay before emitting Flow Control after a First Frame, in ms.
pub const N_BR_MAX_MS: u64 = 900;

/// `N_CR`: maximum gap between Consecutive Frames during reassembly, in ms.
pub const N_CR_MS: u64 = 1000;

/// `P2*`: extended server response timeout after a `0x78` ResponsePending, in ms.
pub const P2_STAR_MS: u64 = 5000;

/// Per-direction chunk cap the orchestrator enforces for `TransferData`/`ReadMemoryByAddress`,
/// reflecting a controller-side buffer limit (distinct from the 4095-byte ISO-TP ceiling).
pub const TRANSFER_CHUNK_CAP: usize = 512;

/// Interval at which `TesterPresent` is emitted while a long-running routine is in flight.
pub const TESTER_PRESENT_INTERVAL_MS: u64 = 2000;

/// Poll interval the orchestrator uses while waiting for the erase routine
/// (`RoutineControl(requestRoutineResults, 0xFF02)`) to report completion.
pub const ERASE_POLL_INTERVAL_MS: u64 = 500;

/// Upper bound on total time spent polling for erase completion before the
/// orchestrator gives up with `EraseFailed`.
pub const ERASE_POLL_TIMEOUT_MS: u64 = 30_000;

/// Maximum consecutive busy (`0x21`/`0x23`) retries the orchestrator
/// performs for one request before surfacing the negative response.
pub const BUSY_RETRY_MAX_ATTEMPTS: u8 = 3;

/// Backoff between busy retries.
pub const BUSY_RETRY_BACKOFF_MS: u64 = 50;

/// Default tester-to-ECU CAN identifier for the supported variants.
pub const DEFAULT_TX_ID: u32 = 0x612;

/// Default ECU-to-tester CAN identifier for the supported variants.
pub const DEFAULT_RX_ID: u32 = 0x613;

/// Identifies one of the two supported controller families. The registry of
/// zone maps, forbidden regions, and address layouts is a closed table
/// indexed by this enum rather than an open-ended string or dynamic map,
/// per the design note that dynamic typing in the source becomes a closed
/// sum over a fixed set of variants here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum ControllerVariant {
    Msd80,
    Msd81,
}

impl ControllerVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Msd80 => "MSD80",
            Self::Msd81 => "MSD81",
        }
    }
}

impl core::fmt::Display for ControllerVariant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nominal base address of the calibration region in the controller's flash map.
pub const CALIBRATION_BASE_ADDR: u32 = 0x800000;

/// Start offset (within the base-addressed flash map) of the calibration region.
pub const CALIBRATION_REGION_START: usize = 0x100000;

/// End offset (exclusive) of the calibration region.
pub const CALIBRATION_REGION_END: usize = 0x180000;

/// Declared size of the calibration region: `CALIBRATION_REGION_END - CALIBRATION_REGION_START`.
pub const CALIBRATION_REGION_LEN: usize = CALIBRATION_REGION_END - CALIBRATION_REGION_START;

/// Declared length of a full candidate image, both variants in this
/// implementation. The calibration region the orchestrator actually
/// transmits/CRC-protects is a sub-window of this larger image; the
/// wider span exists so forbidden regions like the boot code block
/// (`0x000000..0x007FFF`) and the flash counter (`0x1F0000..0x200000`)
/// are addressable at all, since they fall outside the calibration
/// region's own narrower byte range. See the safety-gate image-addressing
/// note in the grounding ledger.
pub const FULL_IMAGE_LEN: usize = 0x200000;
