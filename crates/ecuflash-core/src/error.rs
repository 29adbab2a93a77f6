//! Layered error types for the flashing core.
//!
//! Each layer of the stack (transport, ISO-TP, diagnostics, orchestrator)
//! gets its own `thiserror`-derived enum rather than one flat error type, so
//! a caller that only implements a [`crate::transport::Transport`] only ever
//! needs to construct a [`TransportError`]. [`CoreError`] is the top-level
//! sum type the orchestrator returns, with `#[from]` conversions wiring the
//! layers together.

use crate::diag::Phase;

/// Errors a [`crate::transport::Transport`] implementation may signal.
/// No retry happens at this layer; all retries are decided above it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("CAN controller entered bus-off state")]
    BusOff,
    #[error("transmit queue overflow")]
    TxOverflow,
    #[error("no frame received before deadline")]
    RxTimeout,
    #[error("transport is closed")]
    Closed,
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Errors produced while segmenting or reassembling ISO-TP payloads.
#[derive(Debug, thiserror::Error)]
pub enum IsoTpError {
    #[error("timed out waiting for flow control or consecutive frame")]
    Timeout,
    #[error("received an unexpected frame type or sequence index")]
    UnexpectedFrame,
    #[error("payload exceeds the 4095-byte ISO-TP maximum")]
    Overflow,
    #[error("peer rejected the transfer (flow control Overflow)")]
    Rejected,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A negative response NRC, carried so the orchestrator can classify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegativeResponseCode(pub u8);

impl NegativeResponseCode {
    pub const RESPONSE_PENDING: Self = Self(0x78);
    pub const BUSY_REPEAT_REQUEST: Self = Self(0x21);
    pub const CONDITIONS_NOT_CORRECT: Self = Self(0x22);
    pub const REQUEST_SEQUENCE_ERROR: Self = Self(0x24);
    pub const INVALID_KEY: Self = Self(0x35);
    pub const EXCEED_NUMBER_OF_ATTEMPTS: Self = Self(0x36);
    pub const REQUIRED_TIME_DELAY_NOT_EXPIRED: Self = Self(0x37);

    pub fn is_busy(self) -> bool {
        matches!(self.0, 0x21 | 0x23)
    }
}

/// Errors from the diagnostic request/response layer.
#[derive(Debug, thiserror::Error)]
pub enum DiagnosticError {
    #[error(transparent)]
    IsoTp(#[from] IsoTpError),
    #[error("negative response, NRC {:#04X}", .0.0)]
    Negative(NegativeResponseCode),
    #[error("security access denied after exhausting all algorithms")]
    SecurityDenied,
    #[error("response did not match the service we requested")]
    MismatchedResponse,
}

/// Whether a best-effort rollback download attempted after a
/// [`OrchestratorError::VerifyMismatch`] succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    Ok,
    Failed(String),
}

impl core::fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Ok => f.write_str("rollback ok"),
            Self::Failed(reason) => write!(f, "rollback failed: {reason}"),
        }
    }
}

/// Errors from the flash orchestrator and safety gate.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Diagnostic(#[from] DiagnosticError),
    #[error("safety gate refused the image at layer {layer}: {details}")]
    ValidationRefused { layer: u8, details: String },
    #[error("no verified backup exists for variant {0:?}; refusing to proceed")]
    BackupRequired(String),
    #[error("failed to write or verify backup: {0}")]
    BackupWriteFailed(String),
    #[error("erase routine failed: {0}")]
    EraseFailed(String),
    #[error("controller rejected RequestDownload: {0}")]
    DownloadRejected(String),
    #[error("TransferData failed at offset {offset}: {reason}")]
    TransferFailed { offset: usize, reason: String },
    #[error("controller rejected RequestTransferExit: {0}")]
    ExitRejected(String),
    #[error("verification mismatch at offset {first_bad_offset:#X} ({rollback})")]
    VerifyMismatch { first_bad_offset: usize, rollback: RollbackOutcome },
    #[error("checksum-recalculation routine failed: {0}")]
    FinalizeFailed(String),
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
    #[error("session was cancelled during phase {0:?}")]
    Cancelled(Phase),
}

/// Top-level error type, pairing the underlying cause with the phase the
/// session was in and whether the controller is left in a state that is
/// safe to power off, per the error handling design.
#[derive(Debug, thiserror::Error)]
#[error("{source} (phase={phase:?}, bytes_transferred={bytes_transferred}, safe_to_power_off={safe_to_power_off})")]
pub struct CoreError {
    #[source]
    pub source: OrchestratorError,
    pub phase: Phase,
    pub bytes_transferred: usize,
    pub safe_to_power_off: bool,
}

impl CoreError {
    pub fn new(source: OrchestratorError, phase: Phase, bytes_transferred: usize, safe_to_power_off: bool) -> Self {
        Self { source, phase, bytes_transferred, safe_to_power_off }
    }
}
