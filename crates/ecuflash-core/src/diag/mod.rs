//! Diagnostic Client (§4.3): ISO 14229 request/response correlation,
//! session control, and security unlock, plus the [`Phase`] enum used to
//! tag every error and progress event with where the orchestrator was when
//! it happened.

pub mod client;
pub mod security;
pub mod service;
pub mod session_state;

pub use client::DiagnosticClient;
pub use session_state::{DiagEvent, DiagSessionState};

/// One of the orchestrator's phases (§4.5, §9 glossary), used for progress
/// reporting and for tagging errors with where the session was when they
/// occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Prepare,
    Connect,
    Backup,
    CrcRefresh,
    Erase,
    Write,
    Verify,
    Finalize,
    Finalized,
    Aborted,
}

impl Phase {
    /// Default "safe to power off" heuristic for a phase in isolation: true
    /// before any bus-side erase/write activity has begun, or after the
    /// session has finished cleanly. The orchestrator overrides this with
    /// more precise knowledge during `Erase`/`Write`/`Verify`/rollback,
    /// since those phases are only unsafe while a transfer is genuinely
    /// in flight.
    pub fn is_safe_to_power_off(self) -> bool {
        matches!(self, Phase::Idle | Phase::Prepare | Phase::Connect | Phase::Backup | Phase::CrcRefresh | Phase::Finalized)
    }
}
