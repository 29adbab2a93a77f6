//! Flash Orchestrator & Safety Gate (§4.5): the one component with control
//! flow. [`FlashSession`] drives phases A (validate) through G (finalize)
//! over a caller-supplied [`Transport`], consulting every other layer but
//! never retried itself — it is the layer that decides whether to retry.
//!
//! Like the rest of this crate, a session never stores the transport or
//! reads global state: `transport` is a parameter on every call (the same
//! pattern [`crate::diag::client::DiagnosticClient`] already uses), and
//! configuration, logging context, and the cancellation flag are explicit
//! fields threaded through `&mut self`, per the design note that global
//! singleton logging/settings become explicit parameters here.

use crate::backup;
use crate::config::FlashConfig;
use crate::diag::client::DiagnosticClient;
use crate::diag::service::{self, DiagnosticResponse};
use crate::diag::Phase;
use crate::error::{CoreError, DiagnosticError, OrchestratorError, RollbackOutcome};
use crate::integrity::{self, CalibrationImage, ZoneMap};
use crate::log::{flash_debug, flash_info, flash_warn, FlashLogContext};
use crate::oplog::{OpLogError, OperationLog};
use crate::safety::{self, ValidationOutcome, ValidationWarning};
use crate::transport::Transport;
use crate::types::{
    BUSY_RETRY_BACKOFF_MS, BUSY_RETRY_MAX_ATTEMPTS, CALIBRATION_REGION_START, ERASE_POLL_INTERVAL_MS,
    ERASE_POLL_TIMEOUT_MS, TRANSFER_CHUNK_CAP,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A caller-shared cancellation flag, checked at phase boundaries and
/// between transfer blocks (§4.5, §5). Cheaply cloned; setting it from any
/// clone cancels every clone's session.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An in-flight progress update, delivered in strict phase-and-offset order
/// (§5); no event is emitted after a terminal event. Sent over a
/// `crossbeam_channel` sender so the caller can consume events from a
/// separate thread without the orchestrator taking on any async runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    PhaseStarted(Phase),
    PhaseCompleted(Phase),
    Transfer { bytes_sent: usize, bytes_total: usize },
    Warning(ValidationWarning),
}

pub type ProgressSender = crossbeam_channel::Sender<ProgressEvent>;

/// Successful terminal outcome of [`FlashSession::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub bytes_transferred: usize,
    pub warnings: Vec<ValidationWarning>,
}

/// Errors constructing a [`FlashSession`] before any bus activity.
#[derive(Debug, thiserror::Error)]
pub enum BeginFlashError {
    #[error(transparent)]
    ZoneMap(#[from] crate::integrity::ZoneMapError),
    #[error(transparent)]
    OpLog(#[from] OpLogError),
    #[error("variant.size ({size}) does not fit inside the full candidate image")]
    CalibrationWindowOutOfRange { size: usize },
}

/// One flash attempt's state (§3's `FlashSession` data model): the
/// diagnostic client, the variant's zone map, the current phase, and the
/// ambient logging/oplog/cancellation handles. Single-writer and
/// single-use: [`Self::run`] is meant to be called once, and
/// [`Self::end_flash`] consumes the session.
pub struct FlashSession {
    session_id: u64,
    config: FlashConfig,
    diag: DiagnosticClient,
    zone_map: ZoneMap,
    phase: Phase,
    log_ctx: FlashLogContext,
    oplog: OperationLog,
    cancel: CancellationToken,
    backup_bytes: Option<Vec<u8>>,
}

impl FlashSession {
    /// Constructs a session bound to `config`, per the `FlashSession`
    /// lifecycle ("created by `begin_flash`").
    pub fn begin_flash(session_id: u64, config: FlashConfig, cancel: CancellationToken) -> Result<Self, BeginFlashError> {
        if CALIBRATION_REGION_START + config.variant.size > crate::types::FULL_IMAGE_LEN {
            return Err(BeginFlashError::CalibrationWindowOutOfRange { size: config.variant.size });
        }
        let zone_map = integrity::default_zone_map(config.variant.id)?;
        let mut diag = DiagnosticClient::new(config.variant.tx_id, config.variant.rx_id);
        diag.set_timing_overrides(config.timing.block_size_override, config.timing.st_min_override, config.timing.p2_star_ms);
        diag.set_security_policy(config.security.algorithm_order.clone(), config.security.lockout_backoff_ms);
        let oplog_path = config.safety.backup_store_path.join("oplog.jsonl");
        let oplog = OperationLog::open(&oplog_path)?;

        let mut session = Self {
            session_id,
            config,
            diag,
            zone_map,
            phase: Phase::Idle,
            log_ctx: FlashLogContext::new(session_id),
            oplog,
            cancel,
            backup_bytes: None,
        };
        session.log_event("begin_flash", &format!("variant={}", session.config.variant.id));
        Ok(session)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drives phases A through G to completion. `stock` is the known-good
    /// reference image for layer 1/3 diffing (§4.5 Phase A); `explicit_warning_ack`
    /// satisfies layer 7 when the validator surfaced unclassified-diff warnings
    /// and `config.safety.require_explicit_warning_ack` is set.
    pub fn run(
        &mut self,
        transport: &mut dyn Transport,
        mut candidate: CalibrationImage,
        stock: Option<&[u8]>,
        explicit_warning_ack: bool,
        progress: &ProgressSender,
    ) -> Result<SessionOutcome, CoreError> {
        let mut bytes_transferred = 0usize;

        let outcome = self.phase_a_validate(&candidate, stock, explicit_warning_ack, progress).map_err(|e| self.fail(e, bytes_transferred))?;

        self.phase_b_connect_and_backup(transport, progress).map_err(|e| self.fail(e, bytes_transferred))?;

        self.phase_c_refresh_crcs(&mut candidate).map_err(|e| self.fail(e, bytes_transferred))?;

        self.phase_d_erase(transport, progress).map_err(|e| self.fail(e, bytes_transferred))?;

        bytes_transferred = self
            .phase_e_write(transport, &candidate, progress)
            .map_err(|e| self.fail(e, bytes_transferred))?;

        self.phase_f_verify(transport, &candidate, progress)
            .map_err(|e| self.fail(e, bytes_transferred))?;

        self.phase_g_finalize(transport, progress).map_err(|e| self.fail(e, bytes_transferred))?;

        self.log_event("finalized", &format!("bytes_transferred={bytes_transferred}"));
        Ok(SessionOutcome { bytes_transferred, warnings: outcome.warnings })
    }

    /// Consumes the session, per the `FlashSession` lifecycle ("destroyed by
    /// `end_flash`").
    pub fn end_flash(self) {
        let _ = self;
    }

    // -- Phase A ----------------------------------------------------------

    fn phase_a_validate(
        &mut self,
        candidate: &CalibrationImage,
        stock: Option<&[u8]>,
        explicit_warning_ack: bool,
        progress: &ProgressSender,
    ) -> Result<ValidationOutcome, OrchestratorError> {
        self.enter_phase(Phase::Prepare, progress);
        let outcome = safety::validate_image(self.config.variant.id, &candidate.bytes, stock)?;
        for warning in &outcome.warnings {
            let _ = progress.send(ProgressEvent::Warning(warning.clone()));
        }
        if !outcome.warnings.is_empty() && self.config.safety.require_explicit_warning_ack && !explicit_warning_ack {
            return Err(OrchestratorError::ValidationRefused {
                layer: 7,
                details: format!("{} unclassified diff(s) require explicit acknowledgement", outcome.warnings.len()),
            });
        }
        self.complete_phase(Phase::Prepare, progress);
        Ok(outcome)
    }

    // -- Phase B ------------------------------------------------------------

    fn phase_b_connect_and_backup(&mut self, transport: &mut dyn Transport, progress: &ProgressSender) -> Result<(), OrchestratorError> {
        self.enter_phase(Phase::Connect, progress);
        self.check_cancel()?;

        self.diag.start_programming_session(transport)?;
        self.diag.unlock_security(transport)?;
        self.complete_phase(Phase::Connect, progress);

        self.enter_phase(Phase::Backup, progress);
        self.check_cancel()?;
        let region_addr = self.calibration_addr();
        let region_len = self.config.variant.size;
        let on_controller = self.read_region(transport, region_addr, region_len, progress)?;

        let record = backup::write_backup(
            &self.config.safety.backup_store_path,
            self.config.variant.id,
            &on_controller,
            chrono::Utc::now(),
            None,
        )
        .map_err(|e| OrchestratorError::BackupWriteFailed(e.to_string()))?;
        backup::verify_backup(&record).map_err(|e| OrchestratorError::BackupWriteFailed(e.to_string()))?;
        self.log_event("backup_written", &record.bin_path.display().to_string());
        self.backup_bytes = Some(on_controller);
        self.complete_phase(Phase::Backup, progress);
        Ok(())
    }

    // -- Phase C ------------------------------------------------------------

    fn phase_c_refresh_crcs(&mut self, candidate: &mut CalibrationImage) -> Result<(), OrchestratorError> {
        self.enter_phase(Phase::CrcRefresh, &null_sender());
        self.check_cancel()?;
        integrity::zonemap::refresh_all_crcs(&mut candidate.bytes, &self.zone_map);
        integrity::zonemap::verify_all_crcs(&candidate.bytes, &self.zone_map)
            .map_err(|mismatches| OrchestratorError::InternalInvariant(format!("refresh_all_crcs left {} zone(s) inconsistent", mismatches.len())))?;
        Ok(())
    }

    // -- Phase D ------------------------------------------------------------

    fn phase_d_erase(&mut self, transport: &mut dyn Transport, progress: &ProgressSender) -> Result<(), OrchestratorError> {
        self.enter_phase(Phase::Erase, progress);
        self.check_cancel()?;

        let addr = self.calibration_addr();
        let len = self.config.variant.size as u32;
        let mut args = addr.to_be_bytes().to_vec();
        args.extend_from_slice(&len.to_be_bytes());

        let response = self.send_request(transport, service::routine_control_start(service::ROUTINE_ID_ERASE, &args))?;
        self.expect_positive(response).map_err(|reason| OrchestratorError::EraseFailed(reason))?;

        let deadline = Instant::now() + Duration::from_millis(ERASE_POLL_TIMEOUT_MS);
        loop {
            if Instant::now() >= deadline {
                return Err(OrchestratorError::EraseFailed("erase routine did not complete within timeout".to_string()));
            }
            std::thread::sleep(Duration::from_millis(ERASE_POLL_INTERVAL_MS));
            self.diag.maybe_send_tester_present(transport, Instant::now()).map_err(OrchestratorError::from)?;
            let response = self
                .send_request(transport, service::routine_control_request_results(service::ROUTINE_ID_ERASE))?;
            let data = self.expect_positive(response).map_err(|reason| OrchestratorError::EraseFailed(reason))?;
            // `data[0]` echoes the requestRoutineResults sub-function; the
            // routine's own status byte (0x00 = complete, else still running)
            // follows it.
            let complete = data.get(1).copied().unwrap_or(0) == 0x00;
            if complete {
                break;
            }
        }
        self.complete_phase(Phase::Erase, progress);
        Ok(())
    }

    // -- Phase E ------------------------------------------------------------

    fn phase_e_write(&mut self, transport: &mut dyn Transport, candidate: &CalibrationImage, progress: &ProgressSender) -> Result<usize, OrchestratorError> {
        self.enter_phase(Phase::Write, progress);
        self.check_cancel()?;

        let region = self.calibration_region(candidate);
        let addr = self.calibration_addr();
        self.transfer_image(transport, addr, region, progress)?;

        self.complete_phase(Phase::Write, progress);
        Ok(region.len())
    }

    /// Shared by Phase E's forward write and Phase F's best-effort rollback:
    /// `RequestDownload` then `TransferData` blocks capped at
    /// [`TRANSFER_CHUNK_CAP`] bytes with the 1-byte rolling counter, then
    /// `RequestTransferExit`.
    fn transfer_image(&mut self, transport: &mut dyn Transport, addr: u32, bytes: &[u8], progress: &ProgressSender) -> Result<(), OrchestratorError> {
        let response = self.send_request(transport, service::request_download(addr, bytes.len() as u32))?;
        self.expect_positive(response).map_err(OrchestratorError::DownloadRejected)?;

        let mut block_counter: u8 = 0x01;
        let mut sent = 0usize;
        while sent < bytes.len() {
            self.check_cancel().map_err(|_| OrchestratorError::Cancelled(self.phase))?;
            let end = (sent + TRANSFER_CHUNK_CAP).min(bytes.len());
            let chunk = &bytes[sent..end];
            let response = self
                .send_request(transport, service::transfer_data(block_counter, chunk))
                .map_err(|e| OrchestratorError::TransferFailed { offset: sent, reason: e.to_string() })?;
            self.expect_positive(response).map_err(|reason| OrchestratorError::TransferFailed { offset: sent, reason })?;

            sent = end;
            block_counter = if block_counter == 0xFF { 0x00 } else { block_counter + 1 };
            let _ = progress.send(ProgressEvent::Transfer { bytes_sent: sent, bytes_total: bytes.len() });
            self.diag.maybe_send_tester_present(transport, Instant::now()).map_err(OrchestratorError::from)?;
        }

        let response = self.send_request(transport, service::request_transfer_exit())?;
        self.expect_positive(response).map_err(OrchestratorError::ExitRejected)?;
        Ok(())
    }

    // -- Phase F ------------------------------------------------------------

    fn phase_f_verify(&mut self, transport: &mut dyn Transport, candidate: &CalibrationImage, progress: &ProgressSender) -> Result<(), OrchestratorError> {
        self.enter_phase(Phase::Verify, progress);
        self.check_cancel()?;

        let region = self.calibration_region(candidate);
        let addr = self.calibration_addr();
        let read_back = self.read_region(transport, addr, region.len(), progress)?;

        if let Some(first_bad_offset) = first_mismatch(region, &read_back) {
            let rollback = self.attempt_rollback(transport, progress);
            return Err(OrchestratorError::VerifyMismatch { first_bad_offset, rollback });
        }
        self.complete_phase(Phase::Verify, progress);
        Ok(())
    }

    /// Best-effort: re-download the pre-erase backup. Never itself returns
    /// an error to the caller beyond what it reports in the outcome, since
    /// the session is already failing with `VerifyMismatch`.
    fn attempt_rollback(&mut self, transport: &mut dyn Transport, progress: &ProgressSender) -> RollbackOutcome {
        let Some(backup) = self.backup_bytes.clone() else {
            return RollbackOutcome::Failed("no in-memory backup available to restore".to_string());
        };
        let addr = self.calibration_addr();
        match self.transfer_image(transport, addr, &backup, progress) {
            Ok(()) => RollbackOutcome::Ok,
            Err(e) => RollbackOutcome::Failed(e.to_string()),
        }
    }

    // -- Phase G ------------------------------------------------------------

    fn phase_g_finalize(&mut self, transport: &mut dyn Transport, progress: &ProgressSender) -> Result<(), OrchestratorError> {
        self.enter_phase(Phase::Finalize, progress);
        self.check_cancel()?;

        let response = self.send_request(transport, service::routine_control_start(service::ROUTINE_ID_CHECKSUM_RECALC, &[]))?;
        self.expect_positive(response).map_err(OrchestratorError::FinalizeFailed)?;

        self.diag.ecu_reset(transport)?;
        self.phase = Phase::Finalized;
        let _ = progress.send(ProgressEvent::PhaseCompleted(Phase::Finalize));
        let _ = progress.send(ProgressEvent::PhaseCompleted(Phase::Finalized));
        Ok(())
    }

    // -- shared helpers -------------------------------------------------

    fn calibration_addr(&self) -> u32 {
        self.config.variant.base_addr + CALIBRATION_REGION_START as u32
    }

    fn calibration_region<'c>(&self, candidate: &'c CalibrationImage) -> &'c [u8] {
        &candidate.bytes[CALIBRATION_REGION_START..CALIBRATION_REGION_START + self.config.variant.size]
    }

    fn read_region(&mut self, transport: &mut dyn Transport, addr: u32, len: usize, progress: &ProgressSender) -> Result<Vec<u8>, OrchestratorError> {
        let mut buf = Vec::with_capacity(len);
        let mut offset = 0usize;
        while offset < len {
            self.check_cancel()?;
            let chunk_len = (len - offset).min(TRANSFER_CHUNK_CAP);
            let response = self.send_request(transport, service::read_memory_by_address(addr + offset as u32, chunk_len as u32))?;
            match response {
                DiagnosticResponse::Positive { data, .. } => buf.extend_from_slice(&data),
                DiagnosticResponse::Negative { nrc, .. } => {
                    return Err(OrchestratorError::Diagnostic(DiagnosticError::Negative(nrc)));
                }
            }
            offset += chunk_len;
            let _ = progress.send(ProgressEvent::Transfer { bytes_sent: offset, bytes_total: len });
            self.diag.maybe_send_tester_present(transport, Instant::now()).map_err(OrchestratorError::from)?;
        }
        Ok(buf)
    }

    /// Sends one request, retrying busy responses (`0x21`/`0x23`) with
    /// backoff up to [`BUSY_RETRY_MAX_ATTEMPTS`] times and retrying an
    /// ISO-TP-layer failure once, per the error-handling design's
    /// retry-belongs-to-the-orchestrator policy.
    fn send_request(&mut self, transport: &mut dyn Transport, frame: service::DiagnosticFrame) -> Result<DiagnosticResponse, OrchestratorError> {
        let mut isotp_retried = false;
        let mut busy_attempts = 0u8;
        loop {
            let timeout = Duration::from_millis(self.config.timing.p2_ms);
            match self.diag.request(transport, frame.clone(), timeout) {
                Ok(response) => return Ok(response),
                Err(DiagnosticError::Negative(nrc)) if nrc.is_busy() && busy_attempts < BUSY_RETRY_MAX_ATTEMPTS => {
                    busy_attempts += 1;
                    flash_warn!(&self.log_ctx, "busy response, retry {busy_attempts}/{BUSY_RETRY_MAX_ATTEMPTS}");
                    std::thread::sleep(Duration::from_millis(BUSY_RETRY_BACKOFF_MS));
                }
                Err(DiagnosticError::IsoTp(inner)) if !isotp_retried => {
                    isotp_retried = true;
                    flash_debug!(&self.log_ctx, "isotp error {inner}, retrying service once");
                }
                Err(other) => return Err(OrchestratorError::Diagnostic(other)),
            }
        }
    }

    fn expect_positive(&self, response: DiagnosticResponse) -> Result<Vec<u8>, String> {
        match response {
            DiagnosticResponse::Positive { data, .. } => Ok(data),
            DiagnosticResponse::Negative { nrc, .. } => Err(format!("NRC {:#04X}", nrc.0)),
        }
    }

    fn check_cancel(&self) -> Result<(), OrchestratorError> {
        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled(self.phase));
        }
        Ok(())
    }

    fn enter_phase(&mut self, phase: Phase, progress: &ProgressSender) {
        self.phase = phase;
        self.log_ctx.enter_phase(phase);
        flash_info!(&self.log_ctx, "entering phase");
        self.log_event("phase_enter", &format!("{phase:?}"));
        let _ = progress.send(ProgressEvent::PhaseStarted(phase));
    }

    fn complete_phase(&mut self, phase: Phase, progress: &ProgressSender) {
        self.log_event("phase_complete", &format!("{phase:?}"));
        let _ = progress.send(ProgressEvent::PhaseCompleted(phase));
    }

    fn log_event(&mut self, event: &str, detail: &str) {
        if let Err(e) = self.oplog.append(self.session_id, self.phase, event, detail) {
            flash_warn!(&self.log_ctx, "failed to append operation log entry: {e}");
        }
    }

    fn fail(&mut self, source: OrchestratorError, bytes_transferred: usize) -> CoreError {
        let safe_to_power_off = safe_to_power_off_for(self.phase, &source);
        let phase = self.phase;
        flash_warn!(&self.log_ctx, "session failed: {source}");
        self.log_event("error", &source.to_string());
        self.phase = Phase::Aborted;
        CoreError::new(source, phase, bytes_transferred, safe_to_power_off)
    }
}

/// Whether the controller is left in a state safe to power off, given the
/// phase a failure occurred in and the specific error (§7): mid-transfer
/// failures and a failed rollback are unsafe; a successful rollback and
/// everything outside Phase E/F/partial-rollback follows the phase default.
fn safe_to_power_off_for(phase: Phase, source: &OrchestratorError) -> bool {
    match source {
        OrchestratorError::TransferFailed { .. } => false,
        OrchestratorError::VerifyMismatch { rollback, .. } => matches!(rollback, RollbackOutcome::Ok),
        _ => phase.is_safe_to_power_off(),
    }
}

/// Index of the first byte at which `a` and `b` differ, if any.
fn first_mismatch(a: &[u8], b: &[u8]) -> Option<usize> {
    a.iter().zip(b.iter()).position(|(x, y)| x != y).or_else(|| {
        if a.len() != b.len() {
            Some(a.len().min(b.len()))
        } else {
            None
        }
    })
}

/// A progress sender whose receiver is immediately dropped, for the one
/// internal phase (CRC refresh) that has no meaningful progress events of
/// its own but still goes through `enter_phase` for consistent oplog/logging.
fn null_sender() -> ProgressSender {
    crossbeam_channel::bounded(1).0
}
