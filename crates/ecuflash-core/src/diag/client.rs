//! Ties the ISO-TP session, the UDS service codec, the session state
//! machine, and the security-access try-all policy together into one
//! request/response client (§4.3).
//!
//! Request/response correlation and the `0x78` ResponsePending retry loop
//! are expressed the same way the ISO-TP layer expresses segmentation: an
//! explicit, deadline-parameterised blocking call rather than a
//! caller-driven poll loop.

use crate::diag::security::{self, SecurityAccessIo, SecurityOutcome};
use crate::diag::service::{self, DiagnosticFrame, DiagnosticResponse};
use crate::diag::session_state::{DiagEvent, DiagSessionStateMachine, UnexpectedEventInState};
use crate::error::{DiagnosticError, NegativeResponseCode};
use crate::isotp::session::IsoTpSession;
use crate::transport::Transport;
use crate::types::{P2_STAR_MS, TESTER_PRESENT_INTERVAL_MS};
use std::time::{Duration, Instant};

/// A connected diagnostic endpoint: one ISO-TP session plus the session
/// state machine tracking what the controller currently believes about us.
pub struct DiagnosticClient {
    isotp: IsoTpSession,
    pub state_machine: DiagSessionStateMachine,
    last_tester_present: Option<Instant>,
    p2_star_ms: u64,
    algorithm_order: Vec<String>,
    lockout_backoff_ms: u64,
}

impl DiagnosticClient {
    pub fn new(tx_id: u32, rx_id: u32) -> Self {
        Self {
            isotp: IsoTpSession::new(tx_id, rx_id),
            state_machine: DiagSessionStateMachine::new(),
            last_tester_present: None,
            p2_star_ms: P2_STAR_MS,
            algorithm_order: security::default_algorithms().iter().map(|a| a.name().to_string()).collect(),
            lockout_backoff_ms: 0,
        }
    }

    /// Applies the `timing.st_min_override`/`timing.block_size_override`/
    /// `timing.p2_star_ms` config knobs (§6) to the underlying ISO-TP
    /// reassembly parameters and the P2* response-pending deadline.
    pub fn set_timing_overrides(&mut self, block_size_override: Option<u8>, st_min_override: Option<u8>, p2_star_ms: u64) {
        self.isotp.block_size_override = block_size_override;
        self.isotp.st_min_override = st_min_override;
        self.p2_star_ms = p2_star_ms;
    }

    /// Applies the `security.algorithm_order`/`security.lockout_backoff_ms`
    /// config knobs (§6, §9) to the seed/key try-all policy.
    pub fn set_security_policy(&mut self, algorithm_order: Vec<String>, lockout_backoff_ms: u64) {
        self.algorithm_order = algorithm_order;
        self.lockout_backoff_ms = lockout_backoff_ms;
    }

    /// Sends one request and waits for its correlated response, transparently
    /// restarting the P2* timer on each `0x78` ResponsePending (§4.3).
    pub fn request(
        &mut self,
        transport: &mut dyn Transport,
        frame: DiagnosticFrame,
        initial_timeout: Duration,
    ) -> Result<DiagnosticResponse, DiagnosticError> {
        let request_sid = frame.service_id;
        self.isotp.send(transport, &frame.encode())?;

        let mut deadline = Instant::now() + initial_timeout;
        loop {
            let raw = self.isotp.receive(transport, deadline)?;
            let response = DiagnosticResponse::decode(&raw, request_sid)?;
            if let DiagnosticResponse::Negative { nrc, .. } = &response {
                if *nrc == NegativeResponseCode::RESPONSE_PENDING {
                    deadline = Instant::now() + Duration::from_millis(self.p2_star_ms);
                    continue;
                }
                return Err(DiagnosticError::Negative(*nrc));
            }
            return Ok(response);
        }
    }

    /// Enters the Programming diagnostic session and advances the state
    /// machine on acceptance.
    pub fn start_programming_session(
        &mut self,
        transport: &mut dyn Transport,
    ) -> Result<(), DiagnosticError> {
        self.request(transport, service::diagnostic_session_control_programming(), Duration::from_millis(self.p2_star_ms))?;
        self.state_machine
            .process_event(DiagEvent::SessionControlProgrammingAccepted)
            .map_err(state_transition_rejected)?;
        Ok(())
    }

    /// Runs the seed/key try-all unlock policy and advances the state
    /// machine on success.
    pub fn unlock_security(
        &mut self,
        transport: &mut dyn Transport,
    ) -> Result<SecurityOutcome, DiagnosticError> {
        let algorithms = security::algorithms_for_order(&self.algorithm_order);
        let lockout_backoff = Duration::from_millis(self.lockout_backoff_ms);
        let outcome = {
            let mut io = ClientSecurityIo { client: self, transport };
            security::unlock(&mut io, &algorithms, lockout_backoff)?
        };
        self.state_machine
            .process_event(DiagEvent::SecurityAccessGranted)
            .map_err(state_transition_rejected)?;
        Ok(outcome)
    }

    /// Issues a hard ECU reset and resets the state machine to `Default`.
    pub fn ecu_reset(&mut self, transport: &mut dyn Transport) -> Result<(), DiagnosticError> {
        self.request(transport, service::ecu_reset_hard(), Duration::from_millis(self.p2_star_ms))?;
        self.state_machine
            .process_event(DiagEvent::EcuResetIssued)
            .map_err(state_transition_rejected)?;
        Ok(())
    }

    /// Sends `TesterPresent` if at least [`TESTER_PRESENT_INTERVAL_MS`] has
    /// elapsed since the last one, per the cooperative keep-alive cadence.
    pub fn maybe_send_tester_present(
        &mut self,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> Result<(), DiagnosticError> {
        let due = match self.last_tester_present {
            Some(last) => now.duration_since(last) >= Duration::from_millis(TESTER_PRESENT_INTERVAL_MS),
            None => true,
        };
        if !due {
            return Ok(());
        }
        self.isotp.send(transport, &service::tester_present().encode())?;
        self.last_tester_present = Some(now);
        Ok(())
    }

    /// Records that the physical link was lost, collapsing the session
    /// state back to `Default`.
    pub fn note_link_lost(&mut self) {
        let _ = self.state_machine.process_event(DiagEvent::LinkLost);
    }
}

/// The controller accepted a service but the reply is inconsistent with
/// where the session state machine currently is; treated the same as any
/// other response mismatch.
fn state_transition_rejected(_err: UnexpectedEventInState) -> DiagnosticError {
    DiagnosticError::MismatchedResponse
}

/// Adapts a borrowed [`DiagnosticClient`] + [`Transport`] pair to the
/// transport-agnostic [`SecurityAccessIo`] contract the try-all policy
/// expects.
struct ClientSecurityIo<'a> {
    client: &'a mut DiagnosticClient,
    transport: &'a mut dyn Transport,
}

impl<'a> SecurityAccessIo for ClientSecurityIo<'a> {
    fn request_seed(&mut self, slot: usize) -> Result<Vec<u8>, DiagnosticError> {
        let response = self.client.request(
            self.transport,
            service::security_access_request_seed(slot),
            Duration::from_millis(self.client.p2_star_ms),
        )?;
        match response {
            DiagnosticResponse::Positive { data, .. } => Ok(data),
            DiagnosticResponse::Negative { nrc, .. } => Err(DiagnosticError::Negative(nrc)),
        }
    }

    fn send_key(&mut self, slot: usize, key: u32) -> Result<(), DiagnosticError> {
        let response = self.client.request(
            self.transport,
            service::security_access_send_key(slot, key),
            Duration::from_millis(self.client.p2_star_ms),
        )?;
        match response {
            DiagnosticResponse::Positive { .. } => Ok(()),
            DiagnosticResponse::Negative { nrc, .. } => Err(DiagnosticError::Negative(nrc)),
        }
    }
}
