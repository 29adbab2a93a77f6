//! Diagnostic session state machine (§4.3 table).
//!
//! Follows the same explicit `(state, event) -> state` match idiom as a
//! controlled-node NMT state machine: unmatched combinations are not a
//! panic, they are a typed "unexpected event" diagnostic and the state is
//! left unchanged, so a spurious frame can never corrupt session state.

/// The diagnostic session's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagSessionState {
    Default,
    Programming,
    Unlocked,
}

/// An event that may drive a session state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagEvent {
    SessionControlProgrammingAccepted,
    SecurityAccessGranted,
    LinkLost,
    EcuResetIssued,
    Aborted,
}

/// Raised when an event is received that has no defined transition from the
/// current state. Not fatal by itself — callers decide whether to treat it
/// as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnexpectedEventInState {
    pub state: DiagSessionState,
    pub event: DiagEvent,
}

pub struct DiagSessionStateMachine {
    pub current_state: DiagSessionState,
}

impl DiagSessionStateMachine {
    pub fn new() -> Self {
        Self { current_state: DiagSessionState::Default }
    }

    pub fn process_event(&mut self, event: DiagEvent) -> Result<(), UnexpectedEventInState> {
        let next_state = match (self.current_state, event) {
            (DiagSessionState::Default, DiagEvent::SessionControlProgrammingAccepted) => DiagSessionState::Programming,
            (DiagSessionState::Programming, DiagEvent::SecurityAccessGranted) => DiagSessionState::Unlocked,
            (DiagSessionState::Programming, DiagEvent::LinkLost) => DiagSessionState::Default,
            (DiagSessionState::Unlocked, DiagEvent::LinkLost) => DiagSessionState::Default,
            (_, DiagEvent::EcuResetIssued) => DiagSessionState::Default,
            (_, DiagEvent::Aborted) => DiagSessionState::Default,
            (current, event) => {
                return Err(UnexpectedEventInState { state: current, event });
            }
        };
        self.current_state = next_state;
        Ok(())
    }
}

impl Default for DiagSessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
