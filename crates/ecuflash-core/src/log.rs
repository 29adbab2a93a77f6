//! Structured logging context.
//!
//! Wraps the `log` facade so every line emitted while a [`FlashSession`] is
//! active carries the session id and current phase, without any process-wide
//! mutable state: a [`FlashLogContext`] is just a value threaded explicitly
//! through the orchestrator, per the design note that global singleton
//! logging becomes an explicit parameter.
//!
//! [`FlashSession`]: crate::session::FlashSession

use crate::diag::Phase;

/// Trait for structs that provide metadata for logging.
pub trait LogMetadata {
    fn meta(&self) -> String;
}

/// Per-session logging context: session id plus current phase.
#[derive(Debug, Clone)]
pub struct FlashLogContext {
    pub session_id: u64,
    pub phase: Phase,
}

impl FlashLogContext {
    pub fn new(session_id: u64) -> Self {
        Self { session_id, phase: Phase::Idle }
    }

    pub fn enter_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }
}

impl LogMetadata for FlashLogContext {
    fn meta(&self) -> String {
        format!("session={} phase={:?}", self.session_id, self.phase)
    }
}

macro_rules! flash_info {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta($ctx);
        log::info!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
}

macro_rules! flash_warn {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta($ctx);
        log::warn!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
}

macro_rules! flash_error {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta($ctx);
        log::error!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
}

macro_rules! flash_debug {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta($ctx);
        log::debug!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
}

pub(crate) use flash_debug;
pub(crate) use flash_error;
pub(crate) use flash_info;
pub(crate) use flash_warn;
