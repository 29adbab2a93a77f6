//! Safety-gated ISO-TP/UDS flashing core for BMW N54 engine controllers
//! (MSD80/MSD81).
//!
//! Layered bottom-up: [`transport`] is the raw CAN frame boundary,
//! [`isotp`] segments/reassembles payloads over it, [`diag`] speaks UDS
//! request/response on top of that, and [`integrity`]/[`safety`]/[`backup`]
//! support the [`session`] orchestrator that drives a full flash from
//! connect through finalize.

pub mod backup;
pub mod config;
pub mod diag;
pub mod error;
pub mod integrity;
pub mod isotp;
pub mod log;
pub mod oplog;
pub mod safety;
pub mod session;
pub mod testing;
pub mod transport;
pub mod types;

pub use diag::{DiagnosticClient, Phase};
pub use error::{CoreError, DiagnosticError, IsoTpError, OrchestratorError, RollbackOutcome, TransportError};
pub use session::{BeginFlashError, CancellationToken, FlashSession, ProgressEvent, ProgressSender, SessionOutcome};
pub use transport::{CanFrame, Transport};
pub use types::ControllerVariant;
