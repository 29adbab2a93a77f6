//! ISO-TP (ISO 15765-2) segmentation and reassembly (§4.2).
//!
//! `frame` holds the bit-packed PCI codec; `session` drives the
//! send/receive state machines on top of a [`crate::transport::Transport`].

pub mod frame;
pub mod session;

pub use frame::{FlowStatus, IsoTpFrame};
pub use session::IsoTpSession;
