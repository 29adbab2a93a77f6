//! Transport Adapter contract (§4.1): a narrow interface over a physical
//! CAN channel, analogous to the `NetworkInterface` HAL trait this crate's
//! structure is patterned on, but scoped to a single bidirectional CAN
//! channel with one request/response identifier pair rather than an
//! Ethernet datalink.
//!
//! No retry happens inside an implementation of this trait; all retries are
//! decided by higher layers, per the propagation policy in the error design.

use crate::error::TransportError;
use std::time::{Duration, Instant};

/// One raw CAN frame: an identifier (11-bit or 29-bit) and 0..8 data bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub data: Vec<u8>,
}

impl CanFrame {
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        debug_assert!(data.len() <= 8, "CAN frame payload must be 0..=8 bytes");
        Self { id, data }
    }
}

/// One bidirectional CAN channel. Implementations: a Linux SocketCAN binding
/// (see the `ecuflash-socketcan` crate), an in-memory loopback used by tests
/// (see [`crate::testing::MockTransport`]).
pub trait Transport {
    /// Transmit one frame. Returns once the frame is queued for transmission.
    fn send_frame(&mut self, frame: &CanFrame) -> Result<(), TransportError>;

    /// Block for at most `deadline` waiting for the next frame matching the
    /// active receive filter. Returns `Ok(None)` on timeout, never an error
    /// for a plain timeout — timeouts are an expected outcome, not a fault.
    fn recv_frame(&mut self, deadline: Instant) -> Result<Option<CanFrame>, TransportError>;

    /// Restrict reception to the given set of CAN identifiers.
    fn set_rx_filter(&mut self, ids: &[u32]) -> Result<(), TransportError>;

    /// Release the underlying channel. Idempotent.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Convenience used throughout the crate to turn a relative timeout into an
/// absolute deadline for [`Transport::recv_frame`].
pub fn deadline_from(timeout: Duration) -> Instant {
    Instant::now() + timeout
}
