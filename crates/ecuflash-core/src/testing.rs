//! In-memory mock transport for deterministic tests (§8's "mock transport"
//! scenarios). Lives inside the core crate rather than a separate crate,
//! since it has no platform dependency of its own.

use crate::error::TransportError;
use crate::transport::{CanFrame, Transport};
use std::collections::VecDeque;
use std::time::Instant;

/// A scripted, in-memory [`Transport`]: frames queued with [`Self::queue_rx`]
/// are handed back in order by `recv_frame`; everything sent through
/// `send_frame` is recorded and retrievable via [`Self::sent_frames`].
#[derive(Default)]
pub struct MockTransport {
    rx_queue: VecDeque<CanFrame>,
    tx_log: Vec<CanFrame>,
    rx_filter: Vec<u32>,
    closed: bool,
    bus_off: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame that will be returned by a future `recv_frame` call.
    pub fn queue_rx(&mut self, frame: CanFrame) {
        self.rx_queue.push_back(frame);
    }

    /// All frames handed to `send_frame`, in order.
    pub fn sent_frames(&self) -> &[CanFrame] {
        &self.tx_log
    }

    /// Clears the send log (the rx queue is left untouched).
    pub fn clear_sent(&mut self) {
        self.tx_log.clear();
    }

    /// Forces the next `send_frame`/`recv_frame` call to return `BusOff`,
    /// for exercising the transport-error retry path.
    pub fn force_bus_off(&mut self) {
        self.bus_off = true;
    }
}

impl Transport for MockTransport {
    fn send_frame(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.bus_off {
            self.bus_off = false;
            return Err(TransportError::BusOff);
        }
        self.tx_log.push(frame.clone());
        Ok(())
    }

    fn recv_frame(&mut self, _deadline: Instant) -> Result<Option<CanFrame>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if !self.rx_filter.is_empty() {
            while let Some(front) = self.rx_queue.front() {
                if self.rx_filter.contains(&front.id) {
                    break;
                }
                self.rx_queue.pop_front();
            }
        }
        Ok(self.rx_queue.pop_front())
    }

    fn set_rx_filter(&mut self, ids: &[u32]) -> Result<(), TransportError> {
        self.rx_filter = ids.to_vec();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}
