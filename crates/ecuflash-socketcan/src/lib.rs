//! Linux SocketCAN binding of [`ecuflash_core::transport::Transport`].
#![cfg(target_os = "linux")]

use ecuflash_core::error::TransportError;
use ecuflash_core::transport::{CanFrame, Transport};
use socketcan::{CanFilter, CanFrame as ScCanFrame, CanSocket, ExtendedId, Frame, Id, Socket, StandardId};
use std::time::{Duration, Instant};

/// One open SocketCAN interface (e.g. `can0`, `vcan0`), bound to the
/// Transport Adapter contract (§4.1).
///
/// Unlike the `MockTransport` used in tests, every [`Transport::recv_frame`]
/// call recomputes a relative read timeout from the caller's absolute
/// `deadline` and reapplies it to the socket, since SocketCAN has no notion
/// of "block until this instant".
pub struct SocketCanTransport {
    socket: Option<CanSocket>,
    rx_filter: Vec<u32>,
}

impl SocketCanTransport {
    /// Opens `interface` (e.g. `"can0"`) in blocking mode.
    pub fn open(interface: &str) -> Result<Self, TransportError> {
        let socket = CanSocket::open(interface).map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self { socket: Some(socket), rx_filter: Vec::new() })
    }

    fn socket(&mut self) -> Result<&mut CanSocket, TransportError> {
        self.socket.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SocketCanTransport {
    fn send_frame(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        let id = to_socketcan_id(frame.id);
        let raw = ScCanFrame::new(id, &frame.data).ok_or_else(|| TransportError::Io("frame payload exceeds 8 bytes".to_string()))?;
        self.socket()?.write_frame(&raw).map_err(|e| map_io_error(&e))
    }

    fn recv_frame(&mut self, deadline: Instant) -> Result<Option<CanFrame>, TransportError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let socket = self.socket()?;
            socket.set_read_timeout(remaining).map_err(|e| TransportError::Io(e.to_string()))?;

            match socket.read_frame() {
                Ok(raw) => {
                    if raw.is_error_frame() {
                        if is_bus_off(&raw) {
                            return Err(TransportError::BusOff);
                        }
                        continue;
                    }
                    return Ok(Some(CanFrame::new(from_socketcan_id(raw.id()), raw.data().to_vec())));
                }
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(map_io_error(&e)),
            }
        }
    }

    fn set_rx_filter(&mut self, ids: &[u32]) -> Result<(), TransportError> {
        self.rx_filter = ids.to_vec();
        let filters: Vec<CanFilter> = ids.iter().map(|&id| CanFilter::new(id, 0x7FF)).collect();
        self.socket()?.set_filters(&filters).map_err(|e| TransportError::Io(e.to_string()))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.socket = None;
        Ok(())
    }
}

fn to_socketcan_id(id: u32) -> Id {
    if id <= 0x7FF {
        Id::Standard(StandardId::new(id as u16).expect("checked <= 0x7FF"))
    } else {
        Id::Extended(ExtendedId::new(id).expect("checked id fits 29 bits by construction"))
    }
}

fn from_socketcan_id(id: Id) -> u32 {
    match id {
        Id::Standard(sid) => sid.as_raw() as u32,
        Id::Extended(eid) => eid.as_raw(),
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}

fn map_io_error(err: &std::io::Error) -> TransportError {
    if is_timeout(err) {
        TransportError::RxTimeout
    } else {
        TransportError::Io(err.to_string())
    }
}

/// Classifies a received error frame as CAN bus-off (`CAN_ERR_BUSOFF`,
/// 0x04 in the second data byte of the kernel's error frame encoding).
fn is_bus_off(frame: &ScCanFrame) -> bool {
    frame.data().get(1).is_some_and(|&b| b & 0x04 != 0)
}
