//! Loopback network device.
//!
//! Every transmitted frame is queued and handed back by the next poll, so
//! the whole stack can be exercised without hardware.

extern crate alloc;

use alloc::vec::Vec;

use crossbeam_queue::ArrayQueue;
use log::trace;

use super::{Capabilities, DeviceError, NetDriver, TransmitError};
use crate::net::buffer::PacketBuffer;
use crate::net::ethernet::MacAddr;
use crate::net::irq::IrqMutex;

pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Largest frame accepted: a full Ethernet payload plus the header, no CRC.
pub const MAX_FRAME_LEN: usize = 1514;

pub struct LoopbackDevice {
    mac: IrqMutex<MacAddr>,
    /// Frames waiting to be "received"
    ring: ArrayQueue<Vec<u8>>,
}

impl LoopbackDevice {
    pub fn new(depth: usize) -> Self {
        Self {
            mac: IrqMutex::new(MacAddr::ZERO),
            ring: ArrayQueue::new(depth),
        }
    }

    pub fn mac(&self) -> MacAddr {
        self.mac.with(|mac| *mac)
    }

    pub fn pending(&self) -> usize {
        self.ring.len()
    }
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl NetDriver for LoopbackDevice {
    fn capabilities(&self) -> Capabilities {
        Capabilities::TRANSMIT | Capabilities::POLL | Capabilities::SET_HW_ADDR
    }

    fn chip_name(&self) -> Option<&str> {
        Some("loopback")
    }

    fn transmit(&self, frame: &[u8]) -> Result<(), TransmitError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(TransmitError::PacketTooLarge);
        }
        trace!("lo: looping back {} bytes", frame.len());
        self.ring
            .push(frame.to_vec())
            .map_err(|_| TransmitError::BufferFull)
    }

    fn receive(&self) -> Option<PacketBuffer> {
        let frame = self.ring.pop()?;
        PacketBuffer::from_frame(&frame).ok()
    }

    fn set_hardware_address(&self, mac: MacAddr) -> Result<(), DeviceError> {
        self.mac.with(|current| *current = mac);
        Ok(())
    }
}
