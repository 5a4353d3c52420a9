//! Ethernet II framing (OSI layer 2).
//!
//! Frame structure: [Dest MAC (6)][Src MAC (6)][EtherType (2)][Payload]
//!
//! The controller appends the CRC and pads short frames, so neither is
//! handled here.

use core::fmt;

use log::trace;

use crate::net::buffer::PacketBuffer;
use crate::net::error::{Layer, NetError};
use crate::net::stack::NetStack;

/// Ethernet header size
pub const HEADER_LEN: usize = 14;

/// A 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes[..6]);
        MacAddr(mac)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Arp,
    Rarp,
    Unknown(u16),
}

impl From<u16> for EtherType {
    fn from(value: u16) -> Self {
        match value {
            0x0800 => EtherType::Ipv4,
            0x0806 => EtherType::Arp,
            0x8035 => EtherType::Rarp,
            other => EtherType::Unknown(other),
        }
    }
}

impl From<EtherType> for u16 {
    fn from(value: EtherType) -> Self {
        match value {
            EtherType::Ipv4 => 0x0800,
            EtherType::Arp => 0x0806,
            EtherType::Rarp => 0x8035,
            EtherType::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dest: MacAddr,
    pub src: MacAddr,
    pub ethertype: EtherType,
}

impl EthernetHeader {
    pub fn decode(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < HEADER_LEN {
            return Err(NetError::malformed(Layer::Ethernet, HEADER_LEN, bytes.len()));
        }
        Ok(Self {
            dest: MacAddr::from_slice(&bytes[0..6]),
            src: MacAddr::from_slice(&bytes[6..12]),
            ethertype: EtherType::from(u16::from_be_bytes([bytes[12], bytes[13]])),
        })
    }

    /// Write the header into the first [`HEADER_LEN`] bytes of `out`.
    pub fn encode(&self, out: &mut [u8]) {
        out[0..6].copy_from_slice(&self.dest.0);
        out[6..12].copy_from_slice(&self.src.0);
        out[12..14].copy_from_slice(&u16::from(self.ethertype).to_be_bytes());
    }

    /// Decode the link header and strip it from `buf`.
    pub fn pop(buf: &mut PacketBuffer) -> Result<Self, NetError> {
        let header = Self::decode(buf.data())?;
        buf.pop_header(HEADER_LEN)?;
        Ok(header)
    }
}

/// Prepend the link header and transmit on the current device.
///
/// The header must land at the very start of the store: every transmit
/// buffer reserves exactly the headers its layers will push.
pub fn send(
    stack: &NetStack,
    mut buf: PacketBuffer,
    dest: MacAddr,
    ethertype: EtherType,
) -> Result<(), NetError> {
    let src = stack.interface()?.mac;
    let header = EthernetHeader {
        dest,
        src,
        ethertype,
    };
    header.encode(buf.push_header(HEADER_LEN)?);
    if buf.data_start() != 0 {
        return Err(NetError::HeadroomMismatch);
    }

    trace!("eth: {} -> {} {:?} len {}", src, dest, ethertype, buf.len());
    stack.transmit(buf.data())?;
    buf.release();
    Ok(())
}
