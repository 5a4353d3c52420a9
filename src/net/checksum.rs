//! Internet checksum (RFC 1071) and the TCP/UDP pseudo-header.

use core::net::Ipv4Addr;

use crate::net::buffer::PacketBuffer;
use crate::net::error::NetError;

/// Source address, destination address, zero, protocol, segment length.
pub const PSEUDO_HEADER_LEN: usize = 12;

/// Running one's-complement sum over 16-bit big-endian words.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checksum {
    sum: u32,
}

impl Checksum {
    pub const fn new() -> Self {
        Self { sum: 0 }
    }

    /// Add `data` to the sum. A trailing odd byte is padded with zero, so only
    /// the last chunk of a message may have odd length.
    pub fn add_bytes(&mut self, data: &[u8]) -> &mut Self {
        let mut words = data.chunks_exact(2);
        for word in &mut words {
            self.sum = self.sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
        }
        if let [last] = words.remainder() {
            self.sum = self.sum.wrapping_add(u16::from_be_bytes([*last, 0]) as u32);
        }
        self
    }

    /// Folded, complemented value ready to be written big-endian.
    pub fn finish(&self) -> u16 {
        !fold(self.sum)
    }
}

/// Fold the carries of a 32-bit accumulator into 16 bits (two rounds suffice).
pub fn fold(sum: u32) -> u16 {
    let sum = (sum & 0xFFFF) + (sum >> 16);
    let sum = (sum & 0xFFFF) + (sum >> 16);
    sum as u16
}

pub fn internet_checksum(data: &[u8]) -> u16 {
    Checksum::new().add_bytes(data).finish()
}

/// Checksum a transport segment together with its pseudo-header.
///
/// The pseudo-header is written into the headroom immediately in front of
/// the segment and popped again afterwards, so the buffer's window is
/// unchanged on return. Requires at least [`PSEUDO_HEADER_LEN`] bytes of
/// headroom; every transmit buffer reserves link and IP headers, which is
/// more.
pub fn pseudo_header_checksum(
    buf: &mut PacketBuffer,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
) -> Result<u16, NetError> {
    let segment_len = buf.len() as u16;

    let header = buf.push_header(PSEUDO_HEADER_LEN)?;
    header[0..4].copy_from_slice(&src.octets());
    header[4..8].copy_from_slice(&dst.octets());
    header[8] = 0;
    header[9] = protocol;
    header[10..12].copy_from_slice(&segment_len.to_be_bytes());

    let checksum = internet_checksum(buf.data());
    buf.pop_header(PSEUDO_HEADER_LEN)?;
    Ok(checksum)
}
