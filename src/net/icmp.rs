//! ICMP echo (RFC 792).
//!
//! Echo requests are answered, echo replies and unreachable reports are
//! logged, everything else is dropped.

use core::net::Ipv4Addr;

use log::{info, trace};

use crate::net::buffer::PacketBuffer;
use crate::net::checksum::internet_checksum;
use crate::net::error::{Layer, NetError};
use crate::net::ethernet;
use crate::net::ipv4::{self, IpProtocol, Ipv4Header};
use crate::net::stack::NetStack;

/// Type, code, checksum, identifier, sequence
pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpType {
    EchoReply,
    DestinationUnreachable,
    EchoRequest,
    Other(u8),
}

impl From<u8> for IcmpType {
    fn from(value: u8) -> Self {
        match value {
            0 => IcmpType::EchoReply,
            3 => IcmpType::DestinationUnreachable,
            8 => IcmpType::EchoRequest,
            other => IcmpType::Other(other),
        }
    }
}

impl From<IcmpType> for u8 {
    fn from(value: IcmpType) -> Self {
        match value {
            IcmpType::EchoReply => 0,
            IcmpType::DestinationUnreachable => 3,
            IcmpType::EchoRequest => 8,
            IcmpType::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoHeader {
    pub icmp_type: IcmpType,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

impl EchoHeader {
    pub fn decode(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < HEADER_LEN {
            return Err(NetError::malformed(Layer::Icmp, HEADER_LEN, bytes.len()));
        }
        Ok(Self {
            icmp_type: IcmpType::from(bytes[0]),
            code: bytes[1],
            checksum: u16::from_be_bytes([bytes[2], bytes[3]]),
            identifier: u16::from_be_bytes([bytes[4], bytes[5]]),
            sequence: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }

    pub fn encode(&self, out: &mut [u8]) {
        out[0] = self.icmp_type.into();
        out[1] = self.code;
        out[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        out[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        out[6..8].copy_from_slice(&self.sequence.to_be_bytes());
    }
}

fn send_echo(
    stack: &NetStack,
    icmp_type: IcmpType,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<(), NetError> {
    let mut buf = PacketBuffer::allocate(
        ethernet::HEADER_LEN + ipv4::HEADER_LEN,
        HEADER_LEN + payload.len(),
    )?;
    let message = buf.data_mut();
    EchoHeader {
        icmp_type,
        code: 0,
        checksum: 0,
        identifier,
        sequence,
    }
    .encode(message);
    message[HEADER_LEN..].copy_from_slice(payload);
    let checksum = internet_checksum(message);
    message[2..4].copy_from_slice(&checksum.to_be_bytes());

    ipv4::send_to(stack, buf, IpProtocol::Icmp, src, dst)
}

/// Ping `dst` from the current interface address.
pub fn send_echo_request(
    stack: &NetStack,
    dst: Ipv4Addr,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Result<(), NetError> {
    let src = stack.interface()?.ip;
    send_echo(stack, IcmpType::EchoRequest, identifier, sequence, payload, src, dst)
}

/// Handle one ICMP message. The buffer is always consumed.
pub fn deliver_inbound(stack: &NetStack, buf: PacketBuffer, ip: &Ipv4Header) -> Result<(), NetError> {
    let header = EchoHeader::decode(buf.data())?;

    match header.icmp_type {
        IcmpType::EchoRequest => {
            trace!("icmp: echo request from {} seq {}", ip.src, header.sequence);
            send_echo(
                stack,
                IcmpType::EchoReply,
                header.identifier,
                header.sequence,
                &buf.data()[HEADER_LEN..],
                ip.dst,
                ip.src,
            )?;
        }
        IcmpType::EchoReply => info!(
            "{} bytes from {}: icmp_seq={} ttl={}",
            buf.len(),
            ip.src,
            header.sequence,
            ip.ttl
        ),
        IcmpType::DestinationUnreachable => info!(
            "From {}: icmp_seq={} Destination Host Unreachable (reported by {})",
            ip.dst, header.sequence, ip.src
        ),
        IcmpType::Other(kind) => trace!("icmp: type {} ignored", kind),
    }
    buf.release();
    Ok(())
}
