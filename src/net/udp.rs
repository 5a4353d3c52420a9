//! UDP (RFC 768).

extern crate alloc;

use alloc::sync::Arc;
use core::net::SocketAddrV4;

use log::{debug, trace};

use crate::net::buffer::PacketBuffer;
use crate::net::checksum::pseudo_header_checksum;
use crate::net::error::{Layer, NetError};
use crate::net::ethernet;
use crate::net::ipv4::{self, IpProtocol, Ipv4Header};
use crate::net::socket::Socket;
use crate::net::stack::NetStack;
use crate::net::wait;

pub const HEADER_LEN: usize = 8;

/// Headroom a datagram buffer must reserve: link, IP and UDP headers.
pub const TX_HEADROOM: usize = ethernet::HEADER_LEN + ipv4::HEADER_LEN + HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// Header plus payload
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub fn decode(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < HEADER_LEN {
            return Err(NetError::malformed(Layer::Udp, HEADER_LEN, bytes.len()));
        }
        Ok(Self {
            src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
            dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            checksum: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }

    pub fn encode(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        out[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        out[4..6].copy_from_slice(&self.length.to_be_bytes());
        out[6..8].copy_from_slice(&self.checksum.to_be_bytes());
    }
}

/// Send the payload in `buf` from the socket it is attached to.
pub fn send(stack: &NetStack, mut buf: PacketBuffer) -> Result<(), NetError> {
    let socket = buf.socket().ok_or(NetError::SocketGone)?;
    let ep = socket.endpoints();
    let src = ipv4::source_address(stack, *ep.local.ip())?;

    let length = u16::try_from(buf.len() + HEADER_LEN).map_err(|_| NetError::ResourceExhausted)?;
    UdpHeader {
        src_port: ep.local.port(),
        dst_port: ep.remote.port(),
        length,
        checksum: 0,
    }
    .encode(buf.push_header(HEADER_LEN)?);

    let checksum = pseudo_header_checksum(&mut buf, src, *ep.remote.ip(), IpProtocol::Udp.into())?;
    buf.data_mut()[6..8].copy_from_slice(&checksum.to_be_bytes());

    trace!("udp: {} -> {} len {}", ep.local, ep.remote, length);
    ipv4::send(stack, buf, IpProtocol::Udp)
}

/// Copy `payload` into a fresh buffer and send it to `remote`, which
/// becomes the socket's peer.
pub fn send_to(
    stack: &NetStack,
    socket: &Arc<Socket>,
    remote: SocketAddrV4,
    payload: &[u8],
) -> Result<(), NetError> {
    let mut buf = PacketBuffer::allocate(TX_HEADROOM, payload.len())?;
    buf.data_mut().copy_from_slice(payload);
    buf.set_socket(socket);
    socket.set_remote(remote);
    send(stack, buf)
}

/// Queue an inbound datagram on its socket and remember the sender as peer.
pub fn deliver_inbound(stack: &NetStack, mut buf: PacketBuffer, ip: &Ipv4Header) -> Result<(), NetError> {
    let header = UdpHeader::decode(buf.data())?;
    buf.pop_header(HEADER_LEN)?;

    let Some(socket) = stack.sockets().find_datagram_socket(&header, ip) else {
        debug!("udp: no socket for {}:{}", ip.dst, header.dst_port);
        return Err(NetError::NoMatchingSocket);
    };

    socket.set_remote(SocketAddrV4::new(ip.src, header.src_port));
    buf.set_socket(&socket);
    socket.rx().push(buf);
    Ok(())
}

/// Block until a datagram arrives on `socket` or the stack's cancel source fires.
pub fn recv(stack: &NetStack, socket: &Socket) -> Option<PacketBuffer> {
    wait::recv_blocking(stack, socket)
}
