//! IPv4 (RFC 791) delivery.
//!
//! Outbound: one fixed 20-byte header, no options, never fragmented.
//! Inbound: header validated, options skipped, link padding trimmed, payload
//! dispatched to ICMP/UDP/TCP. Header checksums are not verified on receive.

use core::net::Ipv4Addr;

use log::{debug, trace, warn};

use crate::net::buffer::PacketBuffer;
use crate::net::checksum::internet_checksum;
use crate::net::error::{Layer, NetError};
use crate::net::ethernet::{self, EtherType, MacAddr};
use crate::net::stack::NetStack;
use crate::net::{icmp, tcp, udp};

/// Minimum (and outbound) header size
pub const HEADER_LEN: usize = 20;

const VERSION_IHL: u8 = 0x45;
/// Don't Fragment, offset 0
const FLAGS_DONT_FRAGMENT: u16 = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    Icmp,
    Igmp,
    Tcp,
    Udp,
    Ospf,
    Unknown(u8),
}

impl From<u8> for IpProtocol {
    fn from(value: u8) -> Self {
        match value {
            1 => IpProtocol::Icmp,
            2 => IpProtocol::Igmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            89 => IpProtocol::Ospf,
            other => IpProtocol::Unknown(other),
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(value: IpProtocol) -> Self {
        match value {
            IpProtocol::Icmp => 1,
            IpProtocol::Igmp => 2,
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
            IpProtocol::Ospf => 89,
            IpProtocol::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in bytes, options included.
    pub header_len: usize,
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub flags_fragment: u16,
    pub ttl: u8,
    pub protocol: IpProtocol,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    /// Validate and decode the header at the start of `bytes`.
    ///
    /// The total length must cover the header and fit in `bytes`; anything
    /// after it is link-layer padding.
    pub fn decode(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < HEADER_LEN {
            return Err(NetError::malformed(Layer::Ipv4, HEADER_LEN, bytes.len()));
        }
        let header_len = ((bytes[0] & 0x0F) as usize) << 2;
        if header_len < HEADER_LEN {
            warn!("ipv4: header length {} below minimum", header_len);
            return Err(NetError::malformed(Layer::Ipv4, HEADER_LEN, header_len));
        }
        let total_len = u16::from_be_bytes([bytes[2], bytes[3]]);
        let total = total_len as usize;
        if total < header_len || total > bytes.len() {
            return Err(NetError::malformed(Layer::Ipv4, total.max(header_len), bytes.len()));
        }

        Ok(Self {
            header_len,
            tos: bytes[1],
            total_len,
            id: u16::from_be_bytes([bytes[4], bytes[5]]),
            flags_fragment: u16::from_be_bytes([bytes[6], bytes[7]]),
            ttl: bytes[8],
            protocol: IpProtocol::from(bytes[9]),
            checksum: u16::from_be_bytes([bytes[10], bytes[11]]),
            src: Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]),
            dst: Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]),
        })
    }

    /// Write a 20-byte header to `out` with the checksum field as stored.
    pub fn encode(&self, out: &mut [u8]) {
        out[0] = VERSION_IHL;
        out[1] = self.tos;
        out[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        out[4..6].copy_from_slice(&self.id.to_be_bytes());
        out[6..8].copy_from_slice(&self.flags_fragment.to_be_bytes());
        out[8] = self.ttl;
        out[9] = self.protocol.into();
        out[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        out[12..16].copy_from_slice(&self.src.octets());
        out[16..20].copy_from_slice(&self.dst.octets());
    }

    pub fn payload_len(&self) -> usize {
        self.total_len as usize - self.header_len
    }
}

/// Whether `ip` is the directed broadcast of a subnet with `mask`.
pub fn is_broadcast(mask: Ipv4Addr, ip: Ipv4Addr) -> bool {
    !(u32::from(mask) | u32::from(ip)) == 0
}

/// Source address for a socket bound to `local`; an unspecified bind uses
/// the current interface address.
pub(crate) fn source_address(stack: &NetStack, local: Ipv4Addr) -> Result<Ipv4Addr, NetError> {
    if local.is_unspecified() {
        Ok(stack.interface()?.ip)
    } else {
        Ok(local)
    }
}

/// Send `buf` with addresses taken from the socket it is attached to.
pub fn send(stack: &NetStack, buf: PacketBuffer, protocol: IpProtocol) -> Result<(), NetError> {
    let socket = buf.socket().ok_or(NetError::SocketGone)?;
    let ep = socket.endpoints();
    let src = source_address(stack, *ep.local.ip())?;
    send_to(stack, buf, protocol, src, *ep.remote.ip())
}

/// Prepend the IPv4 header and hand the packet to the link layer.
///
/// The next hop is the broadcast address for the subnet broadcast, otherwise
/// the ARP cache and then the stack's resolver are asked for `dst`.
pub fn send_to(
    stack: &NetStack,
    mut buf: PacketBuffer,
    protocol: IpProtocol,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<(), NetError> {
    let total_len =
        u16::try_from(buf.len() + HEADER_LEN).map_err(|_| NetError::ResourceExhausted)?;
    let header = Ipv4Header {
        header_len: HEADER_LEN,
        tos: 0,
        total_len,
        id: stack.next_ip_id(),
        flags_fragment: FLAGS_DONT_FRAGMENT,
        ttl: stack.config().ttl,
        protocol,
        checksum: 0,
        src,
        dst,
    };

    let out = buf.push_header(HEADER_LEN)?;
    header.encode(out);
    let checksum = internet_checksum(&out[..HEADER_LEN]);
    out[10..12].copy_from_slice(&checksum.to_be_bytes());

    let mask = stack.interface()?.mask;
    let dest_mac = if is_broadcast(mask, dst) {
        MacAddr::BROADCAST
    } else {
        match stack.resolve(dst) {
            Some(mac) => mac,
            None => {
                warn!("ipv4: cannot resolve {}, dropping {:?} packet", dst, protocol);
                return Err(NetError::Unresolved(dst));
            }
        }
    };

    trace!("ipv4: {} -> {} {:?} len {}", src, dst, protocol, total_len);
    ethernet::send(stack, buf, dest_mac, EtherType::Ipv4)
}

/// Strip the IP header from an inbound packet and dispatch its payload.
///
/// Returns the protocol the packet carried. IGMP and OSPF are accepted and
/// dropped.
pub fn deliver_inbound(stack: &NetStack, mut buf: PacketBuffer) -> Result<IpProtocol, NetError> {
    let header = Ipv4Header::decode(buf.data())?;
    buf.pop_header(header.header_len)?;
    buf.truncate(header.payload_len())?;

    match header.protocol {
        IpProtocol::Icmp => icmp::deliver_inbound(stack, buf, &header)?,
        IpProtocol::Udp => udp::deliver_inbound(stack, buf, &header)?,
        IpProtocol::Tcp => tcp::deliver_inbound(stack, buf, &header)?,
        IpProtocol::Igmp => trace!("ipv4: IGMP from {} ignored", header.src),
        IpProtocol::Ospf => debug!("ipv4: OSPF received from {}, no routing support", header.src),
        IpProtocol::Unknown(value) => {
            debug!("ipv4: unknown protocol {} from {}", value, header.src);
            return Err(NetError::UnsupportedProtocol {
                layer: Layer::Ipv4,
                value: value as u16,
            });
        }
    }
    Ok(header.protocol)
}
