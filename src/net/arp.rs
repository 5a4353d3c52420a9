//! ARP (RFC 826) for IPv4 over Ethernet.
//!
//! Packet layout (28 bytes):
//! [HW type (2)][Proto type (2)][HW len (1)][Proto len (1)][Op (2)]
//! [Sender MAC (6)][Sender IP (4)][Target MAC (6)][Target IP (4)]
//!
//! The cache only grows: a reply for an address already present is ignored,
//! and lookups return the first entry recorded for an address.

extern crate alloc;

use alloc::vec::Vec;
use core::net::Ipv4Addr;

use log::{debug, trace, warn};

use crate::net::buffer::PacketBuffer;
use crate::net::error::{Layer, NetError};
use crate::net::ethernet::{self, EtherType, MacAddr};
use crate::net::irq::IrqMutex;
use crate::net::stack::NetStack;
use crate::net::wait;

pub const PACKET_LEN: usize = 28;

const HW_TYPE_ETHERNET: u16 = 1;
const PROTO_TYPE_IPV4: u16 = 0x0800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOp {
    Request,
    Reply,
    Other(u16),
}

impl From<u16> for ArpOp {
    fn from(value: u16) -> Self {
        match value {
            1 => ArpOp::Request,
            2 => ArpOp::Reply,
            other => ArpOp::Other(other),
        }
    }
}

impl From<ArpOp> for u16 {
    fn from(op: ArpOp) -> Self {
        match op {
            ArpOp::Request => 1,
            ArpOp::Reply => 2,
            ArpOp::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub hw_type: u16,
    pub proto_type: u16,
    pub hw_len: u8,
    pub proto_len: u8,
    pub op: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// An Ethernet/IPv4 packet.
    pub fn new(
        op: ArpOp,
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            hw_type: HW_TYPE_ETHERNET,
            proto_type: PROTO_TYPE_IPV4,
            hw_len: 6,
            proto_len: 4,
            op,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < PACKET_LEN {
            return Err(NetError::malformed(Layer::Arp, PACKET_LEN, bytes.len()));
        }
        Ok(Self {
            hw_type: u16::from_be_bytes([bytes[0], bytes[1]]),
            proto_type: u16::from_be_bytes([bytes[2], bytes[3]]),
            hw_len: bytes[4],
            proto_len: bytes[5],
            op: ArpOp::from(u16::from_be_bytes([bytes[6], bytes[7]])),
            sender_mac: MacAddr::from_slice(&bytes[8..14]),
            sender_ip: Ipv4Addr::new(bytes[14], bytes[15], bytes[16], bytes[17]),
            target_mac: MacAddr::from_slice(&bytes[18..24]),
            target_ip: Ipv4Addr::new(bytes[24], bytes[25], bytes[26], bytes[27]),
        })
    }

    pub fn encode(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.hw_type.to_be_bytes());
        out[2..4].copy_from_slice(&self.proto_type.to_be_bytes());
        out[4] = self.hw_len;
        out[5] = self.proto_len;
        out[6..8].copy_from_slice(&u16::from(self.op).to_be_bytes());
        out[8..14].copy_from_slice(&self.sender_mac.0);
        out[14..18].copy_from_slice(&self.sender_ip.octets());
        out[18..24].copy_from_slice(&self.target_mac.0);
        out[24..28].copy_from_slice(&self.target_ip.octets());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

/// Append-only IP to MAC table.
#[derive(Default)]
pub struct ArpCache {
    entries: IrqMutex<Vec<ArpEntry>>,
}

impl ArpCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// First hardware address recorded for `ip`.
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries
            .with(|entries| entries.iter().find(|e| e.ip == ip).map(|e| e.mac))
    }

    /// Record `ip -> mac` unless `ip` is already known. Returns whether it was added.
    pub fn insert_if_absent(&self, ip: Ipv4Addr, mac: MacAddr) -> bool {
        self.entries.with(|entries| {
            if entries.iter().any(|e| e.ip == ip) {
                false
            } else {
                entries.push(ArpEntry { ip, mac });
                true
            }
        })
    }

    pub fn entries(&self) -> Vec<ArpEntry> {
        self.entries.with(|entries| entries.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.with(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build an ARP packet from the current device and send it.
///
/// A `target_mac` of `None` broadcasts the frame and leaves the target
/// hardware field all-ones.
pub fn send_request_or_reply(
    stack: &NetStack,
    target_ip: Ipv4Addr,
    target_mac: Option<MacAddr>,
    op: ArpOp,
) -> Result<(), NetError> {
    let iface = stack.interface()?;
    let dest = target_mac.unwrap_or(MacAddr::BROADCAST);
    let packet = ArpPacket::new(op, iface.mac, iface.ip, dest, target_ip);

    let mut buf = PacketBuffer::allocate(ethernet::HEADER_LEN, PACKET_LEN)?;
    packet.encode(buf.data_mut());
    trace!("arp: {:?} for {} to {}", op, target_ip, dest);
    ethernet::send(stack, buf, dest, EtherType::Arp)
}

/// Broadcast a request for `ip`.
pub fn request(stack: &NetStack, ip: Ipv4Addr) -> Result<(), NetError> {
    send_request_or_reply(stack, ip, None, ArpOp::Request)
}

/// Learn from replies and answer requests for our address. Consumes `buf`.
pub fn handle_inbound(stack: &NetStack, buf: PacketBuffer) -> Result<(), NetError> {
    let packet = ArpPacket::decode(buf.data())?;
    buf.release();

    if packet.proto_type != PROTO_TYPE_IPV4 {
        debug!("arp: protocol type {:#06x} not supported", packet.proto_type);
        return Err(NetError::UnsupportedProtocol {
            layer: Layer::Arp,
            value: packet.proto_type,
        });
    }

    match packet.op {
        ArpOp::Reply => {
            if stack.arp().insert_if_absent(packet.sender_ip, packet.sender_mac) {
                debug!("arp: {} is at {}", packet.sender_ip, packet.sender_mac);
            }
        }
        ArpOp::Request => {
            if stack.interface()?.ip == packet.target_ip {
                send_request_or_reply(
                    stack,
                    packet.sender_ip,
                    Some(packet.sender_mac),
                    ArpOp::Reply,
                )?;
            }
        }
        ArpOp::Other(code) => debug!("arp: op code {} ignored", code),
    }
    Ok(())
}

/// Blocking hardware address query used when the cache has no entry.
pub trait AddressResolver: Send + Sync {
    fn resolve_blocking(&self, stack: &NetStack, ip: Ipv4Addr) -> Option<MacAddr>;
}

/// Broadcast a request, then poll the current device until the reply lands
/// in the cache or the configured attempts run out.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArpProbe;

impl AddressResolver for ArpProbe {
    fn resolve_blocking(&self, stack: &NetStack, ip: Ipv4Addr) -> Option<MacAddr> {
        let config = stack.config();
        for attempt in 1..=config.resolve_attempts {
            if let Err(err) = request(stack, ip) {
                warn!("arp: request for {} failed: {}", ip, err);
                return None;
            }
            for _ in 0..config.resolve_polls {
                if let Err(err) = stack.poll_once() {
                    warn!("arp: poll failed: {}", err);
                    return None;
                }
                if let Some(mac) = stack.arp().lookup(ip) {
                    return Some(mac);
                }
                wait::idle(config.idle_spins);
            }
            debug!("arp: no reply from {} (attempt {})", ip, attempt);
        }
        None
    }
}
