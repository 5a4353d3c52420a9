//! Shared fixtures: a scriptable driver and frame builders.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use bootnet::drivers::net::mii::{BMCR_RESET, MII_BMCR};
use bootnet::drivers::net::{Capabilities, DeviceCommand, DeviceError, NetDriver, TransmitError};
use bootnet::net::arp::AddressResolver;
use bootnet::net::checksum::{internet_checksum, Checksum};
use bootnet::net::ethernet::{EtherType, EthernetHeader, MacAddr, HEADER_LEN as ETH_LEN};
use bootnet::net::ipv4::{IpProtocol, Ipv4Header, HEADER_LEN as IP_LEN};
use bootnet::net::socket::SocketTable;
use bootnet::net::tcp::{TcpFlags, TcpHeader};
use bootnet::net::udp::UdpHeader;
use bootnet::{NetConfig, NetError, NetStack, PacketBuffer};

pub const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const PEER_MAC: MacAddr = MacAddr([0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0x02]);
/// Address the registry hands the first device built from the default config.
pub const LOCAL_MAC: MacAddr = MacAddr([0x02, 0x0A, 0x35, 0x00, 0x01, 0x22]);

/// What the mock device saw and what it will deliver.
#[derive(Default)]
pub struct Wire {
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub inbound: Mutex<VecDeque<Vec<u8>>>,
    pub regs: Mutex<HashMap<(u8, u8), u16>>,
    pub hw_addr: Mutex<Option<MacAddr>>,
}

impl Wire {
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn inject(&self, frame: Vec<u8>) {
        self.inbound.lock().unwrap().push_back(frame);
    }

    pub fn set_reg(&self, phy: u8, reg: u8, value: u16) {
        self.regs.lock().unwrap().insert((phy, reg), value);
    }

    pub fn reg(&self, phy: u8, reg: u8) -> Option<u16> {
        self.regs.lock().unwrap().get(&(phy, reg)).copied()
    }
}

/// Called with the entry point name each time the stack enters the driver.
pub type Tap = Arc<dyn Fn(&'static str) + Send + Sync>;

pub struct MockDriver {
    wire: Arc<Wire>,
    caps: Capabilities,
    phy_mask: u32,
    fail_hw_addr: bool,
    bmcr_writes: Arc<Mutex<Vec<(u8, u16)>>>,
    tap: Option<Tap>,
}

impl MockDriver {
    pub fn new() -> (Self, Arc<Wire>) {
        let wire = Arc::new(Wire::default());
        let driver = Self {
            wire: Arc::clone(&wire),
            caps: Capabilities::TRANSMIT | Capabilities::SET_HW_ADDR | Capabilities::POLL,
            phy_mask: 0,
            fail_hw_addr: false,
            bmcr_writes: Arc::default(),
            tap: None,
        };
        (driver, wire)
    }

    pub fn with_caps(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_phy_mask(mut self, mask: u32) -> Self {
        self.caps |= Capabilities::MDIO;
        self.phy_mask = mask;
        self
    }

    pub fn failing_hw_addr(mut self) -> Self {
        self.fail_hw_addr = true;
        self
    }

    pub fn with_tap(mut self, tap: Tap) -> Self {
        self.tap = Some(tap);
        self
    }

    fn enter(&self, entry: &'static str) {
        if let Some(tap) = &self.tap {
            tap(entry);
        }
    }

    pub fn bmcr_writes(&self) -> Arc<Mutex<Vec<(u8, u16)>>> {
        Arc::clone(&self.bmcr_writes)
    }
}

impl NetDriver for MockDriver {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn chip_name(&self) -> Option<&str> {
        Some("mock")
    }

    fn transmit(&self, frame: &[u8]) -> Result<(), TransmitError> {
        self.enter("transmit");
        self.wire.sent.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    fn receive(&self) -> Option<PacketBuffer> {
        self.enter("receive");
        let frame = self.wire.inbound.lock().unwrap().pop_front()?;
        PacketBuffer::from_frame(&frame).ok()
    }

    fn set_hardware_address(&self, mac: MacAddr) -> Result<(), DeviceError> {
        if self.fail_hw_addr {
            return Err(DeviceError::Io);
        }
        *self.wire.hw_addr.lock().unwrap() = Some(mac);
        Ok(())
    }

    fn phy_mask(&self) -> u32 {
        self.phy_mask
    }

    fn mdio_read(&self, phy: u8, reg: u8) -> Option<u16> {
        self.enter("mdio_read");
        Some(self.wire.reg(phy, reg).unwrap_or(0xFFFF))
    }

    fn mdio_write(&self, phy: u8, reg: u8, value: u16) -> Result<(), DeviceError> {
        if reg == MII_BMCR {
            self.bmcr_writes.lock().unwrap().push((phy, value));
            // reset completes immediately
            self.wire.set_reg(phy, reg, value & !BMCR_RESET);
        } else {
            self.wire.set_reg(phy, reg, value);
        }
        Ok(())
    }
}

/// Resolver that never finds anything and counts how often it was asked.
#[derive(Default)]
pub struct NoResolver {
    pub calls: Arc<Mutex<usize>>,
}

impl AddressResolver for NoResolver {
    fn resolve_blocking(&self, _stack: &NetStack, _ip: Ipv4Addr) -> Option<MacAddr> {
        *self.calls.lock().unwrap() += 1;
        None
    }
}

pub fn test_config() -> NetConfig {
    NetConfig {
        idle_spins: 1,
        resolve_attempts: 1,
        resolve_polls: 4,
        ..NetConfig::default()
    }
}

/// A configured stack on a mock device that already knows the peer's MAC.
pub fn stack_with(table: Arc<SocketTable>, ip: Ipv4Addr) -> (NetStack, Arc<Wire>) {
    let stack = NetStack::new(test_config(), table).with_resolver(NoResolver::default());
    let (driver, wire) = MockDriver::new();
    stack.register_device(None, Box::new(driver)).unwrap();
    stack.configure(None, DeviceCommand::SetIp(ip)).unwrap();
    stack.configure(None, DeviceCommand::SetMask(MASK)).unwrap();
    stack.arp().insert_if_absent(PEER_IP, PEER_MAC);
    (stack, wire)
}

pub fn local_stack() -> (NetStack, Arc<Wire>, Arc<SocketTable>) {
    let table = Arc::new(SocketTable::new());
    let (stack, wire) = stack_with(Arc::clone(&table), LOCAL_IP);
    (stack, wire, table)
}

pub fn deliver(stack: &NetStack, frame: &[u8]) -> Result<(), NetError> {
    stack.netif_rx(PacketBuffer::from_frame(frame).unwrap())
}

pub fn ethernet_frame(dest: MacAddr, src: MacAddr, ethertype: EtherType, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; ETH_LEN];
    EthernetHeader { dest, src, ethertype }.encode(&mut frame);
    frame.extend_from_slice(payload);
    frame
}

pub fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr, protocol: IpProtocol, payload: &[u8]) -> Vec<u8> {
    let header = Ipv4Header {
        header_len: IP_LEN,
        tos: 0,
        total_len: (IP_LEN + payload.len()) as u16,
        id: 0x4242,
        flags_fragment: 0x4000,
        ttl: 64,
        protocol,
        checksum: 0,
        src,
        dst,
    };
    let mut packet = vec![0u8; IP_LEN];
    header.encode(&mut packet);
    let sum = internet_checksum(&packet);
    packet[10..12].copy_from_slice(&sum.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// A full frame from the peer to us carrying `payload` over `protocol`.
pub fn from_peer(protocol: IpProtocol, payload: &[u8]) -> Vec<u8> {
    ethernet_frame(
        LOCAL_MAC,
        PEER_MAC,
        EtherType::Ipv4,
        &ipv4_packet(PEER_IP, LOCAL_IP, protocol, payload),
    )
}

pub fn udp_datagram(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut segment = vec![0u8; 8];
    UdpHeader {
        src_port,
        dst_port,
        length: (8 + payload.len()) as u16,
        checksum: 0,
    }
    .encode(&mut segment);
    segment.extend_from_slice(payload);
    segment
}

pub fn tcp_segment(
    src_port: u16,
    dst_port: u16,
    seq_num: u32,
    ack_num: u32,
    flags: TcpFlags,
    payload: &[u8],
) -> Vec<u8> {
    let mut segment = vec![0u8; 20];
    TcpHeader {
        src_port,
        dst_port,
        seq_num,
        ack_num,
        header_len: 20,
        flags,
        window: 1024,
        checksum: 0,
        urgent: 0,
    }
    .encode(&mut segment);
    segment.extend_from_slice(payload);
    segment
}

/// Link header, IP header and IP payload of a captured frame.
pub fn split_ipv4(frame: &[u8]) -> (EthernetHeader, Ipv4Header, Vec<u8>) {
    let eth = EthernetHeader::decode(frame).unwrap();
    assert_eq!(eth.ethertype, EtherType::Ipv4);
    let ip = Ipv4Header::decode(&frame[ETH_LEN..]).unwrap();
    let payload = frame[ETH_LEN + ip.header_len..ETH_LEN + ip.total_len as usize].to_vec();
    (eth, ip, payload)
}

/// Whether `segment` checksums to zero together with its pseudo-header.
pub fn transport_checksum_ok(ip: &Ipv4Header, segment: &[u8]) -> bool {
    let mut sum = Checksum::new();
    sum.add_bytes(&ip.src.octets())
        .add_bytes(&ip.dst.octets())
        .add_bytes(&[0, u8::from(ip.protocol)])
        .add_bytes(&(segment.len() as u16).to_be_bytes())
        .add_bytes(segment);
    sum.finish() == 0
}
