// Network Device Abstraction Layer
//
// Drivers implement `NetDriver`; the stack keeps them in a `DeviceRegistry`
// owned by the `NetStack` context, one of which is the "current" device
// used for transmit and polling.
//
// The registry lock covers the device list and each device's addresses.
// Driver entry points are always called with that lock released, so a slow
// transmit or a PHY reset never holds off the receive interrupt.

pub mod loopback;
pub mod mii;

extern crate alloc;

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::net::Ipv4Addr;

use bitflags::bitflags;
use log::{debug, info, warn};
use thiserror::Error;

use crate::net::buffer::PacketBuffer;
use crate::net::ethernet::MacAddr;
use crate::net::irq::IrqMutex;
use mii::{LinkStatus, MiiPhy};

bitflags! {
    /// Optional driver entry points.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        const TRANSMIT    = 1 << 0;
        const POLL        = 1 << 1;
        const SET_HW_ADDR = 1 << 2;
        const MDIO        = 1 << 3;
    }
}

/// Errors that can occur during packet transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransmitError {
    #[error("frame too large for the device")]
    PacketTooLarge,
    #[error("transmit ring full")]
    BufferFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("no network device registered")]
    NoDevice,
    #[error("invalid device or argument")]
    InvalidArgument,
    #[error("device I/O error")]
    Io,
    #[error("transmit failed: {0}")]
    Transmit(#[from] TransmitError),
}

/// Interface every network driver implements.
///
/// Only `transmit` is mandatory; the other entry points back the optional
/// [`Capabilities`] the driver advertises. Entry points take `&self` and
/// can be reached from the main context and the receive interrupt at once,
/// so the driver serializes access to its own hardware.
pub trait NetDriver: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn chip_name(&self) -> Option<&str> {
        None
    }

    /// Hand a complete Ethernet frame (header included, no CRC) to the hardware.
    fn transmit(&self, frame: &[u8]) -> Result<(), TransmitError>;

    /// Take one received frame off the device, if any. Backs [`Capabilities::POLL`].
    fn receive(&self) -> Option<PacketBuffer> {
        None
    }

    /// Program the station address. Backs [`Capabilities::SET_HW_ADDR`].
    fn set_hardware_address(&self, _mac: MacAddr) -> Result<(), DeviceError> {
        Err(DeviceError::Io)
    }

    /// MII addresses worth probing, one bit per address. All 32 by default.
    fn phy_mask(&self) -> u32 {
        u32::MAX
    }

    /// Read a PHY register. Backs [`Capabilities::MDIO`].
    fn mdio_read(&self, _phy: u8, _reg: u8) -> Option<u16> {
        None
    }

    fn mdio_write(&self, _phy: u8, _reg: u8, _value: u16) -> Result<(), DeviceError> {
        Err(DeviceError::Io)
    }
}

/// Stable handle to a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(usize);

/// Addresses of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub mask: Ipv4Addr,
}

/// A registered interface and its configuration.
pub struct NetDevice {
    id: DeviceId,
    name: String,
    addrs: IrqMutex<Interface>,
    phys: Vec<MiiPhy>,
    driver: Box<dyn NetDriver>,
}

impl NetDevice {
    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chip_name(&self) -> Option<&str> {
        self.driver.chip_name()
    }

    /// One consistent snapshot of the addresses.
    pub fn interface(&self) -> Interface {
        self.addrs.with(|addrs| *addrs)
    }

    pub fn mac(&self) -> MacAddr {
        self.interface().mac
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.interface().ip
    }

    pub fn mask(&self) -> Ipv4Addr {
        self.interface().mask
    }

    pub fn phys(&self) -> &[MiiPhy] {
        &self.phys
    }

    /// Get or set one property of this device.
    pub fn configure(&self, command: DeviceCommand) -> Result<DeviceReply, DeviceError> {
        let reply = match command {
            DeviceCommand::GetIp => DeviceReply::Ip(self.ip()),
            DeviceCommand::SetIp(ip) => {
                self.addrs.with(|addrs| addrs.ip = ip);
                DeviceReply::Done
            }
            DeviceCommand::GetMask => DeviceReply::Mask(self.mask()),
            DeviceCommand::SetMask(mask) => {
                self.addrs.with(|addrs| addrs.mask = mask);
                DeviceReply::Done
            }
            DeviceCommand::GetHwAddr => DeviceReply::HwAddr(self.mac()),
            DeviceCommand::SetHwAddr(mac) => {
                self.set_hardware_address(mac)?;
                DeviceReply::Done
            }
            DeviceCommand::GetLinkStatus => DeviceReply::LinkStatus(self.link_status()?),
        };
        Ok(reply)
    }

    fn set_hardware_address(&self, mac: MacAddr) -> Result<(), DeviceError> {
        if !self.driver.capabilities().contains(Capabilities::SET_HW_ADDR) {
            return Err(DeviceError::Io);
        }
        self.driver.set_hardware_address(mac)?;
        self.addrs.with(|addrs| addrs.mac = mac);
        Ok(())
    }

    fn link_status(&self) -> Result<LinkStatus, DeviceError> {
        let phy = *self.phys.first().ok_or(DeviceError::NoDevice)?;
        mii::link_status(self.driver.as_ref(), phy)
    }

    pub(crate) fn transmit(&self, frame: &[u8]) -> Result<(), DeviceError> {
        self.driver.transmit(frame)?;
        Ok(())
    }

    /// Every frame the device has pending, or `None` without a poll entry point.
    pub(crate) fn drain_rx(&self) -> Option<Vec<PacketBuffer>> {
        if !self.driver.capabilities().contains(Capabilities::POLL) {
            return None;
        }
        let mut frames = Vec::new();
        while let Some(frame) = self.driver.receive() {
            frames.push(frame);
        }
        Some(frames)
    }

    fn link_report(&self) -> Vec<PhyLink> {
        if self.phys.is_empty() {
            info!("{}({}): no PHY found", self.name, self.chip_name().unwrap_or("?"));
            return Vec::new();
        }
        self.phys
            .iter()
            .map(|phy| {
                let status = mii::link_status(self.driver.as_ref(), *phy).ok();
                match status {
                    Some(LinkStatus { connected: true, speed }) => {
                        info!("{}: PHY{} -> {} activated", self.name, phy.addr, speed)
                    }
                    _ => info!("{}: PHY{} -> not linked, check the cable", self.name, phy.addr),
                }
                PhyLink {
                    device: self.id,
                    phy: phy.addr,
                    status,
                }
            })
            .collect()
    }
}

/// Configuration requests accepted by [`DeviceRegistry::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    GetIp,
    SetIp(Ipv4Addr),
    GetMask,
    SetMask(Ipv4Addr),
    GetHwAddr,
    SetHwAddr(MacAddr),
    GetLinkStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceReply {
    Ip(Ipv4Addr),
    Mask(Ipv4Addr),
    HwAddr(MacAddr),
    LinkStatus(LinkStatus),
    Done,
}

/// Link state of one PHY, as reported by [`DeviceRegistry::check_link_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyLink {
    pub device: DeviceId,
    pub phy: u8,
    pub status: Option<LinkStatus>,
}

struct Slots {
    devices: Vec<Arc<NetDevice>>,
    current: Option<usize>,
    unnamed: usize,
    last_mac: MacAddr,
}

pub struct DeviceRegistry {
    slots: IrqMutex<Slots>,
}

/// Next locally derived unicast address after `mac`.
fn next_station_address(mut mac: MacAddr) -> MacAddr {
    mac.0[0] = (mac.0[0] & !1).wrapping_add(2);
    mac
}

impl DeviceRegistry {
    /// `base_mac` seeds the station addresses handed out at registration.
    pub fn new(base_mac: MacAddr) -> Self {
        Self {
            slots: IrqMutex::new(Slots {
                devices: Vec::new(),
                current: None,
                unnamed: 0,
                last_mac: base_mac,
            }),
        }
    }

    /// Add a device. The first successful registration becomes current.
    ///
    /// Each device receives the next locally derived unicast station
    /// address, and every PHY answering on the driver's probe mask is reset
    /// and remembered for link queries. The driver is set up before the
    /// device is published, and a failed registration consumes neither a
    /// name nor an address. Registration runs from the main context only.
    pub fn register(
        &self,
        name: Option<&str>,
        driver: Box<dyn NetDriver>,
    ) -> Result<DeviceId, DeviceError> {
        let caps = driver.capabilities();
        if !caps.contains(Capabilities::TRANSMIT | Capabilities::SET_HW_ADDR) {
            return Err(DeviceError::InvalidArgument);
        }
        if driver.chip_name().is_none() {
            warn!("net: chip name is not set");
        }

        let (unnamed, last_mac) = self.slots.with(|s| (s.unnamed, s.last_mac));
        let named = name.is_some();
        let name = match name {
            Some(name) => String::from(name),
            None => format!("eth{}", unnamed),
        };

        let mac = next_station_address(last_mac);
        if let Err(err) = driver.set_hardware_address(mac) {
            debug!("net: {}: failed to set hardware address {}: {}", name, mac, err);
            return Err(DeviceError::Io);
        }

        let phys = if caps.contains(Capabilities::MDIO) {
            probe_phys(driver.as_ref())
        } else {
            Vec::new()
        };

        let id = self.slots.with(|s| {
            let index = s.devices.len();
            s.devices.push(Arc::new(NetDevice {
                id: DeviceId(index),
                name,
                addrs: IrqMutex::new(Interface {
                    mac,
                    ip: Ipv4Addr::UNSPECIFIED,
                    mask: Ipv4Addr::UNSPECIFIED,
                }),
                phys,
                driver,
            }));
            if !named {
                s.unnamed += 1;
            }
            s.last_mac = mac;
            if s.current.is_none() {
                s.current = Some(index);
            }
            DeviceId(index)
        });
        Ok(id)
    }

    pub fn current(&self) -> Result<Arc<NetDevice>, DeviceError> {
        self.slots.with(|s| {
            s.current
                .map(|index| Arc::clone(&s.devices[index]))
                .ok_or(DeviceError::NoDevice)
        })
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<NetDevice>> {
        self.slots.with(|s| s.devices.get(id.0).cloned())
    }

    pub fn find(&self, name: &str) -> Option<DeviceId> {
        self.slots
            .with(|s| s.devices.iter().find(|dev| dev.name == name).map(|dev| dev.id))
    }

    /// Snapshot of every registered device, in registration order.
    pub fn devices(&self) -> Vec<Arc<NetDevice>> {
        self.slots.with(|s| s.devices.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.with(|s| s.devices.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get or set one property of `device`, or of the current device when `None`.
    pub fn configure(
        &self,
        device: Option<DeviceId>,
        command: DeviceCommand,
    ) -> Result<DeviceReply, DeviceError> {
        let dev = match device {
            Some(id) => self.get(id).ok_or(DeviceError::NoDevice)?,
            None => self.current()?,
        };
        dev.configure(command)
    }

    /// Send a finished frame through the current device.
    pub(crate) fn transmit(&self, frame: &[u8]) -> Result<(), DeviceError> {
        self.current()?.transmit(frame)
    }

    /// Drain every frame the current device has pending.
    ///
    /// `Ok(None)` means the device has no poll entry point and delivers
    /// frames from its interrupt handler instead.
    pub(crate) fn drain_rx(&self) -> Result<Option<Vec<PacketBuffer>>, DeviceError> {
        Ok(self.current()?.drain_rx())
    }

    /// Query the link of every PHY on every device.
    pub fn check_link_status(&self) -> Vec<PhyLink> {
        self.devices()
            .iter()
            .flat_map(|dev| dev.link_report())
            .collect()
    }
}

/// Probe and reset every PHY on the driver's mask.
fn probe_phys(driver: &dyn NetDriver) -> Vec<MiiPhy> {
    let mask = driver.phy_mask();
    let mut phys = Vec::new();
    for addr in (0..32u8).filter(|bit| mask & (1 << bit) != 0) {
        if let Some(phy) = mii::probe(driver, addr) {
            mii::reset(driver, phy);
            info!(
                "PHY found @ MII[{}]: ID1 = {:#06x}, ID2 = {:#06x}",
                addr, phy.vendor_id, phy.device_id
            );
            phys.push(phy);
        }
    }
    phys
}
