//! The network stack context.
//!
//! A [`NetStack`] owns everything the protocol layers share: the device
//! registry, the ARP cache, the IP identification counter and the
//! collaborators used for socket lookup, address resolution and receive
//! cancellation. Every layer takes it by shared reference, so one instance
//! can be handed to both the main loop and the receive interrupt handler.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicU16, Ordering};

use log::{debug, trace, warn};

use crate::config::NetConfig;
pub use crate::drivers::net::Interface;
use crate::drivers::net::{
    DeviceCommand, DeviceError, DeviceId, DeviceRegistry, DeviceReply, NetDriver, PhyLink,
};
use crate::net::arp::{self, AddressResolver, ArpCache, ArpProbe};
use crate::net::buffer::PacketBuffer;
use crate::net::error::{Layer, NetError};
use crate::net::ethernet::{EtherType, EthernetHeader, MacAddr};
use crate::net::ipv4;
use crate::net::socket::SocketLookup;
use crate::net::wait::{CancelSource, NeverCancel};

pub struct NetStack {
    config: NetConfig,
    devices: DeviceRegistry,
    arp: ArpCache,
    ip_id: AtomicU16,
    sockets: Box<dyn SocketLookup>,
    resolver: Box<dyn AddressResolver>,
    cancel: Box<dyn CancelSource>,
}

impl NetStack {
    /// A stack with no devices that resolves by ARP probing and never cancels.
    pub fn new(config: NetConfig, sockets: impl SocketLookup + 'static) -> Self {
        Self {
            devices: DeviceRegistry::new(config.default_mac),
            config,
            arp: ArpCache::new(),
            ip_id: AtomicU16::new(1),
            sockets: Box::new(sockets),
            resolver: Box::new(ArpProbe),
            cancel: Box::new(NeverCancel),
        }
    }

    pub fn with_resolver(mut self, resolver: impl AddressResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn with_cancel(mut self, cancel: impl CancelSource + 'static) -> Self {
        self.cancel = Box::new(cancel);
        self
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn arp(&self) -> &ArpCache {
        &self.arp
    }

    pub fn sockets(&self) -> &dyn SocketLookup {
        self.sockets.as_ref()
    }

    pub fn cancel_source(&self) -> &dyn CancelSource {
        self.cancel.as_ref()
    }

    pub fn register_device(
        &self,
        name: Option<&str>,
        driver: Box<dyn NetDriver>,
    ) -> Result<DeviceId, DeviceError> {
        self.devices.register(name, driver)
    }

    pub fn configure(
        &self,
        device: Option<DeviceId>,
        command: DeviceCommand,
    ) -> Result<DeviceReply, DeviceError> {
        self.devices.configure(device, command)
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Addresses of the current device.
    pub fn interface(&self) -> Result<Interface, DeviceError> {
        Ok(self.devices.current()?.interface())
    }

    pub fn check_link_status(&self) -> Vec<PhyLink> {
        self.devices.check_link_status()
    }

    /// Next IP identification value, shared by every outbound packet.
    pub(crate) fn next_ip_id(&self) -> u16 {
        self.ip_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn transmit(&self, frame: &[u8]) -> Result<(), DeviceError> {
        self.devices.transmit(frame)
    }

    /// Hardware address for `ip`: the ARP cache first, then the resolver.
    pub fn resolve(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.arp
            .lookup(ip)
            .or_else(|| self.resolver.resolve_blocking(self, ip))
    }

    /// Dispatch one received frame. Safe to call from interrupt context.
    pub fn netif_rx(&self, mut buf: PacketBuffer) -> Result<(), NetError> {
        let header = EthernetHeader::pop(&mut buf)?;
        trace!("eth: {} -> {} {:?}", header.src, header.dest, header.ethertype);

        match header.ethertype {
            EtherType::Arp => arp::handle_inbound(self, buf),
            EtherType::Ipv4 => ipv4::deliver_inbound(self, buf).map(|_| ()),
            EtherType::Rarp => {
                debug!("eth: RARP not supported");
                Ok(())
            }
            EtherType::Unknown(value) => Err(NetError::UnsupportedProtocol {
                layer: Layer::Ethernet,
                value,
            }),
        }
    }

    /// Pull every pending frame from the current device and dispatch it.
    ///
    /// Returns the number of frames handled; zero when the device has no
    /// poll entry point. Per-frame errors are logged and do not stop the
    /// remaining frames.
    pub fn poll_once(&self) -> Result<usize, DeviceError> {
        let Some(frames) = self.devices.drain_rx()? else {
            return Ok(0);
        };
        let count = frames.len();
        for frame in frames {
            if let Err(err) = self.netif_rx(frame) {
                match err {
                    NetError::MalformedHeader { .. } | NetError::Unresolved(_) => {
                        warn!("net: frame dropped: {}", err)
                    }
                    _ => debug!("net: frame dropped: {}", err),
                }
            }
        }
        Ok(count)
    }
}
