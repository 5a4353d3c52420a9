//! Error types shared by the protocol layers.

use core::fmt;
use core::net::Ipv4Addr;

use thiserror::Error;

use crate::drivers::net::DeviceError;
use crate::net::buffer::BufferError;
use crate::net::tcp::{TcpFlags, TcpState};

/// Protocol layer a header belongs to, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Ethernet,
    Arp,
    Ipv4,
    Icmp,
    Udp,
    Tcp,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Ethernet => "Ethernet",
            Layer::Arp => "ARP",
            Layer::Ipv4 => "IPv4",
            Layer::Icmp => "ICMP",
            Layer::Udp => "UDP",
            Layer::Tcp => "TCP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("packet buffer allocation failed")]
    ResourceExhausted,
    #[error("malformed {layer} header: need {needed} bytes, have {available}")]
    MalformedHeader {
        layer: Layer,
        needed: usize,
        available: usize,
    },
    #[error("unsupported {layer} protocol {value:#06x}")]
    UnsupportedProtocol { layer: Layer, value: u16 },
    #[error("no socket matches the inbound segment")]
    NoMatchingSocket,
    /// The buffer carries no socket back-reference, or the socket was dropped.
    #[error("buffer is not attached to a live socket")]
    SocketGone,
    #[error("no hardware address for {0}")]
    Unresolved(Ipv4Addr),
    #[error("link header does not start at the buffer store")]
    HeadroomMismatch,
    #[error("{0} bytes of TCP options exceed the header limit")]
    OptionsTooLong(usize),
    #[error("operation not valid in the current connection state")]
    InvalidState,
    #[error("illegal TCP transition from {state:?} on flags {flags:?}")]
    IllegalTransition { state: TcpState, flags: TcpFlags },
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Buffer(BufferError),
}

impl From<BufferError> for NetError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::ResourceExhausted => NetError::ResourceExhausted,
            other => NetError::Buffer(other),
        }
    }
}

impl NetError {
    pub(crate) fn malformed(layer: Layer, needed: usize, available: usize) -> Self {
        NetError::MalformedHeader {
            layer,
            needed,
            available,
        }
    }
}
