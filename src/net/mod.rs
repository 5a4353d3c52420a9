//! Network stack
//!
//! One file per protocol layer. Outbound packets travel
//! transport -> [`ipv4`] -> [`ethernet`] -> device; inbound frames enter
//! through [`stack::NetStack::netif_rx`] and are dispatched upwards.

pub mod arp;
pub mod buffer;
pub mod checksum;
pub mod error;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod irq;
pub mod socket;
pub mod stack;
pub mod tcp;
pub mod udp;
pub mod wait;

pub use buffer::PacketBuffer;
pub use error::NetError;
pub use ethernet::MacAddr;
pub use stack::{Interface, NetStack};
