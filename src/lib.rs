//! Network engine for boot firmware.
//!
//! Ethernet, ARP, IPv4, ICMP echo, UDP and a client-side TCP state machine
//! over a minimal driver interface. Everything hangs off one
//! [`NetStack`](net::NetStack) context. The only process-wide setting is
//! the platform interrupt hooks in [`net::irq`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod drivers;
pub mod net;

pub use config::NetConfig;
pub use drivers::net::{DeviceCommand, DeviceError, DeviceReply, NetDriver};
pub use net::{MacAddr, NetError, NetStack, PacketBuffer};
