//! Tunables for a [`NetStack`](crate::net::stack::NetStack).

use crate::net::ethernet::MacAddr;

/// Ctrl-C on the diagnostic console.
pub const CTRL_C: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfig {
    /// Seed for the station addresses assigned at registration.
    pub default_mac: MacAddr,
    /// Advertised window on segments carrying ACK.
    pub ack_window: u16,
    /// Advertised window on segments without ACK (the initial SYN).
    pub syn_window: u16,
    pub ttl: u8,
    /// Console byte that aborts a blocking receive.
    pub cancel_key: u8,
    /// `spin_loop` hints between two receive polls.
    pub idle_spins: u32,
    /// ARP requests sent by the default resolver before giving up.
    pub resolve_attempts: u32,
    /// Device polls after each ARP request.
    pub resolve_polls: u32,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            default_mac: MacAddr([0x00, 0x0A, 0x35, 0x00, 0x01, 0x22]),
            ack_window: 457,
            syn_window: 14600,
            ttl: 64,
            cancel_key: CTRL_C,
            idle_spins: 1000,
            resolve_attempts: 3,
            resolve_polls: 64,
        }
    }
}
