//! Packet buffers with reserved headroom.
//!
//! A [`PacketBuffer`] owns one contiguous store and a movable data window.
//! Outgoing packets are built payload-first: the allocator reserves headroom
//! and each layer prepends its header with [`PacketBuffer::push_header`].
//! Incoming frames start with no headroom and each layer strips its header
//! with [`PacketBuffer::pop_header`].
//!
//! ```text
//! |<-- headroom -->|<---- data (len bytes) ---->|<- pad ->|
//! 0           data_start                data_start+len  capacity
//! ```
//!
//! The store is released when the buffer is dropped or passed to
//! [`PacketBuffer::release`]; both consume the value, so a second release
//! cannot be expressed.

extern crate alloc;

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;

use thiserror::Error;

use crate::net::socket::Socket;

/// Largest store a single buffer may request (IPv4 total length plus link header).
pub const MAX_STORE_SIZE: usize = 65_535 + 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("packet buffer allocation failed")]
    ResourceExhausted,
    #[error("header of {requested} bytes exceeds {available} bytes of headroom")]
    HeadroomExhausted { requested: usize, available: usize },
    #[error("cannot consume {requested} bytes from {available} valid bytes")]
    Truncated { requested: usize, available: usize },
}

pub struct PacketBuffer {
    store: Vec<u8>,
    data_start: usize,
    len: usize,
    /// Socket this packet is addressed to or sent from. Never keeps it alive.
    socket: Option<Weak<Socket>>,
}

impl PacketBuffer {
    /// Reserve `header_reserve` bytes of headroom followed by a zeroed
    /// `payload_len`-byte data region.
    ///
    /// The store is rounded up to an even size so a trailing odd byte can be
    /// summed as a zero-padded 16-bit word.
    pub fn allocate(header_reserve: usize, payload_len: usize) -> Result<Self, BufferError> {
        let total = header_reserve
            .checked_add(payload_len)
            .filter(|&n| n <= MAX_STORE_SIZE)
            .ok_or(BufferError::ResourceExhausted)?;
        let rounded = (total + 1) & !1;

        let mut store = Vec::new();
        store
            .try_reserve_exact(rounded)
            .map_err(|_| BufferError::ResourceExhausted)?;
        store.resize(rounded, 0);

        Ok(Self {
            store,
            data_start: header_reserve,
            len: payload_len,
            socket: None,
        })
    }

    /// Copy a received frame into a fresh buffer with no headroom.
    pub fn from_frame(frame: &[u8]) -> Result<Self, BufferError> {
        let mut buf = Self::allocate(0, frame.len())?;
        buf.data_mut().copy_from_slice(frame);
        Ok(buf)
    }

    /// Give the store back. Equivalent to dropping the buffer.
    pub fn release(self) {}

    /// Grow the data window backwards by `size` bytes and return the newly
    /// included region for the caller to fill.
    pub fn push_header(&mut self, size: usize) -> Result<&mut [u8], BufferError> {
        if size > self.data_start {
            return Err(BufferError::HeadroomExhausted {
                requested: size,
                available: self.data_start,
            });
        }
        self.data_start -= size;
        self.len += size;
        Ok(&mut self.store[self.data_start..self.data_start + size])
    }

    /// Shrink the data window from the front by `size` bytes and return the
    /// consumed region.
    pub fn pop_header(&mut self, size: usize) -> Result<&[u8], BufferError> {
        if size > self.len {
            return Err(BufferError::Truncated {
                requested: size,
                available: self.len,
            });
        }
        let start = self.data_start;
        self.data_start += size;
        self.len -= size;
        Ok(&self.store[start..start + size])
    }

    /// Drop trailing bytes (link padding) so the window holds `len` bytes.
    pub fn truncate(&mut self, len: usize) -> Result<(), BufferError> {
        if len > self.len {
            return Err(BufferError::Truncated {
                requested: len,
                available: self.len,
            });
        }
        self.len = len;
        Ok(())
    }

    pub fn data(&self) -> &[u8] {
        &self.store[self.data_start..self.data_start + self.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.store[self.data_start..self.data_start + self.len]
    }

    pub fn data_start(&self) -> usize {
        self.data_start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes still free in front of the data window.
    pub fn headroom(&self) -> usize {
        self.data_start
    }

    pub fn capacity(&self) -> usize {
        self.store.len()
    }

    pub fn set_socket(&mut self, socket: &Arc<Socket>) {
        self.socket = Some(Arc::downgrade(socket));
    }

    /// The socket this buffer belongs to, if it is still alive.
    pub fn socket(&self) -> Option<Arc<Socket>> {
        self.socket.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("data_start", &self.data_start)
            .field("len", &self.len)
            .field("capacity", &self.store.len())
            .field("socket", &self.socket.is_some())
            .finish()
    }
}
