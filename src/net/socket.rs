//! Transport endpoints and the socket lookup used by inbound delivery.
//!
//! The stack never owns sockets. Whoever binds them keeps the `Arc`s and
//! exposes them to the stack through [`SocketLookup`]; [`SocketTable`] is a
//! minimal implementation of that lookup.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::net::{Ipv4Addr, SocketAddrV4};
use core::task::Waker;

use futures_util::task::AtomicWaker;

use crate::net::buffer::PacketBuffer;
use crate::net::ipv4::Ipv4Header;
use crate::net::irq::IrqMutex;
use crate::net::tcp::{TcpHeader, TcpState};
use crate::net::udp::UdpHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Datagram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
}

/// Sequence space and connection state of a stream socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpControl {
    pub seq_num: u32,
    pub ack_num: u32,
    pub state: TcpState,
}

/// Inbound buffers waiting for the application, in arrival order.
///
/// Producers may run in interrupt context; each push or pop is one short
/// critical section. A pushed buffer wakes the task registered by the async
/// receive path.
#[derive(Default)]
pub struct RxQueue {
    queue: IrqMutex<VecDeque<PacketBuffer>>,
    waker: AtomicWaker,
}

impl RxQueue {
    pub fn push(&self, buf: PacketBuffer) {
        self.queue.with(|q| q.push_back(buf));
        self.waker.wake();
    }

    pub fn pop(&self) -> Option<PacketBuffer> {
        self.queue.with(|q| q.pop_front())
    }

    pub fn is_empty(&self) -> bool {
        self.queue.with(|q| q.is_empty())
    }

    pub fn len(&self) -> usize {
        self.queue.with(|q| q.len())
    }

    pub(crate) fn register(&self, waker: &Waker) {
        self.waker.register(waker);
    }
}

pub struct Socket {
    kind: SocketKind,
    endpoints: IrqMutex<Endpoints>,
    tcp: IrqMutex<TcpControl>,
    rx: RxQueue,
}

impl Socket {
    /// A datagram socket bound to `local`; the peer is learned from inbound traffic.
    pub fn datagram(local: SocketAddrV4) -> Arc<Self> {
        Self::new(
            SocketKind::Datagram,
            local,
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            0,
        )
    }

    /// A closed stream socket that will send its first segment with `initial_seq`.
    pub fn stream(local: SocketAddrV4, remote: SocketAddrV4, initial_seq: u32) -> Arc<Self> {
        Self::new(SocketKind::Stream, local, remote, initial_seq)
    }

    fn new(kind: SocketKind, local: SocketAddrV4, remote: SocketAddrV4, seq_num: u32) -> Arc<Self> {
        Arc::new(Self {
            kind,
            endpoints: IrqMutex::new(Endpoints { local, remote }),
            tcp: IrqMutex::new(TcpControl {
                seq_num,
                ack_num: 0,
                state: TcpState::Closed,
            }),
            rx: RxQueue::default(),
        })
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints.with(|ep| *ep)
    }

    pub fn local(&self) -> SocketAddrV4 {
        self.endpoints().local
    }

    pub fn remote(&self) -> SocketAddrV4 {
        self.endpoints().remote
    }

    pub fn set_remote(&self, remote: SocketAddrV4) {
        self.endpoints.with(|ep| ep.remote = remote);
    }

    pub fn tcp(&self) -> TcpControl {
        self.tcp.with(|tcb| *tcb)
    }

    pub fn state(&self) -> TcpState {
        self.tcp().state
    }

    pub(crate) fn with_tcp<R>(&self, f: impl FnOnce(&mut TcpControl) -> R) -> R {
        self.tcp.with(f)
    }

    pub fn rx(&self) -> &RxQueue {
        &self.rx
    }
}

/// Finds the socket an inbound segment is addressed to.
pub trait SocketLookup: Send + Sync {
    fn find_stream_socket(&self, tcp: &TcpHeader, ip: &Ipv4Header) -> Option<Arc<Socket>>;
    fn find_datagram_socket(&self, udp: &UdpHeader, ip: &Ipv4Header) -> Option<Arc<Socket>>;
}

impl<T: SocketLookup + ?Sized> SocketLookup for Arc<T> {
    fn find_stream_socket(&self, tcp: &TcpHeader, ip: &Ipv4Header) -> Option<Arc<Socket>> {
        (**self).find_stream_socket(tcp, ip)
    }

    fn find_datagram_socket(&self, udp: &UdpHeader, ip: &Ipv4Header) -> Option<Arc<Socket>> {
        (**self).find_datagram_socket(udp, ip)
    }
}

fn local_matches(local: SocketAddrV4, dst: Ipv4Addr, port: u16) -> bool {
    local.port() == port && (local.ip().is_unspecified() || *local.ip() == dst)
}

/// Linear list of open sockets.
#[derive(Default)]
pub struct SocketTable {
    sockets: IrqMutex<Vec<Arc<Socket>>>,
}

impl SocketTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, socket: &Arc<Socket>) {
        self.sockets.with(|list| list.push(Arc::clone(socket)));
    }

    pub fn remove(&self, socket: &Arc<Socket>) {
        self.sockets
            .with(|list| list.retain(|s| !Arc::ptr_eq(s, socket)));
    }

    pub fn len(&self) -> usize {
        self.sockets.with(|list| list.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find(&self, pred: impl Fn(&Socket) -> bool) -> Option<Arc<Socket>> {
        self.sockets
            .with(|list| list.iter().find(|s| pred(s)).cloned())
    }
}

impl SocketLookup for SocketTable {
    fn find_stream_socket(&self, tcp: &TcpHeader, ip: &Ipv4Header) -> Option<Arc<Socket>> {
        self.find(|s| {
            let ep = s.endpoints();
            s.kind == SocketKind::Stream
                && local_matches(ep.local, ip.dst, tcp.dst_port)
                && ep.remote.port() == tcp.src_port
                && *ep.remote.ip() == ip.src
        })
    }

    fn find_datagram_socket(&self, udp: &UdpHeader, ip: &Ipv4Header) -> Option<Arc<Socket>> {
        self.find(|s| {
            s.kind == SocketKind::Datagram && local_matches(s.local(), ip.dst, udp.dst_port)
        })
    }
}
