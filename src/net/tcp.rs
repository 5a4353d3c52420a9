//! TCP (RFC 793), client side only.
//!
//! The connection state machine is driven purely by the flags of inbound
//! segments. There are no timers and no retransmission, and the advertised
//! window is one of two constants chosen by the presence of ACK.
//!
//! # Limitations
//! - Passive open (an inbound SYN without ACK) is logged and ignored
//! - `ack_num` follows the latest data segment; overlapping or out-of-order
//!   segments are not reassembled
//! - Checksums of inbound segments are not verified

extern crate alloc;

use alloc::sync::Arc;

use bitflags::bitflags;
use log::{debug, error, trace};

use crate::net::buffer::PacketBuffer;
use crate::net::checksum::pseudo_header_checksum;
use crate::net::error::{Layer, NetError};
use crate::net::ethernet;
use crate::net::ipv4::{self, IpProtocol, Ipv4Header};
use crate::net::socket::Socket;
use crate::net::stack::NetStack;
use crate::net::wait;

/// Header without options
pub const HEADER_LEN: usize = 20;
/// Largest header the 4-bit data offset can describe
pub const MAX_HEADER_LEN: usize = 60;
pub const MAX_OPTIONS_LEN: usize = MAX_HEADER_LEN - HEADER_LEN;

bitflags! {
    /// Control bits of the header's flags byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
    /// Sent SYN, waiting for SYN-ACK
    SynSent,
    Established,
    /// Sent FIN, waiting for its ACK or the peer's FIN
    FinWait1,
    /// Our FIN was acknowledged, waiting for the peer's FIN
    FinWait2,
    /// Both sides sent FIN simultaneously, waiting for the ACK of ours
    Closing,
    TimeWait,
    /// Peer closed, we may still send
    CloseWait,
    /// Sent FIN after the peer's, waiting for its ACK
    LastAck,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    /// Header length in bytes, options included.
    pub header_len: usize,
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
}

impl TcpHeader {
    pub fn decode(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < HEADER_LEN {
            return Err(NetError::malformed(Layer::Tcp, HEADER_LEN, bytes.len()));
        }
        let header_len = ((bytes[12] >> 4) as usize) << 2;
        if header_len < HEADER_LEN || header_len > bytes.len() {
            return Err(NetError::malformed(
                Layer::Tcp,
                header_len.max(HEADER_LEN),
                bytes.len(),
            ));
        }
        Ok(Self {
            src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
            dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
            seq_num: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ack_num: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            header_len,
            flags: TcpFlags::from_bits_truncate(bytes[13]),
            window: u16::from_be_bytes([bytes[14], bytes[15]]),
            checksum: u16::from_be_bytes([bytes[16], bytes[17]]),
            urgent: u16::from_be_bytes([bytes[18], bytes[19]]),
        })
    }

    /// Write the fixed 20 bytes; options follow at `out[HEADER_LEN..]`.
    pub fn encode(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        out[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        out[4..8].copy_from_slice(&self.seq_num.to_be_bytes());
        out[8..12].copy_from_slice(&self.ack_num.to_be_bytes());
        out[12] = ((self.header_len >> 2) as u8) << 4;
        out[13] = self.flags.bits();
        out[14..16].copy_from_slice(&self.window.to_be_bytes());
        out[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        out[18..20].copy_from_slice(&self.urgent.to_be_bytes());
    }
}

/// Flag pattern of an inbound segment, in the order the machine tests them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    SynAck,
    Syn,
    FinAck,
    Fin,
    /// ACK without PSH
    Ack,
    Other,
}

impl SegmentKind {
    pub fn classify(flags: TcpFlags) -> Self {
        let ack = flags.contains(TcpFlags::ACK);
        if flags.contains(TcpFlags::SYN) {
            if ack { SegmentKind::SynAck } else { SegmentKind::Syn }
        } else if flags.contains(TcpFlags::FIN) {
            if ack { SegmentKind::FinAck } else { SegmentKind::Fin }
        } else if ack && !flags.contains(TcpFlags::PSH) {
            SegmentKind::Ack
        } else {
            SegmentKind::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// `ack_num = peer_seq + 1` and answer with a bare ACK.
    AckPeer,
    RejectPassiveOpen,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: Action,
    pub next: TcpState,
}

/// Next state and action for a segment with `flags` arriving in `state`.
///
/// Combinations with no legal next state (SYN+ACK outside `SynSent`, FIN
/// where no close is in progress or possible) are errors; payload delivery
/// for PSH segments is handled by the caller on top of the transition.
pub fn transition(state: TcpState, flags: TcpFlags) -> Result<Transition, NetError> {
    use TcpState::*;

    let ack_to = |next: TcpState| Ok(Transition { action: Action::AckPeer, next });
    let stay: Result<Transition, NetError> = Ok(Transition { action: Action::None, next: state });
    let illegal: Result<Transition, NetError> = Err(NetError::IllegalTransition { state, flags });

    match (SegmentKind::classify(flags), state) {
        (SegmentKind::SynAck, SynSent) => ack_to(Established),
        (
            SegmentKind::SynAck,
            Established | FinWait1 | FinWait2 | Closing | TimeWait | CloseWait | LastAck | Closed,
        ) => illegal,

        (SegmentKind::Syn, _) => Ok(Transition {
            action: Action::RejectPassiveOpen,
            next: state,
        }),

        (SegmentKind::FinAck, FinWait1) => ack_to(TimeWait),
        (SegmentKind::Fin, FinWait1) => ack_to(Closing),
        (SegmentKind::FinAck | SegmentKind::Fin, FinWait2) => ack_to(TimeWait),
        (SegmentKind::FinAck | SegmentKind::Fin, Established) => ack_to(CloseWait),
        (
            SegmentKind::FinAck | SegmentKind::Fin,
            SynSent | Closing | TimeWait | CloseWait | LastAck | Closed,
        ) => illegal,

        (SegmentKind::Ack, FinWait1) => Ok(Transition { action: Action::None, next: FinWait2 }),
        (SegmentKind::Ack, Closing) => Ok(Transition { action: Action::None, next: TimeWait }),
        (SegmentKind::Ack, LastAck) => Ok(Transition { action: Action::None, next: Closed }),
        (SegmentKind::Ack, SynSent | Established | FinWait2 | TimeWait | CloseWait | Closed) => stay,

        (SegmentKind::Other, _) => stay,
    }
}

/// Buffer with headroom for exactly the link, IP and TCP headers of one segment.
fn segment_buffer(socket: &Arc<Socket>, options_len: usize, payload: &[u8]) -> Result<PacketBuffer, NetError> {
    let headroom = ethernet::HEADER_LEN + ipv4::HEADER_LEN + HEADER_LEN + padded(options_len);
    let mut buf = PacketBuffer::allocate(headroom, payload.len())?;
    buf.data_mut().copy_from_slice(payload);
    buf.set_socket(socket);
    Ok(buf)
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

/// Prepend a TCP header to the payload in `buf` and send it from the
/// attached socket.
///
/// `options` are zero-padded to a multiple of four bytes. The socket's
/// `seq_num` advances by one for SYN or FIN and by the payload length for
/// PSH, once the segment has been handed to the device.
pub fn send(stack: &NetStack, mut buf: PacketBuffer, flags: TcpFlags, options: &[u8]) -> Result<(), NetError> {
    let options_len = padded(options.len());
    if options_len > MAX_OPTIONS_LEN {
        return Err(NetError::OptionsTooLong(options.len()));
    }
    let socket = buf.socket().ok_or(NetError::SocketGone)?;
    let ep = socket.endpoints();
    let tcb = socket.tcp();
    let src = ipv4::source_address(stack, *ep.local.ip())?;
    let payload_len = buf.len() as u32;
    let header_len = HEADER_LEN + options_len;

    let window = if flags.contains(TcpFlags::ACK) {
        stack.config().ack_window
    } else {
        stack.config().syn_window
    };
    let header = TcpHeader {
        src_port: ep.local.port(),
        dst_port: ep.remote.port(),
        seq_num: tcb.seq_num,
        ack_num: tcb.ack_num,
        header_len,
        flags,
        window,
        checksum: 0,
        urgent: 0,
    };
    let out = buf.push_header(header_len)?;
    header.encode(out);
    out[HEADER_LEN..HEADER_LEN + options.len()].copy_from_slice(options);
    out[HEADER_LEN + options.len()..].fill(0);

    let checksum = pseudo_header_checksum(&mut buf, src, *ep.remote.ip(), IpProtocol::Tcp.into())?;
    buf.data_mut()[16..18].copy_from_slice(&checksum.to_be_bytes());

    trace!(
        "tcp: {} -> {} {:?} seq {} ack {} len {}",
        ep.local, ep.remote, flags, tcb.seq_num, tcb.ack_num, payload_len
    );
    ipv4::send(stack, buf, IpProtocol::Tcp)?;

    socket.with_tcp(|tcb| {
        if flags.intersects(TcpFlags::SYN | TcpFlags::FIN) {
            tcb.seq_num = tcb.seq_num.wrapping_add(1);
        }
        if flags.contains(TcpFlags::PSH) {
            tcb.seq_num = tcb.seq_num.wrapping_add(payload_len);
        }
    });
    Ok(())
}

fn send_ack(stack: &NetStack, socket: &Arc<Socket>) -> Result<(), NetError> {
    send(stack, segment_buffer(socket, 0, &[])?, TcpFlags::ACK, &[])
}

/// Active open: send SYN (with `options`) and enter `SynSent`.
pub fn connect(stack: &NetStack, socket: &Arc<Socket>, options: &[u8]) -> Result<(), NetError> {
    if socket.state() != TcpState::Closed {
        return Err(NetError::InvalidState);
    }
    let buf = segment_buffer(socket, options.len(), &[])?;
    send(stack, buf, TcpFlags::SYN, options)?;
    socket.with_tcp(|tcb| tcb.state = TcpState::SynSent);
    Ok(())
}

/// Send `payload` as one PSH|ACK segment.
pub fn send_data(stack: &NetStack, socket: &Arc<Socket>, payload: &[u8]) -> Result<(), NetError> {
    match socket.state() {
        TcpState::Established | TcpState::CloseWait => {}
        _ => return Err(NetError::InvalidState),
    }
    let buf = segment_buffer(socket, 0, payload)?;
    send(stack, buf, TcpFlags::PSH | TcpFlags::ACK, &[])
}

/// Send FIN|ACK. `Established` moves to `FinWait1`, `CloseWait` to `LastAck`.
pub fn close(stack: &NetStack, socket: &Arc<Socket>) -> Result<(), NetError> {
    let next = match socket.state() {
        TcpState::Established => TcpState::FinWait1,
        TcpState::CloseWait => TcpState::LastAck,
        _ => return Err(NetError::InvalidState),
    };
    let buf = segment_buffer(socket, 0, &[])?;
    send(stack, buf, TcpFlags::FIN | TcpFlags::ACK, &[])?;
    socket.with_tcp(|tcb| tcb.state = next);
    Ok(())
}

/// Run one inbound segment through the state machine of its socket.
///
/// An illegal transition is a broken invariant: it panics in debug builds
/// and is reported as [`NetError::IllegalTransition`] otherwise, with the
/// socket left untouched.
pub fn deliver_inbound(stack: &NetStack, mut buf: PacketBuffer, ip: &Ipv4Header) -> Result<(), NetError> {
    let header = TcpHeader::decode(buf.data())?;
    buf.pop_header(header.header_len)?;
    trace!(
        "tcp: {}:{} -> {}:{} {:?} seq {} len {}",
        ip.src, header.src_port, ip.dst, header.dst_port, header.flags, header.seq_num, buf.len()
    );

    let Some(socket) = stack.sockets().find_stream_socket(&header, ip) else {
        debug!("tcp: no socket for {}:{}", ip.dst, header.dst_port);
        return Err(NetError::NoMatchingSocket);
    };
    buf.set_socket(&socket);

    let state = socket.state();
    let step = match transition(state, header.flags) {
        Ok(step) => step,
        Err(err) => {
            error!("tcp: illegal transition from {:?} on {:?}", state, header.flags);
            if cfg!(debug_assertions) {
                panic!("illegal TCP transition from {:?} on {:?}", state, header.flags);
            }
            return Err(err);
        }
    };

    let mut reply = Ok(());
    match step.action {
        Action::AckPeer => {
            socket.with_tcp(|tcb| tcb.ack_num = header.seq_num.wrapping_add(1));
            reply = send_ack(stack, &socket);
        }
        Action::RejectPassiveOpen => debug!("tcp: SYN from {} not supported", ip.src),
        Action::None => {}
    }
    socket.with_tcp(|tcb| tcb.state = step.next);

    if header.flags.contains(TcpFlags::PSH) && !header.flags.contains(TcpFlags::SYN) {
        let len = buf.len() as u32;
        socket.with_tcp(|tcb| tcb.ack_num = header.seq_num.wrapping_add(len));
        socket.rx().push(buf);
    }
    reply
}

/// Block until a data segment arrives on `socket` or the stack's cancel source fires.
pub fn recv(stack: &NetStack, socket: &Socket) -> Option<PacketBuffer> {
    wait::recv_blocking(stack, socket)
}
