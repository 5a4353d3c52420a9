//! UDP tests

mod common;

use std::collections::VecDeque;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};

use futures_util::task::noop_waker_ref;
use bootnet::net::ipv4::IpProtocol;
use bootnet::net::socket::{Socket, SocketTable};
use bootnet::net::udp::{self, UdpHeader};
use bootnet::net::wait::{recv_async, CancelToken, ConsoleCancel, ConsoleInput};
use bootnet::{NetError, NetStack};

use common::*;

#[test]
fn datagram_round_trip() {
    let a_addr = SocketAddrV4::new(LOCAL_IP, 40000);
    let b_addr = SocketAddrV4::new(PEER_IP, 53);

    let (stack_a, wire_a, _) = local_stack();
    let sock_a = Socket::datagram(a_addr);

    let table_b = Arc::new(SocketTable::new());
    let (stack_b, _wire_b) = stack_with(Arc::clone(&table_b), PEER_IP);
    let sock_b = Socket::datagram(b_addr);
    table_b.insert(&sock_b);

    udp::send_to(&stack_a, &sock_a, b_addr, b"query body").unwrap();
    let sent = wire_a.take_sent();
    assert_eq!(sent.len(), 1);

    let (_, ip, segment) = split_ipv4(&sent[0]);
    let header = UdpHeader::decode(&segment).unwrap();
    assert_eq!(header.src_port, 40000);
    assert_eq!(header.dst_port, 53);
    assert_eq!(header.length as usize, 8 + 10);
    assert!(transport_checksum_ok(&ip, &segment));

    deliver(&stack_b, &sent[0]).unwrap();

    assert_eq!(sock_b.rx().len(), 1);
    let buf = sock_b.rx().pop().unwrap();
    assert_eq!(buf.data(), b"query body");
    assert!(Arc::ptr_eq(&buf.socket().unwrap(), &sock_b));
    assert_eq!(sock_b.remote(), a_addr);
}

#[test]
fn no_matching_socket() {
    let (stack, _wire, table) = local_stack();
    let other = Socket::datagram(SocketAddrV4::new(LOCAL_IP, 9999));
    table.insert(&other);

    let frame = from_peer(IpProtocol::Udp, &udp_datagram(1000, 2000, b"lost"));
    assert_eq!(deliver(&stack, &frame), Err(NetError::NoMatchingSocket));
    assert!(other.rx().is_empty());
}

#[test]
fn wildcard_bind_receives() {
    let (stack, _wire, table) = local_stack();
    let socket = Socket::datagram(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 69));
    table.insert(&socket);

    deliver(&stack, &from_peer(IpProtocol::Udp, &udp_datagram(3000, 69, b"rrq"))).unwrap();
    assert_eq!(socket.rx().len(), 1);
    assert_eq!(socket.remote(), SocketAddrV4::new(PEER_IP, 3000));
}

#[test]
fn wildcard_bind_sends_from_interface_address() {
    let (stack, wire, _) = local_stack();
    let socket = Socket::datagram(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 69));
    udp::send_to(&stack, &socket, SocketAddrV4::new(PEER_IP, 3000), b"data").unwrap();

    let (_, ip, segment) = split_ipv4(&wire.take_sent()[0]);
    assert_eq!(ip.src, LOCAL_IP);
    assert!(transport_checksum_ok(&ip, &segment));
}

#[test]
fn blocking_recv_returns_queued_datagram() {
    let (stack, wire, table) = local_stack();
    let socket = Socket::datagram(SocketAddrV4::new(LOCAL_IP, 7));
    table.insert(&socket);

    // delivered through the device poll inside recv
    wire.inject(from_peer(IpProtocol::Udp, &udp_datagram(1, 7, b"polled")));
    let buf = udp::recv(&stack, &socket).unwrap();
    assert_eq!(buf.data(), b"polled");
}

#[test]
fn cancelled_recv_returns_none() {
    let table = Arc::new(SocketTable::new());
    let token = CancelToken::new();
    let stack = NetStack::new(test_config(), Arc::clone(&table)).with_cancel(token.clone());
    let socket = Socket::datagram(SocketAddrV4::new(LOCAL_IP, 7));
    table.insert(&socket);

    token.cancel();
    assert!(udp::recv(&stack, &socket).is_none());
    assert_eq!(table.len(), 1);
}

#[test]
fn async_recv_wakes_on_delivery() {
    let (stack, _wire, table) = local_stack();
    let socket = Socket::datagram(SocketAddrV4::new(LOCAL_IP, 7));
    table.insert(&socket);

    let mut cx = Context::from_waker(noop_waker_ref());
    let mut fut = pin!(recv_async(&stack, &socket));
    assert!(fut.as_mut().poll(&mut cx).is_pending());

    deliver(&stack, &from_peer(IpProtocol::Udp, &udp_datagram(1, 7, b"late"))).unwrap();

    match fut.as_mut().poll(&mut cx) {
        Poll::Ready(Some(buf)) => assert_eq!(buf.data(), b"late"),
        other => panic!("unexpected poll result: {:?}", other),
    }
}

/// Console fed by the test, one byte per read.
#[derive(Clone, Default)]
struct Keyboard(Arc<Mutex<VecDeque<u8>>>);

impl Keyboard {
    fn press(&self, key: u8) {
        self.0.lock().unwrap().push_back(key);
    }
}

impl ConsoleInput for Keyboard {
    fn try_read_byte(&self) -> Option<u8> {
        self.0.lock().unwrap().pop_front()
    }
}

#[derive(Default)]
struct WakeCount(AtomicUsize);

impl Wake for WakeCount {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn console_key_cancels_pending_recv() {
    let keys = Keyboard::default();
    let table = Arc::new(SocketTable::new());
    let stack = NetStack::new(test_config(), Arc::clone(&table))
        .with_cancel(ConsoleCancel::from_config(keys.clone(), &test_config()));
    let socket = Socket::datagram(SocketAddrV4::new(LOCAL_IP, 9));
    table.insert(&socket);

    let wakes = Arc::new(WakeCount::default());
    let waker = Waker::from(Arc::clone(&wakes));
    let mut cx = Context::from_waker(&waker);
    let mut fut = pin!(recv_async(&stack, &socket));

    keys.press(b'q');
    assert!(fut.as_mut().poll(&mut cx).is_pending());
    // the executor is told to come back and sample the console again
    let after_first = wakes.0.load(Ordering::SeqCst);
    assert!(after_first >= 1);

    assert!(fut.as_mut().poll(&mut cx).is_pending());
    assert!(wakes.0.load(Ordering::SeqCst) > after_first);

    keys.press(test_config().cancel_key);
    assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Ready(None)));
}
