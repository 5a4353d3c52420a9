//! Packet buffer window properties

use proptest::prelude::*;

use bootnet::net::buffer::{BufferError, MAX_STORE_SIZE};
use bootnet::PacketBuffer;

proptest! {
    #[test]
    fn push_then_pop_restores_window(
        headroom in 0usize..128,
        payload in proptest::collection::vec(any::<u8>(), 0..256),
        push in 0usize..128,
    ) {
        let mut buf = PacketBuffer::allocate(headroom, payload.len()).unwrap();
        buf.data_mut().copy_from_slice(&payload);
        let (start, len) = (buf.data_start(), buf.len());

        match buf.push_header(push) {
            Ok(header) => {
                prop_assert!(push <= headroom);
                header.fill(0xA5);
                prop_assert_eq!(buf.data_start(), start - push);
                prop_assert_eq!(buf.len(), len + push);

                let popped = buf.pop_header(push).unwrap();
                prop_assert!(popped.iter().all(|&b| b == 0xA5));
            }
            Err(err) => {
                prop_assert!(push > headroom);
                prop_assert_eq!(
                    err,
                    BufferError::HeadroomExhausted { requested: push, available: headroom }
                );
            }
        }
        prop_assert_eq!(buf.data_start(), start);
        prop_assert_eq!(buf.len(), len);
        prop_assert_eq!(buf.data(), &payload[..]);
    }

    #[test]
    fn nested_headers_unwind_in_order(
        outer in 0usize..64,
        inner in 0usize..64,
        spare in 0usize..16,
        payload in proptest::collection::vec(any::<u8>(), 0..128),
    ) {
        // transport header first, then the network header in front of it
        let mut buf = PacketBuffer::allocate(outer + inner + spare, payload.len()).unwrap();
        buf.data_mut().copy_from_slice(&payload);
        let (start, len) = (buf.data_start(), buf.len());

        buf.push_header(outer).unwrap().fill(0x11);
        let after_outer = buf.data_start();
        buf.push_header(inner).unwrap().fill(0x22);
        prop_assert_eq!(buf.data_start(), start - outer - inner);
        prop_assert_eq!(buf.len(), len + outer + inner);

        let popped = buf.pop_header(inner).unwrap();
        prop_assert!(popped.iter().all(|&b| b == 0x22));
        prop_assert_eq!(buf.data_start(), after_outer);
        prop_assert_eq!(buf.len(), len + outer);

        let popped = buf.pop_header(outer).unwrap();
        prop_assert!(popped.iter().all(|&b| b == 0x11));
        prop_assert_eq!(buf.data_start(), start);
        prop_assert_eq!(buf.len(), len);
        prop_assert_eq!(buf.data(), &payload[..]);
    }

    #[test]
    fn store_is_even_and_covers_request(headroom in 0usize..100, payload in 0usize..1600) {
        let buf = PacketBuffer::allocate(headroom, payload).unwrap();
        prop_assert_eq!(buf.capacity() % 2, 0);
        prop_assert!(buf.capacity() >= headroom + payload);
        prop_assert_eq!(buf.headroom(), headroom);
        prop_assert!(buf.data().iter().all(|&b| b == 0));
    }
}

#[test]
fn oversized_allocation_is_exhausted() {
    assert_eq!(
        PacketBuffer::allocate(14, MAX_STORE_SIZE).unwrap_err(),
        BufferError::ResourceExhausted
    );
    assert!(PacketBuffer::allocate(0, MAX_STORE_SIZE).is_ok());
}

#[test]
fn pop_beyond_data_is_truncated() {
    let mut buf = PacketBuffer::from_frame(&[1, 2, 3]).unwrap();
    assert_eq!(
        buf.pop_header(4).unwrap_err(),
        BufferError::Truncated { requested: 4, available: 3 }
    );
    buf.truncate(1).unwrap();
    assert_eq!(buf.data(), &[1]);
}
