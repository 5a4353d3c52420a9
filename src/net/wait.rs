//! Waiting for inbound data.
//!
//! Receives never time out. They return data, or `None` once the stack's
//! [`CancelSource`] fires; cancellation does not touch the socket.

extern crate alloc;

use alloc::sync::Arc;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll, Waker};

use futures_util::task::AtomicWaker;
use log::{debug, trace};

use crate::config::NetConfig;
use crate::net::buffer::PacketBuffer;
use crate::net::socket::Socket;
use crate::net::stack::NetStack;

/// Out-of-band request to abandon a blocking receive.
pub trait CancelSource: Send + Sync {
    fn is_cancelled(&self) -> bool;

    /// Arrange for `waker` to be woken when cancellation may have been
    /// requested. Sources that are only sampled wake it straight away.
    fn register(&self, _waker: &Waker) {}
}

/// Never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancelSource for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Non-blocking single-byte reads from the diagnostic console.
pub trait ConsoleInput: Send + Sync {
    fn try_read_byte(&self) -> Option<u8>;
}

/// Cancels when the console delivers `key` (Ctrl-C by default).
pub struct ConsoleCancel<C> {
    console: C,
    key: u8,
}

impl<C: ConsoleInput> ConsoleCancel<C> {
    pub fn new(console: C, key: u8) -> Self {
        Self { console, key }
    }

    /// Cancel on the configured key.
    pub fn from_config(console: C, config: &NetConfig) -> Self {
        Self::new(console, config.cancel_key)
    }
}

impl<C: ConsoleInput> CancelSource for ConsoleCancel<C> {
    fn is_cancelled(&self) -> bool {
        self.console.try_read_byte() == Some(self.key)
    }

    /// The console raises no event of its own, so a waiting task is asked
    /// to poll again and sample it on the next round.
    fn register(&self, waker: &Waker) {
        waker.wake_by_ref();
    }
}

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    waker: AtomicWaker,
}

/// Shareable flag another context can set to cancel receives.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.waker.wake();
    }

    /// Re-arm after a cancelled receive.
    pub fn reset(&self) {
        self.state.cancelled.store(false, Ordering::Release);
    }
}

impl CancelSource for CancelToken {
    fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    fn register(&self, waker: &Waker) {
        self.state.waker.register(waker);
    }
}

/// Spin for `spins` iterations between polls.
pub(crate) fn idle(spins: u32) {
    for _ in 0..spins {
        core::hint::spin_loop();
    }
}

/// Poll the device, check for cancellation, then check the queue, idling
/// between rounds.
pub fn recv_blocking(stack: &NetStack, socket: &Socket) -> Option<PacketBuffer> {
    loop {
        if let Err(err) = stack.poll_once() {
            trace!("recv: poll failed: {}", err);
        }
        if stack.cancel_source().is_cancelled() {
            debug!("recv: cancelled");
            return None;
        }
        if let Some(buf) = socket.rx().pop() {
            return Some(buf);
        }
        idle(stack.config().idle_spins);
    }
}

/// Receive without polling the device: frames are expected to be fed to
/// [`NetStack::netif_rx`] by an interrupt handler or another task.
pub fn recv_async<'a>(stack: &'a NetStack, socket: &'a Socket) -> RecvFuture<'a> {
    RecvFuture { stack, socket }
}

/// Future returned by [`recv_async`].
pub struct RecvFuture<'a> {
    stack: &'a NetStack,
    socket: &'a Socket,
}

impl Future for RecvFuture<'_> {
    type Output = Option<PacketBuffer>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let cancel = self.stack.cancel_source();
        if cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        if let Some(buf) = self.socket.rx().pop() {
            return Poll::Ready(Some(buf));
        }

        self.socket.rx().register(cx.waker());
        cancel.register(cx.waker());

        // A producer may have pushed between the first check and registration.
        if cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        match self.socket.rx().pop() {
            Some(buf) => Poll::Ready(Some(buf)),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());
        other.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!other.is_cancelled());
    }

    struct Keys(&'static [u8], core::sync::atomic::AtomicUsize);

    impl ConsoleInput for Keys {
        fn try_read_byte(&self) -> Option<u8> {
            let i = self.1.fetch_add(1, Ordering::Relaxed);
            self.0.get(i).copied()
        }
    }

    #[test]
    fn console_cancel_only_on_key() {
        let cancel = ConsoleCancel::from_config(Keys(b"a\x03", Default::default()), &NetConfig::default());
        assert!(!cancel.is_cancelled());
        assert!(cancel.is_cancelled());
        assert!(!cancel.is_cancelled());
    }
}
