//! Interrupt exclusion for state shared with receive interrupts.
//!
//! Frames may be delivered straight from the NIC interrupt handler, so any
//! structure that both the interrupt path and the main context touch (socket
//! receive queues, the ARP cache, the device table) sits behind an
//! [`IrqMutex`].
//!
//! How interrupts are masked depends on the target:
//! - firmware that calls [`install_hooks`] gets its own save/restore pair
//!   everywhere;
//! - bare-metal and UEFI x86_64 fall back to clearing IF;
//! - other bare-metal targets have no portable fallback and panic on the
//!   first lock until hooks are installed;
//! - hosted builds deliver "interrupts" from another thread, and the
//!   spinlock alone excludes it.

use conquer_once::spin::OnceCell;
use spin::Mutex;

/// Platform interrupt mask and restore, supplied by the embedding firmware.
#[derive(Debug, Clone, Copy)]
pub struct InterruptHooks {
    /// Mask interrupt delivery and return the state to restore.
    pub disable: fn() -> usize,
    /// Restore the state returned by `disable`.
    pub restore: fn(usize),
}

static HOOKS: OnceCell<InterruptHooks> = OnceCell::uninit();

/// Install the platform hooks. Only the first call takes effect; returns
/// whether this one did.
pub fn install_hooks(hooks: InterruptHooks) -> bool {
    HOOKS.try_init_once(|| hooks).is_ok()
}

/// Run `f` with interrupt delivery masked, restoring the previous state after.
#[inline]
pub fn critical<R>(f: impl FnOnce() -> R) -> R {
    match HOOKS.try_get() {
        Ok(hooks) => {
            let state = (hooks.disable)();
            let result = f();
            (hooks.restore)(state);
            result
        }
        Err(_) => builtin_critical(f),
    }
}

#[cfg(all(
    target_arch = "x86_64",
    any(target_os = "none", target_os = "uefi")
))]
#[inline]
fn builtin_critical<R>(f: impl FnOnce() -> R) -> R {
    x86_64::instructions::interrupts::without_interrupts(f)
}

#[cfg(all(
    not(target_arch = "x86_64"),
    any(target_os = "none", target_os = "uefi")
))]
fn builtin_critical<R>(_f: impl FnOnce() -> R) -> R {
    panic!("bootnet: interrupt hooks not installed; call irq::install_hooks before using the stack")
}

#[cfg(not(any(target_os = "none", target_os = "uefi")))]
#[inline]
fn builtin_critical<R>(f: impl FnOnce() -> R) -> R {
    f()
}

/// Spinlock whose critical section also excludes interrupt-context producers.
///
/// Access is closure-scoped so the masked span is exactly one inspection or
/// one mutation, never a whole protocol handler or a driver call.
pub struct IrqMutex<T> {
    inner: Mutex<T>,
}

impl<T> IrqMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical(|| {
            let mut guard = self.inner.lock();
            f(&mut guard)
        })
    }
}

impl<T: Default> Default for IrqMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
