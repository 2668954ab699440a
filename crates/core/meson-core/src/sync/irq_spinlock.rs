//! Interrupt-safe spin lock.
//!
//! Masks interrupts on the local core before taking the lock and restores
//! the previous mask on release, so a lock shared with an interrupt handler
//! cannot deadlock against the handler on the same core.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use super::RawSpinLock;

/// Interrupt mask of one core, as saved by [`save_and_mask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqState(u64);

impl IrqState {
    /// All interrupts unmasked.
    pub const ENABLED: Self = Self(0);
}

/// A spin lock that masks interrupts while held.
pub struct IrqSpinLock<T> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

// SAFETY: same reasoning as SpinLock.
unsafe impl<T: Send> Send for IrqSpinLock<T> {}
unsafe impl<T: Send> Sync for IrqSpinLock<T> {}

impl<T> IrqSpinLock<T> {
    /// Creates a new unlocked `IrqSpinLock`.
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawSpinLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Masks interrupts, then acquires the lock.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let saved = save_and_mask();
        self.raw.acquire();
        IrqSpinLockGuard {
            lock: self,
            saved,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire the lock without spinning.
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let saved = save_and_mask();
        if self.raw.try_acquire() {
            Some(IrqSpinLockGuard {
                lock: self,
                saved,
                _not_send: PhantomData,
            })
        } else {
            restore(saved);
            None
        }
    }
}

/// RAII guard that releases the lock and restores the interrupt mask.
///
/// Not `Send`: the saved mask belongs to the core that took the lock.
pub struct IrqSpinLockGuard<'a, T> {
    lock: &'a IrqSpinLock<T>,
    saved: IrqState,
    _not_send: PhantomData<*const ()>,
}

impl<T> IrqSpinLockGuard<'_, T> {
    /// Releases the lock but leaves interrupts masked, returning the mask
    /// the guard would have restored.
    ///
    /// For handing the critical section over to another lock that takes
    /// responsibility for restoring the mask.
    pub fn unlock_masked(guard: Self) -> IrqState {
        let guard = ManuallyDrop::new(guard);
        guard.lock.raw.release();
        guard.saved
    }
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the lock is held.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
        restore(self.saved);
    }
}

/// Masks interrupts on the calling core and returns the previous mask.
#[cfg(all(target_os = "none", target_arch = "aarch64"))]
#[inline]
pub fn save_and_mask() -> IrqState {
    let daif: u64;
    // SAFETY: reading DAIF and masking D, A, I and F is allowed at EL1.
    unsafe {
        core::arch::asm!(
            "mrs {}, DAIF",
            "msr DAIFSet, #0xf",
            out(reg) daif,
            options(nomem, nostack),
        );
    }
    IrqState(daif)
}

/// Restores a mask returned by [`save_and_mask`].
#[cfg(all(target_os = "none", target_arch = "aarch64"))]
#[inline]
pub fn restore(state: IrqState) {
    // SAFETY: writes back a mask previously read on this core.
    unsafe {
        core::arch::asm!("msr DAIF, {}", in(reg) state.0, options(nomem, nostack));
    }
}

/// Whether IRQs are masked on the calling core.
#[cfg(all(target_os = "none", target_arch = "aarch64"))]
#[inline]
pub fn irqs_masked() -> bool {
    let daif: u64;
    // SAFETY: reading DAIF has no side effects.
    unsafe {
        core::arch::asm!("mrs {}, DAIF", out(reg) daif, options(nomem, nostack));
    }
    daif & DAIF_I != 0
}

/// `DAIF.I`, the IRQ mask bit.
#[cfg(any(not(target_os = "none"), target_arch = "aarch64"))]
const DAIF_I: u64 = 1 << 7;

// Host model: each thread plays one task and keeps its own IRQ mask bit, so
// tests can check which paths run masked.
#[cfg(not(target_os = "none"))]
std::thread_local! {
    static HOST_DAIF: core::cell::Cell<u64> = const { core::cell::Cell::new(0) };
}

/// Masks interrupts on the calling core and returns the previous mask.
#[cfg(not(target_os = "none"))]
#[inline]
pub fn save_and_mask() -> IrqState {
    IrqState(HOST_DAIF.with(|d| d.replace(DAIF_I)))
}

/// Restores a mask returned by [`save_and_mask`].
#[cfg(not(target_os = "none"))]
#[inline]
pub fn restore(state: IrqState) {
    HOST_DAIF.with(|d| d.set(state.0));
}

/// Whether IRQs are masked on the calling core.
#[cfg(not(target_os = "none"))]
#[inline]
pub fn irqs_masked() -> bool {
    HOST_DAIF.with(|d| d.get() & DAIF_I != 0)
}

/// Other bare-metal targets have no interrupt support.
#[cfg(all(target_os = "none", not(target_arch = "aarch64")))]
#[inline]
pub fn save_and_mask() -> IrqState {
    IrqState::ENABLED
}

/// Other bare-metal targets have no interrupt support.
#[cfg(all(target_os = "none", not(target_arch = "aarch64")))]
#[inline]
pub fn restore(_state: IrqState) {}

/// Other bare-metal targets have no interrupt support.
#[cfg(all(target_os = "none", not(target_arch = "aarch64")))]
#[inline]
pub fn irqs_masked() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_and_mutate() {
        let lock = IrqSpinLock::new(Vec::new());
        lock.lock().push(1);
        lock.lock().push(2);
        assert_eq!(*lock.lock(), [1, 2]);
    }

    #[test]
    fn unlock_masked_frees_the_lock() {
        let lock = IrqSpinLock::new(1u32);
        let saved = IrqSpinLockGuard::unlock_masked(lock.lock());
        assert_eq!(saved, IrqState::ENABLED);
        assert!(lock.try_lock().is_some());
        restore(saved);
    }

    #[test]
    fn guards_mask_until_the_outermost_drops() {
        let outer = IrqSpinLock::new(0u32);
        let inner = IrqSpinLock::new(0u32);
        assert!(!irqs_masked());
        let a = outer.lock();
        let b = inner.lock();
        drop(b);
        assert!(irqs_masked());
        drop(a);
        assert!(!irqs_masked());
    }

    #[test]
    fn failed_try_lock_restores_the_mask() {
        let lock = IrqSpinLock::new(0u32);
        let held = lock.lock();
        let before = save_and_mask();
        restore(IrqState::ENABLED);
        assert!(lock.try_lock().is_none());
        assert!(!irqs_masked());
        restore(before);
        drop(held);
        assert!(!irqs_masked());
    }

    #[test]
    fn try_lock_contended() {
        let lock = IrqSpinLock::new(0u32);
        let held = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(held);
        assert!(lock.try_lock().is_some());
    }
}
