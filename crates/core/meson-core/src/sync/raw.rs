//! The leaf mutual-exclusion primitive.
//!
//! [`RawSpinLock`] is a bare flag with explicit acquire/release. It carries
//! no data and has no guard, which lets a holder hand it to another context:
//! the scheduler lock is taken by the task that blocks and dropped by the
//! task that resumes on the other side of a context switch. The guarded
//! [`SpinLock`](super::SpinLock) and [`IrqSpinLock`](super::IrqSpinLock) are
//! built on it.

use super::loom_compat::{AtomicBool, Ordering, cpu_relax};

/// A test-and-test-and-set spin lock without a guard.
///
/// No fairness and no reentrancy. Holders must not block while holding it.
pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    /// Creates an unlocked lock.
    #[cfg(not(any(loom, shuttle)))]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Creates an unlocked lock.
    #[cfg(any(loom, shuttle))]
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Makes one attempt to take the lock.
    ///
    /// Returns `true` if the caller now holds it. The relaxed pre-check keeps
    /// contended cache lines shared until the lock looks free.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        !self.locked.load(Ordering::Relaxed) && !self.locked.swap(true, Ordering::Acquire)
    }

    /// Spins until the lock is taken, yielding between attempts.
    #[inline]
    pub fn acquire(&self) {
        while !self.try_acquire() {
            cpu_relax();
        }
    }

    /// Releases the lock.
    ///
    /// Release ordering publishes every write made in the critical section
    /// to the next holder. Releasing a lock that is not held is a caller bug
    /// the lock cannot detect.
    #[inline]
    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Whether some context holds the lock right now.
    ///
    /// Only meaningful for assertions made by the holder itself.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}
