//! Long-held mutual exclusion that sleeps instead of spinning.

use crate::sched::Scheduler;
use crate::sem::Semaphore;

/// A binary semaphore used as a lock.
///
/// For critical sections that may block, such as waiting on a device. Not
/// tied to the holder: any task may release it.
pub struct SleepLock {
    sem: Semaphore,
}

impl SleepLock {
    /// Creates an unlocked `SleepLock`.
    pub const fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
        }
    }

    /// Acquires the lock, sleeping while it is held.
    ///
    /// Returns `false` if the wait was cut short by an alert; the lock is
    /// not held in that case.
    pub fn acquire(&self, sched: &Scheduler) -> bool {
        self.sem.wait(sched, true)
    }

    /// Acquires the lock, ignoring alerts.
    pub fn acquire_unalertable(&self, sched: &Scheduler) {
        let taken = self.sem.wait(sched, false);
        meson_core::kassert!(taken, "unalertable sleep ended without a post");
    }

    /// Acquires the lock only if it is free.
    pub fn try_acquire(&self) -> bool {
        self.sem.try_acquire()
    }

    /// Releases the lock, handing it to the oldest waiter if there is one.
    pub fn release(&self, sched: &Scheduler) {
        self.sem.post(sched);
    }

    /// Whether the lock is held.
    pub fn is_locked(&self) -> bool {
        self.sem.value() <= 0
    }
}

impl Default for SleepLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::tests::ManualClock;

    #[test]
    fn uncontended_acquire_and_release() {
        let clock: &'static ManualClock = Box::leak(Box::new(ManualClock::new()));
        let sched: &'static Scheduler = Box::leak(Box::new(Scheduler::new(clock)));
        sched.set_cpu_on();

        let lock = SleepLock::new();
        assert!(!lock.is_locked());
        assert!(lock.acquire(sched));
        assert!(lock.is_locked());
        assert!(!lock.try_acquire());
        lock.release(sched);
        assert!(lock.try_acquire());
        lock.release(sched);
        lock.acquire_unalertable(sched);
        assert!(lock.is_locked());
    }
}
