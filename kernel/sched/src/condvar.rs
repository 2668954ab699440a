//! Condition variable for sleeping tasks.
//!
//! [`Condvar`] lets a task give up a [`SpinLock`] and sleep until another
//! task signals that the guarded state changed. Built on a [`Semaphore`]
//! that never holds spare units: a notification with nobody waiting is lost.

use meson_core::kassert;
use meson_core::sync::SpinLockGuard;

use crate::sched::Scheduler;
use crate::sem::Semaphore;

#[cfg(doc)]
use meson_core::sync::SpinLock;

/// A condition variable.
///
/// Waiters sleep uninterruptibly and wake in the order they started
/// waiting. Always recheck the predicate after waking:
///
/// ```ignore
/// let mut ready = READY.lock();
/// while !*ready {
///     ready = COND.wait(sched, ready);
/// }
/// ```
pub struct Condvar {
    sem: Semaphore,
}

impl Condvar {
    /// Creates a condition variable with no waiters.
    pub const fn new() -> Self {
        Self {
            sem: Semaphore::new(0),
        }
    }

    /// Releases `guard`, sleeps until notified, then re-acquires the lock.
    ///
    /// The waiter is queued before the lock is released, so a notify issued
    /// under the same lock cannot be missed.
    pub fn wait<'a, T>(
        &self,
        sched: &Scheduler,
        guard: SpinLockGuard<'a, T>,
    ) -> SpinLockGuard<'a, T> {
        let lock = guard.lock_ref();
        let sem = self.sem.lock();
        drop(guard);
        let woken = sem.wait(sched, false);
        kassert!(woken, "condvar sleep ended without a notify");
        lock.lock()
    }

    /// Wakes the longest-waiting task, if any.
    pub fn notify_one(&self, sched: &Scheduler) {
        let mut sem = self.sem.lock();
        if sem.sleepers() > 0 {
            sem.post(sched);
        }
    }

    /// Wakes every waiting task. Returns how many were woken.
    pub fn notify_all(&self, sched: &Scheduler) -> usize {
        let mut sem = self.sem.lock();
        let mut woken = 0;
        while sem.sleepers() > 0 {
            sem.post(sched);
            woken += 1;
        }
        woken
    }

    /// Number of tasks waiting.
    pub fn waiters(&self) -> usize {
        self.sem.waiters()
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
