//! Blocking counting semaphore.
//!
//! The value may go negative: `-value` is then the number of tasks asleep on
//! the semaphore, each represented by a [`WaitRecord`] in a FIFO queue. A
//! post wakes the oldest sleeper. A sleeper woken by an alert instead of a
//! post takes its record back out and undoes its decrement, so the count
//! stays exact either way.
//!
//! Every operation runs under the semaphore's own interrupt-safe lock. Use
//! [`Semaphore::lock`] to run several of them under one hold.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use meson_core::kassert;
use meson_core::sync::{IrqSpinLock, IrqSpinLockGuard};

use crate::proc::{ProcState, Process};
use crate::sched::Scheduler;

/// One task asleep on a semaphore.
///
/// Lives only for the duration of the blocking [`SemGuard::wait`] call that
/// created it.
pub struct WaitRecord {
    woken: AtomicBool,
    owner: Arc<Process>,
}

impl WaitRecord {
    fn new(owner: Arc<Process>) -> Self {
        Self {
            woken: AtomicBool::new(false),
            owner,
        }
    }

    /// Whether a post (not an alert) ended this wait.
    pub fn woken(&self) -> bool {
        self.woken.load(Ordering::Acquire)
    }

    /// The task that is waiting.
    pub fn owner(&self) -> &Arc<Process> {
        &self.owner
    }
}

struct SemState {
    value: i32,
    sleepers: VecDeque<Arc<WaitRecord>>,
}

/// A counting semaphore whose waiters sleep.
pub struct Semaphore {
    state: IrqSpinLock<SemState>,
}

impl Semaphore {
    /// Creates a semaphore holding `value` units.
    pub const fn new(value: i32) -> Self {
        Self {
            state: IrqSpinLock::new(SemState {
                value,
                sleepers: VecDeque::new(),
            }),
        }
    }

    /// Takes the semaphore lock for a compound operation.
    pub fn lock(&self) -> SemGuard<'_> {
        SemGuard {
            sem: self,
            state: self.state.lock(),
        }
    }

    /// Takes one unit if one is available, without blocking.
    pub fn try_acquire(&self) -> bool {
        self.lock().try_acquire()
    }

    /// Takes one unit, sleeping until a post if none is available.
    ///
    /// Returns `false` only if `alertable` and the sleep was cut short by an
    /// alert; the unit was not taken in that case.
    pub fn wait(&self, sched: &Scheduler, alertable: bool) -> bool {
        self.lock().wait(sched, alertable)
    }

    /// Returns one unit, waking the oldest sleeper if there is one.
    pub fn post(&self, sched: &Scheduler) {
        self.lock().post(sched);
    }

    /// Takes every available unit at once and returns how many there were.
    pub fn drain(&self) -> i32 {
        self.lock().drain()
    }

    /// Wakes every current sleeper and returns how many were woken.
    ///
    /// Leaves a positive value untouched.
    pub fn post_all(&self, sched: &Scheduler) -> i32 {
        let mut guard = self.lock();
        let mut woken = -1;
        loop {
            guard.post(sched);
            woken += 1;
            if guard.try_acquire() {
                break woken;
            }
        }
    }

    /// Current value. Negative means that many sleepers.
    pub fn value(&self) -> i32 {
        self.state.lock().value
    }

    /// Number of queued sleepers.
    pub fn waiters(&self) -> usize {
        self.state.lock().sleepers.len()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A held semaphore lock.
pub struct SemGuard<'a> {
    sem: &'a Semaphore,
    state: IrqSpinLockGuard<'a, SemState>,
}

impl SemGuard<'_> {
    /// Current value.
    pub fn value(&self) -> i32 {
        self.state.value
    }

    /// Number of queued sleepers.
    pub fn sleepers(&self) -> usize {
        self.state.sleepers.len()
    }

    /// Takes one unit if `value > 0`.
    pub fn try_acquire(&mut self) -> bool {
        if self.state.value > 0 {
            self.state.value -= 1;
            true
        } else {
            false
        }
    }

    /// Takes all available units; see [`Semaphore::drain`].
    pub fn drain(&mut self) -> i32 {
        if self.state.value > 0 {
            core::mem::replace(&mut self.state.value, 0)
        } else {
            0
        }
    }

    /// Returns one unit; see [`Semaphore::post`].
    pub fn post(&mut self, sched: &Scheduler) {
        self.state.value += 1;
        if self.state.value <= 0 {
            let record = self.state.sleepers.pop_front();
            kassert!(record.is_some(), "semaphore value {} with no sleeper", self.state.value);
            if let Some(record) = record {
                record.woken.store(true, Ordering::Release);
                sched.activate_proc(&record.owner);
            }
        }
    }

    /// Takes one unit, sleeping if needed; see [`Semaphore::wait`].
    ///
    /// Consumes the guard: the semaphore lock is given up only after the
    /// scheduler lock is taken, so a post cannot slip in between queuing the
    /// record and going to sleep.
    pub fn wait(mut self, sched: &Scheduler, alertable: bool) -> bool {
        self.state.value -= 1;
        if self.state.value >= 0 {
            return true;
        }

        let record = Arc::new(WaitRecord::new(sched.current()));
        self.state.sleepers.push_back(Arc::clone(&record));

        let SemGuard { sem, state } = self;
        sched.acquire_sched_lock();
        let outer = IrqSpinLockGuard::unlock_masked(state);
        sched.set_saved_irq(outer);
        sched.sched(if alertable {
            ProcState::Sleeping
        } else {
            ProcState::DeepSleeping
        });

        let mut state = sem.state.lock();
        if record.woken() {
            return true;
        }
        state.value += 1;
        kassert!(state.value <= 0, "alert rollback left value {}", state.value);
        let pos = state
            .sleepers
            .iter()
            .position(|r| Arc::ptr_eq(r, &record));
        kassert!(pos.is_some(), "alerted sleeper missing from its queue");
        if let Some(pos) = pos {
            state.sleepers.remove(pos);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::tests::ManualClock;

    fn scheduler() -> &'static Scheduler {
        let clock: &'static ManualClock = Box::leak(Box::new(ManualClock::new()));
        let sched: &'static Scheduler = Box::leak(Box::new(Scheduler::new(clock)));
        sched.set_cpu_on();
        sched
    }

    #[test]
    fn try_acquire_counts_down_to_zero() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn wait_with_units_does_not_block() {
        let sched = scheduler();
        let sem = Semaphore::new(1);
        assert!(sem.wait(sched, true));
        assert_eq!(sem.value(), 0);
        assert_eq!(sem.waiters(), 0);
    }

    #[test]
    fn post_without_sleepers_adds_a_unit() {
        let sched = scheduler();
        let sem = Semaphore::new(0);
        sem.post(sched);
        sem.post(sched);
        assert_eq!(sem.value(), 2);
        assert_eq!(sem.drain(), 2);
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn drain_of_empty_or_negative_is_zero() {
        let sem = Semaphore::new(0);
        assert_eq!(sem.drain(), 0);
        let sem = Semaphore::new(-1);
        assert_eq!(sem.drain(), 0);
        assert_eq!(sem.value(), -1);
    }

    #[test]
    fn post_all_leaves_positive_value_alone() {
        let sched = scheduler();
        let sem = Semaphore::new(3);
        assert_eq!(sem.post_all(sched), 0);
        assert_eq!(sem.value(), 3);

        let sem = Semaphore::new(0);
        assert_eq!(sem.post_all(sched), 0);
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn compound_ops_under_one_guard() {
        let sched = scheduler();
        let sem = Semaphore::new(0);
        let mut guard = sem.lock();
        guard.post(sched);
        assert_eq!(guard.value(), 1);
        assert!(guard.try_acquire());
        assert!(!guard.try_acquire());
        assert_eq!(guard.sleepers(), 0);
    }

    #[test]
    #[should_panic(expected = "with no sleeper")]
    fn negative_value_without_sleepers_is_fatal() {
        let sched = scheduler();
        let sem = Semaphore::new(-2);
        sem.post(sched);
    }
}
