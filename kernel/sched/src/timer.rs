//! Per-core timer queues.
//!
//! Each core owns a queue of armed [`Timer`]s ordered by absolute deadline,
//! ties broken by arming order. On every clock interrupt the core fires the
//! expired ones in that order and reprograms its clock for the next deadline
//! (or [`DEFAULT_CLOCK_INTERVAL_MS`] when nothing is armed).
//!
//! Handlers run with the queue unlocked, so they may arm timers, including
//! the one being fired. A timer armed while a tick is in progress waits for
//! the next tick even if already due.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use meson_core::id::CpuId;
use meson_core::sync::IrqSpinLock;
use planck_noalloc::vec::ArrayVec;

/// Interval programmed when a core has no armed timer.
pub const DEFAULT_CLOCK_INTERVAL_MS: u64 = 1000;

/// Timers fired per queue lock hold.
const FIRE_BATCH: usize = 16;

/// The per-core clock a timer queue is driven by.
pub trait ClockDevice: Send + Sync {
    /// Monotonic time in milliseconds, shared by all cores.
    fn now_ms(&self) -> u64;

    /// Requests the next clock interrupt on the calling core after
    /// `interval_ms`.
    fn program_ms(&self, interval_ms: u64);
}

/// Callback run when a timer expires, on the core whose queue it was in.
pub type TimerHandler = Box<dyn Fn(&Arc<Timer>) + Send + Sync>;

/// Position of an armed timer in its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerKey {
    deadline: u64,
    seq: u64,
}

impl TimerKey {
    /// Absolute expiry time in milliseconds.
    pub fn deadline(self) -> u64 {
        self.deadline
    }
}

/// A one-shot deadline callback.
///
/// Owned by whoever registered it; a queue only holds a reference while the
/// timer is armed. Re-arm from the handler for periodic behavior.
pub struct Timer {
    elapse: AtomicU64,
    data: AtomicU64,
    triggered: AtomicBool,
    handler: TimerHandler,
    pub(crate) slot: IrqSpinLock<Option<(CpuId, TimerKey)>>,
}

impl Timer {
    /// Creates a timer that fires `elapse_ms` after each arming.
    pub fn new(
        elapse_ms: u64,
        handler: impl Fn(&Arc<Timer>) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::with_data(elapse_ms, 0, handler)
    }

    /// Like [`Timer::new`], carrying a word of user data for the handler.
    pub fn with_data(
        elapse_ms: u64,
        data: u64,
        handler: impl Fn(&Arc<Timer>) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            elapse: AtomicU64::new(elapse_ms),
            data: AtomicU64::new(data),
            triggered: AtomicBool::new(false),
            handler: Box::new(handler),
            slot: IrqSpinLock::new(None),
        })
    }

    /// Delay applied when the timer is armed relative to now.
    pub fn elapse(&self) -> u64 {
        self.elapse.load(Ordering::Relaxed)
    }

    /// Changes the delay used by later armings.
    pub fn set_elapse(&self, elapse_ms: u64) {
        self.elapse.store(elapse_ms, Ordering::Relaxed);
    }

    /// User data word.
    pub fn data(&self) -> u64 {
        self.data.load(Ordering::Relaxed)
    }

    /// Replaces the user data word.
    pub fn set_data(&self, data: u64) {
        self.data.store(data, Ordering::Relaxed);
    }

    /// Whether the timer fired since it was last armed.
    pub fn triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    pub(crate) fn clear_triggered(&self) {
        self.triggered.store(false, Ordering::Release);
    }

    /// Core and position the timer is armed at, if any.
    pub fn armed_at(&self) -> Option<(CpuId, TimerKey)> {
        *self.slot.lock()
    }

    fn fire(self: &Arc<Self>) {
        self.triggered.store(true, Ordering::Release);
        (self.handler)(self);
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("elapse", &self.elapse())
            .field("triggered", &self.triggered())
            .field("armed_at", &self.armed_at())
            .finish_non_exhaustive()
    }
}

/// Armed timers of one core, ordered by `(deadline, arming order)`.
#[derive(Default)]
pub(crate) struct TimerQueue {
    timers: BTreeMap<TimerKey, Arc<Timer>>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) const fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn insert(&mut self, deadline: u64, timer: Arc<Timer>) -> TimerKey {
        let key = TimerKey {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.timers.insert(key, timer);
        key
    }

    pub(crate) fn remove(&mut self, key: TimerKey) -> Option<Arc<Timer>> {
        self.timers.remove(&key)
    }

    pub(crate) fn next_deadline(&self) -> Option<u64> {
        self.timers.keys().next().map(|k| k.deadline)
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    /// Removes up to a batch of timers due at `now` and armed before
    /// `horizon`, ready to be fired in order by popping `batch`.
    fn take_expired(
        &mut self,
        now: u64,
        horizon: u64,
        batch: &mut ArrayVec<Arc<Timer>, FIRE_BATCH>,
    ) {
        let mut keys = ArrayVec::<TimerKey, FIRE_BATCH>::new();
        for key in self.timers.keys() {
            if key.deadline > now || keys.len() == FIRE_BATCH {
                break;
            }
            if key.seq < horizon {
                keys.push(*key);
            }
        }
        // Fill `batch` latest first so popping it yields deadline order.
        while let Some(key) = keys.pop() {
            if let Some(timer) = self.timers.remove(&key) {
                *timer.slot.lock() = None;
                batch.push(timer);
            }
        }
    }
}

/// Fires every timer in `queue` that is due at `now`.
///
/// Returns how many fired and the earliest deadline still armed afterwards.
pub(crate) fn fire_expired(queue: &IrqSpinLock<TimerQueue>, now: u64) -> (usize, Option<u64>) {
    let horizon = queue.lock().next_seq;
    let mut fired = 0;
    loop {
        let mut batch = ArrayVec::<Arc<Timer>, FIRE_BATCH>::new();
        queue.lock().take_expired(now, horizon, &mut batch);
        if batch.is_empty() {
            break;
        }
        while let Some(timer) = batch.pop() {
            timer.fire();
            fired += 1;
        }
    }
    (fired, queue.lock().next_deadline())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Clock whose time only moves when a test says so.
    pub(crate) struct ManualClock {
        now: AtomicU64,
        programmed: Mutex<Vec<u64>>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self {
                now: AtomicU64::new(0),
                programmed: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn advance(&self, ms: u64) {
            self.now.fetch_add(ms, Ordering::SeqCst);
        }

        pub(crate) fn last_programmed(&self) -> Option<u64> {
            self.programmed.lock().unwrap().last().copied()
        }
    }

    impl ClockDevice for ManualClock {
        fn now_ms(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }

        fn program_ms(&self, interval_ms: u64) {
            self.programmed.lock().unwrap().push(interval_ms);
        }
    }

    fn recording(log: &Arc<Mutex<Vec<u64>>>, elapse: u64, tag: u64) -> Arc<Timer> {
        let log = Arc::clone(log);
        Timer::with_data(elapse, tag, move |t| log.lock().unwrap().push(t.data()))
    }

    fn arm(queue: &IrqSpinLock<TimerQueue>, timer: &Arc<Timer>, deadline: u64) {
        let key = queue.lock().insert(deadline, Arc::clone(timer));
        *timer.slot.lock() = Some((CpuId::BOOT, key));
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    #[test]
    fn fires_in_deadline_order() {
        let queue = IrqSpinLock::new(TimerQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let timers: Vec<_> = [(30, 3), (10, 1), (20, 2)]
            .into_iter()
            .map(|(d, tag)| (d, recording(&log, 0, tag)))
            .collect();
        for (d, t) in &timers {
            arm(&queue, t, *d);
        }

        let (fired, next) = fire_expired(&queue, 25);
        assert_eq!(fired, 2);
        assert_eq!(next, Some(30));
        assert_eq!(*log.lock().unwrap(), [1, 2]);
        assert!(timers[1].1.triggered());
        assert!(!timers[0].1.triggered());
        assert!(timers[0].1.armed_at().is_some());
        assert!(timers[1].1.armed_at().is_none());
    }

    #[test]
    fn equal_deadlines_fire_in_arming_order() {
        let queue = IrqSpinLock::new(TimerQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let timers: Vec<_> = (0..40).map(|tag| recording(&log, 0, tag)).collect();
        for t in &timers {
            arm(&queue, t, 5);
        }
        let (fired, next) = fire_expired(&queue, 5);
        assert_eq!(fired, 40);
        assert_eq!(next, None);
        assert_eq!(*log.lock().unwrap(), (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn nothing_due_fires_nothing() {
        let queue = IrqSpinLock::new(TimerQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        arm(&queue, &recording(&log, 0, 1), 100);
        assert_eq!(fire_expired(&queue, 99), (0, Some(100)));
        assert!(log.lock().unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Re-arming and removal
    // -----------------------------------------------------------------------

    #[test]
    fn handler_rearm_waits_for_next_tick() {
        let queue = Arc::new(IrqSpinLock::new(TimerQueue::new()));
        let count = Arc::new(AtomicU64::new(0));
        let timer = {
            let queue = Arc::clone(&queue);
            let count = Arc::clone(&count);
            Timer::new(0, move |t| {
                count.fetch_add(1, Ordering::SeqCst);
                // Due immediately, but armed during the tick.
                let key = queue.lock().insert(0, Arc::clone(t));
                *t.slot.lock() = Some((CpuId::BOOT, key));
            })
        };
        arm(&queue, &timer, 0);

        assert_eq!(fire_expired(&queue, 0), (1, Some(0)));
        assert_eq!(fire_expired(&queue, 0), (1, Some(0)));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn removed_timer_never_fires() {
        let queue = IrqSpinLock::new(TimerQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let keep = recording(&log, 0, 1);
        let drop_me = recording(&log, 0, 2);
        arm(&queue, &keep, 1);
        arm(&queue, &drop_me, 1);
        let (_, key) = drop_me.armed_at().unwrap();
        assert!(queue.lock().remove(key).is_some());
        assert!(queue.lock().remove(key).is_none());
        assert_eq!(queue.lock().len(), 1);

        fire_expired(&queue, 10);
        assert_eq!(*log.lock().unwrap(), [1]);
    }
}
