//! Per-core descriptors.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use meson_core::sync::{IrqSpinLock, IrqState, SpinLock};

use crate::proc::Process;
use crate::timer::{Timer, TimerQueue};

/// State the scheduler keeps for one core.
///
/// Created with the scheduler and never destroyed. `current` and `idle` are
/// only changed by the core itself, under the scheduler lock; other cores
/// touch a descriptor only to arm or cancel timers in its queue. Everything
/// the interrupt path reads sits behind an [`IrqSpinLock`].
pub struct Cpu {
    online: AtomicBool,
    pub(crate) timers: IrqSpinLock<TimerQueue>,
    pub(crate) current: IrqSpinLock<Option<Arc<Process>>>,
    pub(crate) idle: IrqSpinLock<Option<Arc<Process>>>,
    pub(crate) preempt_pending: AtomicBool,
    pub(crate) sched_tick: SpinLock<Option<Arc<Timer>>>,
    /// Interrupt mask to restore when the scheduler lock is released.
    pub(crate) saved_irq: SpinLock<IrqState>,
}

impl Cpu {
    pub(crate) const fn new() -> Self {
        Self {
            online: AtomicBool::new(false),
            timers: IrqSpinLock::new(TimerQueue::new()),
            current: IrqSpinLock::new(None),
            idle: IrqSpinLock::new(None),
            preempt_pending: AtomicBool::new(false),
            sched_tick: SpinLock::new(None),
            saved_irq: SpinLock::new(IrqState::ENABLED),
        }
    }

    /// Whether the core has finished bring-up and takes part in scheduling.
    pub fn online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Task running on this core, if the core has been bootstrapped.
    pub fn current(&self) -> Option<Arc<Process>> {
        self.current.lock().clone()
    }

    /// This core's idle task, if the core has been bootstrapped.
    pub fn idle(&self) -> Option<Arc<Process>> {
        self.idle.lock().clone()
    }

    /// Number of timers armed on this core.
    pub fn armed_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Whether the periodic tick asked the running task to yield.
    pub fn preempt_pending(&self) -> bool {
        self.preempt_pending.load(Ordering::Acquire)
    }
}
