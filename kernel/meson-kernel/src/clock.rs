//! ARM generic timer driver.
//!
//! Each core owns a virtual timer. The kernel uses it one-shot: every clock
//! interrupt runs the registered clock handler, which fires due timers and
//! programs the next interrupt.

use core::sync::atomic::{AtomicPtr, Ordering};

use bitflags::bitflags;
use meson_core::id::IrqId;
use meson_core::{kassert, kfatal};
use meson_sched::ClockDevice;

use crate::arch;
use crate::config::{FIRST_CLOCK_MS, TIMER_IRQ};
use crate::irq::{self, IrqError};

bitflags! {
    /// `CNTV_CTL_EL0` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CntvCtl: u64 {
        /// Timer enabled.
        const ENABLE  = 1 << 0;
        /// Timer interrupt masked.
        const IMASK   = 1 << 1;
        /// Timer condition met (read-only).
        const ISTATUS = 1 << 2;
    }
}

/// Largest value `CNTV_TVAL_EL0` accepts as a positive interval.
const MAX_TVAL: u64 = 0x7fff_ffff;

/// The virtual timer of the calling core.
pub struct GenericTimer;

impl GenericTimer {
    /// Creates the driver. The registers are per core, so one instance serves
    /// every core.
    pub const fn new() -> Self {
        Self
    }

    /// Counter frequency in Hz.
    pub fn frequency(&self) -> u64 {
        arch::cntfrq_el0()
    }

    /// Current control bits.
    pub fn control(&self) -> CntvCtl {
        CntvCtl::from_bits_truncate(arch::cntv_ctl_el0())
    }

    /// Enables the timer with its interrupt unmasked.
    pub fn enable(&self) {
        let mut ctl = self.control();
        ctl.insert(CntvCtl::ENABLE);
        ctl.remove(CntvCtl::IMASK);
        arch::set_cntv_ctl_el0(ctl.bits());
    }

    /// Stops the timer.
    pub fn disable(&self) {
        let mut ctl = self.control();
        ctl.remove(CntvCtl::ENABLE);
        arch::set_cntv_ctl_el0(ctl.bits());
    }

    /// Converts milliseconds to counter ticks.
    pub fn ms_to_ticks(&self, ms: u64) -> u64 {
        ms.saturating_mul(self.frequency()) / 1000
    }

    /// Longest interval that [`reset_clock`](Self::reset_clock) accepts.
    pub fn max_interval_ms(&self) -> u64 {
        MAX_TVAL * 1000 / self.frequency()
    }

    /// Programs the next clock interrupt `interval_ms` from now.
    pub fn reset_clock(&self, interval_ms: u64) {
        let ticks = self.ms_to_ticks(interval_ms);
        kassert!(ticks <= MAX_TVAL, "clock interval {}ms too long", interval_ms);
        arch::set_cntv_tval_el0(ticks);
    }

    /// Milliseconds since the counter started.
    pub fn timestamp_ms(&self) -> u64 {
        let ms = u128::from(arch::cntvct_el0()) * 1000 / u128::from(self.frequency());
        u64::try_from(ms).unwrap_or(u64::MAX)
    }
}

impl Default for GenericTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockDevice for GenericTimer {
    fn now_ms(&self) -> u64 {
        self.timestamp_ms()
    }

    fn program_ms(&self, interval_ms: u64) {
        self.reset_clock(interval_ms.min(self.max_interval_ms()));
    }
}

/// The board clock.
pub static CLOCK: GenericTimer = GenericTimer::new();

/// Enables the calling core's timer and schedules its first interrupt.
pub fn init_clock() {
    CLOCK.enable();
    CLOCK.reset_clock(FIRST_CLOCK_MS);
}

/// Programs the calling core's next clock interrupt.
pub fn reset_clock(interval_ms: u64) {
    CLOCK.reset_clock(interval_ms);
}

/// Milliseconds since boot.
pub fn timestamp_ms() -> u64 {
    CLOCK.timestamp_ms()
}

/// Work done on every clock interrupt.
pub type ClockHandler = fn();

static CLOCK_HANDLER: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Sets the clock handler and routes the timer interrupt to it.
pub fn set_clock_handler(handler: ClockHandler) -> Result<(), IrqError> {
    CLOCK_HANDLER.store(handler as *mut (), Ordering::Release);
    irq::set_handler(TIMER_IRQ, invoke_clock_handler)
}

/// Timer interrupt handler.
pub fn invoke_clock_handler(_id: IrqId) {
    let ptr = CLOCK_HANDLER.load(Ordering::Acquire);
    if ptr.is_null() {
        kfatal!("clock interrupt with no clock handler");
        panic!("clock handler not set");
    }
    // SAFETY: only `ClockHandler` pointers are stored in CLOCK_HANDLER.
    let handler = unsafe { core::mem::transmute::<*mut (), ClockHandler>(ptr) };
    handler();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::HOST_CNTFRQ;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// The modelled registers are global; tests that write them take turns.
    static REGS: Mutex<()> = Mutex::new(());

    fn regs() -> MutexGuard<'static, ()> {
        REGS.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[test]
    fn enable_sets_enable_and_clears_mask() {
        let _regs = regs();
        arch::set_cntv_ctl_el0((CntvCtl::IMASK | CntvCtl::ISTATUS).bits());
        CLOCK.enable();
        assert_eq!(CLOCK.control(), CntvCtl::ENABLE | CntvCtl::ISTATUS);
        CLOCK.disable();
        assert!(!CLOCK.control().contains(CntvCtl::ENABLE));
    }

    #[test]
    fn reset_clock_programs_ticks() {
        let _regs = regs();
        reset_clock(10);
        assert_eq!(arch::cntv_tval_el0(), 10 * HOST_CNTFRQ / 1000);
        assert_eq!(CLOCK.ms_to_ticks(1000), HOST_CNTFRQ);
    }

    #[test]
    #[should_panic(expected = "too long")]
    fn reset_clock_rejects_overlong_interval() {
        CLOCK.reset_clock(CLOCK.max_interval_ms() + 1);
    }

    #[test]
    fn device_interface_clamps_interval() {
        let _regs = regs();
        CLOCK.program_ms(u64::MAX);
        assert!(arch::cntv_tval_el0() <= MAX_TVAL);
    }

    #[test]
    fn timestamp_is_monotonic() {
        let a = timestamp_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = CLOCK.now_ms();
        assert!(b >= a + 4, "{a} -> {b}");
    }
}
