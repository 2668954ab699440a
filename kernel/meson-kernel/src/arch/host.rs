//! Register model for host builds.

use core::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use meson_core::sync::LazyLock;

/// Counter frequency reported by the model, as on QEMU `virt`.
pub const HOST_CNTFRQ: u64 = 62_500_000;

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);
static CNTV_CTL: AtomicU64 = AtomicU64::new(0);
static CNTV_TVAL: AtomicU64 = AtomicU64::new(0);

/// Counter frequency in Hz.
pub fn cntfrq_el0() -> u64 {
    HOST_CNTFRQ
}

/// Virtual counter value, derived from the host's monotonic clock.
pub fn cntvct_el0() -> u64 {
    let nanos = EPOCH.elapsed().as_nanos();
    u64::try_from(nanos * u128::from(HOST_CNTFRQ) / 1_000_000_000).unwrap_or(u64::MAX)
}

/// Virtual timer control register.
pub fn cntv_ctl_el0() -> u64 {
    CNTV_CTL.load(Ordering::SeqCst)
}

/// Writes the virtual timer control register.
pub fn set_cntv_ctl_el0(val: u64) {
    CNTV_CTL.store(val, Ordering::SeqCst);
}

/// Records the programmed timer value.
pub fn set_cntv_tval_el0(ticks: u64) {
    CNTV_TVAL.store(ticks, Ordering::SeqCst);
}

/// Last value written by [`set_cntv_tval_el0`].
pub fn cntv_tval_el0() -> u64 {
    CNTV_TVAL.load(Ordering::SeqCst)
}

/// Nothing is ever pending on the host.
pub fn icc_iar1_el1() -> u32 {
    crate::config::SPURIOUS_IRQ
}

/// No-op on the host.
pub fn set_icc_eoir1_el1(_iar: u32) {}

/// No-op on the host.
pub fn set_icc_igrpen1_el1(_val: u32) {}

/// Group 1 always reads as enabled on the host.
pub fn icc_igrpen1_el1() -> u32 {
    1
}

/// No-op on the host.
pub fn set_icc_pmr_el1(_val: u32) {}

/// System register interface always reads as enabled on the host.
pub fn icc_sre_el1() -> u32 {
    1
}

/// No-op on the host.
pub fn set_icc_sre_el1(_val: u32) {}

/// No-op on the host.
pub fn enable_irqs() {}

/// No-op on the host.
pub fn disable_irqs() {}

/// Gives the host thread's time slice away.
pub fn wait_for_interrupt() {
    std::thread::yield_now();
}

/// Host barrier.
pub fn dsb_sy() {
    core::sync::atomic::fence(Ordering::SeqCst);
}

/// No vector table on the host.
pub fn install_exception_vectors() {}
