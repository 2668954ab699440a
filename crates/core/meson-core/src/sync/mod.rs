//! Spin-based synchronization primitives.
//!
//! - [`RawSpinLock`]: guardless flag lock that can be released by a
//!   different context than the one that took it
//! - [`SpinLock`]: guarded lock for data never touched by interrupt handlers
//! - [`IrqSpinLock`]: guarded lock that masks interrupts while held
//! - [`LazyLock`]: one-time initialization of kernel singletons
//!
//! Sleeping primitives live in `meson-sched`, because blocking needs the
//! scheduler.

mod loom_compat;
mod raw;

pub use raw::RawSpinLock;

#[cfg(not(any(loom, shuttle)))]
mod irq_spinlock;
#[cfg(not(any(loom, shuttle)))]
mod lazy;
#[cfg(not(any(loom, shuttle)))]
mod spinlock;

#[cfg(not(any(loom, shuttle)))]
pub use irq_spinlock::{
    IrqSpinLock, IrqSpinLockGuard, IrqState, irqs_masked, restore as restore_irqs,
    save_and_mask as save_and_mask_irqs,
};
#[cfg(not(any(loom, shuttle)))]
pub use lazy::LazyLock;
#[cfg(not(any(loom, shuttle)))]
pub use spinlock::{SpinLock, SpinLockGuard};
