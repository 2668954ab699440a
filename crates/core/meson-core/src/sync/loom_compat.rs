//! Model-checker compatibility shim.
//!
//! Under `cfg(loom)` or `cfg(shuttle)` the raw lock is built from the
//! checker's atomics so its acquire/release protocol can be explored by a
//! deterministic scheduler. Otherwise these are the `core` types.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, Ordering};

#[cfg(shuttle)]
pub(crate) use shuttle::sync::atomic::{AtomicBool, Ordering};

#[cfg(not(any(loom, shuttle)))]
pub(crate) use core::sync::atomic::{AtomicBool, Ordering};

/// Yield hint between failed acquire attempts.
///
/// Checkers need an explicit scheduling point here or a spinning thread
/// starves the holder forever.
#[inline]
pub(crate) fn cpu_relax() {
    #[cfg(loom)]
    loom::thread::yield_now();
    #[cfg(shuttle)]
    shuttle::thread::yield_now();
    #[cfg(not(any(loom, shuttle)))]
    core::hint::spin_loop();
}
