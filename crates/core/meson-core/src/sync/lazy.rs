//! Lazy initialization for `static` kernel singletons.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ops::Deref;
use core::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;
const POISONED: u8 = 3;

/// A value built on first access.
///
/// The first core to touch it runs the initializer; the others spin until the
/// value is published. If the initializer unwinds (host tests only, the
/// kernel aborts on panic) later accesses panic instead of spinning forever.
pub struct LazyLock<T, F = fn() -> T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
    init: UnsafeCell<Option<F>>,
}

// SAFETY: the state machine publishes the value with Release before any
// reader can observe READY, and the initializer is taken exactly once.
unsafe impl<T: Send + Sync, F: Send> Send for LazyLock<T, F> {}
unsafe impl<T: Send + Sync, F: Send> Sync for LazyLock<T, F> {}

/// Poisons the lock if the initializer unwinds.
struct PoisonOnUnwind<'a>(&'a AtomicU8);

impl Drop for PoisonOnUnwind<'_> {
    fn drop(&mut self) {
        self.0.store(POISONED, Ordering::Release);
    }
}

impl<T, F: FnOnce() -> T> LazyLock<T, F> {
    /// Creates a new `LazyLock` with the given initializer.
    pub const fn new(init: F) -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            init: UnsafeCell::new(Some(init)),
        }
    }

    /// Whether the initializer has already run.
    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    fn force(&self) -> &T {
        if self
            .state
            .compare_exchange(UNINIT, INITIALIZING, Ordering::Acquire, Ordering::Acquire)
            .is_ok()
        {
            let poison = PoisonOnUnwind(&self.state);
            // SAFETY: only the thread that moved the state out of UNINIT
            // touches `init`.
            let init = unsafe { (*self.init.get()).take() };
            let Some(init) = init else {
                unreachable!("LazyLock initializer taken twice");
            };
            let value = init();
            // SAFETY: no reader can look at `value` before READY is stored.
            unsafe { (*self.value.get()).write(value) };
            core::mem::forget(poison);
            self.state.store(READY, Ordering::Release);
        }

        loop {
            match self.state.load(Ordering::Acquire) {
                READY => break,
                POISONED => panic!("LazyLock poisoned: initializer panicked"),
                _ => core::hint::spin_loop(),
            }
        }
        // SAFETY: state is READY.
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T, F: FnOnce() -> T> Deref for LazyLock<T, F> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.force()
    }
}
