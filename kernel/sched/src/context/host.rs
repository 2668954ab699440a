//! Host backend: every task is an OS thread holding a baton.
//!
//! A thread only runs kernel code while it holds its baton. Switching gives
//! the baton of `next` and then waits for our own, so per simulated core
//! exactly one task thread is awake at a time and the scheduler's handoff
//! protocol runs unchanged on top.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use meson_core::{kassert, kfatal};

use super::{KSTACK_SIZE, TaskEntry};

/// Binary semaphore the owning thread parks on.
#[derive(Default)]
struct Baton {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl Baton {
    fn give(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        *ready = true;
        self.cv.notify_one();
    }

    fn take(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        while !*ready {
            ready = self
                .cv
                .wait(ready)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *ready = false;
    }
}

/// Unwind payload that ends the thread of an exited task.
struct TaskExited;

/// Suspend/resume handle for one task.
#[derive(Default)]
pub struct KernelContext {
    baton: Arc<Baton>,
}

impl KernelContext {
    /// Creates a context with no thread behind it yet.
    ///
    /// The thread calling [`switch`](Self::switch) with this as `prev` adopts
    /// it, which is how a core's boot thread becomes its idle task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the thread that will run `entry` once this context is first
    /// switched to.
    pub fn prepare(&self, name: &str, entry: TaskEntry) {
        let baton = Arc::clone(&self.baton);
        let spawned = std::thread::Builder::new()
            .name(name.into())
            .stack_size(KSTACK_SIZE.max(256 * 1024))
            .spawn(move || {
                baton.take();
                match panic::catch_unwind(AssertUnwindSafe(entry)) {
                    Err(payload) if payload.is::<TaskExited>() => {}
                    Ok(()) => {
                        kfatal!("task entry returned without exiting");
                        std::process::abort();
                    }
                    Err(_) => {
                        kfatal!("task panicked while running on a core");
                        std::process::abort();
                    }
                }
            });
        kassert!(spawned.is_ok(), "cannot spawn task thread {}", name);
    }

    /// Resumes `next` and parks the caller until `prev` is resumed.
    ///
    /// # Safety
    ///
    /// `prev` must be the context of the calling task and the scheduler lock
    /// must be held.
    pub unsafe fn switch(prev: &Self, next: &Self) {
        next.baton.give();
        prev.baton.take();
    }

    /// Resumes `next` and ends the calling task's thread.
    ///
    /// # Safety
    ///
    /// Same as [`switch`](Self::switch); the caller's context must never be
    /// resumed again.
    pub unsafe fn switch_final(next: &Self) -> ! {
        next.baton.give();
        panic::resume_unwind(Box::new(TaskExited))
    }
}
