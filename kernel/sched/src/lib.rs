//! Processes, scheduling and blocking synchronization for the Meson kernel.
//!
//! Everything that can put a task to sleep lives here: the [`Scheduler`]
//! with its per-core descriptors and run queue, the process records it
//! switches between, the blocking [`Semaphore`] and what is built on it, and
//! the per-core [`timer`] queues that drive preemption.
//!
//! All of it is host-testable. On the host each task runs on its own thread
//! and a context switch hands a baton from one thread to the next, so only
//! one thread per simulated core makes progress at a time.

#![cfg_attr(target_os = "none", no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod condvar;
pub mod context;
pub mod cpu;
pub mod proc;
mod runqueue;
pub mod sched;
pub mod sem;
pub mod sleeplock;
pub mod timer;

pub use condvar::Condvar;
pub use proc::{ProcError, ProcState, Process};
pub use sched::Scheduler;
pub use sem::Semaphore;
pub use sleeplock::SleepLock;
pub use timer::{ClockDevice, Timer};
