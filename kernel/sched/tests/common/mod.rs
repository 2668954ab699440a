//! Shared setup for the scheduler integration tests.
//!
//! Each test gets its own leaked scheduler and becomes the idle task of
//! core 0, so tasks it starts run whenever the test thread yields.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use meson_sched::sem::Semaphore;
use meson_sched::{ClockDevice, Scheduler};

/// Clock that only moves when the test advances it.
pub struct TestClock {
    now: AtomicU64,
    programmed: Mutex<Vec<u64>>,
}

impl TestClock {
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn programmed(&self) -> Vec<u64> {
        self.programmed.lock().unwrap().clone()
    }
}

impl ClockDevice for TestClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn program_ms(&self, interval_ms: u64) {
        self.programmed.lock().unwrap().push(interval_ms);
    }
}

/// Builds a scheduler and brings the calling thread online as its core 0.
pub fn boot() -> (&'static Scheduler, &'static TestClock) {
    let clock: &'static TestClock = Box::leak(Box::new(TestClock {
        now: AtomicU64::new(0),
        programmed: Mutex::new(Vec::new()),
    }));
    let sched: &'static Scheduler = Box::leak(Box::new(Scheduler::new(clock)));
    sched.set_cpu_on();
    (sched, clock)
}

/// Semaphore that lives for the rest of the test run.
pub fn leak_sem(value: i32) -> &'static Semaphore {
    Box::leak(Box::new(Semaphore::new(value)))
}

/// Yields from the idle task until `cond` holds.
pub fn run_until(sched: &Scheduler, mut cond: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if cond() {
            return;
        }
        sched.yield_now();
        std::thread::yield_now();
    }
    panic!("condition not reached");
}
