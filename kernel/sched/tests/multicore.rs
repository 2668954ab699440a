//! Several simulated cores sharing one run queue.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use common::{boot, leak_sem};
use meson_core::cpu_local::bind_current_cpu;
use meson_core::id::CpuId;

const CORES: u32 = 3;
const ITEMS: usize = 40;

#[test]
fn producers_and_consumers_across_cores() {
    let (sched, _) = boot();
    let items = leak_sem(0);
    let consumed = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let mut procs = Vec::new();
    for _ in 0..2 {
        let p = sched.create_proc();
        let consumed = Arc::clone(&consumed);
        sched.start_proc(&p, move || {
            for _ in 0..ITEMS / 2 {
                items.wait(sched, false);
                consumed.fetch_add(1, Ordering::SeqCst);
                sched.yield_now();
            }
        });
        procs.push(p);
    }
    for _ in 0..2 {
        let p = sched.create_proc();
        sched.start_proc(&p, move || {
            for _ in 0..ITEMS / 2 {
                items.post(sched);
                sched.yield_now();
            }
        });
        procs.push(p);
    }

    let cores: Vec<_> = (1..CORES)
        .map(|id| {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                bind_current_cpu(CpuId::new(id));
                sched.set_cpu_on();
                while !done.load(Ordering::SeqCst) {
                    sched.yield_now();
                    thread::yield_now();
                }
                sched.set_cpu_off();
            })
        })
        .collect();

    for _ in 0..1_000_000 {
        if procs.iter().all(|p| sched.is_zombie(p)) {
            break;
        }
        sched.yield_now();
        thread::yield_now();
    }
    done.store(true, Ordering::SeqCst);
    for core in cores {
        core.join().unwrap();
    }

    assert!(procs.iter().all(|p| sched.is_zombie(p)));
    assert_eq!(consumed.load(Ordering::SeqCst), ITEMS);
    assert_eq!(items.value(), 0);
    assert_eq!(sched.root().child_exit().value(), 4);
    assert!(procs.iter().all(|p| p.sched_info().switches() >= 1));
}
