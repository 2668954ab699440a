//! Blocking semaphore behavior with real sleeping tasks.

mod common;

use std::sync::{Arc, Mutex};

use common::{boot, leak_sem, run_until};
use meson_core::id::Pid;
use meson_sched::ProcState;

// ---------------------------------------------------------------------------
// Wake order
// ---------------------------------------------------------------------------

#[test]
fn posts_wake_sleepers_in_arrival_order() {
    let (sched, _) = boot();
    let sem = leak_sem(0);
    let log: Arc<Mutex<Vec<Pid>>> = Arc::new(Mutex::new(Vec::new()));

    let mut pids = Vec::new();
    for _ in 0..3 {
        let p = sched.create_proc();
        let log = Arc::clone(&log);
        let me = p.pid();
        sched.start_proc(&p, move || {
            sem.wait(sched, false);
            log.lock().unwrap().push(me);
        });
        pids.push(p);
    }

    sched.yield_now();
    assert_eq!(sem.value(), -3);
    assert_eq!(sem.waiters(), 3);
    assert!(pids.iter().all(|p| p.state() == ProcState::DeepSleeping));

    for n in 1..=3 {
        sem.post(sched);
        assert_eq!(sem.value(), n - 3);
        sched.yield_now();
        let expected: Vec<Pid> = pids[..n as usize].iter().map(|p| p.pid()).collect();
        assert_eq!(*log.lock().unwrap(), expected);
    }
    run_until(sched, || pids.iter().all(|p| sched.is_zombie(p)));
    assert_eq!(sem.value(), 0);
}

#[test]
fn post_all_wakes_every_sleeper() {
    let (sched, _) = boot();
    let sem = leak_sem(0);
    let procs: Vec<_> = (0..4)
        .map(|_| {
            let p = sched.create_proc();
            sched.start_proc(&p, move || {
                sem.wait(sched, true);
            });
            p
        })
        .collect();
    sched.yield_now();
    assert_eq!(sem.value(), -4);

    assert_eq!(sem.post_all(sched), 4);
    assert_eq!(sem.value(), 0);
    assert_eq!(sched.runnable_count(), 4);
    run_until(sched, || procs.iter().all(|p| sched.is_zombie(p)));
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[test]
fn alert_rolls_back_the_decrement() {
    let (sched, _) = boot();
    let sem = leak_sem(0);
    let result = Arc::new(Mutex::new(None));

    let p = sched.create_proc();
    let out = Arc::clone(&result);
    sched.start_proc(&p, move || {
        *out.lock().unwrap() = Some(sem.wait(sched, true));
    });
    sched.yield_now();
    assert_eq!(p.state(), ProcState::Sleeping);

    assert!(sched.alert_proc(&p));
    run_until(sched, || sched.is_zombie(&p));
    assert_eq!(*result.lock().unwrap(), Some(false));
    assert_eq!(sem.value(), 0);
    assert_eq!(sem.waiters(), 0);

    // The unit posted afterwards is still there for the next taker.
    sem.post(sched);
    assert!(sem.try_acquire());
}

#[test]
fn post_after_alert_still_counts_as_a_wakeup() {
    let (sched, _) = boot();
    let sem = leak_sem(0);
    let result = Arc::new(Mutex::new(None));

    let p = sched.create_proc();
    let out = Arc::clone(&result);
    sched.start_proc(&p, move || {
        *out.lock().unwrap() = Some(sem.wait(sched, true));
    });
    sched.yield_now();
    assert_eq!(p.state(), ProcState::Sleeping);

    // The alert makes the sleeper runnable; the post lands before it gets
    // the core back and finds its record still queued.
    assert!(sched.alert_proc(&p));
    sem.post(sched);
    assert_eq!(p.state(), ProcState::Runnable);
    assert_eq!(sem.value(), 0);
    assert_eq!(sem.waiters(), 0);

    run_until(sched, || sched.is_zombie(&p));
    assert_eq!(*result.lock().unwrap(), Some(true));
    assert_eq!(sem.value(), 0);
    assert_eq!(sem.waiters(), 0);
}

#[test]
fn deep_sleep_ignores_alerts_and_kills() {
    let (sched, _) = boot();
    let sem = leak_sem(0);
    let p = sched.create_proc();
    sched.start_proc(&p, move || {
        let taken = sem.wait(sched, false);
        assert!(taken);
        sched.check_killed();
        unreachable!("killed task kept running");
    });
    sched.yield_now();
    assert_eq!(p.state(), ProcState::DeepSleeping);

    assert_eq!(sched.kill(p.pid()), Ok(()));
    assert!(!sched.alert_proc(&p));
    sched.yield_now();
    assert_eq!(p.state(), ProcState::DeepSleeping);
    assert_eq!(sem.value(), -1);

    sem.post(sched);
    run_until(sched, || sched.is_zombie(&p));
    assert_eq!(p.exit_code(), -1);
    assert_eq!(sem.value(), 0);
}

#[test]
fn killed_task_does_not_fall_asleep() {
    let (sched, _) = boot();
    let sem = leak_sem(0);
    let outcome = Arc::new(Mutex::new(None));
    let gate = leak_sem(0);

    let p = sched.create_proc();
    let out = Arc::clone(&outcome);
    sched.start_proc(&p, move || {
        gate.wait(sched, false);
        *out.lock().unwrap() = Some(sem.wait(sched, true));
    });
    sched.yield_now();
    sched.kill(p.pid()).unwrap();
    gate.post(sched);
    run_until(sched, || sched.is_zombie(&p));

    assert_eq!(*outcome.lock().unwrap(), Some(false));
    assert_eq!(sem.value(), 0);
    assert_eq!(sem.waiters(), 0);
}

// ---------------------------------------------------------------------------
// Drain
// ---------------------------------------------------------------------------

#[test]
fn drain_takes_banked_units_only() {
    let (sched, _) = boot();
    let sem = leak_sem(0);
    for _ in 0..3 {
        sem.post(sched);
    }
    assert_eq!(sem.drain(), 3);
    assert_eq!(sem.drain(), 0);

    let p = sched.create_proc();
    sched.start_proc(&p, move || {
        sem.wait(sched, false);
    });
    sched.yield_now();
    assert_eq!(sem.drain(), 0);
    assert_eq!(sem.value(), -1);
    sem.post(sched);
    run_until(sched, || sched.is_zombie(&p));
}
