//! Process start, exit, reaping, reparenting and kill.

mod common;

use std::sync::{Arc, Mutex};

use common::{boot, leak_sem, run_until};
use meson_core::id::Pid;
use meson_sched::{ProcError, ProcState};

#[test]
fn parent_reaps_each_child_once() {
    let (sched, _) = boot();
    let results: Arc<Mutex<Vec<Result<(Pid, i32), ProcError>>>> = Arc::new(Mutex::new(Vec::new()));
    let children = Arc::new(Mutex::new(Vec::new()));

    let parent = sched.create_proc();
    let out = Arc::clone(&results);
    let kids = Arc::clone(&children);
    sched.start_proc(&parent, move || {
        for code in [3, 5] {
            let c = sched.create_proc();
            sched.start_proc(&c, move || sched.exit(code));
            kids.lock().unwrap().push(c);
        }
        for _ in 0..3 {
            let r = sched.wait();
            out.lock().unwrap().push(r);
        }
    });

    run_until(sched, || sched.is_zombie(&parent));
    let kids = children.lock().unwrap();
    assert_eq!(
        *results.lock().unwrap(),
        [
            Ok((kids[0].pid(), 3)),
            Ok((kids[1].pid(), 5)),
            Err(ProcError::NoChildren),
        ]
    );
    for c in kids.iter() {
        assert_eq!(c.state(), ProcState::Unused);
        assert!(c.parent().is_none());
        assert!(sched.lookup(c.pid()).is_none());
    }
    assert_eq!(parent.exit_code(), 0);
    assert!(parent.children().is_empty());
    // Root and the unreaped parent.
    assert_eq!(sched.process_count(), 2);
}

#[test]
fn orphans_go_to_root() {
    let (sched, _) = boot();
    let gate = leak_sem(0);
    let slots = Arc::new(Mutex::new(Vec::new()));

    let parent = sched.create_proc();
    let out = Arc::clone(&slots);
    sched.start_proc(&parent, move || {
        // One child finishes before the parent does, one outlives it.
        let early = sched.create_proc();
        sched.start_proc(&early, || {});
        let late = sched.create_proc();
        sched.start_proc(&late, move || {
            gate.wait(sched, false);
        });
        sched.yield_now();
        out.lock().unwrap().extend([early, late]);
        sched.exit(7);
    });

    run_until(sched, || sched.is_zombie(&parent));
    let root = sched.root();
    let kids = slots.lock().unwrap();
    let (early, late) = (&kids[0], &kids[1]);

    assert_eq!(root.children(), [parent.pid(), early.pid(), late.pid()]);
    assert_eq!(late.parent().map(|p| p.pid()), Some(Pid::ROOT));
    // The parent's exit and the early child's exit.
    assert_eq!(root.child_exit().value(), 2);
    assert_eq!(parent.exit_code(), 7);

    gate.post(sched);
    run_until(sched, || sched.is_zombie(late));
    assert_eq!(root.child_exit().value(), 3);
}

#[test]
fn root_process_reaps_orphans() {
    let (sched, _) = boot();
    let reaped = Arc::new(Mutex::new(Vec::new()));
    let park = leak_sem(0);

    let out = Arc::clone(&reaped);
    let root = Arc::clone(sched.root());
    sched.start_proc(&root, move || {
        let p = sched.create_proc();
        sched.start_proc(&p, move || {
            let orphan = sched.create_proc();
            sched.start_proc(&orphan, || {});
            sched.exit(1);
        });
        while let Ok((pid, code)) = sched.wait() {
            out.lock().unwrap().push((pid.as_u32(), code));
        }
        park.wait(sched, false);
    });

    run_until(sched, || reaped.lock().unwrap().len() == 2);
    let mut got = reaped.lock().unwrap().clone();
    got.sort_unstable();
    assert_eq!(got, [(2, 1), (3, 0)]);
    assert_eq!(sched.process_count(), 1);
}

#[test]
fn kill_requires_a_live_process() {
    let (sched, _) = boot();
    assert_eq!(sched.kill(Pid::new(42)), Err(ProcError::NotFound(Pid::new(42))));

    let p = sched.create_proc();
    sched.start_proc(&p, || {});
    run_until(sched, || sched.is_zombie(&p));
    // Zombies can still be killed; it has no effect.
    assert_eq!(sched.kill(p.pid()), Ok(()));
    assert_eq!(p.exit_code(), 0);
}

#[test]
fn running_root_refuses_kill() {
    let (sched, _) = boot();
    let park = leak_sem(0);
    let woke = Arc::new(Mutex::new(None));
    let out = Arc::clone(&woke);
    let root = Arc::clone(sched.root());
    sched.start_proc(&root, move || {
        *out.lock().unwrap() = Some(park.wait(sched, true));
    });
    sched.yield_now();
    assert_eq!(root.state(), ProcState::Sleeping);

    assert_eq!(sched.kill(Pid::ROOT), Err(ProcError::Protected(Pid::ROOT)));
    assert!(!root.killed());
    sched.yield_now();
    assert_eq!(root.state(), ProcState::Sleeping);
    assert_eq!(*woke.lock().unwrap(), None);
    assert_eq!(park.value(), -1);
}

#[test]
fn preempt_point_exits_killed_task() {
    let (sched, _) = boot();
    let gate = leak_sem(0);
    let p = sched.create_proc();
    sched.start_proc(&p, move || {
        gate.wait(sched, false);
        sched.preempt_point();
        unreachable!("killed task passed a preemption point");
    });
    sched.yield_now();
    sched.kill(p.pid()).unwrap();
    gate.post(sched);
    run_until(sched, || sched.is_zombie(&p));
    assert_eq!(p.exit_code(), -1);
    assert!(sched.current().is_idle());
}
