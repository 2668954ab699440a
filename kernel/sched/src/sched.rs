//! The scheduler: next-task selection, the handoff protocol and the
//! process lifecycle.
//!
//! # Handoff
//!
//! A task gives up its core by taking the scheduler lock and calling
//! [`Scheduler::sched`] with the state it wants to be in. `sched` records
//! the state, picks the next task (the oldest runnable one, else this core's
//! idle task) and switches to it with the lock still held. The task that
//! comes out of the switch releases the lock. The lock is therefore dropped
//! exactly once per handoff, and no other core can observe a task that is
//! marked RUNNABLE but whose registers are not saved yet.
//!
//! # Lock order
//!
//! process table, then a semaphore, then the scheduler lock, then the run
//! queue. Per-process links and per-core `current`/`idle` slots are leaves.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use meson_core::cpu_local::{CpuLocal, bind_current_cpu, current_cpu_id};
use meson_core::id::{CpuId, Pid};
use meson_core::sync::{
    IrqSpinLock, IrqSpinLockGuard, IrqState, RawSpinLock, restore_irqs, save_and_mask_irqs,
};
use meson_core::{kassert, kdebug, kfatal, kinfo, ktrace};

use crate::context::KernelContext;
use crate::cpu::Cpu;
use crate::proc::{ProcError, ProcState, Process};
use crate::runqueue::RunQueue;
use crate::timer::{self, ClockDevice, DEFAULT_CLOCK_INTERVAL_MS, Timer};

/// Period of the per-core preemption timer.
pub const SCHED_TICK_MS: u64 = 10;

/// Scheduling state shared by all cores.
///
/// The kernel keeps one in a static; host tests leak one per test so task
/// closures can borrow it for `'static`.
pub struct Scheduler {
    lock: RawSpinLock,
    run_queue: IrqSpinLock<RunQueue>,
    cpus: CpuLocal<Cpu>,
    table: IrqSpinLock<BTreeMap<Pid, Arc<Process>>>,
    root: Arc<Process>,
    next_pid: AtomicU32,
    clock: &'static dyn ClockDevice,
}

impl Scheduler {
    /// Creates the scheduler with its root process registered but not
    /// started.
    pub fn new(clock: &'static dyn ClockDevice) -> Self {
        let root = Arc::new(Process::new(Pid::ROOT, false));
        let mut table = BTreeMap::new();
        table.insert(Pid::ROOT, Arc::clone(&root));
        Self {
            lock: RawSpinLock::new(),
            run_queue: IrqSpinLock::new(RunQueue::new()),
            cpus: CpuLocal::new([const { Cpu::new() }; meson_core::cpu_local::MAX_CPUS]),
            table: IrqSpinLock::new(table),
            root,
            next_pid: AtomicU32::new(Pid::ROOT.as_u32() + 1),
            clock,
        }
    }

    /// The process that adopts orphans.
    pub fn root(&self) -> &Arc<Process> {
        &self.root
    }

    /// Clock the timer queues are driven by.
    pub fn clock(&self) -> &'static dyn ClockDevice {
        self.clock
    }

    /// Descriptor of a given core.
    pub fn cpu(&self, id: CpuId) -> &Cpu {
        self.cpus.get_for(id)
    }

    /// Descriptor of the calling core.
    pub fn this_cpu(&self) -> &Cpu {
        self.cpus.get()
    }

    // -----------------------------------------------------------------------
    // Cores
    // -----------------------------------------------------------------------

    /// Brings the calling core into scheduling.
    ///
    /// The first call on a core turns the calling flow into the core's idle
    /// task. Returns that idle task.
    pub fn set_cpu_on(&self) -> Arc<Process> {
        let id = current_cpu_id();
        let cpu = self.cpus.get_for(id);
        self.acquire_sched_lock();
        let idle = cpu.idle.lock().clone();
        let idle = idle.unwrap_or_else(|| {
            let idle = Arc::new(Process::new(Pid::new(0), true));
            idle.set_state(ProcState::Running);
            idle.sched_info().record_dispatch(id);
            *cpu.idle.lock() = Some(Arc::clone(&idle));
            *cpu.current.lock() = Some(Arc::clone(&idle));
            idle
        });
        cpu.set_online(true);
        self.release_sched_lock();
        kinfo!("CPU {}: hello", id);
        idle
    }

    /// Takes the calling core out of scheduling and stops its tick.
    pub fn set_cpu_off(&self) {
        let cpu = self.this_cpu();
        let tick = cpu.sched_tick.lock().take();
        if let Some(tick) = tick {
            self.cancel_cpu_timer(&tick);
        }
        cpu.set_online(false);
        kinfo!("CPU {}: stopped", current_cpu_id());
    }

    /// The task running on the calling core.
    pub fn current(&self) -> Arc<Process> {
        let Some(current) = self.this_cpu().current() else {
            kfatal!("cpu {}: no current task", current_cpu_id());
            panic!("scheduler used on a core that is not online");
        };
        current
    }

    /// Looks up a live process by pid.
    pub fn lookup(&self, pid: Pid) -> Option<Arc<Process>> {
        self.table.lock().get(&pid).cloned()
    }

    /// Number of processes in the table, the root included.
    pub fn process_count(&self) -> usize {
        self.table.lock().len()
    }

    /// Number of processes waiting for a core.
    pub fn runnable_count(&self) -> usize {
        self.run_queue.lock().len()
    }

    // -----------------------------------------------------------------------
    // Handoff
    // -----------------------------------------------------------------------

    /// Takes the scheduler lock, as required before [`sched`](Self::sched).
    ///
    /// Interrupts stay masked on this core until the lock is released.
    pub fn acquire_sched_lock(&self) {
        let saved = save_and_mask_irqs();
        self.lock.acquire();
        self.set_saved_irq(saved);
    }

    /// Drops the scheduler lock without switching.
    pub fn release_sched_lock(&self) {
        let saved = *self.this_cpu().saved_irq.lock();
        self.lock.release();
        restore_irqs(saved);
    }

    /// Replaces the interrupt mask the next release restores.
    pub(crate) fn set_saved_irq(&self, saved: IrqState) {
        *self.this_cpu().saved_irq.lock() = saved;
    }

    /// Puts the calling task into `new_state` and runs the next task.
    ///
    /// The caller must hold the scheduler lock; it is released by the time
    /// this returns. Returns when the caller is scheduled again, or right
    /// away if a killed task asks for an alertable sleep. Never returns for
    /// [`ProcState::Zombie`].
    pub fn sched(&self, new_state: ProcState) {
        kassert!(self.lock.is_locked(), "sched without the scheduler lock");
        let id = current_cpu_id();
        let cpu = self.cpus.get_for(id);
        let prev = self.current();

        if prev.killed() && new_state == ProcState::Sleeping {
            self.release_sched_lock();
            return;
        }
        kassert!(
            !prev.is_idle() || new_state == ProcState::Runnable,
            "idle task asked for {:?}",
            new_state
        );

        prev.set_state(new_state);
        if new_state == ProcState::Runnable && !prev.is_idle() {
            self.run_queue.lock().push(Arc::clone(&prev));
        }
        cpu.preempt_pending.store(false, Ordering::Release);

        let next = self.pick_next(cpu);
        if Arc::ptr_eq(&next, &prev) {
            prev.set_state(ProcState::Running);
            self.release_sched_lock();
            return;
        }

        next.set_state(ProcState::Running);
        next.sched_info().record_dispatch(id);
        *cpu.current.lock() = Some(Arc::clone(&next));
        ktrace!("cpu {}: switch {} -> {}", id, prev.pid(), next.pid());

        if new_state == ProcState::Zombie {
            // `next` stays referenced by `cpu.current` and `prev` by the
            // process table, so the context outlives these handles.
            let next_ctx: *const KernelContext = next.context();
            drop(next);
            drop(prev);
            // SAFETY: the lock is held and the zombie is never resumed.
            unsafe { KernelContext::switch_final(&*next_ctx) }
        }

        // Each task carries its own interrupt mask across the switch.
        let saved = *cpu.saved_irq.lock();
        // SAFETY: `prev` is the calling task and the lock is held.
        unsafe { KernelContext::switch(prev.context(), next.context()) };
        self.finish_switch(prev.sched_info().cpu(), saved);
    }

    /// Runs on the resumed side of every switch.
    fn finish_switch(&self, cpu: CpuId, saved: IrqState) {
        bind_current_cpu(cpu);
        self.set_saved_irq(saved);
        self.release_sched_lock();
    }

    fn pick_next(&self, cpu: &Cpu) -> Arc<Process> {
        if let Some(next) = self.run_queue.lock().pop() {
            kassert!(
                next.state() == ProcState::Runnable,
                "pid {} queued while {:?}",
                next.pid(),
                next.state()
            );
            return next;
        }
        let Some(idle) = cpu.idle() else {
            kfatal!("cpu {}: nothing to run and no idle task", current_cpu_id());
            panic!("core scheduled before set_cpu_on");
        };
        idle
    }

    /// Gives the core to the next runnable task, if any.
    pub fn yield_now(&self) {
        self.acquire_sched_lock();
        self.sched(ProcState::Runnable);
    }

    /// Makes a sleeping or not-yet-started task runnable.
    ///
    /// Returns `false` if the task was already runnable or running, or is a
    /// zombie.
    pub fn activate_proc(&self, proc: &Arc<Process>) -> bool {
        self.activate(proc, false)
    }

    /// Like [`activate_proc`](Self::activate_proc), but only wakes tasks in
    /// an alertable (SLEEPING) wait.
    pub fn alert_proc(&self, proc: &Arc<Process>) -> bool {
        self.activate(proc, true)
    }

    fn activate(&self, proc: &Arc<Process>, alert: bool) -> bool {
        self.acquire_sched_lock();
        let wake = match proc.state() {
            ProcState::Sleeping => true,
            ProcState::DeepSleeping => !alert,
            // A reaped record is UNUSED again but has no context to resume.
            ProcState::Unused => !alert && !proc.has_exited(),
            ProcState::Runnable | ProcState::Running | ProcState::Zombie => false,
        };
        if wake {
            proc.set_state(ProcState::Runnable);
            if !proc.is_idle() {
                self.run_queue.lock().push(Arc::clone(proc));
            }
        }
        self.release_sched_lock();
        wake
    }

    /// Whether `proc` has finished switching out for the last time.
    pub fn is_zombie(&self, proc: &Process) -> bool {
        self.state_locked(proc) == ProcState::Zombie
    }

    /// Whether `proc` was never started or has been reaped.
    pub fn is_unused(&self, proc: &Process) -> bool {
        self.state_locked(proc) == ProcState::Unused
    }

    fn state_locked(&self, proc: &Process) -> ProcState {
        self.acquire_sched_lock();
        let state = proc.state();
        self.release_sched_lock();
        state
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Allocates a process record in the UNUSED state.
    pub fn create_proc(&self) -> Arc<Process> {
        let pid = Pid::new(self.next_pid.fetch_add(1, Ordering::Relaxed));
        let proc = Arc::new(Process::new(pid, false));
        self.table.lock().insert(pid, Arc::clone(&proc));
        proc
    }

    /// Starts `proc` running `entry`, then `exit(0)` if `entry` returns.
    ///
    /// The caller becomes the parent, or the root process when the caller is
    /// an idle task.
    pub fn start_proc(
        &'static self,
        proc: &Arc<Process>,
        entry: impl FnOnce() + Send + 'static,
    ) -> Pid {
        kassert!(
            !proc.is_idle() && proc.state() == ProcState::Unused,
            "pid {} started twice",
            proc.pid()
        );
        let pid = proc.pid();

        if pid != Pid::ROOT {
            let _table = self.table.lock();
            let parent = match self.this_cpu().current() {
                Some(current) if !current.is_idle() => current,
                _ => Arc::clone(&self.root),
            };
            if proc.parent().is_none() {
                proc.links.lock().parent = Some(Arc::downgrade(&parent));
                parent.links.lock().children.push(Arc::clone(proc));
            }
        }

        let me = Arc::downgrade(proc);
        let body = move || {
            let cpu = me.upgrade().map(|p| p.sched_info().cpu());
            drop(me);
            self.finish_switch(cpu.unwrap_or(CpuId::BOOT), IrqState::ENABLED);
            entry();
            self.exit(0);
        };
        proc.context()
            .prepare(&format!("pid{pid}"), alloc::boxed::Box::new(body));
        self.activate_proc(proc);
        kdebug!("pid {}: started", pid);
        pid
    }

    /// Ends the calling process with `code`.
    ///
    /// Children are handed to the root process, the parent's child-exit
    /// semaphore is posted, and the caller becomes a ZOMBIE until reaped.
    pub fn exit(&self, code: i32) -> ! {
        let me = self.current();
        kassert!(!me.is_idle(), "idle task cannot exit");
        kassert!(me.pid() != Pid::ROOT, "root process exited with {}", code);

        let table = self.table.lock();
        me.set_exit_code(code);

        let orphans = core::mem::take(&mut me.links.lock().children);
        for child in orphans {
            child.links.lock().parent = Some(Arc::downgrade(&self.root));
            let exited = child.has_exited();
            self.root.links.lock().children.push(child);
            if exited {
                self.root.child_exit().post(self);
            }
        }

        if let Some(parent) = me.parent() {
            parent.child_exit().post(self);
        }
        me.mark_exited();
        kdebug!("pid {}: exit {}", me.pid(), code);

        self.acquire_sched_lock();
        let outer = IrqSpinLockGuard::unlock_masked(table);
        self.set_saved_irq(outer);
        drop(me);
        self.sched(ProcState::Zombie);
        unreachable!("zombie resumed");
    }

    /// Waits for a child to exit and reaps it.
    ///
    /// Returns the child's pid and exit code. Fails with
    /// [`ProcError::NoChildren`] when there is nothing to wait for and with
    /// [`ProcError::Interrupted`] when the caller is killed while waiting.
    pub fn wait(&self) -> Result<(Pid, i32), ProcError> {
        let me = self.current();
        if me.links.lock().children.is_empty() {
            return Err(ProcError::NoChildren);
        }
        if !me.child_exit().wait(self, true) {
            return Err(ProcError::Interrupted);
        }

        let mut table = self.table.lock();
        let child = {
            let mut links = me.links.lock();
            let idx = links.children.iter().position(|c| c.has_exited());
            let Some(idx) = idx else {
                kfatal!("pid {}: child exit posted without an exited child", me.pid());
                panic!("child-exit count out of step with the process tree");
            };
            links.children.remove(idx)
        };
        // Blocks on the scheduler lock until the child has switched out.
        kassert!(self.is_zombie(&child), "pid {} reaped while running", child.pid());

        child.links.lock().parent = None;
        table.remove(&child.pid());
        drop(table);

        self.acquire_sched_lock();
        child.set_state(ProcState::Unused);
        self.release_sched_lock();

        kdebug!("pid {}: reaped {}", me.pid(), child.pid());
        Ok((child.pid(), child.exit_code()))
    }

    /// Marks `pid` as killed and alerts it out of an alertable sleep.
    ///
    /// The task exits the next time it reaches a preemption point. The root
    /// process cannot be killed.
    pub fn kill(&self, pid: Pid) -> Result<(), ProcError> {
        if pid == Pid::ROOT {
            return Err(ProcError::Protected(pid));
        }
        let proc = {
            let table = self.table.lock();
            match table.get(&pid) {
                Some(p) if p.state() != ProcState::Unused => Arc::clone(p),
                _ => return Err(ProcError::NotFound(pid)),
            }
        };
        proc.mark_killed();
        self.alert_proc(&proc);
        kdebug!("pid {}: killed", pid);
        Ok(())
    }

    /// Exits with `-1` if the calling task has a pending kill.
    pub fn check_killed(&self) {
        let me = self.current();
        if !me.is_idle() && me.killed() {
            drop(me);
            self.exit(-1);
        }
    }

    /// Point where a running task may be preempted, called on the way back
    /// from an interrupt.
    pub fn preempt_point(&self) {
        self.check_killed();
        if self.this_cpu().preempt_pending.swap(false, Ordering::AcqRel) {
            self.yield_now();
        }
    }

    /// Asks the task on the calling core to yield at its next preemption
    /// point.
    pub fn request_preempt(&self) {
        self.this_cpu().preempt_pending.store(true, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Arms `timer` on the calling core to fire `timer.elapse()` from now.
    pub fn set_cpu_timer(&self, timer: &Arc<Timer>) {
        let deadline = self.clock.now_ms().saturating_add(timer.elapse());
        self.arm_timer(current_cpu_id(), timer, deadline);
    }

    /// Arms `timer` on `cpu` at an absolute deadline, moving it there if it
    /// was armed elsewhere.
    pub fn arm_timer(&self, cpu: CpuId, timer: &Arc<Timer>, deadline: u64) {
        self.cancel_cpu_timer(timer);
        timer.clear_triggered();
        let mut queue = self.cpus.get_for(cpu).timers.lock();
        let key = queue.insert(deadline, Arc::clone(timer));
        *timer.slot.lock() = Some((cpu, key));
    }

    /// Disarms `timer`. Returns `false` if it was not armed, including when
    /// it already fired.
    pub fn cancel_cpu_timer(&self, timer: &Arc<Timer>) -> bool {
        loop {
            let Some((cpu, _)) = timer.armed_at() else {
                return false;
            };
            let mut queue = self.cpus.get_for(cpu).timers.lock();
            let mut slot = timer.slot.lock();
            match *slot {
                Some((owner, key)) if owner == cpu => {
                    queue.remove(key);
                    *slot = None;
                    return true;
                }
                None => return false,
                // Moved to another core in between; look again.
                Some(_) => {}
            }
        }
    }

    /// Fires the calling core's expired timers and reprograms its clock.
    ///
    /// Called from the clock interrupt. Returns how many timers fired.
    pub fn timer_tick(&self) -> usize {
        let now = self.clock.now_ms();
        let (fired, next) = timer::fire_expired(&self.this_cpu().timers, now);
        let interval = next.map_or(DEFAULT_CLOCK_INTERVAL_MS, |deadline| {
            deadline.saturating_sub(now).max(1)
        });
        self.clock.program_ms(interval);
        fired
    }

    /// Starts the calling core's periodic preemption tick.
    pub fn start_sched_tick(&'static self) {
        let tick = Timer::new(SCHED_TICK_MS, move |timer| {
            self.request_preempt();
            self.set_cpu_timer(timer);
        });
        self.set_cpu_timer(&tick);
        let old = self.this_cpu().sched_tick.lock().replace(tick);
        if let Some(old) = old {
            self.cancel_cpu_timer(&old);
        }
    }
}
