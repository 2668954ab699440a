//! Process records and the process tree.
//!
//! A [`Process`] is owned by the scheduler's process table from creation
//! until its parent reaps it. The tree is kept in each record's links: a
//! parent owns its children through `Arc`s, a child points back through a
//! `Weak`, so an exited parent never keeps its children alive and vice versa.
//! Tree edits happen only while the process table lock is held.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, AtomicU64, Ordering};

use meson_core::id::{CpuId, Pid};
use meson_core::sync::IrqSpinLock;

use crate::context::KernelContext;
use crate::sem::Semaphore;

/// Lifecycle state of a process.
///
/// ```text
/// UNUSED -> RUNNABLE -> RUNNING -> SLEEPING | DEEPSLEEPING -> RUNNABLE -> ...
///                          |
///                          +-> ZOMBIE -> (reaped) UNUSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcState {
    /// Created but not started, or reaped.
    Unused = 0,
    /// Waiting in the run queue.
    Runnable = 1,
    /// On a core right now.
    Running = 2,
    /// Blocked; a post or an alert makes it runnable.
    Sleeping = 3,
    /// Blocked; only a post makes it runnable.
    DeepSleeping = 4,
    /// Exited, waiting for its parent to collect the exit code.
    Zombie = 5,
}

impl ProcState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Runnable,
            2 => Self::Running,
            3 => Self::Sleeping,
            4 => Self::DeepSleeping,
            5 => Self::Zombie,
            _ => Self::Unused,
        }
    }

    /// Whether the state is one of the two blocked states.
    pub const fn is_asleep(self) -> bool {
        matches!(self, Self::Sleeping | Self::DeepSleeping)
    }
}

/// Recoverable failures of process lifecycle calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    /// No live process has this pid.
    NotFound(Pid),
    /// The caller has no children to wait for.
    NoChildren,
    /// The process may not be killed.
    Protected(Pid),
    /// The wait was cut short by a kill.
    Interrupted,
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(pid) => write!(f, "no process with pid {pid}"),
            Self::NoChildren => f.write_str("no children to wait for"),
            Self::Protected(pid) => write!(f, "pid {pid} cannot be killed"),
            Self::Interrupted => f.write_str("wait interrupted by kill"),
        }
    }
}

/// Tree edges of one process. Edited under the process table lock.
#[derive(Default)]
pub(crate) struct Links {
    pub(crate) parent: Option<Weak<Process>>,
    pub(crate) children: Vec<Arc<Process>>,
}

/// Scheduler bookkeeping carried by each process.
#[derive(Default)]
pub struct SchedInfo {
    cpu: AtomicU32,
    switches: AtomicU64,
}

impl SchedInfo {
    /// Core the process last ran on (or is running on).
    pub fn cpu(&self) -> CpuId {
        CpuId::new(self.cpu.load(Ordering::Acquire))
    }

    /// How many times the process has been switched onto a core.
    pub fn switches(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    pub(crate) fn record_dispatch(&self, cpu: CpuId) {
        self.cpu.store(cpu.as_u32(), Ordering::Release);
        self.switches.fetch_add(1, Ordering::Relaxed);
    }
}

/// A process control block.
pub struct Process {
    pid: Pid,
    idle: bool,
    state: AtomicU8,
    killed: AtomicBool,
    exited: AtomicBool,
    exit_code: AtomicI32,
    child_exit: Semaphore,
    pub(crate) links: IrqSpinLock<Links>,
    sched_info: SchedInfo,
    context: KernelContext,
}

impl Process {
    pub(crate) fn new(pid: Pid, idle: bool) -> Self {
        Self {
            pid,
            idle,
            state: AtomicU8::new(ProcState::Unused as u8),
            killed: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            exit_code: AtomicI32::new(0),
            child_exit: Semaphore::new(0),
            links: IrqSpinLock::new(Links::default()),
            sched_info: SchedInfo::default(),
            context: KernelContext::new(),
        }
    }

    /// Process id. Idle tasks all carry pid 0.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Whether this is a core's idle task.
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Current state.
    ///
    /// Transitions happen under the scheduler lock; outside it this is only
    /// a snapshot.
    pub fn state(&self) -> ProcState {
        ProcState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ProcState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether a kill is pending.
    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_killed(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    /// Whether the process has run the table-locked part of `exit`, which
    /// posts its parent. It may still be switching out; reaping waits for
    /// the ZOMBIE state under the scheduler lock.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub(crate) fn mark_exited(&self) {
        self.exited.store(true, Ordering::Release);
    }

    /// Exit code recorded by `exit`. Meaningful once the process is a zombie.
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub(crate) fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
    }

    /// Posted once for every child that becomes a zombie.
    pub fn child_exit(&self) -> &Semaphore {
        &self.child_exit
    }

    /// Parent process, if it still exists.
    pub fn parent(&self) -> Option<Arc<Process>> {
        self.links.lock().parent.as_ref().and_then(Weak::upgrade)
    }

    /// Pids of the current children, oldest first.
    pub fn children(&self) -> Vec<Pid> {
        self.links.lock().children.iter().map(|c| c.pid).collect()
    }

    /// Scheduler bookkeeping.
    pub fn sched_info(&self) -> &SchedInfo {
        &self.sched_info
    }

    pub(crate) fn context(&self) -> &KernelContext {
        &self.context
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("idle", &self.idle)
            .field("state", &self.state())
            .field("killed", &self.killed())
            .finish_non_exhaustive()
    }
}
