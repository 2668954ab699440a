//! AArch64 backend: callee-saved registers swapped in assembly.

use alloc::boxed::Box;
use alloc::vec;
use core::cell::UnsafeCell;

use meson_core::kfatal;

use super::{KSTACK_SIZE, TaskEntry};

/// Registers preserved across a call under AAPCS64, plus the stack pointer.
#[repr(C)]
#[derive(Default)]
struct SavedRegs {
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    fp: u64,
    lr: u64,
    sp: u64,
}

core::arch::global_asm!(
    ".global meson_context_switch",
    "meson_context_switch:",
    "    stp x19, x20, [x0, #0]",
    "    stp x21, x22, [x0, #16]",
    "    stp x23, x24, [x0, #32]",
    "    stp x25, x26, [x0, #48]",
    "    stp x27, x28, [x0, #64]",
    "    stp x29, x30, [x0, #80]",
    "    mov x9, sp",
    "    str x9, [x0, #96]",
    "    ldp x19, x20, [x1, #0]",
    "    ldp x21, x22, [x1, #16]",
    "    ldp x23, x24, [x1, #32]",
    "    ldp x25, x26, [x1, #48]",
    "    ldp x27, x28, [x1, #64]",
    "    ldp x29, x30, [x1, #80]",
    "    ldr x9, [x1, #96]",
    "    mov sp, x9",
    "    ret",
    "",
    ".global meson_task_trampoline",
    "meson_task_trampoline:",
    "    mov x0, x19",
    "    bl meson_task_entry",
    "    brk #0",
);

unsafe extern "C" {
    fn meson_context_switch(prev: *mut SavedRegs, next: *const SavedRegs);
    fn meson_task_trampoline();
}

/// First code a new task runs, reached from `meson_task_trampoline` with the
/// task's context in `x0`.
#[unsafe(no_mangle)]
extern "C" fn meson_task_entry(ctx: *const KernelContext) -> ! {
    // SAFETY: x19 was set by `prepare` to a context that outlives its task,
    // and only this task ever takes its entry.
    let entry = unsafe { (*(*ctx).entry.get()).take() };
    if let Some(entry) = entry {
        entry();
    }
    kfatal!("task entry returned without exiting");
    panic!("task entry returned");
}

/// Saved register file, kernel stack and pending entry of one task.
pub struct KernelContext {
    regs: UnsafeCell<SavedRegs>,
    stack: UnsafeCell<Option<Box<[u8]>>>,
    entry: UnsafeCell<Option<TaskEntry>>,
}

// SAFETY: the fields are only touched by the task itself or by the core that
// switches to it, and both happen under the scheduler lock.
unsafe impl Send for KernelContext {}
unsafe impl Sync for KernelContext {}

impl Default for KernelContext {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelContext {
    /// Creates an empty context, adopted by the first task that switches out
    /// from it (a core's boot flow becomes its idle task this way).
    pub fn new() -> Self {
        Self {
            regs: UnsafeCell::new(SavedRegs::default()),
            stack: UnsafeCell::new(None),
            entry: UnsafeCell::new(None),
        }
    }

    /// Allocates a kernel stack and arranges for `entry` to run on it.
    ///
    /// The context must not move afterwards; it lives inside its process
    /// record for the task's whole life.
    pub fn prepare(&self, _name: &str, entry: TaskEntry) {
        let stack = vec![0u8; KSTACK_SIZE].into_boxed_slice();
        let top = (stack.as_ptr() as usize + stack.len()) & !0xf;
        // SAFETY: the task has never run, nobody else looks at these cells.
        unsafe {
            *self.entry.get() = Some(entry);
            let regs = &mut *self.regs.get();
            regs.x19 = core::ptr::from_ref(self) as u64;
            regs.lr = meson_task_trampoline as usize as u64;
            regs.sp = top as u64;
            regs.fp = 0;
            *self.stack.get() = Some(stack);
        }
    }

    /// Saves the caller into `prev` and resumes `next`.
    ///
    /// # Safety
    ///
    /// `prev` must be the context of the calling task and the scheduler lock
    /// must be held.
    pub unsafe fn switch(prev: &Self, next: &Self) {
        // SAFETY: guaranteed by the caller; the lock serializes access.
        unsafe { meson_context_switch(prev.regs.get(), next.regs.get()) };
    }

    /// Resumes `next` without saving the caller.
    ///
    /// # Safety
    ///
    /// Same as [`switch`](Self::switch); the caller's stack stays allocated
    /// until its process is reaped, which cannot happen before the switch
    /// completes because reaping checks the state under the scheduler lock.
    pub unsafe fn switch_final(next: &Self) -> ! {
        let mut dead = SavedRegs::default();
        // SAFETY: guaranteed by the caller.
        unsafe { meson_context_switch(&raw mut dead, next.regs.get()) };
        unreachable!("exited task resumed");
    }
}
