//! Kernel execution contexts and the switch between them.
//!
//! A [`KernelContext`] is everything needed to suspend one task and resume
//! another. The contract is the same on every backend:
//!
//! - [`KernelContext::prepare`] gives a fresh context its entry closure; the
//!   closure runs the first time the context is switched to.
//! - [`KernelContext::switch`] suspends the caller (`prev`) and resumes
//!   `next`. It returns when some later switch resumes `prev` again.
//! - [`KernelContext::switch_final`] resumes `next` and never comes back.
//!
//! The scheduler lock is held across every switch. Whoever runs after the
//! switch releases it, so it is dropped exactly once per handoff.

#[cfg(all(target_os = "none", target_arch = "aarch64"))]
mod aarch64;
#[cfg(all(target_os = "none", target_arch = "aarch64"))]
pub use aarch64::KernelContext;

#[cfg(not(target_os = "none"))]
mod host;
#[cfg(not(target_os = "none"))]
pub use host::KernelContext;

/// Entry closure of a task that has not run yet.
pub type TaskEntry = alloc::boxed::Box<dyn FnOnce() + Send + 'static>;

/// Size of each task's kernel stack.
pub const KSTACK_SIZE: usize = 16 * 1024;
