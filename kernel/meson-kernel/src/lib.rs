//! Meson kernel library.
//!
//! Board glue around the scheduling core in `meson-sched`: interrupt
//! dispatch through the GICv3, the generic timer clock driver, the kernel
//! logger and per-core bring-up. The final kernel image supplies the entry
//! code and the global allocator and calls [`cpu_main`] on every core.

#![cfg_attr(target_os = "none", no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod arch;
pub mod boot;
pub mod clock;
pub mod config;
pub mod gicv3;
pub mod irq;
pub mod log;

pub use boot::{cpu_main, kernel_init, scheduler};
pub use meson_core::log::LogLevel;
pub use meson_core::{kdebug, kerr, kfatal, kinfo, klog, ktrace, kwarn};
pub use meson_core::{kprint, kprintln};
