//! CPU intrinsics and system registers.
//!
//! The kernel target uses the real registers. Host builds get a small model
//! of them so the drivers above can be unit tested: a virtual counter backed
//! by the host clock, plain storage for the timer control registers and a
//! GIC CPU interface that never has anything pending.

#[cfg(all(target_os = "none", target_arch = "aarch64"))]
mod aarch64;
#[cfg(all(target_os = "none", target_arch = "aarch64"))]
pub use aarch64::*;

#[cfg(not(target_os = "none"))]
mod host;
#[cfg(not(target_os = "none"))]
pub use host::*;
