//! Core types and synchronization primitives for the Meson kernel.
//!
//! This crate holds the leaf pieces every other kernel crate builds on:
//! the kernel log macros, typed identifiers, per-CPU indexing, the fatal
//! invariant check and the spin locks. None of it depends on the scheduler,
//! so it can be tested with `cargo test`, loom and shuttle on the host.

#![cfg_attr(target_os = "none", no_std)]
#![warn(missing_docs)]

pub mod cpu_local;
pub mod id;
pub mod log;
pub mod safety;
pub mod static_assert;
pub mod sync;
