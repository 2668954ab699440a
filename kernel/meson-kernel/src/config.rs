//! Compile-time kernel configuration.
//!
//! Everything here is fixed for the QEMU `virt` board with a GICv3. The log
//! level can be chosen at build time through `MESON_LOG_LEVEL`
//! (`fatal`, `error`, `warn`, `info`, `debug` or `trace`).

use meson_core::id::IrqId;
use meson_core::log::LogLevel;

/// Maximum kernel log level. Messages more verbose than this are dropped.
pub const MAX_LOG_LEVEL: LogLevel = match option_env!("MESON_LOG_LEVEL") {
    Some(name) => match LogLevel::from_name(name) {
        Some(level) => level,
        None => LogLevel::Debug,
    },
    None => LogLevel::Info,
};

/// Number of cores brought up.
pub const NCPU: usize = meson_core::cpu_local::MAX_CPUS;

/// Number of slots in the interrupt handler table.
pub const NUM_IRQ_TYPES: usize = 64;

/// Virtual timer PPI.
pub const TIMER_IRQ: IrqId = IrqId::new(27);
/// PL011 UART SPI.
pub const UART_IRQ: IrqId = IrqId::new(33);
/// virtio-mmio block device SPI.
pub const VIRTIO_BLK_IRQ: IrqId = IrqId::new(48);
/// Interrupt id the GIC reports when nothing is pending.
pub const SPURIOUS_IRQ: u32 = 1023;

/// Period of the per-core scheduler tick.
pub const SCHED_TICK_MS: u64 = meson_sched::sched::SCHED_TICK_MS;
/// Clock interval programmed when a core has no armed timer.
pub const DEFAULT_CLOCK_INTERVAL_MS: u64 = meson_sched::timer::DEFAULT_CLOCK_INTERVAL_MS;
/// Delay before the first clock interrupt on each core.
pub const FIRST_CLOCK_MS: u64 = 10;

/// Start of the kernel's linear map of physical memory.
pub const KSPACE_BASE: usize = 0xFFFF_0000_0000_0000;
/// GIC distributor.
pub const GICD_BASE: usize = KSPACE_BASE + 0x0800_0000;
/// First GIC redistributor; one frame pair per core follows.
pub const GICR_BASE: usize = GICD_BASE + 0xa_0000;
/// Distance between two cores' redistributors.
pub const GICR_STRIDE: usize = 0x2_0000;
/// PL011 UART registers.
pub const UART_BASE: usize = KSPACE_BASE + 0x0900_0000;

meson_core::static_assert!(NUM_IRQ_TYPES > VIRTIO_BLK_IRQ.as_usize());
