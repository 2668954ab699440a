//! AArch64 intrinsics and exception entry.

use core::arch::{asm, global_asm};

/// Reads a system register by name or `S<op0>_<op1>_<Cn>_<Cm>_<op2>` encoding.
macro_rules! read_sysreg {
    ($reg:literal) => {{
        let val: u64;
        // SAFETY: reading an EL1-accessible system register has no side
        // effects beyond those documented for the register.
        unsafe { asm!(concat!("mrs {}, ", $reg), out(reg) val, options(nomem, nostack)) };
        val
    }};
}

/// Writes a system register by name or encoding.
macro_rules! write_sysreg {
    ($reg:literal, $val:expr) => {{
        let val: u64 = $val;
        // SAFETY: callers only write registers owned by the calling core's
        // drivers, with values those drivers define.
        unsafe { asm!(concat!("msr ", $reg, ", {}"), in(reg) val, options(nostack)) };
    }};
}

/// Counter frequency in Hz.
#[inline]
pub fn cntfrq_el0() -> u64 {
    read_sysreg!("cntfrq_el0")
}

/// Virtual counter value.
#[inline]
pub fn cntvct_el0() -> u64 {
    read_sysreg!("cntvct_el0")
}

/// Virtual timer control register.
#[inline]
pub fn cntv_ctl_el0() -> u64 {
    read_sysreg!("cntv_ctl_el0")
}

/// Writes the virtual timer control register.
#[inline]
pub fn set_cntv_ctl_el0(val: u64) {
    write_sysreg!("cntv_ctl_el0", val);
}

/// Fires the virtual timer `ticks` counter ticks from now.
#[inline]
pub fn set_cntv_tval_el0(ticks: u64) {
    write_sysreg!("cntv_tval_el0", ticks);
}

/// `ICC_IAR1_EL1`: acknowledges the highest-priority group 1 interrupt.
#[inline]
pub fn icc_iar1_el1() -> u32 {
    read_sysreg!("S3_0_C12_C12_0") as u32
}

/// `ICC_EOIR1_EL1`: ends the interrupt acknowledged as `iar`.
#[inline]
pub fn set_icc_eoir1_el1(iar: u32) {
    write_sysreg!("S3_0_C12_C12_1", u64::from(iar));
}

/// `ICC_IGRPEN1_EL1`.
#[inline]
pub fn set_icc_igrpen1_el1(val: u32) {
    write_sysreg!("S3_0_C12_C12_7", u64::from(val));
}

/// `ICC_IGRPEN1_EL1`.
#[inline]
pub fn icc_igrpen1_el1() -> u32 {
    read_sysreg!("S3_0_C12_C12_7") as u32
}

/// `ICC_PMR_EL1`.
#[inline]
pub fn set_icc_pmr_el1(val: u32) {
    write_sysreg!("S3_0_C4_C6_0", u64::from(val));
}

/// `ICC_SRE_EL1`.
#[inline]
pub fn icc_sre_el1() -> u32 {
    read_sysreg!("S3_0_C12_C12_5") as u32
}

/// `ICC_SRE_EL1`.
#[inline]
pub fn set_icc_sre_el1(val: u32) {
    write_sysreg!("S3_0_C12_C12_5", u64::from(val));
}

/// Unmasks IRQs on the calling core.
#[inline]
pub fn enable_irqs() {
    // SAFETY: only changes the calling core's interrupt mask.
    unsafe { asm!("msr daifclr, #2", options(nomem, nostack)) };
}

/// Masks IRQs on the calling core.
#[inline]
pub fn disable_irqs() {
    // SAFETY: only changes the calling core's interrupt mask.
    unsafe { asm!("msr daifset, #2", options(nomem, nostack)) };
}

/// Sleeps the core until the next interrupt.
#[inline]
pub fn wait_for_interrupt() {
    // SAFETY: `wfi` has no memory effects.
    unsafe { asm!("wfi", options(nomem, nostack)) };
}

/// Data synchronization barrier, full system.
#[inline]
pub fn dsb_sy() {
    // SAFETY: a barrier only orders memory accesses.
    unsafe { asm!("dsb sy", options(nostack)) };
}

/// Installs the exception vector table on the calling core.
pub fn install_exception_vectors() {
    unsafe extern "C" {
        safe static meson_exception_vectors: u8;
    }
    write_sysreg!("vbar_el1", (&raw const meson_exception_vectors) as u64);
    // SAFETY: synchronizes the new VBAR before any exception is taken.
    unsafe { asm!("isb", options(nomem, nostack)) };
}

// Only IRQs from EL1h are expected. Everything else is reported as fatal.
global_asm!(
    r#"
.macro vector_entry target
    .balign 0x80
    b \target
.endm

    .section .text.vectors, "ax"
    .balign 0x800
    .global meson_exception_vectors
meson_exception_vectors:
    vector_entry meson_bad_vector       // EL1t sync
    vector_entry meson_bad_vector       // EL1t irq
    vector_entry meson_bad_vector       // EL1t fiq
    vector_entry meson_bad_vector       // EL1t serror
    vector_entry meson_bad_vector       // EL1h sync
    vector_entry meson_irq_vector       // EL1h irq
    vector_entry meson_bad_vector       // EL1h fiq
    vector_entry meson_bad_vector       // EL1h serror
    .rept 8
    vector_entry meson_bad_vector       // lower EL, not used
    .endr

meson_irq_vector:
    sub sp, sp, #192
    stp x0, x1, [sp, #0]
    stp x2, x3, [sp, #16]
    stp x4, x5, [sp, #32]
    stp x6, x7, [sp, #48]
    stp x8, x9, [sp, #64]
    stp x10, x11, [sp, #80]
    stp x12, x13, [sp, #96]
    stp x14, x15, [sp, #112]
    stp x16, x17, [sp, #128]
    stp x18, x30, [sp, #144]
    mrs x0, elr_el1
    mrs x1, spsr_el1
    stp x0, x1, [sp, #160]
    bl meson_irq_entry
    ldp x0, x1, [sp, #160]
    msr elr_el1, x0
    msr spsr_el1, x1
    ldp x18, x30, [sp, #144]
    ldp x16, x17, [sp, #128]
    ldp x14, x15, [sp, #112]
    ldp x12, x13, [sp, #96]
    ldp x10, x11, [sp, #80]
    ldp x8, x9, [sp, #64]
    ldp x6, x7, [sp, #48]
    ldp x4, x5, [sp, #32]
    ldp x2, x3, [sp, #16]
    ldp x0, x1, [sp, #0]
    add sp, sp, #192
    eret

meson_bad_vector:
    mrs x0, esr_el1
    mrs x1, elr_el1
    bl meson_bad_exception
    b .
"#
);
