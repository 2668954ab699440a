//! GICv3 interrupt controller.
//!
//! All interrupts are routed as non-secure group 1 with priority 0. SPIs go
//! to the boot core; each core enables its own virtual timer PPI.

use meson_core::id::{CpuId, IrqId};
use meson_core::kassert;

use crate::arch;
use crate::config::{GICD_BASE, GICR_BASE, GICR_STRIDE, NCPU, TIMER_IRQ, UART_IRQ, VIRTIO_BLK_IRQ};

/// The CPU interface operations interrupt dispatch needs.
pub trait IrqController: Sync {
    /// Acknowledges the highest-priority pending interrupt and returns the
    /// raw acknowledge value (id in the low 10 bits).
    fn acknowledge(&self) -> u32;

    /// Signals end-of-interrupt for a value returned by
    /// [`acknowledge`](Self::acknowledge).
    fn end_of_interrupt(&self, iar: u32);
}

const GICD_CTLR: usize = 0x0;
const fn gicd_igroupr(n: usize) -> usize {
    0x80 + n * 4
}
const fn gicd_isenabler(n: usize) -> usize {
    0x100 + n * 4
}
const fn gicd_icpendr(n: usize) -> usize {
    0x280 + n * 4
}
const fn gicd_ipriorityr(n: usize) -> usize {
    0x400 + n * 4
}
const fn gicd_itargetsr(n: usize) -> usize {
    0x800 + n * 4
}

const GICR_CTLR: usize = 0x0;
const GICR_WAKER: usize = 0x14;
const SGI_BASE: usize = 0x1_0000;
const GICR_IGROUPR0: usize = SGI_BASE + 0x80;
const GICR_ISENABLER0: usize = SGI_BASE + 0x100;
const GICR_ICPENDR0: usize = SGI_BASE + 0x280;
const fn gicr_ipriorityr(n: usize) -> usize {
    SGI_BASE + 0x400 + n * 4
}
const GICR_ICFGR1: usize = SGI_BASE + 0xc04;
const GICR_IGRPMODR0: usize = SGI_BASE + 0xd00;

const WAKER_PROCESSOR_SLEEP: u32 = 1 << 1;
const WAKER_CHILDREN_ASLEEP: u32 = 1 << 2;

/// Ids below this are per-core (SGIs and PPIs).
const FIRST_SPI: u32 = 32;

/// A GICv3 distributor with its per-core redistributors.
pub struct Gicv3 {
    gicd: usize,
    gicr: usize,
}

/// The board's interrupt controller.
pub static GIC: Gicv3 = Gicv3::new(GICD_BASE, GICR_BASE);

impl Gicv3 {
    /// Describes a GIC at the given virtual addresses.
    pub const fn new(gicd: usize, gicr: usize) -> Self {
        Self { gicd, gicr }
    }

    fn rd32(&self, off: usize) -> u32 {
        // SAFETY: `gicd` maps the distributor frame and `off` is one of its
        // registers.
        unsafe { core::ptr::read_volatile((self.gicd + off) as *const u32) }
    }

    fn wd32(&self, off: usize, val: u32) {
        // SAFETY: as for `rd32`.
        unsafe { core::ptr::write_volatile((self.gicd + off) as *mut u32, val) }
    }

    fn rdist(&self, cpu: CpuId) -> usize {
        kassert!(cpu.as_usize() < NCPU, "no redistributor for CPU {}", cpu);
        self.gicr + cpu.as_usize() * GICR_STRIDE
    }

    fn rr32(&self, cpu: CpuId, off: usize) -> u32 {
        // SAFETY: `rdist` maps the core's redistributor frames.
        unsafe { core::ptr::read_volatile((self.rdist(cpu) + off) as *const u32) }
    }

    fn wr32(&self, cpu: CpuId, off: usize, val: u32) {
        // SAFETY: as for `rr32`.
        unsafe { core::ptr::write_volatile((self.rdist(cpu) + off) as *mut u32, val) }
    }

    fn set_bit(&self, off: usize, id: u32) {
        let word = self.rd32(off) | 1 << (id % 32);
        self.wd32(off, word);
    }

    /// Routes an SPI to the boot core and enables it.
    fn setup_spi(&self, id: IrqId) {
        let intid = id.as_u32();
        kassert!(intid >= FIRST_SPI, "interrupt {} is not an SPI", intid);
        let n = intid as usize;
        let shift = (n % 4) * 8;

        let prio = self.rd32(gicd_ipriorityr(n / 4)) & !(0xff << shift);
        self.wd32(gicd_ipriorityr(n / 4), prio);
        let targets = self.rd32(gicd_itargetsr(n / 4)) & !(0xff << shift);
        self.wd32(gicd_itargetsr(n / 4), targets | 1 << shift);
        self.set_bit(gicd_icpendr(n / 32), intid);
        self.set_bit(gicd_isenabler(n / 32), intid);
    }

    /// Enables a PPI on `cpu`'s redistributor.
    fn setup_ppi(&self, cpu: CpuId, id: IrqId) {
        let intid = id.as_u32();
        kassert!(intid < FIRST_SPI, "interrupt {} is not per-core", intid);
        let n = intid as usize;
        let shift = (n % 4) * 8;

        let prio = self.rr32(cpu, gicr_ipriorityr(n / 4)) & !(0xff << shift);
        self.wr32(cpu, gicr_ipriorityr(n / 4), prio);
        let pend = self.rr32(cpu, GICR_ICPENDR0) | 1 << (intid % 32);
        self.wr32(cpu, GICR_ICPENDR0, pend);
        let en = self.rr32(cpu, GICR_ISENABLER0) | 1 << (intid % 32);
        self.wr32(cpu, GICR_ISENABLER0, en);
    }

    /// Global setup, run once on the boot core: enables the device SPIs.
    ///
    /// # Safety
    ///
    /// The distributor must be mapped at the address this GIC was created
    /// with.
    pub unsafe fn init(&self) {
        self.setup_spi(UART_IRQ);
        self.setup_spi(VIRTIO_BLK_IRQ);
    }

    /// Per-core setup: CPU interface, redistributor and the timer PPI.
    ///
    /// # Safety
    ///
    /// Both the distributor and the calling core's redistributor must be
    /// mapped.
    pub unsafe fn init_percpu(&self, cpu: CpuId) {
        arch::set_icc_igrpen1_el1(0);
        arch::set_icc_pmr_el1(0xff);

        self.wd32(GICD_CTLR, 0);
        for n in 0..32 {
            self.wd32(gicd_igroupr(n), !0);
        }

        self.wr32(cpu, GICR_CTLR, 0);
        arch::set_icc_sre_el1(arch::icc_sre_el1() | 1);
        self.wr32(cpu, GICR_IGROUPR0, !0);
        self.wr32(cpu, GICR_IGRPMODR0, 0);
        self.wr32(cpu, GICR_ICFGR1, 0);

        let waker = self.rr32(cpu, GICR_WAKER);
        self.wr32(cpu, GICR_WAKER, waker & !WAKER_PROCESSOR_SLEEP);
        while self.rr32(cpu, GICR_WAKER) & WAKER_CHILDREN_ASLEEP != 0 {
            core::hint::spin_loop();
        }

        self.setup_ppi(cpu, TIMER_IRQ);

        self.wd32(GICD_CTLR, 3);
        arch::set_icc_igrpen1_el1(1);
    }

    /// Whether both the distributor and the calling core's interface forward
    /// group 1 interrupts.
    pub fn enabled(&self) -> bool {
        arch::icc_igrpen1_el1() & 1 != 0 && self.rd32(GICD_CTLR) & 1 != 0
    }
}

impl IrqController for Gicv3 {
    fn acknowledge(&self) -> u32 {
        arch::icc_iar1_el1()
    }

    fn end_of_interrupt(&self, iar: u32) {
        arch::set_icc_eoir1_el1(iar);
    }
}
