//! Interrupt dispatch.
//!
//! A fixed table of [`NUM_IRQ_TYPES`] handler slots. Every slot starts out
//! pointing at a handler that reports the interrupt as unimplemented and
//! halts: an interrupt nobody configured is a kernel bug. Handlers are
//! installed during boot; once the table is sealed it is read-only.
//!
//! The global entry acknowledges the interrupt at the controller, signals
//! end-of-interrupt right away and only then runs the handler, so a handler
//! that switches tasks does not leave the interrupt active.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use meson_core::id::IrqId;
use meson_core::{kfatal, ktrace, kwarn};

use crate::config::{NUM_IRQ_TYPES, SPURIOUS_IRQ};
use crate::gicv3::IrqController;

/// Interrupt handler signature: receives the interrupt id.
pub type IrqHandler = fn(IrqId);

/// Mask applied to the acknowledge register to get the interrupt id.
const INTID_MASK: u32 = 0x3ff;

/// Error type for handler installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// The id has no slot in the table.
    OutOfRange(IrqId),
    /// The table was sealed at the end of boot.
    Sealed,
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange(id) => {
                write!(f, "interrupt {} outside table of {NUM_IRQ_TYPES}", id.as_u32())
            }
            Self::Sealed => f.write_str("interrupt table already sealed"),
        }
    }
}

fn unimplemented_irq(id: IrqId) {
    kfatal!(
        "CPU {}: interrupt {} not implemented",
        meson_core::cpu_local::current_cpu_id(),
        id.as_u32()
    );
    panic!("unhandled interrupt {}", id.as_u32());
}

/// Table of interrupt handlers indexed by interrupt id.
pub struct InterruptTable {
    handlers: [AtomicPtr<()>; NUM_IRQ_TYPES],
    sealed: AtomicBool,
}

impl InterruptTable {
    /// Creates a table with every slot on the unimplemented handler.
    pub const fn new() -> Self {
        Self {
            handlers: [const { AtomicPtr::new(unimplemented_irq as *mut ()) }; NUM_IRQ_TYPES],
            sealed: AtomicBool::new(false),
        }
    }

    /// Installs `handler` for `id`, replacing whatever was there.
    pub fn set_handler(&self, id: IrqId, handler: IrqHandler) -> Result<(), IrqError> {
        let Some(slot) = self.handlers.get(id.as_usize()) else {
            return Err(IrqError::OutOfRange(id));
        };
        if self.sealed.load(Ordering::Acquire) {
            return Err(IrqError::Sealed);
        }
        slot.store(handler as *mut (), Ordering::Release);
        Ok(())
    }

    /// Makes the table read-only.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Whether [`seal`](Self::seal) has been called.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Handler that runs for `id`. Ids past the table get the unimplemented
    /// handler.
    pub fn handler(&self, id: IrqId) -> IrqHandler {
        match self.handlers.get(id.as_usize()) {
            Some(slot) => {
                let ptr = slot.load(Ordering::Acquire);
                // SAFETY: only `IrqHandler` pointers are ever stored.
                unsafe { core::mem::transmute::<*mut (), IrqHandler>(ptr) }
            }
            None => unimplemented_irq,
        }
    }

    /// Services one interrupt from `ctrl`.
    ///
    /// Returns the id that was handled, or `None` for a spurious interrupt.
    /// Spurious interrupts are not ended at the controller.
    pub fn dispatch(&self, ctrl: &dyn IrqController) -> Option<IrqId> {
        let iar = ctrl.acknowledge();
        let intid = iar & INTID_MASK;
        if intid == SPURIOUS_IRQ {
            kwarn!("spurious interrupt");
            return None;
        }
        ctrl.end_of_interrupt(iar);

        let id = IrqId::new(intid);
        ktrace!("irq {}", intid);
        self.handler(id)(id);
        Some(id)
    }
}

impl Default for InterruptTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel's interrupt table.
pub static IRQ_TABLE: InterruptTable = InterruptTable::new();

/// Installs a handler in the kernel's table.
pub fn set_handler(id: IrqId, handler: IrqHandler) -> Result<(), IrqError> {
    IRQ_TABLE.set_handler(id, handler)
}

/// Called from the IRQ vector with the interrupted state saved.
#[cfg(all(target_os = "none", target_arch = "aarch64"))]
#[unsafe(no_mangle)]
extern "C" fn meson_irq_entry() {
    IRQ_TABLE.dispatch(&crate::gicv3::GIC);
    crate::boot::scheduler().preempt_point();
}

/// Called from every vector the kernel does not expect to be taken.
#[cfg(all(target_os = "none", target_arch = "aarch64"))]
#[unsafe(no_mangle)]
extern "C" fn meson_bad_exception(esr: u64, elr: u64) -> ! {
    kfatal!(
        "CPU {}: unexpected exception esr={:#x} elr={:#x}",
        meson_core::cpu_local::current_cpu_id(),
        esr,
        elr
    );
    panic!("unexpected exception");
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// Controller with a scripted sequence of acknowledge values.
    struct FakeGic {
        pending: Mutex<Vec<u32>>,
        ended: Mutex<Vec<u32>>,
    }

    impl FakeGic {
        fn with(pending: &[u32]) -> Self {
            Self {
                pending: Mutex::new(pending.iter().rev().copied().collect()),
                ended: Mutex::new(Vec::new()),
            }
        }
    }

    impl IrqController for FakeGic {
        fn acknowledge(&self) -> u32 {
            self.pending.lock().unwrap().pop().unwrap_or(SPURIOUS_IRQ)
        }

        fn end_of_interrupt(&self, iar: u32) {
            self.ended.lock().unwrap().push(iar);
        }
    }

    static UART_HITS: AtomicU32 = AtomicU32::new(0);
    static LAST_ID: AtomicU32 = AtomicU32::new(0);

    fn count_uart(id: IrqId) {
        UART_HITS.fetch_add(1, Ordering::SeqCst);
        LAST_ID.store(id.as_u32(), Ordering::SeqCst);
    }

    fn noop(_id: IrqId) {}

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    #[test]
    fn dispatch_masks_id_and_ends_before_handling() {
        let table = InterruptTable::new();
        table.set_handler(IrqId::new(33), count_uart).unwrap();
        // Upper bits carry the source core for SGIs and must be ignored.
        let gic = FakeGic::with(&[0x1c00 | 33]);

        assert_eq!(table.dispatch(&gic), Some(IrqId::new(33)));
        assert_eq!(UART_HITS.load(Ordering::SeqCst), 1);
        assert_eq!(LAST_ID.load(Ordering::SeqCst), 33);
        assert_eq!(*gic.ended.lock().unwrap(), [0x1c00 | 33]);
    }

    #[test]
    fn spurious_is_not_ended() {
        let table = InterruptTable::new();
        let gic = FakeGic::with(&[SPURIOUS_IRQ]);
        assert_eq!(table.dispatch(&gic), None);
        assert!(gic.ended.lock().unwrap().is_empty());
    }

    #[test]
    #[should_panic(expected = "unhandled interrupt 48")]
    fn unconfigured_interrupt_is_fatal() {
        let table = InterruptTable::new();
        table.dispatch(&FakeGic::with(&[48]));
    }

    #[test]
    #[should_panic(expected = "unhandled interrupt 100")]
    fn id_past_table_is_fatal() {
        let table = InterruptTable::new();
        table.dispatch(&FakeGic::with(&[100]));
    }

    // -----------------------------------------------------------------------
    // Installation
    // -----------------------------------------------------------------------

    #[test]
    fn last_registration_wins_until_sealed() {
        let table = InterruptTable::new();
        let id = IrqId::new(27);
        table.set_handler(id, count_uart).unwrap();
        table.set_handler(id, noop).unwrap();
        assert_eq!(table.handler(id) as usize, noop as usize);

        table.seal();
        assert!(table.is_sealed());
        assert_eq!(table.set_handler(id, count_uart), Err(IrqError::Sealed));
        assert_eq!(table.handler(id) as usize, noop as usize);
    }

    #[test]
    fn out_of_range_install_fails() {
        let table = InterruptTable::new();
        let id = IrqId::new(NUM_IRQ_TYPES as u32);
        assert_eq!(table.set_handler(id, noop), Err(IrqError::OutOfRange(id)));
        assert_eq!(
            IrqError::OutOfRange(id).to_string(),
            "interrupt 64 outside table of 64"
        );
    }
}
