//! Kernel bring-up.
//!
//! Every core enters [`cpu_main`] from the platform entry code with its
//! stack set up, interrupts masked and the kernel mapped at
//! [`KSPACE_BASE`](crate::config::KSPACE_BASE). The boot core runs
//! [`kernel_init`] once and starts the root process; the others wait until
//! that is done. Each core then brings up its interrupt and timer state,
//! registers with the scheduler and falls into its idle loop.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use meson_core::cpu_local::current_cpu_id;
use meson_core::id::CpuId;
use meson_core::sync::LazyLock;
use meson_core::{kdebug, kfatal, kinfo, ktrace, kwarn};
use meson_sched::{ProcError, Scheduler, Semaphore, Timer};

use crate::arch;
use crate::clock::{CLOCK, init_clock, set_clock_handler};
use crate::config::{NCPU, SCHED_TICK_MS};
use crate::gicv3::GIC;
use crate::irq::IRQ_TABLE;

static SCHEDULER: LazyLock<Scheduler> = LazyLock::new(|| Scheduler::new(&CLOCK));

/// Set by the boot core once shared state is initialized.
static KERNEL_READY: AtomicBool = AtomicBool::new(false);

/// How long the root process naps when it has nothing to reap.
const ROOT_NAP_MS: u64 = 100;

/// The kernel's scheduler.
pub fn scheduler() -> &'static Scheduler {
    &SCHEDULER
}

/// One-time initialization, run on the boot core before any other core
/// leaves [`cpu_main`]'s wait.
///
/// Brings up the console, routes device interrupts at the distributor,
/// installs the clock handler and seals the interrupt table.
pub fn kernel_init() {
    crate::log::init_logger();
    kinfo!("Meson kernel starting, {} cores", NCPU);

    // SAFETY: the distributor is mapped at GICD_BASE by the entry code.
    unsafe { GIC.init() };

    if let Err(err) = set_clock_handler(on_clock_interrupt) {
        kfatal!("cannot install clock handler: {}", err);
        panic!("clock setup failed");
    }
    IRQ_TABLE.seal();

    let sched = scheduler();
    kdebug!("scheduler up, tick {}ms, {} processes", SCHED_TICK_MS, sched.process_count());
}

fn on_clock_interrupt() {
    let fired = scheduler().timer_tick();
    ktrace!("clock: {} timers fired", fired);
}

/// Per-core entry. `init` runs in the root process once the boot core is
/// scheduling.
pub fn cpu_main(init: fn()) -> ! {
    let cpu = current_cpu_id();
    if cpu == CpuId::BOOT {
        kernel_init();
    } else {
        while !KERNEL_READY.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        arch::dsb_sy();
    }

    arch::install_exception_vectors();
    // SAFETY: distributor and redistributors are mapped, and `cpu` is the
    // calling core.
    unsafe { GIC.init_percpu(cpu) };

    let sched = scheduler();
    sched.set_cpu_on();
    if cpu == CpuId::BOOT {
        let root = Arc::clone(sched.root());
        let pid = sched.start_proc(&root, move || root_main(init));
        kdebug!("root process is pid {}", pid);
        KERNEL_READY.store(true, Ordering::Release);
    }

    init_clock();
    sched.start_sched_tick();
    idle_loop()
}

/// Body of the root process: runs `init`, then reaps every orphan that ends
/// up under it.
fn root_main(init: fn()) -> ! {
    init();
    let sched = scheduler();
    loop {
        match sched.wait() {
            Ok((pid, code)) => kdebug!("root: reaped pid {} (exit {})", pid, code),
            Err(ProcError::NoChildren) => {
                sleep_ms(ROOT_NAP_MS);
            }
            Err(err) => kwarn!("root: {}", err),
        }
    }
}

/// Sleeps the calling task for at least `ms` milliseconds.
///
/// Returns `false` if a kill cut the sleep short.
pub fn sleep_ms(ms: u64) -> bool {
    let sched = scheduler();
    let done = Arc::new(Semaphore::new(0));
    let wake = Arc::clone(&done);
    let timer = Timer::new(ms, move |_| wake.post(sched));
    sched.set_cpu_timer(&timer);
    if done.wait(sched, true) {
        true
    } else {
        sched.cancel_cpu_timer(&timer);
        false
    }
}

/// Idle task of the calling core: hands the core to any runnable task and
/// otherwise waits for the next interrupt.
pub fn idle_loop() -> ! {
    let sched = scheduler();
    loop {
        sched.yield_now();
        arch::enable_irqs();
        arch::wait_for_interrupt();
        arch::disable_irqs();
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    arch::disable_irqs();
    kfatal!("CPU {}: {}", current_cpu_id(), info);
    loop {
        arch::wait_for_interrupt();
    }
}
