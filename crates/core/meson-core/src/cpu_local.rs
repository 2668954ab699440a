//! Per-core storage indexed by the current core id.
//!
//! On the kernel target the id comes from `MPIDR_EL1.Aff0`. On the host each
//! thread that plays a core binds its id with [`bind_current_cpu`]; threads
//! that never bind read as core 0.

use crate::id::CpuId;

/// Number of cores the kernel supports.
pub const MAX_CPUS: usize = 4;

/// Per-core storage. Wraps `[T; MAX_CPUS]`, indexed by the current core id.
pub struct CpuLocal<T> {
    data: [T; MAX_CPUS],
}

impl<T> CpuLocal<T> {
    /// Creates a new `CpuLocal` wrapping the given array.
    pub const fn new(data: [T; MAX_CPUS]) -> Self {
        Self { data }
    }

    /// Returns the current core's slot.
    pub fn get(&self) -> &T {
        self.get_for(current_cpu_id())
    }

    /// Returns a specific core's slot.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is not below [`MAX_CPUS`].
    pub fn get_for(&self, cpu: CpuId) -> &T {
        &self.data[cpu.as_usize()]
    }

    /// Iterates over all slots in core order.
    pub fn iter(&self) -> impl Iterator<Item = (CpuId, &T)> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, slot)| (CpuId::new(i as u32), slot))
    }
}

// SAFETY: each slot is only handed out by shared reference; `T: Sync` makes
// sharing it between cores sound.
unsafe impl<T: Send> Send for CpuLocal<T> {}
unsafe impl<T: Sync> Sync for CpuLocal<T> {}

#[cfg(not(target_os = "none"))]
std::thread_local! {
    static HOST_CPU: core::cell::Cell<u32> = const { core::cell::Cell::new(0) };
}

/// Returns the id of the core the caller is running on.
#[inline]
pub fn current_cpu_id() -> CpuId {
    #[cfg(all(target_os = "none", target_arch = "aarch64"))]
    {
        let mpidr: u64;
        // SAFETY: MPIDR_EL1 is readable at EL1 and has no side effects.
        unsafe {
            core::arch::asm!("mrs {}, mpidr_el1", out(reg) mpidr, options(nomem, nostack));
        }
        CpuId::new((mpidr & 0xff) as u32)
    }
    #[cfg(not(target_os = "none"))]
    {
        CpuId::new(HOST_CPU.with(core::cell::Cell::get))
    }
    #[cfg(all(target_os = "none", not(target_arch = "aarch64")))]
    {
        CpuId::BOOT
    }
}

/// Records which core the calling thread is currently playing.
///
/// Hardware knows its own id, so this is a no-op on the kernel target. The
/// host scheduler calls it whenever a task thread resumes on a core.
#[inline]
pub fn bind_current_cpu(cpu: CpuId) {
    #[cfg(not(target_os = "none"))]
    HOST_CPU.with(|c| c.set(cpu.as_u32()));
    #[cfg(target_os = "none")]
    let _ = cpu;
}
