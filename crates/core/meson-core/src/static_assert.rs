//! Compile-time assertion macro.

/// Asserts a condition at compile time.
///
/// ```ignore
/// static_assert!(NUM_IRQ_TYPES > TIMER_IRQ);
/// static_assert!(MAX_CPUS <= 8, "Aff0 holds the core id");
/// ```
#[macro_export]
macro_rules! static_assert {
    ($cond:expr $(,)?) => {
        const _: () = assert!($cond);
    };
    ($cond:expr, $msg:expr $(,)?) => {
        const _: () = assert!($cond, $msg);
    };
}

static_assert!(crate::cpu_local::MAX_CPUS <= 256, "core id is read from MPIDR_EL1.Aff0");
