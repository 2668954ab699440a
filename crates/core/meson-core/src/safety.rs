//! Fatal invariant checks.
//!
//! [`kassert!`] guards kernel invariants whose violation leaves shared state
//! (a semaphore queue, the process tree, a lock) in an unknown condition.
//! It is never compiled away: on failure it logs the condition and its
//! source location at fatal level, then panics. The kernel's panic handler
//! halts the core; on the host the panic fails the test.

/// Checks a kernel invariant, halting the core when it does not hold.
///
/// # Examples
///
/// ```ignore
/// kassert!(value <= 0);
/// kassert!(queue.is_empty(), "semaphore {} still has sleepers", id);
/// ```
#[macro_export]
macro_rules! kassert {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::kfatal!(
                "assertion failed at {}:{}: {}",
                file!(),
                line!(),
                stringify!($cond),
            );
            panic!("kernel invariant violated: {}", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::kfatal!(
                "assertion failed at {}:{}: {}",
                file!(),
                line!(),
                format_args!($($arg)+),
            );
            panic!($($arg)+);
        }
    };
}
