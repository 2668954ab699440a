//! Kernel logger.
//!
//! [`init_logger`] registers the PL011 console with the global [`Logger`]
//! and points the `meson_core` print/log hooks at it. Until then `klog!`
//! output is discarded. Further sinks are added with [`add_sink`].
//!
//! Leveled lines look like `[INFO  cpu0] message`. A line is written to a
//! sink if its level passes both [`MAX_LOG_LEVEL`] and the sink's own limit.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt::{self, Write as _};

use meson_core::cpu_local::current_cpu_id;
use meson_core::log::{LogLevel, set_log_fn, set_print_fn};
use meson_core::sync::IrqSpinLock;

use crate::config::{MAX_LOG_LEVEL, UART_BASE};

/// A destination for kernel log output.
pub trait LogSink: Send + Sync {
    /// Writes a string fragment.
    fn write_str(&self, s: &str);
    /// Most verbose level this sink accepts.
    fn max_level(&self) -> LogLevel;
    /// Name for diagnostics.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// PL011 console
// ---------------------------------------------------------------------------

const UART_DR: usize = 0x00;
const UART_FR: usize = 0x18;
const FR_TXFF: u32 = 1 << 5;

/// Transmit side of a PL011 UART, already configured by firmware.
pub struct Pl011 {
    base: usize,
}

impl Pl011 {
    /// # Safety
    ///
    /// `base` must map the UART's register frame for the kernel's lifetime.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    /// Writes one byte, waiting while the transmit FIFO is full.
    pub fn write_byte(&self, byte: u8) {
        // SAFETY: `new`'s contract; FR and DR are in the register frame.
        unsafe {
            while core::ptr::read_volatile((self.base + UART_FR) as *const u32) & FR_TXFF != 0 {
                core::hint::spin_loop();
            }
            core::ptr::write_volatile((self.base + UART_DR) as *mut u32, u32::from(byte));
        }
    }
}

/// A [`LogSink`] on the PL011 console.
pub struct UartSink {
    uart: Pl011,
    max_level: LogLevel,
}

impl UartSink {
    /// Creates a console sink.
    pub fn new(uart: Pl011, max_level: LogLevel) -> Self {
        Self { uart, max_level }
    }
}

impl LogSink for UartSink {
    fn write_str(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.uart.write_byte(b'\r');
            }
            self.uart.write_byte(byte);
        }
    }

    fn max_level(&self) -> LogLevel {
        self.max_level
    }

    fn name(&self) -> &str {
        "uart"
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Fans log output out to registered sinks.
///
/// The sink list sits behind an interrupt-safe lock so interrupt handlers
/// can log.
pub struct Logger {
    sinks: IrqSpinLock<Vec<Box<dyn LogSink>>>,
    max_level: LogLevel,
}

impl Logger {
    /// Creates a logger with no sinks that drops anything above `max_level`.
    pub const fn new(max_level: LogLevel) -> Self {
        Self {
            sinks: IrqSpinLock::new(Vec::new()),
            max_level,
        }
    }

    /// Registers a sink.
    pub fn add_sink(&self, sink: Box<dyn LogSink>) {
        self.sinks.lock().push(sink);
    }

    /// Replaces the first sink called `name`. Returns `false` if there is
    /// none.
    pub fn replace_sink_by_name(&self, name: &str, new_sink: Box<dyn LogSink>) -> bool {
        let mut sinks = self.sinks.lock();
        match sinks.iter_mut().find(|s| s.name() == name) {
            Some(slot) => {
                *slot = new_sink;
                true
            }
            None => false,
        }
    }

    /// Unleveled output to every sink.
    pub fn write_fmt(&self, args: fmt::Arguments<'_>) {
        for sink in self.sinks.lock().iter() {
            let _ = SinkWriter(sink.as_ref()).write_fmt(args);
        }
    }

    /// Leveled output, tagged with the level and the calling core.
    pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if level > self.max_level {
            return;
        }
        let cpu = current_cpu_id();
        for sink in self.sinks.lock().iter() {
            if level <= sink.max_level() {
                let _ = writeln!(SinkWriter(sink.as_ref()), "[{} cpu{cpu}] {args}", level.name());
            }
        }
    }
}

struct SinkWriter<'a>(&'a dyn LogSink);

impl fmt::Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// The kernel logger.
pub static LOGGER: Logger = Logger::new(MAX_LOG_LEVEL);

fn logger_print(args: fmt::Arguments<'_>) {
    LOGGER.write_fmt(args);
}

fn logger_log(level: LogLevel, args: fmt::Arguments<'_>) {
    LOGGER.log(level, args);
}

/// Registers the console and routes `kprint!`/`klog!` to the logger.
pub fn init_logger() {
    // SAFETY: UART_BASE is the board's PL011, mapped by the boot code.
    let uart = unsafe { Pl011::new(UART_BASE) };
    LOGGER.add_sink(Box::new(UartSink::new(uart, LogLevel::Trace)));
    // SAFETY: both functions only take the logger's interrupt-safe lock.
    unsafe {
        set_print_fn(logger_print);
        set_log_fn(logger_log);
    }
}

/// Registers an additional sink with the kernel logger.
pub fn add_sink(sink: Box<dyn LogSink>) {
    LOGGER.add_sink(sink);
}
