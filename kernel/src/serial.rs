//! COM1 serial console
//!
//! The serial port is the kernel's console and the transport for the test
//! harness. Writes go through a global lock with interrupts disabled so a
//! timer tick cannot interleave two half-written lines.

use core::fmt;

use spin::Mutex;

#[cfg(target_arch = "x86_64")]
static COM1: Mutex<Option<uart_16550::SerialPort>> = Mutex::new(None);

/// Initialize COM1. Safe to call more than once; later calls are no-ops.
pub fn init() {
    #[cfg(target_arch = "x86_64")]
    {
        let mut port = COM1.lock();
        if port.is_none() {
            // SAFETY: 0x3F8 is the standard COM1 I/O port base; no other
            // kernel code drives these ports directly.
            let mut com1 = unsafe { uart_16550::SerialPort::new(0x3F8) };
            com1.init();
            *port = Some(com1);
        }
    }
}

#[doc(hidden)]
pub fn _serial_print(args: fmt::Arguments) {
    use fmt::Write;

    #[cfg(target_arch = "x86_64")]
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut port = COM1.lock();
        if port.is_none() {
            // SAFETY: same contract as in `init`; reached only for output
            // emitted before bootstrap ran.
            let mut com1 = unsafe { uart_16550::SerialPort::new(0x3F8) };
            com1.init();
            *port = Some(com1);
        }
        if let Some(com1) = port.as_mut() {
            let _ = com1.write_fmt(args);
        }
    });

    #[cfg(not(target_arch = "x86_64"))]
    let _ = args;
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*))
    };
}
