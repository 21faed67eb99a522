//! Bare-metal test harness
//!
//! Minimal infrastructure for tests that must run inside the kernel:
//! serial reporting plus the QEMU isa-debug-exit device for pass/fail
//! exit codes. Host-side unit tests use the standard harness instead.

use core::panic::PanicInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// Trait all bare-metal testable functions implement.
pub trait Testable {
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        crate::serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        crate::serial_println!("[ok]");
    }
}

/// Custom test runner for in-kernel tests.
pub fn test_runner(tests: &[&dyn Testable]) {
    crate::serial_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

/// Panic handler for test binaries.
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    crate::serial_println!("[failed]\n");
    crate::serial_println!("error: {}\n", info);
    exit_qemu(QemuExitCode::Failed)
}

/// Exit QEMU through the isa-debug-exit device at port 0xf4. Falls back
/// to a halt loop when the device (or the feature) is absent.
pub fn exit_qemu(_exit_code: QemuExitCode) -> ! {
    #[cfg(all(target_arch = "x86_64", target_os = "none", feature = "qemu-exit"))]
    // SAFETY: port 0xf4 is the QEMU debug-exit device; the write does
    // not return.
    unsafe {
        use x86_64::instructions::port::Port;
        let mut port = Port::new(0xf4);
        port.write(_exit_code as u32);
    }
    crate::arch::halt()
}
