//! Tephra kernel library
//!
//! A freestanding x86-64 monolithic kernel: physical and virtual memory
//! management, a preemptive round-robin scheduler with fork/exec/wait,
//! ports-and-shared-memory IPC, a descriptor layer over a polymorphic
//! VFS, and an MSR-based syscall surface with user-stack signal
//! delivery.
//!
//! The library form exists for the test harnesses: host builds run the
//! subsystem unit tests under the standard harness, bare-metal builds
//! link the integration test binaries.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_framework::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]
// Raw-pointer indexing (`(*ptr)[i]`) goes through an implicit autoref that a
// newer rustc denies by default; the pointers here are always valid for the
// reference's lifetime, so the lint's concern doesn't apply.
#![allow(dangerous_implicit_autorefs)]

extern crate alloc;

// Host target: the system allocator lets unit tests allocate normally.
#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[macro_use]
pub mod serial;
#[macro_use]
pub mod print;

pub mod arch;
pub mod bootstrap;
pub mod cap;
pub mod config;
pub mod error;
pub mod fs;
pub mod ipc;
pub mod irq;
pub mod kctx;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod test_framework;
pub mod time;

pub use test_framework::{exit_qemu, test_panic_handler, QemuExitCode, Testable};

#[cfg(all(test, target_os = "none"))]
static TEST_BOOTLOADER_CONFIG: bootloader_api::BootloaderConfig = {
    let mut config = bootloader_api::BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(bootloader_api::config::Mapping::Dynamic);
    config
};

#[cfg(all(test, target_os = "none"))]
bootloader_api::entry_point!(test_kernel_main, config = &TEST_BOOTLOADER_CONFIG);

#[cfg(all(test, target_os = "none"))]
fn test_kernel_main(boot_info: &'static mut bootloader_api::BootInfo) -> ! {
    bootstrap::early_init(boot_info);
    test_main();
    arch::halt();
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation failure in a no_std kernel is unrecoverable.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("kernel heap exhausted: {:?}", layout);
}
