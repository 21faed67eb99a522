//! Kernel executable entry

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    use core::panic::PanicInfo;

    use bootloader_api::{config::Mapping, entry_point, BootInfo, BootloaderConfig};
    use tephra_kernel::{arch, bootstrap};

    /// The boot handoff contract: the whole of physical memory mapped at
    /// a bootloader-chosen higher-half offset (the HHDM window).
    pub static BOOTLOADER_CONFIG: BootloaderConfig = {
        let mut config = BootloaderConfig::new_default();
        config.mappings.physical_memory = Some(Mapping::Dynamic);
        config
    };

    entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

    fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
        bootstrap::run(boot_info)
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        // Log and halt: kernel-internal invariant failures are fatal.
        tephra_kernel::serial_println!("[KERNEL PANIC] {}", info);
        log::error!("kernel panic: {}", info);
        arch::halt()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    // The kernel only runs freestanding; host builds exist for the test
    // harness.
}
