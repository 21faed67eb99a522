//! Boot smoke test: bring the core up under QEMU and exercise the
//! allocators and the VFS from kernel context.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(not(target_os = "none"))]
fn main() {}

#[cfg(target_os = "none")]
mod bare {
    extern crate alloc;

    use bootloader_api::{config::Mapping, entry_point, BootInfo, BootloaderConfig};
    use tephra_kernel::{kctx, test_framework, Testable};

    pub static BOOTLOADER_CONFIG: BootloaderConfig = {
        let mut config = BootloaderConfig::new_default();
        config.mappings.physical_memory = Some(Mapping::Dynamic);
        config
    };

    entry_point!(test_main, config = &BOOTLOADER_CONFIG);

    fn test_main(boot_info: &'static mut BootInfo) -> ! {
        tephra_kernel::bootstrap::early_init(boot_info);

        let tests: &[&dyn Testable] = &[
            &frame_alloc_roundtrip,
            &heap_allocations_work,
            &vfs_root_is_live,
            &task_table_has_idle,
        ];
        test_framework::test_runner(tests);
        tephra_kernel::arch::halt()
    }

    fn frame_alloc_roundtrip() {
        let frames = kctx::frames();
        let before = frames.free_count();
        assert!(before > 0);

        let f = frames.alloc_frame().expect("boot leaves frames free");
        assert_eq!(frames.free_count(), before - 1);
        frames.free_frame(f).expect("freshly allocated frame frees");
        assert_eq!(frames.free_count(), before);
    }

    fn heap_allocations_work() {
        use alloc::vec::Vec;

        let mut v: Vec<u64> = Vec::new();
        for i in 0..4096 {
            v.push(i);
        }
        assert_eq!(v.iter().sum::<u64>(), 4095 * 4096 / 2);
    }

    fn vfs_root_is_live() {
        use tephra_kernel::fs::NodeType;
        let vfs = kctx::vfs();
        let console = vfs.resolve("/dev/console").expect("console registered");
        assert_eq!(console.node_type(), NodeType::CharDevice);
        assert!(vfs.resolve("/tmp").is_ok());
        assert!(vfs.resolve("/nonexistent").is_err());
    }

    fn task_table_has_idle() {
        // The boot context adopted the idle slot.
        assert!(kctx::tasks().exists(tephra_kernel::sched::current_tid()));
        assert_eq!(kctx::tasks().count(), 1);
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        test_framework::test_panic_handler(info)
    }
}
