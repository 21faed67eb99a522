//! Kernel bootstrap
//!
//! Ordered bring-up from the boot handoff: serial and logging first,
//! then physical memory, the heap, the kernel context, CPU structures,
//! the VFS root, the init task, and finally the timer. The boot context
//! ends as the idle loop.

use bootloader_api::info::{MemoryRegionKind, Optional};
use bootloader_api::BootInfo;

use crate::{
    arch, config,
    fs::ramfs::{RamFile, RamFs},
    kctx::{self, Kernel},
    mm::{self, PhysicalAddress},
    process, sched,
};

/// The subset of bring-up the bare-metal test harness also needs:
/// everything up to a working scheduler, without init or the timer.
pub fn early_init(boot_info: &'static mut BootInfo) {
    crate::serial::init();

    let boot_config = config::BootConfig::parse(option_env!("TEPHRA_CMDLINE").unwrap_or(""));
    crate::logger::init(boot_config.loglevel);
    log::info!(
        "tephra {} ({}) booting",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    // Higher-half direct map offset, straight from the handoff.
    let phys_offset = match boot_info.physical_memory_offset {
        Optional::Some(offset) => offset,
        Optional::None => panic!("bootloader did not map physical memory"),
    };
    mm::PHYS_MEM_OFFSET.store(phys_offset, core::sync::atomic::Ordering::Release);

    // Hand every usable region to the frame allocator. Bootloader-owned
    // regions (boot page tables, kernel image, boot info) are not
    // usable, so they stay reserved.
    let mut usable = 0u64;
    for region in boot_info.memory_regions.iter() {
        if region.kind == MemoryRegionKind::Usable {
            kctx::frames().add_region(
                PhysicalAddress::new(region.start),
                PhysicalAddress::new(region.end),
            );
            usable += region.end - region.start;
        }
    }
    log::info!(
        "mm: {} MiB usable, {} frames",
        usable / (1024 * 1024),
        kctx::frames().free_count()
    );

    // The active L4 becomes the shared kernel root: every user space
    // copies its upper half from here.
    #[cfg(target_os = "none")]
    {
        let (frame, _) = x86_64::registers::control::Cr3::read();
        kctx::set_kernel_root(PhysicalAddress::new(frame.start_address().as_u64()));
    }

    // Kernel heap, then the heap-backed context tables.
    {
        // SAFETY: the kernel root was recorded from CR3 above and stays
        // exclusively ours during single-threaded bring-up.
        let mut mapper = unsafe { mm::PageMapper::from_root(kctx::kernel_root()) };
        mm::heap::init(&mut mapper).expect("kernel heap mapping cannot fail at boot");
    }
    kctx::init(Kernel::new(boot_config));

    // CPU structures: GDT/TSS, IDT, per-CPU block, syscall MSRs.
    arch::init();

    // Root filesystem and console device.
    let root = setup_vfs(boot_info);
    BOOT_ROOT.set(root).ok();

    // Scheduler: this context becomes the idle task of CPU 0.
    sched::init_cpu(0);
}

/// Concrete handle to the boot ramfs root, kept so bootstrap can link
/// preloaded nodes after early init.
static BOOT_ROOT: crate::sync::OnceLock<alloc::sync::Arc<RamFs>> = crate::sync::OnceLock::new();

/// Full bring-up, then idle forever.
pub fn run(boot_info: &'static mut BootInfo) -> ! {
    let ramdisk = match boot_info.ramdisk_addr {
        Optional::Some(addr) => {
            let len = boot_info.ramdisk_len as usize;
            // SAFETY: the bootloader mapped the ramdisk at this address
            // for the kernel's lifetime.
            Some(unsafe { core::slice::from_raw_parts(addr as *const u8, len) })
        }
        Optional::None => None,
    };

    early_init(boot_info);

    spawn_init(ramdisk);

    if kctx::kernel().boot_config.selftest {
        selftest();
    }

    // Timer last: ticks start only once the scheduler can take them.
    arch::timer::init();

    log::info!("bootstrap complete, entering idle loop");
    sched::idle_loop()
}

fn setup_vfs(boot_info: &BootInfo) -> alloc::sync::Arc<RamFs> {
    let vfs = kctx::vfs();
    let root = RamFs::new_root();
    vfs.mount_root(root.clone());

    // A /dev subtree with the serial console endpoint; external drivers
    // mount a richer device filesystem over it. /proc likewise belongs
    // to the external process-inspection module.
    let dev = RamFs::new_root();
    root.link("dev", dev.clone()).expect("fresh root accepts links");
    dev.link("console", crate::fs::console::Console::new())
        .expect("fresh dev accepts links");

    use crate::fs::VfsNode;
    root.mkdir("tmp").expect("fresh root accepts mkdir");

    if let Optional::Some(fb) = &boot_info.framebuffer {
        log::info!(
            "video: framebuffer {}x{} handed to external renderer",
            fb.info().width,
            fb.info().height
        );
    }
    root
}

/// Start init (task 1): the ramdisk ELF when one was supplied, otherwise
/// a kernel-thread reaper so orphans always have a parent.
fn spawn_init(ramdisk: Option<&[u8]>) {
    match ramdisk {
        Some(image) => {
            // Keep the image reachable at /init for later exec calls.
            if let Some(root) = BOOT_ROOT.get() {
                use alloc::vec::Vec;
                let mut data = Vec::with_capacity(image.len());
                data.extend_from_slice(image);
                root.link("init", RamFile::with_data(data)).ok();
            }
            match process::creation::create_user("init", image, 0, &["/init"], &[]) {
                Ok(id) => debug_assert_eq!(id, process::INIT_TID),
                Err(e) => panic!("cannot start init from ramdisk: {}", e),
            }
        }
        None => {
            let id = process::creation::create_kernel_task("init", init_reaper)
                .expect("task table cannot be full at boot");
            debug_assert_eq!(id, process::INIT_TID);
        }
    }
}

/// Kernel-thread init: adopt and reap orphans forever.
fn init_reaper() {
    loop {
        match process::exit::wait_for_child(None, false) {
            Ok((child, status)) => {
                log::debug!("init reaped task {}, status {:#x}", child, status);
            }
            Err(_) => {
                // No children yet; exits re-parent to us and wake us.
                let _ = sched::block_current();
            }
        }
    }
}

/// Boot-time self checks, enabled with `selftest` on the command line.
fn selftest() {
    let frames = kctx::frames();
    let before = frames.free_count();
    let frame = frames.alloc_frame().expect("selftest: allocation");
    frames.free_frame(frame).expect("selftest: free");
    assert_eq!(frames.free_count(), before);

    let ports = kctx::ports();
    let port = ports.create(0, 0).expect("selftest: port");
    ports.destroy(port, 0).expect("selftest: destroy");

    log::info!("selftest passed");
}
