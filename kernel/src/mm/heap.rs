//! Kernel heap
//!
//! Maps a fixed virtual window and hands it to the global
//! `linked_list_allocator`. Called once during bootstrap, after the frame
//! allocator is live and before anything allocates.

use super::{page_table::PageFlags, PageMapper, VirtualAddress, PAGE_SIZE};
use crate::{config, error::MapError};

/// Map the heap window into the kernel half of `mapper` and initialize
/// the global allocator over it.
pub fn init(mapper: &mut PageMapper) -> Result<(), MapError> {
    let pages = config::KERNEL_HEAP_SIZE / PAGE_SIZE;
    for i in 0..pages {
        let frame = crate::kctx::frames()
            .alloc_frame()
            .map_err(|_| MapError::OutOfMemory)?;
        let va = VirtualAddress::new(config::KERNEL_HEAP_START + (i * PAGE_SIZE) as u64);
        mapper.map(
            va,
            frame,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::NO_EXECUTE,
        )?;
    }

    #[cfg(target_os = "none")]
    // SAFETY: the window was fully mapped above and is used for nothing
    // else; init is called exactly once.
    unsafe {
        crate::ALLOCATOR.lock().init(
            config::KERNEL_HEAP_START as *mut u8,
            config::KERNEL_HEAP_SIZE,
        );
    }

    log::info!(
        "heap: {} KiB at {:#x}",
        config::KERNEL_HEAP_SIZE / 1024,
        config::KERNEL_HEAP_START
    );
    Ok(())
}
