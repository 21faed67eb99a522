//! Memory management
//!
//! Layered bottom-up: the physical frame allocator owns all RAM the
//! firmware did not claim, the page-table mapper edits 4-level hierarchies,
//! and [`vas`] builds per-process address spaces (VMA lists, demand paging,
//! copy-on-write) on top of both.

pub mod frame_allocator;
pub mod frame_refcount;
pub mod heap;
pub mod page_fault;
pub mod page_table;
pub mod user;
pub mod vas;

use core::sync::atomic::{AtomicU64, Ordering};

pub use frame_allocator::{FrameAllocator, FrameNumber};
pub use page_table::{PageFlags, PageMapper, PageTable};
pub use vas::{AddressSpace, Vma, VmaFlags, VmaKind};

/// Size of a physical frame and of a virtual page (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_frame(&self) -> FrameNumber {
        FrameNumber::new(self.0 / PAGE_SIZE as u64)
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }

    pub const fn align_down(&self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u64 - 1))
    }

    pub const fn align_up(&self) -> Self {
        Self((self.0 + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1))
    }

    /// True for addresses in the user canonical lower half.
    pub const fn is_user(&self) -> bool {
        self.0 < crate::config::USER_SPACE_END
    }
}

/// Offset of the higher-half direct map, recorded once from the boot
/// handoff. Zero until bootstrap stores it.
pub static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Translate a physical address into the HHDM window.
///
/// Every byte of physical memory is visible at `phys + offset`; page-table
/// walking, frame zeroing, and cross-address-space copies all go through
/// this window.
pub fn phys_to_virt(phys: PhysicalAddress) -> *mut u8 {
    let offset = PHYS_MEM_OFFSET.load(Ordering::Acquire);
    (phys.as_u64() + offset) as *mut u8
}

/// Zero one frame through the HHDM window.
///
/// # Safety
///
/// `frame` must be an allocated frame not concurrently accessed through
/// any other mapping.
pub unsafe fn zero_frame(frame: FrameNumber) {
    let dst = phys_to_virt(frame.as_addr());
    // SAFETY: the caller guarantees exclusive access; the HHDM window maps
    // the whole frame.
    unsafe { core::ptr::write_bytes(dst, 0, PAGE_SIZE) };
}

/// Copy one frame into another through the HHDM window.
///
/// # Safety
///
/// Both frames must be valid and `dst` not concurrently accessed.
pub unsafe fn copy_frame(dst: FrameNumber, src: FrameNumber) {
    let d = phys_to_virt(dst.as_addr());
    let s = phys_to_virt(src.as_addr());
    // SAFETY: distinct frames never overlap; both are fully covered by the
    // HHDM window.
    unsafe { core::ptr::copy_nonoverlapping(s, d, PAGE_SIZE) };
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        let a = VirtualAddress::new(0x1234);
        assert_eq!(a.align_down().as_u64(), 0x1000);
        assert_eq!(a.align_up().as_u64(), 0x2000);
        assert!(VirtualAddress::new(0x2000).is_page_aligned());
    }

    #[test]
    fn user_half_boundary() {
        assert!(VirtualAddress::new(0x7FFF_FFFF_F000).is_user());
        assert!(!VirtualAddress::new(0xFFFF_8000_0000_0000).is_user());
    }
}
