//! Four-level page tables
//!
//! [`PageMapper`] edits one page-table hierarchy through the HHDM window:
//! mapping and unmapping 4 KiB pages, translating, and rewriting leaf
//! flags (the copy-on-write write-protect path). Intermediate tables are
//! allocated on demand from the frame allocator and freed by
//! [`PageMapper::free_user_tables`] when an address space dies.

use core::ops::{Index, IndexMut};

use bitflags::bitflags;

use super::{phys_to_virt, FrameNumber, PhysicalAddress, VirtualAddress};
use crate::error::MapError;

/// Number of entries in a page table.
pub const PAGE_TABLE_ENTRIES: usize = 512;

/// First L4 slot of the kernel (upper canonical) half.
pub const KERNEL_L4_START: usize = 256;

bitflags! {
    /// x86-64 page table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE      = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const HUGE          = 1 << 7;
        const GLOBAL        = 1 << 8;
        const NO_EXECUTE    = 1 << 63;
    }
}

/// Page table entry.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

impl PageTableEntry {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_present(&self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    pub fn frame(&self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(FrameNumber::new((self.0 & ADDR_MASK) >> 12))
        } else {
            None
        }
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0)
    }

    pub fn set(&mut self, frame: FrameNumber, flags: PageFlags) {
        self.0 = (frame.as_u64() << 12) | flags.bits();
    }

    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & ADDR_MASK) | flags.bits();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// A page table: 512 entries, page-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; PAGE_TABLE_ENTRIES],
}

impl PageTable {
    pub const fn new() -> Self {
        Self {
            entries: [PageTableEntry::empty(); PAGE_TABLE_ENTRIES],
        }
    }

    pub fn zero(&mut self) {
        for entry in &mut self.entries {
            entry.clear();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.entries.iter()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;

    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

/// The four table indices plus page offset encoded in a virtual address.
#[derive(Debug, Clone, Copy)]
pub struct AddressIndices {
    pub l4: usize,
    pub l3: usize,
    pub l2: usize,
    pub l1: usize,
}

impl AddressIndices {
    pub fn of(va: VirtualAddress) -> Self {
        let addr = va.as_u64();
        Self {
            l4: ((addr >> 39) & 0x1FF) as usize,
            l3: ((addr >> 30) & 0x1FF) as usize,
            l2: ((addr >> 21) & 0x1FF) as usize,
            l1: ((addr >> 12) & 0x1FF) as usize,
        }
    }
}

/// Editor for one page-table hierarchy.
///
/// Holds the root's physical address and reaches every table through the
/// HHDM window, so it can edit hierarchies other than the active one
/// (fork, exec, teardown).
pub struct PageMapper {
    l4_phys: PhysicalAddress,
}

impl PageMapper {
    /// Wrap an existing hierarchy rooted at `l4_phys`.
    ///
    /// # Safety
    ///
    /// `l4_phys` must be the physical address of a valid, zero-initialized
    /// or populated L4 table, and the caller must have exclusive mutation
    /// rights to the hierarchy while the mapper lives.
    pub unsafe fn from_root(l4_phys: PhysicalAddress) -> Self {
        Self { l4_phys }
    }

    /// Allocate and zero a fresh hierarchy root.
    pub fn new_root() -> Result<Self, MapError> {
        let frame = crate::kctx::frames()
            .alloc_frame()
            .map_err(|_| MapError::OutOfMemory)?;
        // SAFETY: freshly allocated frame, not yet visible anywhere else.
        unsafe { super::zero_frame(frame) };
        Ok(Self {
            l4_phys: frame.as_addr(),
        })
    }

    pub const fn root(&self) -> PhysicalAddress {
        self.l4_phys
    }

    fn table_at(&self, phys: PhysicalAddress) -> *mut PageTable {
        phys_to_virt(phys) as *mut PageTable
    }

    /// Walk to the L1 table covering `va`, optionally creating missing
    /// intermediate tables.
    fn walk(&self, va: VirtualAddress, create: bool) -> Result<*mut PageTable, MapError> {
        let idx = AddressIndices::of(va);
        let parent_flags = if va.is_user() {
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER
        } else {
            PageFlags::PRESENT | PageFlags::WRITABLE
        };

        let mut table = self.table_at(self.l4_phys);
        for level_index in [idx.l4, idx.l3, idx.l2] {
            // SAFETY: `table` points at a live page table reachable from a
            // root the mapper owns; the HHDM window keeps it mapped.
            let entry = unsafe { &mut (*table)[level_index] };
            if !entry.is_present() {
                if !create {
                    return Err(MapError::NotMapped);
                }
                let frame = crate::kctx::frames()
                    .alloc_frame()
                    .map_err(|_| MapError::OutOfMemory)?;
                // SAFETY: fresh frame, exclusive access.
                unsafe { super::zero_frame(frame) };
                entry.set(frame, parent_flags);
            } else if entry.flags().contains(PageFlags::HUGE) {
                // The core never creates huge pages; hitting one means the
                // address belongs to a firmware/boot mapping.
                return Err(MapError::InvalidAddress { addr: va.as_u64() });
            }
            let next = entry.frame().ok_or(MapError::NotMapped)?;
            table = self.table_at(next.as_addr());
        }
        Ok(table)
    }

    /// Map the page containing `va` to `frame` with `flags`.
    pub fn map(
        &mut self,
        va: VirtualAddress,
        frame: FrameNumber,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        if !va.is_page_aligned() {
            return Err(MapError::InvalidAddress { addr: va.as_u64() });
        }
        let l1 = self.walk(va, true)?;
        let idx = AddressIndices::of(va);
        // SAFETY: `walk` returned a live L1 table.
        let entry = unsafe { &mut (*l1)[idx.l1] };
        if entry.is_present() {
            return Err(MapError::AlreadyMapped);
        }
        entry.set(frame, flags | PageFlags::PRESENT);
        Ok(())
    }

    /// Unmap the page containing `va`, returning the frame it pointed to.
    /// The caller decides whether to free the frame (it may be shared).
    pub fn unmap(&mut self, va: VirtualAddress) -> Result<FrameNumber, MapError> {
        let l1 = self.walk(va, false)?;
        let idx = AddressIndices::of(va);
        // SAFETY: `walk` returned a live L1 table.
        let entry = unsafe { &mut (*l1)[idx.l1] };
        let frame = entry.frame().ok_or(MapError::NotMapped)?;
        entry.clear();
        flush_tlb(va);
        Ok(frame)
    }

    /// Translate `va` to its backing frame and leaf flags.
    pub fn translate(&self, va: VirtualAddress) -> Option<(FrameNumber, PageFlags)> {
        let l1 = self.walk(va, false).ok()?;
        let idx = AddressIndices::of(va);
        // SAFETY: `walk` returned a live L1 table.
        let entry = unsafe { &(*l1)[idx.l1] };
        entry.frame().map(|f| (f, entry.flags()))
    }

    /// Rewrite the leaf flags for a present page (COW write-protect and
    /// re-arm paths).
    pub fn set_flags(&mut self, va: VirtualAddress, flags: PageFlags) -> Result<(), MapError> {
        let l1 = self.walk(va, false)?;
        let idx = AddressIndices::of(va);
        // SAFETY: `walk` returned a live L1 table.
        let entry = unsafe { &mut (*l1)[idx.l1] };
        if !entry.is_present() {
            return Err(MapError::NotMapped);
        }
        entry.set_flags(flags | PageFlags::PRESENT);
        flush_tlb(va);
        Ok(())
    }

    /// Visit every present user (lower-half) leaf PTE.
    pub fn for_each_user_page<F: FnMut(VirtualAddress, &mut PageTableEntry)>(&mut self, mut f: F) {
        // SAFETY: root table is live for the mapper's lifetime.
        let l4 = unsafe { &mut *self.table_at(self.l4_phys) };
        for i4 in 0..KERNEL_L4_START {
            let Some(l3_frame) = l4[i4].frame() else {
                continue;
            };
            // SAFETY: present entries written by this mapper always point
            // at table frames reachable through the HHDM window.
            let l3 = unsafe { &mut *self.table_at(l3_frame.as_addr()) };
            for i3 in 0..PAGE_TABLE_ENTRIES {
                let Some(l2_frame) = l3[i3].frame() else {
                    continue;
                };
                let l2 = unsafe { &mut *self.table_at(l2_frame.as_addr()) };
                for i2 in 0..PAGE_TABLE_ENTRIES {
                    let Some(l1_frame) = l2[i2].frame() else {
                        continue;
                    };
                    let l1 = unsafe { &mut *self.table_at(l1_frame.as_addr()) };
                    for i1 in 0..PAGE_TABLE_ENTRIES {
                        if l1[i1].is_present() {
                            let va = VirtualAddress::new(
                                ((i4 as u64) << 39)
                                    | ((i3 as u64) << 30)
                                    | ((i2 as u64) << 21)
                                    | ((i1 as u64) << 12),
                            );
                            f(va, &mut l1[i1]);
                        }
                    }
                }
            }
        }
    }

    /// Copy the kernel-half L4 entries from `src`. Every address space
    /// shares these; they are never freed per-space.
    pub fn copy_kernel_half(&mut self, src: &PageMapper) {
        // SAFETY: both roots are live tables owned by their mappers.
        let dst_l4 = unsafe { &mut *self.table_at(self.l4_phys) };
        let src_l4 = unsafe { &*src.table_at(src.l4_phys) };
        for i in KERNEL_L4_START..PAGE_TABLE_ENTRIES {
            dst_l4[i] = src_l4[i];
        }
    }

    /// Free all user-half intermediate table frames plus the root itself.
    ///
    /// Leaf frames must already have been released by the caller (the VMA
    /// teardown walks them first); only the L1/L2/L3 table frames and the
    /// L4 root are returned to the allocator here. Kernel-half entries are
    /// shared and left untouched.
    pub fn free_user_tables(self) {
        let frames = crate::kctx::frames();
        // SAFETY: root table is live until the frames are freed below.
        let l4 = unsafe { &*self.table_at(self.l4_phys) };
        for i4 in 0..KERNEL_L4_START {
            let Some(l3_frame) = l4[i4].frame() else {
                continue;
            };
            let l3 = unsafe { &*self.table_at(l3_frame.as_addr()) };
            for i3 in 0..PAGE_TABLE_ENTRIES {
                let Some(l2_frame) = l3[i3].frame() else {
                    continue;
                };
                let l2 = unsafe { &*self.table_at(l2_frame.as_addr()) };
                for i2 in 0..PAGE_TABLE_ENTRIES {
                    if let Some(l1_frame) = l2[i2].frame() {
                        frames.free_frame(l1_frame).ok();
                    }
                }
                frames.free_frame(l2_frame).ok();
            }
            frames.free_frame(l3_frame).ok();
        }
        frames.free_frame(self.l4_phys.as_frame()).ok();
    }
}

/// Invalidate one TLB entry on the executing CPU.
fn flush_tlb(va: VirtualAddress) {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    x86_64::instructions::tlb::flush(x86_64::VirtAddr::new(va.as_u64()));
    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    let _ = va;
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrips_frame_and_flags() {
        let mut e = PageTableEntry::empty();
        e.set(
            FrameNumber::new(0x1234),
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
        );
        assert!(e.is_present());
        assert_eq!(e.frame().map(|f| f.as_u64()), Some(0x1234));
        assert!(e.flags().contains(PageFlags::WRITABLE));

        e.set_flags(PageFlags::PRESENT | PageFlags::USER);
        assert!(!e.flags().contains(PageFlags::WRITABLE));
        assert_eq!(e.frame().map(|f| f.as_u64()), Some(0x1234));
    }

    #[test]
    fn address_indices_decompose_canonically() {
        let idx = AddressIndices::of(VirtualAddress::new(0x0000_7FFF_FFFF_F000));
        assert_eq!(idx.l4, 255);
        assert_eq!(idx.l3, 511);
        assert_eq!(idx.l2, 511);
        assert_eq!(idx.l1, 511);

        let idx = AddressIndices::of(VirtualAddress::new(0x40_0000));
        assert_eq!((idx.l4, idx.l3, idx.l2, idx.l1), (0, 0, 2, 0));
    }
}
