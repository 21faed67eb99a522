//! Per-process virtual address spaces
//!
//! An [`AddressSpace`] is a page-table root plus a sorted list of VMAs.
//! Pages inside a VMA materialize lazily in the page-fault handler; the
//! list is the single source of truth for what a user address may do.
//!
//! Invariants:
//! - kernel-half L4 entries are shared across all spaces and never freed
//!   by per-space teardown;
//! - every present user PTE lies inside exactly one VMA whose permissions
//!   cover the PTE's;
//! - the VMA list is sorted by start address with no overlaps and no
//!   zero-length intervals.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use super::{
    page_table::{PageFlags, PageMapper},
    FrameNumber, PhysicalAddress, VirtualAddress, PAGE_SIZE,
};
use crate::{config, error::MapError, fs::VfsNodeRef};

bitflags! {
    /// VMA permission and sharing flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmaFlags: u32 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        const EXEC   = 1 << 2;
        const USER   = 1 << 3;
        const SHARED = 1 << 4;
    }
}

impl VmaFlags {
    /// Leaf PTE flags realizing these permissions.
    pub fn page_flags(&self) -> PageFlags {
        let mut flags = PageFlags::PRESENT;
        if self.contains(VmaFlags::WRITE) {
            flags |= PageFlags::WRITABLE;
        }
        if self.contains(VmaFlags::USER) {
            flags |= PageFlags::USER;
        }
        if !self.contains(VmaFlags::EXEC) {
            flags |= PageFlags::NO_EXECUTE;
        }
        flags
    }
}

/// What backs a VMA's pages.
#[derive(Clone)]
pub enum VmaKind {
    /// Zero-filled on first touch; private writes go through COW.
    Anonymous,
    /// Pages read from `node` at `offset + (page - start)` on first touch.
    FileBacked { node: VfsNodeRef, offset: u64 },
    /// Pages belong to a shared-memory region; the region table owns the
    /// frames, teardown here only drops PTEs.
    SharedRegion { region: u64 },
}

impl core::fmt::Debug for VmaKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::FileBacked { offset, .. } => write!(f, "FileBacked(off={:#x})", offset),
            Self::SharedRegion { region } => write!(f, "SharedRegion({})", region),
        }
    }
}

/// One contiguous range of user virtual addresses with uniform
/// permissions and backing kind. Half-open `[start, end)`, page-aligned.
#[derive(Debug, Clone)]
pub struct Vma {
    pub start: u64,
    pub end: u64,
    pub flags: VmaFlags,
    pub kind: VmaKind,
}

impl Vma {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }
}

/// Sorted, non-overlapping set of VMAs.
#[derive(Debug, Default)]
pub struct VmaSet {
    list: Vec<Vma>,
}

impl VmaSet {
    pub const fn new() -> Self {
        Self { list: Vec::new() }
    }

    /// Insert a VMA, rejecting zero-length or overlapping intervals.
    pub fn insert(&mut self, vma: Vma) -> Result<(), MapError> {
        if vma.start >= vma.end
            || vma.start % PAGE_SIZE as u64 != 0
            || vma.end % PAGE_SIZE as u64 != 0
        {
            return Err(MapError::InvalidAddress { addr: vma.start });
        }
        let pos = self.list.partition_point(|v| v.start < vma.start);
        if pos > 0 && self.list[pos - 1].end > vma.start {
            return Err(MapError::NoRegion);
        }
        if pos < self.list.len() && self.list[pos].start < vma.end {
            return Err(MapError::NoRegion);
        }
        self.list.insert(pos, vma);
        Ok(())
    }

    /// The VMA containing `addr`, if any.
    pub fn find(&self, addr: u64) -> Option<&Vma> {
        let pos = self.list.partition_point(|v| v.start <= addr);
        pos.checked_sub(1)
            .map(|i| &self.list[i])
            .filter(|v| v.contains(addr))
    }

    pub fn find_mut(&mut self, addr: u64) -> Option<&mut Vma> {
        let pos = self.list.partition_point(|v| v.start <= addr);
        pos.checked_sub(1)
            .map(move |i| &mut self.list[i])
            .filter(|v| v.contains(addr))
    }

    /// Remove the VMA that starts exactly at `start`, returning it.
    pub fn remove(&mut self, start: u64) -> Option<Vma> {
        let pos = self.list.iter().position(|v| v.start == start)?;
        Some(self.list.remove(pos))
    }

    /// Lowest gap of at least `len` bytes at or above `hint`.
    pub fn find_free_region(&self, hint: u64, len: u64) -> Option<u64> {
        let len = (len + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        let mut candidate = hint;
        for vma in &self.list {
            if vma.end <= candidate {
                continue;
            }
            if vma.start >= candidate + len {
                break;
            }
            candidate = vma.end;
        }
        if candidate + len <= config::USER_STACK_TOP - config::USER_STACK_SIZE as u64 {
            Some(candidate)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vma> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

static SPACE_IDS: AtomicU64 = AtomicU64::new(1);

/// A user address space: one page-table hierarchy plus its VMA list and
/// heap bounds.
pub struct AddressSpace {
    /// Stable identity, used as the futex key namespace.
    pub id: u64,
    mapper: PageMapper,
    pub vmas: VmaSet,
    /// Program break window for `brk`.
    pub brk_start: u64,
    pub brk_end: u64,
}

pub type AddressSpaceRef = Arc<spin::Mutex<AddressSpace>>;

impl AddressSpace {
    /// Create an empty user space sharing the kernel half.
    pub fn new_user() -> Result<Self, MapError> {
        let mut mapper = PageMapper::new_root()?;
        // SAFETY: the kernel root recorded at bootstrap is a live L4 table.
        let kernel = unsafe { PageMapper::from_root(crate::kctx::kernel_root()) };
        mapper.copy_kernel_half(&kernel);
        Ok(Self {
            id: SPACE_IDS.fetch_add(1, Ordering::Relaxed),
            mapper,
            vmas: VmaSet::new(),
            brk_start: 0,
            brk_end: 0,
        })
    }

    pub const fn root(&self) -> PhysicalAddress {
        self.mapper.root()
    }

    pub fn mapper(&mut self) -> &mut PageMapper {
        &mut self.mapper
    }

    pub fn translate(&self, va: VirtualAddress) -> Option<(FrameNumber, PageFlags)> {
        self.mapper.translate(va)
    }

    /// Load this space's root into CR3.
    pub fn switch_to(&self) {
        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        {
            use x86_64::{
                registers::control::{Cr3, Cr3Flags},
                structures::paging::PhysFrame,
                PhysAddr,
            };
            let frame = PhysFrame::containing_address(PhysAddr::new(self.root().as_u64()));
            if Cr3::read().0 != frame {
                // SAFETY: the root is a valid L4 hierarchy with the shared
                // kernel half, so the executing kernel stays mapped.
                unsafe { Cr3::write(frame, Cr3Flags::empty()) };
            }
        }
    }

    /// Insert an anonymous VMA covering `[start, start+len)`.
    pub fn map_anonymous(&mut self, start: u64, len: u64, flags: VmaFlags) -> Result<(), MapError> {
        self.vmas.insert(Vma {
            start,
            end: start + len,
            flags: flags | VmaFlags::USER,
            kind: VmaKind::Anonymous,
        })
    }

    /// Remove the VMA starting at `start`, unmapping and releasing every
    /// present page it covered.
    pub fn unmap_region(&mut self, start: u64) -> Result<(), MapError> {
        let vma = self.vmas.remove(start).ok_or(MapError::NoRegion)?;
        self.release_vma_pages(&vma);
        Ok(())
    }

    /// Unmap present pages of `vma` and release their frames (respecting
    /// COW sharing; shared-region frames are owned by the region table).
    fn release_vma_pages(&mut self, vma: &Vma) {
        let refcounts = crate::kctx::frame_refcounts();
        let frames = crate::kctx::frames();
        let owns_frames = !matches!(vma.kind, VmaKind::SharedRegion { .. });
        let mut va = vma.start;
        while va < vma.end {
            if let Ok(frame) = self.mapper.unmap(VirtualAddress::new(va)) {
                if owns_frames && refcounts.release(frame) {
                    frames.free_frame(frame).ok();
                }
            }
            va += PAGE_SIZE as u64;
        }
    }

    /// Unmap and release present pages in `[start, end)` without touching
    /// VMA records (brk shrink).
    pub fn release_page_range(&mut self, start: u64, end: u64) {
        let refcounts = crate::kctx::frame_refcounts();
        let frames = crate::kctx::frames();
        let mut va = start;
        while va < end {
            if let Ok(frame) = self.mapper.unmap(VirtualAddress::new(va)) {
                if refcounts.release(frame) {
                    frames.free_frame(frame).ok();
                }
            }
            va += PAGE_SIZE as u64;
        }
    }

    /// Duplicate this space for fork.
    ///
    /// The VMA list is copied; every present user PTE in both spaces is
    /// downgraded to read-only and its frame's refcount bumped, realizing
    /// copy-on-write without touching page contents. Shared-region pages
    /// keep their flags (both sides genuinely share them).
    pub fn clone_cow(&mut self) -> Result<AddressSpace, MapError> {
        let mut child = AddressSpace::new_user()?;
        for vma in self.vmas.iter() {
            // Inserting a sorted list into an empty set cannot overlap.
            child.vmas.insert(vma.clone())?;
        }
        child.brk_start = self.brk_start;
        child.brk_end = self.brk_end;

        let refcounts = crate::kctx::frame_refcounts();
        // Collect first: the child mapper allocates intermediate tables,
        // and we must not hold `for_each_user_page`'s borrow across that.
        let mut present: Vec<(u64, FrameNumber, PageFlags)> = Vec::new();
        self.mapper.for_each_user_page(|va, entry| {
            if let Some(frame) = entry.frame() {
                present.push((va.as_u64(), frame, entry.flags()));
            }
        });

        for (va, frame, flags) in present {
            let vma = self.vmas.find(va);
            let shared_region = matches!(
                vma.map(|v| &v.kind),
                Some(VmaKind::SharedRegion { .. })
            );
            if shared_region {
                // Region frames are owned by the shmem table, not the COW
                // refcounts: teardown skips them and region destruction
                // frees them. The child just maps them too; the region's
                // mapped set is updated by the fork path.
                child.mapper.map(VirtualAddress::new(va), frame, flags)?;
                continue;
            }
            let downgraded = flags & !PageFlags::WRITABLE;
            self.mapper.set_flags(VirtualAddress::new(va), downgraded)?;
            refcounts.share(frame);
            child
                .mapper
                .map(VirtualAddress::new(va), frame, downgraded)?;
        }
        Ok(child)
    }

    /// Tear the space down: release every VMA's pages, then free the
    /// user-half page-table frames and the root. Kernel-half entries are
    /// shared and survive.
    pub fn destroy(mut self) {
        let vmas: Vec<Vma> = self.vmas.iter().cloned().collect();
        for vma in &vmas {
            self.release_vma_pages(vma);
        }
        self.mapper.free_user_tables();
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn anon(start: u64, end: u64) -> Vma {
        Vma {
            start,
            end,
            flags: VmaFlags::READ | VmaFlags::WRITE | VmaFlags::USER,
            kind: VmaKind::Anonymous,
        }
    }

    #[test]
    fn insert_keeps_list_sorted() {
        let mut set = VmaSet::new();
        set.insert(anon(0x3000, 0x4000)).expect("insert ok");
        set.insert(anon(0x1000, 0x2000)).expect("insert ok");
        set.insert(anon(0x5000, 0x9000)).expect("insert ok");
        let starts: Vec<u64> = set.iter().map(|v| v.start).collect();
        assert_eq!(starts, [0x1000, 0x3000, 0x5000]);
    }

    #[test]
    fn overlapping_insert_is_rejected() {
        let mut set = VmaSet::new();
        set.insert(anon(0x1000, 0x3000)).expect("insert ok");
        assert!(set.insert(anon(0x2000, 0x4000)).is_err());
        assert!(set.insert(anon(0x0000, 0x2000)).is_err());
        // Exactly adjacent is fine.
        set.insert(anon(0x3000, 0x4000)).expect("adjacent insert ok");
    }

    #[test]
    fn zero_length_and_unaligned_are_rejected() {
        let mut set = VmaSet::new();
        assert!(set.insert(anon(0x1000, 0x1000)).is_err());
        assert!(set.insert(anon(0x1234, 0x2000)).is_err());
    }

    #[test]
    fn find_locates_containing_vma() {
        let mut set = VmaSet::new();
        set.insert(anon(0x1000, 0x3000)).expect("insert ok");
        set.insert(anon(0x5000, 0x6000)).expect("insert ok");

        assert_eq!(set.find(0x1000).map(|v| v.start), Some(0x1000));
        assert_eq!(set.find(0x2FFF).map(|v| v.start), Some(0x1000));
        assert!(set.find(0x3000).is_none());
        assert!(set.find(0x4000).is_none());
        assert_eq!(set.find(0x5FFF).map(|v| v.start), Some(0x5000));
    }

    #[test]
    fn find_free_region_skips_existing_mappings() {
        let mut set = VmaSet::new();
        let base = config::MMAP_REGION_BASE;
        set.insert(anon(base, base + 0x2000)).expect("insert ok");
        set.insert(anon(base + 0x3000, base + 0x4000)).expect("insert ok");

        // First fit after the occupied ranges; the 0x1000 hole fits a
        // one-page request.
        assert_eq!(set.find_free_region(base, 0x1000), Some(base + 0x2000));
        // A two-page request does not fit the hole and lands after.
        assert_eq!(set.find_free_region(base, 0x2000), Some(base + 0x4000));
    }

    #[test]
    fn remove_by_exact_start() {
        let mut set = VmaSet::new();
        set.insert(anon(0x1000, 0x2000)).expect("insert ok");
        assert!(set.remove(0x1800).is_none());
        assert!(set.remove(0x1000).is_some());
        assert!(set.is_empty());
    }

    #[test]
    fn vma_flags_translate_to_page_flags() {
        let f = (VmaFlags::READ | VmaFlags::WRITE | VmaFlags::USER).page_flags();
        assert!(f.contains(PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER));
        assert!(f.contains(PageFlags::NO_EXECUTE));

        let x = (VmaFlags::READ | VmaFlags::EXEC | VmaFlags::USER).page_flags();
        assert!(!x.contains(PageFlags::NO_EXECUTE));
        assert!(!x.contains(PageFlags::WRITABLE));
    }
}
