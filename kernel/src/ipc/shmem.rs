//! Shared memory regions
//!
//! A region is a set of frames plus the tasks that mapped it. Mapping
//! installs user PTEs (under a SharedRegion VMA, so the fault invariants
//! hold) and bumps the refcount; unmapping reverses both. The refcount
//! always equals the number of mapped tasks. Destruction is requested
//! by the owner but frees the frames only once the refcount reaches zero.

use alloc::vec::Vec;

use spin::Mutex;

use crate::{
    config::{MMAP_REGION_BASE, SHMEM_MAX_REGIONS},
    error::IpcError,
    mm::{
        vas::{AddressSpace, AddressSpaceRef, Vma, VmaFlags, VmaKind},
        FrameNumber, VirtualAddress, PAGE_SIZE,
    },
    sched::TaskId,
};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShmemFlags: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

impl ShmemFlags {
    fn vma_flags(&self) -> VmaFlags {
        let mut flags = VmaFlags::USER | VmaFlags::SHARED;
        if self.contains(ShmemFlags::READ) {
            flags |= VmaFlags::READ;
        }
        if self.contains(ShmemFlags::WRITE) {
            flags |= VmaFlags::WRITE;
        }
        if self.contains(ShmemFlags::EXEC) {
            flags |= VmaFlags::EXEC;
        }
        flags
    }
}

struct Region {
    id: u64,
    owner: TaskId,
    size: usize,
    flags: ShmemFlags,
    frames: Vec<FrameNumber>,
    /// (task, base va) per mapping; the refcount is this vector's length.
    mapped: Vec<(TaskId, u64)>,
    /// Owner asked for destruction; frames free when the last unmap
    /// drops the refcount to zero.
    destroy_pending: bool,
}

pub struct ShmemTable {
    regions: Mutex<Vec<Option<Region>>>,
}

impl ShmemTable {
    pub fn new() -> Self {
        let mut regions = Vec::with_capacity(SHMEM_MAX_REGIONS);
        regions.resize_with(SHMEM_MAX_REGIONS, || None);
        Self {
            regions: Mutex::new(regions),
        }
    }

    /// Allocate `ceil(size / 4096)` frames and record the region.
    pub fn create(&self, size: usize, owner: TaskId, flags: ShmemFlags) -> Result<u64, IpcError> {
        if size == 0 {
            return Err(IpcError::InvalidArgument);
        }
        let page_count = size.div_ceil(PAGE_SIZE);

        let mut regions = self.regions.lock();
        let index = regions
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, r)| r.is_none())
            .map(|(i, _)| i)
            .ok_or(IpcError::TableFull)?;

        let mut frames = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            match crate::kctx::frames().alloc_frame() {
                Ok(frame) => {
                    // Regions start zeroed; frames come from the
                    // allocator dirty.
                    // SAFETY: freshly allocated, not mapped anywhere yet.
                    unsafe { crate::mm::zero_frame(frame) };
                    frames.push(frame);
                }
                Err(_) => {
                    for f in frames {
                        crate::kctx::frames().free_frame(f).ok();
                    }
                    return Err(IpcError::OutOfMemory);
                }
            }
        }

        let id = index as u64;
        regions[index] = Some(Region {
            id,
            owner,
            size,
            flags,
            frames,
            mapped: Vec::new(),
            destroy_pending: false,
        });
        log::debug!("shmem region {} created ({} pages)", id, page_count);
        Ok(id)
    }

    /// Map the region into the caller's address space, returning the
    /// chosen user base. The region lock is taken before the space lock;
    /// every path through this table follows that order.
    pub fn map(&self, id: u64, task: TaskId, space_ref: &AddressSpaceRef) -> Result<u64, IpcError> {
        let mut regions = self.regions.lock();
        let mut space_guard = space_ref.lock();
        let space = &mut *space_guard;
        let region = regions
            .get_mut(id as usize)
            .and_then(|r| r.as_mut())
            .ok_or(IpcError::NoSuchRegion { id })?;
        if region.destroy_pending {
            return Err(IpcError::NoSuchRegion { id });
        }
        if region.mapped.iter().any(|(t, _)| *t == task) {
            return Err(IpcError::InvalidArgument);
        }

        let len = (region.frames.len() * PAGE_SIZE) as u64;
        let base = space
            .vmas
            .find_free_region(MMAP_REGION_BASE, len)
            .ok_or(IpcError::OutOfMemory)?;
        let vma_flags = region.flags.vma_flags();
        space
            .vmas
            .insert(Vma {
                start: base,
                end: base + len,
                flags: vma_flags,
                kind: VmaKind::SharedRegion { region: id },
            })
            .map_err(|_| IpcError::OutOfMemory)?;

        // Eager PTE installation: shared pages never demand-fault.
        let page_flags = vma_flags.page_flags();
        for (i, frame) in region.frames.iter().enumerate() {
            let va = VirtualAddress::new(base + (i * PAGE_SIZE) as u64);
            if space.mapper().map(va, *frame, page_flags).is_err() {
                for j in 0..i {
                    let undo = VirtualAddress::new(base + (j * PAGE_SIZE) as u64);
                    space.mapper().unmap(undo).ok();
                }
                space.vmas.remove(base);
                return Err(IpcError::OutOfMemory);
            }
        }

        region.mapped.push((task, base));
        Ok(base)
    }

    /// Fork support: register `child` for every shared-region VMA in its
    /// freshly cloned address space.
    ///
    /// The clone carried the parent's shared-region PTEs into the child,
    /// so the mapped set (and with it the refcount) must count the child
    /// too; otherwise the child could neither unmap nor hold the region
    /// alive. Regions pending destruction still accept the entry: the
    /// parent's mapping keeps them alive, and the child's unmap drops
    /// the reference like any other.
    pub fn inherit_mappings(&self, space: &AddressSpace, child: TaskId) {
        let mut regions = self.regions.lock();
        for vma in space.vmas.iter() {
            let VmaKind::SharedRegion { region } = &vma.kind else {
                continue;
            };
            let Some(Some(r)) = regions.get_mut(*region as usize) else {
                log::warn!("fork inherited a mapping of dead shmem region {}", region);
                continue;
            };
            if !r.mapped.iter().any(|(t, _)| *t == child) {
                r.mapped.push((child, vma.start));
            }
        }
    }

    /// Remove the region's PTEs and VMA from the caller's space and drop
    /// one reference.
    pub fn unmap(&self, id: u64, task: TaskId, space_ref: &AddressSpaceRef) -> Result<(), IpcError> {
        let mut regions = self.regions.lock();
        let mut space_guard = space_ref.lock();
        let space = &mut *space_guard;
        let region = regions
            .get_mut(id as usize)
            .and_then(|r| r.as_mut())
            .ok_or(IpcError::NoSuchRegion { id })?;

        let pos = region
            .mapped
            .iter()
            .position(|(t, _)| *t == task)
            .ok_or(IpcError::InvalidArgument)?;
        let (_, base) = region.mapped.swap_remove(pos);

        // unmap_region drops PTEs but leaves the frames to the region.
        space.unmap_region(base).ok();

        if region.mapped.is_empty() && region.destroy_pending {
            let region = regions[id as usize].take().expect("checked above");
            Self::free_region(region);
        }
        Ok(())
    }

    /// Owner requests destruction; frames free once the refcount reaches
    /// zero (possibly right now).
    pub fn destroy(&self, id: u64, caller: TaskId) -> Result<(), IpcError> {
        let mut regions = self.regions.lock();
        let region = regions
            .get_mut(id as usize)
            .and_then(|r| r.as_mut())
            .ok_or(IpcError::NoSuchRegion { id })?;
        if caller != 0 && region.owner != caller {
            return Err(IpcError::NotOwner);
        }
        region.destroy_pending = true;
        if region.mapped.is_empty() {
            let region = regions[id as usize].take().expect("checked above");
            Self::free_region(region);
        }
        Ok(())
    }

    /// Task teardown: drop the dead task's references. Its address space
    /// is destroyed separately; only the region bookkeeping needs fixing
    /// here.
    pub fn detach_task(&self, task: TaskId) {
        let mut regions = self.regions.lock();
        for slot in regions.iter_mut() {
            let free = match slot {
                Some(region) => {
                    region.mapped.retain(|(t, _)| *t != task);
                    region.mapped.is_empty() && region.destroy_pending
                }
                None => false,
            };
            if free {
                if let Some(region) = slot.take() {
                    Self::free_region(region);
                }
            }
        }
    }

    fn free_region(region: Region) {
        log::debug!("shmem region {} freed", region.id);
        for frame in region.frames {
            crate::kctx::frames().free_frame(frame).ok();
        }
    }

    /// Mapping count (the refcount invariant's observable side).
    pub fn refcount(&self, id: u64) -> Result<usize, IpcError> {
        let regions = self.regions.lock();
        regions
            .get(id as usize)
            .and_then(|r| r.as_ref())
            .map(|r| r.mapped.len())
            .ok_or(IpcError::NoSuchRegion { id })
    }

    pub fn region_size(&self, id: u64) -> Result<usize, IpcError> {
        let regions = self.regions.lock();
        regions
            .get(id as usize)
            .and_then(|r| r.as_ref())
            .map(|r| r.size)
            .ok_or(IpcError::NoSuchRegion { id })
    }
}

impl Default for ShmemTable {
    fn default() -> Self {
        Self::new()
    }
}
