//! Memory syscalls: mmap, munmap, brk

use super::SyscallResult;
use crate::{
    config,
    error::{FsError, KernelError, MapError},
    fs::{fd::FdObject, NodeType},
    mm::{
        vas::{Vma, VmaFlags, VmaKind},
        PAGE_SIZE,
    },
    process::with_current_space,
    sched,
};

const PROT_READ: u64 = 1;
const PROT_WRITE: u64 = 2;
const PROT_EXEC: u64 = 4;

const MAP_PRIVATE: u64 = 0x02;
const MAP_FIXED: u64 = 0x10;
const MAP_ANONYMOUS: u64 = 0x20;

fn prot_to_vma_flags(prot: u64) -> VmaFlags {
    let mut flags = VmaFlags::USER;
    if prot & PROT_READ != 0 {
        flags |= VmaFlags::READ;
    }
    if prot & PROT_WRITE != 0 {
        flags |= VmaFlags::WRITE;
    }
    if prot & PROT_EXEC != 0 {
        flags |= VmaFlags::EXEC;
    }
    flags
}

/// Insert a VMA; pages materialize lazily in the fault handler.
pub fn sys_mmap(addr: u64, len: u64, prot: u64, flags: u64, fd: u64, offset: u64) -> SyscallResult {
    if len == 0 || offset % PAGE_SIZE as u64 != 0 {
        return Err(KernelError::InvalidArgument);
    }
    if flags & MAP_PRIVATE == 0 {
        // Shared file mappings need write-back machinery this kernel
        // does not carry; shared anonymous memory is the shmem family.
        return Err(KernelError::InvalidArgument);
    }
    let len = (len + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
    let vma_flags = prot_to_vma_flags(prot);

    let kind = if flags & MAP_ANONYMOUS != 0 {
        VmaKind::Anonymous
    } else {
        let task = sched::current_task();
        let fds = task.fds.lock();
        let entry = fds.get(fd as usize).map_err(KernelError::Fs)?;
        match &entry.object {
            FdObject::File(node) if node.node_type() == NodeType::File => VmaKind::FileBacked {
                node: node.clone(),
                offset,
            },
            _ => return Err(KernelError::Fs(FsError::BadDescriptor)),
        }
    };

    with_current_space(|space| {
        let base = if addr != 0 && addr % PAGE_SIZE as u64 == 0 {
            // Honor the hint when the range is free; MAP_FIXED insists.
            let hinted_free = (addr..addr + len)
                .step_by(PAGE_SIZE)
                .all(|page| space.vmas.find(page).is_none());
            if hinted_free && addr >= config::USER_SPACE_BASE {
                addr
            } else if flags & MAP_FIXED != 0 {
                return Err(KernelError::Map(MapError::NoRegion));
            } else {
                space
                    .vmas
                    .find_free_region(config::MMAP_REGION_BASE, len)
                    .ok_or(KernelError::Map(MapError::OutOfMemory))?
            }
        } else if flags & MAP_FIXED != 0 {
            return Err(KernelError::InvalidArgument);
        } else {
            space
                .vmas
                .find_free_region(config::MMAP_REGION_BASE, len)
                .ok_or(KernelError::Map(MapError::OutOfMemory))?
        };

        space
            .vmas
            .insert(Vma {
                start: base,
                end: base + len,
                flags: vma_flags,
                kind,
            })
            .map_err(KernelError::Map)?;
        Ok(base as isize)
    })
    .ok_or(KernelError::InvalidArgument)?
}

/// Remove the VMA starting at `addr`, unmapping its present pages.
/// Partial unmaps of a region are not supported: `len` must cover it.
pub fn sys_munmap(addr: u64, len: u64) -> SyscallResult {
    if addr % PAGE_SIZE as u64 != 0 || len == 0 {
        return Err(KernelError::InvalidArgument);
    }
    with_current_space(|space| {
        let vma_len = match space.vmas.find(addr) {
            Some(vma) if vma.start == addr => vma.len(),
            Some(_) | None => return Err(KernelError::Map(MapError::NoRegion)),
        };
        if len < vma_len {
            return Err(KernelError::InvalidArgument);
        }
        space.unmap_region(addr).map_err(KernelError::Map)?;
        Ok(0)
    })
    .ok_or(KernelError::InvalidArgument)?
}

/// Resize the heap VMA. `brk(0)` reports the current break.
pub fn sys_brk(new_brk: u64) -> SyscallResult {
    with_current_space(|space| {
        if space.brk_start == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if new_brk == 0 {
            return Ok(space.brk_end as isize);
        }
        let new_end = (new_brk + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        if new_end < space.brk_start || new_end > space.brk_start + (1 << 32) {
            return Err(KernelError::InvalidArgument);
        }

        let old_end = space.brk_end;
        if new_end == old_end {
            return Ok(space.brk_end as isize);
        }

        if old_end == space.brk_start {
            // First growth: the heap VMA does not exist yet.
            space
                .map_anonymous(
                    space.brk_start,
                    new_end - space.brk_start,
                    VmaFlags::READ | VmaFlags::WRITE,
                )
                .map_err(KernelError::Map)?;
        } else {
            // Resize the record; existing pages must survive a grow.
            let mut vma = space
                .vmas
                .remove(space.brk_start)
                .ok_or(KernelError::Map(MapError::NoRegion))?;
            if new_end < old_end {
                space.release_page_range(new_end, old_end);
            }
            if new_end > space.brk_start {
                vma.end = new_end;
                space.vmas.insert(vma).map_err(KernelError::Map)?;
            }
        }
        space.brk_end = new_end;
        Ok(new_end as isize)
    })
    .ok_or(KernelError::InvalidArgument)?
}
