//! Page-fault resolution
//!
//! Implements the demand-paging and copy-on-write policy for user faults.
//! Kernel-mode faults never reach this module; the IDT handler panics on
//! them directly.

use super::{
    page_table::PageFlags,
    vas::{AddressSpace, VmaKind},
    VirtualAddress, PAGE_SIZE,
};
use crate::error::{FsError, MapError};

/// Why a user fault could not be resolved. The caller turns this into a
/// fatal signal for the faulting task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalFault {
    /// No VMA covers the address.
    NoRegion,
    /// The access violates the covering VMA's permissions.
    AccessViolation,
    /// A frame could not be allocated or a file page could not be read.
    ResourceFailure,
}

/// Resolve a user fault at `addr`.
///
/// Policy:
/// 1. no covering VMA, or a write into a read-only VMA → fatal;
/// 2. PTE absent → allocate a frame, zero it (anonymous) or fill from the
///    backing file, install with the VMA's permissions;
/// 3. PTE present but read-only while the VMA permits writes → COW: copy
///    when the frame is still shared, re-arm writable in place once this
///    space is the sole owner.
pub fn resolve(space: &mut AddressSpace, addr: u64, is_write: bool) -> Result<(), FatalFault> {
    let page = VirtualAddress::new(addr).align_down();

    let (vma_flags, vma_kind, vma_start) = match space.vmas.find(addr) {
        Some(vma) => (vma.flags, vma.kind.clone(), vma.start),
        None => return Err(FatalFault::NoRegion),
    };

    if is_write && !vma_flags.contains(super::VmaFlags::WRITE) {
        return Err(FatalFault::AccessViolation);
    }

    match space.translate(page) {
        None => {
            // Demand paging: first touch of this page.
            let frame = crate::kctx::frames()
                .alloc_frame()
                .map_err(|_| FatalFault::ResourceFailure)?;
            match &vma_kind {
                VmaKind::Anonymous => {
                    // SAFETY: fresh frame, not yet mapped anywhere.
                    unsafe { super::zero_frame(frame) };
                }
                VmaKind::FileBacked { node, offset } => {
                    let file_off = offset + (page.as_u64() - vma_start);
                    // SAFETY: fresh frame; the HHDM window covers it.
                    let buf = unsafe {
                        core::slice::from_raw_parts_mut(
                            super::phys_to_virt(frame.as_addr()),
                            PAGE_SIZE,
                        )
                    };
                    buf.fill(0);
                    match node.read(file_off, buf) {
                        Ok(_) | Err(FsError::NotFound) => {}
                        Err(_) => {
                            crate::kctx::frames().free_frame(frame).ok();
                            return Err(FatalFault::ResourceFailure);
                        }
                    }
                }
                VmaKind::SharedRegion { .. } => {
                    // Shared-region pages are installed eagerly by
                    // shmem_map; a fault here means the mapping was torn
                    // down under us.
                    crate::kctx::frames().free_frame(frame).ok();
                    return Err(FatalFault::NoRegion);
                }
            }
            space
                .mapper()
                .map(page, frame, vma_flags.page_flags())
                .map_err(|e| match e {
                    MapError::OutOfMemory => FatalFault::ResourceFailure,
                    _ => FatalFault::AccessViolation,
                })?;
            Ok(())
        }
        Some((frame, pte_flags)) => {
            if is_write && !pte_flags.contains(PageFlags::WRITABLE) {
                resolve_cow(space, page, frame, vma_flags)
            } else {
                // Spurious fault (stale TLB after a concurrent resolve on
                // another CPU). Nothing to do.
                Ok(())
            }
        }
    }
}

/// Copy-on-write write fault on a present, read-only page.
fn resolve_cow(
    space: &mut AddressSpace,
    page: VirtualAddress,
    old_frame: super::FrameNumber,
    vma_flags: super::VmaFlags,
) -> Result<(), FatalFault> {
    let refcounts = crate::kctx::frame_refcounts();
    let frames = crate::kctx::frames();
    let writable = vma_flags.page_flags();

    if !refcounts.is_shared(old_frame) {
        // Sole owner again (the other side already copied): re-arm
        // writable in place without copying.
        space
            .mapper()
            .set_flags(page, writable)
            .map_err(|_| FatalFault::ResourceFailure)?;
        return Ok(());
    }

    let new_frame = frames
        .alloc_frame()
        .map_err(|_| FatalFault::ResourceFailure)?;
    // SAFETY: new_frame is fresh and old_frame stays mapped read-only for
    // the duration of the copy.
    unsafe { super::copy_frame(new_frame, old_frame) };

    space
        .mapper()
        .unmap(page)
        .map_err(|_| FatalFault::ResourceFailure)?;
    if refcounts.release(old_frame) {
        // The racing peer finished its own copy first.
        frames.free_frame(old_frame).ok();
    }
    space
        .mapper()
        .map(page, new_frame, writable)
        .map_err(|_| FatalFault::ResourceFailure)?;
    Ok(())
}
