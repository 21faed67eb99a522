//! User-pointer validation and copying
//!
//! Every user pointer crossing the syscall boundary is checked here: the
//! range must lie entirely in the canonical lower half and be covered by
//! VMAs with the required permission. Pages a valid range touches are
//! faulted in up front, so the raw copies below cannot fault.
//!
//! Copies run with the caller's address space active (syscalls execute on
//! the task that made them), so user memory is directly addressable.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use super::{page_fault, vas::AddressSpace, VirtualAddress, PAGE_SIZE};
use crate::{
    config,
    error::{KernelError, KernelResult},
};

/// Cheap structural check: `[addr, addr+len)` fits the user lower half.
pub fn range_in_user_half(addr: u64, len: usize) -> bool {
    if len == 0 {
        return addr < config::USER_SPACE_END;
    }
    let end = match addr.checked_add(len as u64) {
        Some(e) => e,
        None => return false,
    };
    end <= config::USER_SPACE_END
}

/// Validate `[addr, addr+len)` for reading (`write = false`) or writing
/// (`write = true`), faulting pages in as needed.
pub fn ensure_user_range(
    space: &mut AddressSpace,
    addr: u64,
    len: usize,
    write: bool,
) -> KernelResult<()> {
    if !range_in_user_half(addr, len) {
        return Err(KernelError::BadAddress { addr });
    }
    if len == 0 {
        return Ok(());
    }
    let mut page = VirtualAddress::new(addr).align_down().as_u64();
    let end = addr + len as u64;
    while page < end {
        page_fault::resolve(space, page, write)
            .map_err(|_| KernelError::BadAddress { addr: page })?;
        page += PAGE_SIZE as u64;
    }
    Ok(())
}

/// Copy `len` bytes from user `addr` into a kernel buffer.
pub fn copy_from_user(space: &mut AddressSpace, addr: u64, len: usize) -> KernelResult<Vec<u8>> {
    ensure_user_range(space, addr, len, false)?;
    let mut buf = vec![0u8; len];
    if len > 0 {
        // SAFETY: the range was validated and faulted in above, lies in
        // the active address space, and the kernel buffer is distinct.
        unsafe {
            core::ptr::copy_nonoverlapping(addr as *const u8, buf.as_mut_ptr(), len);
        }
    }
    Ok(buf)
}

/// Copy a kernel buffer out to user `addr`.
pub fn copy_to_user(space: &mut AddressSpace, addr: u64, data: &[u8]) -> KernelResult<()> {
    ensure_user_range(space, addr, data.len(), true)?;
    if !data.is_empty() {
        // SAFETY: validated writable range in the active address space.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, data.len());
        }
    }
    Ok(())
}

/// Copy a NUL-terminated user string, validating page by page while
/// copying, up to [`config::USER_STR_MAX`] bytes.
pub fn copy_string_from_user(space: &mut AddressSpace, addr: u64) -> KernelResult<String> {
    let mut out = Vec::new();
    let mut cursor = addr;
    loop {
        if out.len() >= config::USER_STR_MAX {
            return Err(KernelError::InvalidArgument);
        }
        // Validate up to the end of the current page, then scan it.
        let page_end = (VirtualAddress::new(cursor).align_down().as_u64()) + PAGE_SIZE as u64;
        let span = (page_end - cursor).min((config::USER_STR_MAX - out.len()) as u64) as usize;
        ensure_user_range(space, cursor, span, false)?;
        for i in 0..span {
            // SAFETY: the page was just validated and faulted in.
            let byte = unsafe { core::ptr::read((cursor + i as u64) as *const u8) };
            if byte == 0 {
                return String::from_utf8(out).map_err(|_| KernelError::InvalidArgument);
            }
            out.push(byte);
        }
        cursor += span as u64;
    }
}

/// Copy a user `u64` (used for futex words and status pointers).
pub fn read_user_u64(space: &mut AddressSpace, addr: u64) -> KernelResult<u64> {
    if addr % 8 != 0 {
        return Err(KernelError::InvalidArgument);
    }
    let bytes = copy_from_user(space, addr, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes);
    Ok(u64::from_ne_bytes(raw))
}

/// Copy a user `u32` (futex words are 32-bit).
pub fn read_user_u32(space: &mut AddressSpace, addr: u64) -> KernelResult<u32> {
    if addr % 4 != 0 {
        return Err(KernelError::InvalidArgument);
    }
    let bytes = copy_from_user(space, addr, 4)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes);
    Ok(u32::from_ne_bytes(raw))
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn user_half_bounds() {
        assert!(range_in_user_half(0x40_0000, 4096));
        assert!(range_in_user_half(config::USER_SPACE_END - 16, 16));
        assert!(!range_in_user_half(config::USER_SPACE_END - 8, 16));
        assert!(!range_in_user_half(0xFFFF_8000_0000_0000, 1));
        assert!(!range_in_user_half(u64::MAX - 4, 16));
    }
}
