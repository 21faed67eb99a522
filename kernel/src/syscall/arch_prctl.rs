//! arch_prctl: user FS/GS base control

use core::sync::atomic::Ordering;

use super::SyscallResult;
use crate::{error::KernelError, mm::user, process::with_current_space, sched};

const ARCH_SET_GS: u64 = 0x1001;
const ARCH_SET_FS: u64 = 0x1002;
const ARCH_GET_FS: u64 = 0x1003;
const ARCH_GET_GS: u64 = 0x1004;

/// Highest canonical user address a segment base may take.
fn valid_base(addr: u64) -> bool {
    addr < crate::config::USER_SPACE_END
}

pub fn sys_arch_prctl(code: u64, addr: u64) -> SyscallResult {
    let task = sched::current_task();
    match code {
        ARCH_SET_FS => {
            if !valid_base(addr) {
                return Err(KernelError::InvalidArgument);
            }
            task.fs_base.store(addr, Ordering::Relaxed);
            #[cfg(target_os = "none")]
            x86_64::registers::model_specific::FsBase::write(x86_64::VirtAddr::new(addr));
            Ok(0)
        }
        ARCH_SET_GS => {
            if !valid_base(addr) {
                return Err(KernelError::InvalidArgument);
            }
            task.gs_base.store(addr, Ordering::Relaxed);
            // The user's GS base parks in KERNEL_GS_BASE while in kernel
            // mode; the exit swapgs moves it into place.
            #[cfg(target_os = "none")]
            x86_64::registers::model_specific::KernelGsBase::write(x86_64::VirtAddr::new(addr));
            Ok(0)
        }
        ARCH_GET_FS => {
            let value = task.fs_base.load(Ordering::Relaxed);
            with_current_space(|space| user::copy_to_user(space, addr, &value.to_ne_bytes()))
                .ok_or(KernelError::InvalidArgument)??;
            Ok(0)
        }
        ARCH_GET_GS => {
            let value = task.gs_base.load(Ordering::Relaxed);
            with_current_space(|space| user::copy_to_user(space, addr, &value.to_ne_bytes()))
                .ok_or(KernelError::InvalidArgument)??;
            Ok(0)
        }
        _ => Err(KernelError::InvalidArgument),
    }
}
