//! Signal syscalls

use super::SyscallResult;
use crate::{
    arch::context::TrapFrame,
    error::KernelError,
    mm::user,
    process::{
        signal::{Disposition, SigActionFlags},
        signal_delivery, with_current_space,
    },
    sched,
};

const SIG_DFL: u64 = 0;
const SIG_IGN: u64 = 1;

/// Userspace sigaction record: handler, flags, restorer, mask.
const SIGACTION_SIZE: usize = 32;

pub fn sys_rt_sigaction(sig: u64, act_ptr: u64, oldact_ptr: u64) -> SyscallResult {
    let sig = sig as u32;
    let task = sched::current_task();

    if oldact_ptr != 0 {
        let old = {
            let signals = task.signals.lock();
            if sig == 0 || sig > crate::process::signal::NSIG {
                return Err(crate::error::SignalError::InvalidSignal.into());
            }
            signals.disposition(sig)
        };
        let (handler, flags, restorer) = match old {
            Disposition::Default => (SIG_DFL, 0, 0),
            Disposition::Ignore => (SIG_IGN, 0, 0),
            Disposition::Handler {
                handler,
                restorer,
                flags,
            } => (handler, flags.bits(), restorer),
        };
        let mut bytes = [0u8; SIGACTION_SIZE];
        bytes[0..8].copy_from_slice(&handler.to_ne_bytes());
        bytes[8..16].copy_from_slice(&flags.to_ne_bytes());
        bytes[16..24].copy_from_slice(&restorer.to_ne_bytes());
        with_current_space(|space| user::copy_to_user(space, oldact_ptr, &bytes))
            .ok_or(KernelError::InvalidArgument)??;
    }

    if act_ptr != 0 {
        let bytes = with_current_space(|space| user::copy_from_user(space, act_ptr, SIGACTION_SIZE))
            .ok_or(KernelError::InvalidArgument)??;
        let word = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_ne_bytes(raw)
        };
        let handler = word(0);
        let flags = SigActionFlags::from_bits_truncate(word(8));
        let restorer = if flags.contains(SigActionFlags::RESTORER) {
            word(16)
        } else {
            0
        };

        let disposition = match handler {
            SIG_DFL => Disposition::Default,
            SIG_IGN => Disposition::Ignore,
            addr => Disposition::Handler {
                handler: addr,
                restorer,
                flags,
            },
        };
        task.signals.lock().set_disposition(sig, disposition)?;
    }
    Ok(0)
}

const SIG_BLOCK: u64 = 0;
const SIG_UNBLOCK: u64 = 1;
const SIG_SETMASK: u64 = 2;

pub fn sys_rt_sigprocmask(how: u64, set_ptr: u64, oldset_ptr: u64) -> SyscallResult {
    let task = sched::current_task();

    let old_mask = task.signals.lock().blocked_mask();
    if oldset_ptr != 0 {
        with_current_space(|space| user::copy_to_user(space, oldset_ptr, &old_mask.to_ne_bytes()))
            .ok_or(KernelError::InvalidArgument)??;
    }

    if set_ptr != 0 {
        let new_mask = with_current_space(|space| user::read_user_u64(space, set_ptr))
            .ok_or(KernelError::InvalidArgument)??;
        let mut signals = task.signals.lock();
        let mask = match how {
            SIG_BLOCK => old_mask | new_mask,
            SIG_UNBLOCK => old_mask & !new_mask,
            SIG_SETMASK => new_mask,
            _ => return Err(KernelError::InvalidArgument),
        };
        signals.set_blocked_mask(mask);
    }
    Ok(0)
}

/// Pops the signal frame the restorer points at; the "return value" is
/// whatever %rax held when the signal interrupted the task.
pub fn sys_rt_sigreturn(frame: &mut TrapFrame) -> SyscallResult {
    signal_delivery::sigreturn(frame)?;
    Ok(frame.rax as isize)
}
