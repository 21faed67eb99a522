//! Task lifecycle and futex syscalls

use alloc::string::String;
use alloc::vec::Vec;

use super::SyscallResult;
use crate::{
    arch::context::TrapFrame,
    cap::{self, Capability},
    error::{KernelError, SchedError},
    mm::user,
    process::{self, exec, exit, fork, signal, with_current_space},
    sched,
    sync::futex::{FUTEX_WAIT, FUTEX_WAKE},
};

pub fn sys_exit(code: u64) -> SyscallResult {
    exit::exit_current(code as u32);
}

pub fn sys_yield() -> SyscallResult {
    sched::yield_current();
    Ok(0)
}

pub fn sys_getpid() -> SyscallResult {
    Ok(sched::current_tid() as isize)
}

pub fn sys_getppid() -> SyscallResult {
    Ok(sched::current_task().parent_id() as isize)
}

pub fn sys_fork(frame: &mut TrapFrame) -> SyscallResult {
    cap::check_current(Capability::PROC_FORK)?;
    let child = fork::fork(frame)?;
    Ok(child as isize)
}

/// Copy a NULL-terminated user vector of string pointers.
fn copy_string_vec(vec_ptr: u64) -> Result<Vec<String>, KernelError> {
    let mut out = Vec::new();
    if vec_ptr == 0 {
        return Ok(out);
    }
    for index in 0..crate::config::FD_TABLE_SIZE as u64 * 4 {
        let slot = vec_ptr + index * 8;
        let ptr = with_current_space(|space| user::read_user_u64(space, slot))
            .ok_or(KernelError::InvalidArgument)??;
        if ptr == 0 {
            return Ok(out);
        }
        let s = with_current_space(|space| user::copy_string_from_user(space, ptr))
            .ok_or(KernelError::InvalidArgument)??;
        out.push(s);
    }
    Err(KernelError::InvalidArgument)
}

pub fn sys_execve(frame: &mut TrapFrame, path_ptr: u64, argv_ptr: u64, envp_ptr: u64) -> SyscallResult {
    cap::check_current(Capability::PROC_EXEC)?;
    let path = with_current_space(|space| user::copy_string_from_user(space, path_ptr))
        .ok_or(KernelError::InvalidArgument)??;
    let argv = copy_string_vec(argv_ptr)?;
    let envp = copy_string_vec(envp_ptr)?;
    exec::exec_current(frame, &path, &argv, &envp)?;
    Ok(0)
}

const WNOHANG: u64 = 1;

pub fn sys_wait4(pid: i64, status_ptr: u64, options: u64) -> SyscallResult {
    let filter = match pid {
        -1 => None,
        p if p > 0 => Some(p as sched::TaskId),
        _ => return Err(KernelError::InvalidArgument),
    };

    let result = exit::wait_for_child(filter, options & WNOHANG != 0);
    match result {
        Ok((child, status)) => {
            if status_ptr != 0 {
                let bytes = (status as i32).to_ne_bytes();
                with_current_space(|space| user::copy_to_user(space, status_ptr, &bytes))
                    .ok_or(KernelError::InvalidArgument)??;
            }
            Ok(child as isize)
        }
        // WNOHANG with live, unterminated children reports "nothing yet".
        Err(KernelError::Sched(SchedError::WouldBlock)) => Ok(0),
        Err(e) => Err(e),
    }
}

pub fn sys_kill(pid: i64, sig: u64) -> SyscallResult {
    if pid <= 0 {
        // Process groups are outside this kernel's model.
        return Err(KernelError::InvalidArgument);
    }
    let target = pid as sched::TaskId;
    if target != sched::current_tid() {
        cap::check_current(Capability::PROC_KILL)?;
    }
    if sig == 0 {
        // Existence probe.
        return if crate::kctx::tasks().exists(target) {
            Ok(0)
        } else {
            Err(KernelError::Sched(SchedError::NoSuchTask { id: target }))
        };
    }
    signal::send_signal(target, sig as u32)?;
    Ok(0)
}

pub fn sys_futex(uaddr: u64, op: u64, val: u64, timeout_ms: u64) -> SyscallResult {
    let space_id = process::with_current_space(|space| space.id)
        .ok_or(KernelError::InvalidArgument)?;

    match op {
        FUTEX_WAIT => {
            let current = with_current_space(|space| user::read_user_u32(space, uaddr))
                .ok_or(KernelError::InvalidArgument)??;
            let timeout = if timeout_ms == 0 { None } else { Some(timeout_ms) };
            match crate::kctx::futexes().wait(space_id, uaddr, val as u32, current, timeout) {
                Ok(()) => Ok(0),
                // The word changed under us: report EAGAIN-style failure.
                Err(KernelError::Sched(SchedError::WouldBlock)) => {
                    Err(KernelError::Sched(SchedError::WouldBlock))
                }
                Err(e) => Err(e),
            }
        }
        FUTEX_WAKE => {
            let woken = crate::kctx::futexes().wake(space_id, uaddr, val as usize);
            Ok(woken as isize)
        }
        _ => Err(KernelError::InvalidArgument),
    }
}
