//! System call dispatch
//!
//! One number space serves both entries (SYSCALL and INT 0x80), with the
//! Linux x86-64 numbering for the POSIX-shaped calls so standard user
//! stubs work unmodified, and a kernel-private block at 0x1000+ for the
//! port/shmem IPC family. Arguments follow the System V AMD64 syscall
//! convention: number in %rax, arguments in %rdi %rsi %rdx %r10 %r8 %r9,
//! result in %rax (negated error code on failure).
//!
//! Per call the dispatcher: resolves the current task, validates and
//! copies user memory (handlers own this via `mm::user`), checks
//! capabilities, executes (possibly blocking), and finally delivers
//! any pending unblocked signal before returning to user mode.
//!
//! Blocking calls interrupted by a caught signal fail with Interrupted;
//! SA_RESTART semantics are not provided by any call.

mod arch_prctl;
mod filesystem;
mod ipc;
mod memory;
mod process;
mod signal;
mod time;

use crate::{
    arch::context::TrapFrame,
    error::{Errno, KernelResult},
    process::signal_delivery,
};

// POSIX-shaped calls, Linux x86-64 numbers.
pub const SYS_READ: u64 = 0;
pub const SYS_WRITE: u64 = 1;
pub const SYS_OPEN: u64 = 2;
pub const SYS_CLOSE: u64 = 3;
pub const SYS_LSEEK: u64 = 8;
pub const SYS_MMAP: u64 = 9;
pub const SYS_MUNMAP: u64 = 11;
pub const SYS_BRK: u64 = 12;
pub const SYS_RT_SIGACTION: u64 = 13;
pub const SYS_RT_SIGPROCMASK: u64 = 14;
pub const SYS_RT_SIGRETURN: u64 = 15;
pub const SYS_PIPE: u64 = 22;
pub const SYS_SCHED_YIELD: u64 = 24;
pub const SYS_DUP: u64 = 32;
pub const SYS_DUP2: u64 = 33;
pub const SYS_NANOSLEEP: u64 = 35;
pub const SYS_GETPID: u64 = 39;
pub const SYS_FORK: u64 = 57;
pub const SYS_EXECVE: u64 = 59;
pub const SYS_EXIT: u64 = 60;
pub const SYS_WAIT4: u64 = 61;
pub const SYS_KILL: u64 = 62;
pub const SYS_GETPPID: u64 = 110;
pub const SYS_ARCH_PRCTL: u64 = 158;
pub const SYS_FUTEX: u64 = 202;
pub const SYS_CLOCK_GETTIME: u64 = 228;
pub const SYS_PIPE2: u64 = 293;

// Kernel-private IPC family. Stable; user binaries link against it.
pub const SYS_PORT_CREATE: u64 = 0x1000;
pub const SYS_PORT_DESTROY: u64 = 0x1001;
pub const SYS_PORT_REGISTER: u64 = 0x1002;
pub const SYS_PORT_LOOKUP: u64 = 0x1003;
pub const SYS_PORT_SEND: u64 = 0x1004;
pub const SYS_PORT_RECV: u64 = 0x1005;
pub const SYS_SHMEM_CREATE: u64 = 0x1010;
pub const SYS_SHMEM_MAP: u64 = 0x1011;
pub const SYS_SHMEM_UNMAP: u64 = 0x1012;
pub const SYS_SHMEM_DESTROY: u64 = 0x1013;

pub type SyscallResult = KernelResult<isize>;

/// Entry-trampoline callback: both the SYSCALL path and the INT 0x80
/// gate land here with a pointer to the saved user frame on the kernel
/// stack.
///
/// # Safety
///
/// Called only from the entry trampolines with a live, exclusive frame.
#[no_mangle]
pub extern "C" fn dispatch_from_entry(frame: *mut TrapFrame) {
    // SAFETY: the trampolines pass the frame they just pushed on this
    // task's kernel stack; nothing else aliases it.
    let frame = unsafe { &mut *frame };
    let nr = frame.rax;
    let args = frame.syscall_args();

    let result = dispatch(nr, args, frame);
    frame.rax = match result {
        Ok(value) => value as u64,
        Err(e) => Errno::from(e).to_isize() as u64,
    };

    // Before returning to user mode, deliver any pending non-blocked
    // signal. May rewrite the frame (handler entry) or not return at all
    // (default-terminate).
    signal_delivery::deliver_pending(frame);
}

fn dispatch(nr: u64, args: [u64; 6], frame: &mut TrapFrame) -> SyscallResult {
    match nr {
        SYS_READ => filesystem::sys_read(args[0], args[1], args[2]),
        SYS_WRITE => filesystem::sys_write(args[0], args[1], args[2]),
        SYS_OPEN => filesystem::sys_open(args[0], args[1], args[2]),
        SYS_CLOSE => filesystem::sys_close(args[0]),
        SYS_LSEEK => filesystem::sys_lseek(args[0], args[1] as i64, args[2]),
        SYS_MMAP => memory::sys_mmap(args[0], args[1], args[2], args[3], args[4], args[5]),
        SYS_MUNMAP => memory::sys_munmap(args[0], args[1]),
        SYS_BRK => memory::sys_brk(args[0]),
        SYS_RT_SIGACTION => signal::sys_rt_sigaction(args[0], args[1], args[2]),
        SYS_RT_SIGPROCMASK => signal::sys_rt_sigprocmask(args[0], args[1], args[2]),
        SYS_RT_SIGRETURN => signal::sys_rt_sigreturn(frame),
        SYS_PIPE => filesystem::sys_pipe2(args[0], 0),
        SYS_SCHED_YIELD => process::sys_yield(),
        SYS_DUP => filesystem::sys_dup(args[0]),
        SYS_DUP2 => filesystem::sys_dup2(args[0], args[1]),
        SYS_NANOSLEEP => time::sys_nanosleep(args[0], args[1]),
        SYS_GETPID => process::sys_getpid(),
        SYS_FORK => process::sys_fork(frame),
        SYS_EXECVE => process::sys_execve(frame, args[0], args[1], args[2]),
        SYS_EXIT => process::sys_exit(args[0]),
        SYS_WAIT4 => process::sys_wait4(args[0] as i64, args[1], args[2]),
        SYS_KILL => process::sys_kill(args[0] as i64, args[1]),
        SYS_GETPPID => process::sys_getppid(),
        SYS_ARCH_PRCTL => arch_prctl::sys_arch_prctl(args[0], args[1]),
        SYS_FUTEX => process::sys_futex(args[0], args[1], args[2], args[3]),
        SYS_CLOCK_GETTIME => time::sys_clock_gettime(args[0], args[1]),
        SYS_PIPE2 => filesystem::sys_pipe2(args[0], args[1]),

        SYS_PORT_CREATE => ipc::sys_port_create(args[0]),
        SYS_PORT_DESTROY => ipc::sys_port_destroy(args[0]),
        SYS_PORT_REGISTER => ipc::sys_port_register(args[0], args[1]),
        SYS_PORT_LOOKUP => ipc::sys_port_lookup(args[0]),
        SYS_PORT_SEND => {
            ipc::sys_port_send(args[0], args[1], args[2], args[3], args[4], args[5])
        }
        SYS_PORT_RECV => {
            ipc::sys_port_recv(args[0], args[1], args[2], args[3], args[4], args[5])
        }
        SYS_SHMEM_CREATE => ipc::sys_shmem_create(args[0], args[1]),
        SYS_SHMEM_MAP => ipc::sys_shmem_map(args[0]),
        SYS_SHMEM_UNMAP => ipc::sys_shmem_unmap(args[0]),
        SYS_SHMEM_DESTROY => ipc::sys_shmem_destroy(args[0]),

        _ => {
            log::debug!("unimplemented syscall {} from task {}", nr, crate::sched::current_tid());
            Err(crate::error::KernelError::NotImplemented)
        }
    }
}
