//! Signal delivery and return
//!
//! Builds the resume frame on the user stack in the Linux x86-64
//! rt_sigframe shape (pretcode, then ucontext with the machine context
//! and saved mask, then siginfo) so standard user-side restorer trampolines work
//! unmodified, then redirects the saved user RIP to the handler. The
//! handler's restorer invokes `rt_sigreturn`, which restores the saved
//! frame verbatim (modulo privilege sanitizing).

use crate::{
    arch::context::TrapFrame,
    error::{KernelError, KernelResult},
    mm::user,
    sched,
};

use super::signal::{Disposition, SigActionFlags};

/// Machine context, field-for-field the Linux x86-64 `sigcontext`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MContext {
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rsp: u64,
    pub rip: u64,
    pub eflags: u64,
    pub cs: u16,
    pub gs: u16,
    pub fs: u16,
    pub pad: u16,
    pub err: u64,
    pub trapno: u64,
    pub oldmask: u64,
    pub cr2: u64,
    pub fpstate: u64,
    pub reserved: [u64; 8],
}

/// ucontext: flags/link/stack head, the machine context, saved mask.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UContext {
    pub uc_flags: u64,
    pub uc_link: u64,
    pub uc_stack: [u64; 3],
    pub uc_mcontext: MContext,
    pub uc_sigmask: u64,
}

/// Simplified siginfo block; zeroed except for the head fields.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SigInfo {
    pub si_signo: i32,
    pub si_errno: i32,
    pub si_code: i32,
    pub pad0: i32,
    pub fields: [u64; 14],
}

impl Default for SigInfo {
    fn default() -> Self {
        Self {
            si_signo: 0,
            si_errno: 0,
            si_code: 0,
            pad0: 0,
            fields: [0; 14],
        }
    }
}

/// The frame pushed onto the user stack for one delivery.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RtSigframe {
    /// Return address the handler's `ret` consumes: the restorer.
    pub pretcode: u64,
    pub uc: UContext,
    pub info: SigInfo,
}

/// x86-64 red zone the ABI lets leaf code use below RSP.
const RED_ZONE: u64 = 128;

fn mcontext_from(frame: &TrapFrame) -> MContext {
    MContext {
        r8: frame.r8,
        r9: frame.r9,
        r10: frame.r10,
        r11: frame.r11,
        r12: frame.r12,
        r13: frame.r13,
        r14: frame.r14,
        r15: frame.r15,
        rdi: frame.rdi,
        rsi: frame.rsi,
        rbp: frame.rbp,
        rbx: frame.rbx,
        rdx: frame.rdx,
        rax: frame.rax,
        rcx: frame.rcx,
        rsp: frame.rsp,
        rip: frame.rip,
        eflags: frame.rflags,
        cs: frame.cs as u16,
        ..Default::default()
    }
}

/// Push an rt_sigframe and redirect `frame` into the handler.
///
/// Handler ABI: %rdi = signal number, %rsi = &siginfo, %rdx = &ucontext.
/// The delivered signal joins the blocked mask unless NODEFER;
/// RESETHAND restores the default disposition after this delivery.
pub fn deliver(
    frame: &mut TrapFrame,
    sig: u32,
    handler: u64,
    restorer: u64,
    flags: SigActionFlags,
) -> KernelResult<()> {
    let task = sched::current_task();

    let mut sigframe = RtSigframe {
        pretcode: restorer,
        ..Default::default()
    };
    sigframe.uc.uc_mcontext = mcontext_from(frame);
    sigframe.info.si_signo = sig as i32;

    {
        let mut signals = task.signals.lock();
        sigframe.uc.uc_sigmask = signals.blocked_mask();
        signals.clear_pending(sig);
        if !flags.contains(SigActionFlags::NODEFER) {
            signals.block_signal(sig);
        }
        if flags.contains(SigActionFlags::RESETHAND) {
            let _ = signals.set_disposition(sig, Disposition::Default);
        }
    }

    // Below the red zone, then down-aligned so the ucontext at sp+8 is
    // 16-byte aligned.
    let mut sp = frame.rsp - RED_ZONE - core::mem::size_of::<RtSigframe>() as u64;
    sp &= !0xF;
    sp -= 8;

    let bytes = unsafe {
        // SAFETY: RtSigframe is repr(C), fully initialized, with no
        // padding bytes that user space could not already observe.
        core::slice::from_raw_parts(
            &sigframe as *const RtSigframe as *const u8,
            core::mem::size_of::<RtSigframe>(),
        )
    };
    super::with_current_space(|space| user::copy_to_user(space, sp, bytes))
        .ok_or(KernelError::InvalidArgument)??;

    frame.rip = handler;
    frame.rsp = sp;
    frame.rdi = sig as u64;
    frame.rsi = sp + core::mem::offset_of!(RtSigframe, info) as u64;
    frame.rdx = sp + core::mem::offset_of!(RtSigframe, uc) as u64;
    frame.rax = 0;
    Ok(())
}

/// RFLAGS bits user code may control through sigreturn.
const USER_FLAGS_MASK: u64 = 0xCD5; // CF PF AF ZF SF TF DF OF

/// rt_sigreturn: pop the sigframe the restorer points at and resume the
/// interrupted context.
///
/// The handler's `ret` consumed pretcode, so the frame starts 8 bytes
/// below the current user RSP. CS/SS and the privileged RFLAGS bits are
/// forced back to user values; everything else restores verbatim.
pub fn sigreturn(frame: &mut TrapFrame) -> KernelResult<()> {
    let task = sched::current_task();
    let frame_addr = frame.rsp - 8;

    let bytes = super::with_current_space(|space| {
        user::copy_from_user(space, frame_addr, core::mem::size_of::<RtSigframe>())
    })
    .ok_or(KernelError::InvalidArgument)??;

    // SAFETY: RtSigframe is repr(C) and valid for any bit pattern; the
    // privileged fields are sanitized below.
    let saved: RtSigframe = unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const _) };
    let mc = saved.uc.uc_mcontext;

    frame.r8 = mc.r8;
    frame.r9 = mc.r9;
    frame.r10 = mc.r10;
    frame.r11 = mc.r11;
    frame.r12 = mc.r12;
    frame.r13 = mc.r13;
    frame.r14 = mc.r14;
    frame.r15 = mc.r15;
    frame.rdi = mc.rdi;
    frame.rsi = mc.rsi;
    frame.rbp = mc.rbp;
    frame.rbx = mc.rbx;
    frame.rdx = mc.rdx;
    frame.rax = mc.rax;
    frame.rcx = mc.rcx;
    frame.rsp = mc.rsp;
    frame.rip = mc.rip;
    frame.rflags =
        (mc.eflags & USER_FLAGS_MASK) | crate::arch::context::USER_RFLAGS;
    frame.cs = crate::arch::gdt::user_code_selector() as u64;
    frame.ss = crate::arch::gdt::user_data_selector() as u64;

    task.signals.lock().set_blocked_mask(saved.uc.uc_sigmask);
    Ok(())
}

/// Deliver the lowest pending, unblocked signal before returning to user
/// mode. Default-terminate dispositions end the task here; ignored
/// signals clear and loop; handlers build one rt_sigframe.
pub fn deliver_pending(frame: &mut TrapFrame) {
    loop {
        let task = sched::current_task();
        let (sig, disposition) = {
            let signals = task.signals.lock();
            match signals.next_deliverable() {
                Some(sig) => (sig, signals.disposition(sig)),
                None => return,
            }
        };

        match disposition {
            Disposition::Ignore => {
                task.signals.lock().clear_pending(sig);
            }
            Disposition::Default => {
                if sig == super::signal::SIGCHLD {
                    task.signals.lock().clear_pending(sig);
                } else {
                    super::exit::fatal_signal_current(sig);
                }
            }
            Disposition::Handler {
                handler,
                restorer,
                flags,
            } => {
                if deliver(frame, sig, handler, restorer, flags).is_err() {
                    // Unwritable stack: fall back to the default action.
                    super::exit::fatal_signal_current(sig);
                }
                return;
            }
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn sigframe_layout_is_stable() {
        // User-side trampolines hard-code these offsets.
        assert_eq!(core::mem::offset_of!(RtSigframe, pretcode), 0);
        assert_eq!(core::mem::offset_of!(RtSigframe, uc), 8);
        assert_eq!(
            core::mem::offset_of!(UContext, uc_mcontext),
            5 * 8
        );
        assert_eq!(core::mem::offset_of!(MContext, rip), 16 * 8);
        assert_eq!(core::mem::size_of::<SigInfo>(), 128);
    }

    #[test]
    fn mcontext_captures_the_trap_frame() {
        let frame = TrapFrame {
            rip: 0x1234,
            rsp: 0x5678,
            rax: 7,
            rflags: 0x246,
            cs: 0x23,
            ..Default::default()
        };
        let mc = mcontext_from(&frame);
        assert_eq!(mc.rip, 0x1234);
        assert_eq!(mc.rsp, 0x5678);
        assert_eq!(mc.rax, 7);
        assert_eq!(mc.eflags, 0x246);
        assert_eq!(mc.cs, 0x23);
    }
}
