//! Saved register state and context switching
//!
//! [`TrapFrame`] is the full user register file captured at every kernel
//! entry (fast syscall, INT 0x80, faults). [`switch_context`] swaps the
//! callee-saved kernel context between two tasks; everything else lives on
//! the outgoing task's kernel stack.

/// User register file at kernel entry. Field order matches the push
/// sequence in the entry trampolines: the hardware/iretq tail (rip..ss)
/// sits at the highest addresses, r15 at the lowest.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// RFLAGS for fresh user entry: interrupts on, reserved bit 1 set.
pub const USER_RFLAGS: u64 = 0x202;

impl TrapFrame {
    /// Frame for first entry into user code.
    pub fn new_user(entry: u64, stack: u64) -> Self {
        Self {
            rip: entry,
            cs: super::gdt::user_code_selector() as u64,
            rflags: USER_RFLAGS,
            rsp: stack,
            ss: super::gdt::user_data_selector() as u64,
            ..Default::default()
        }
    }

    /// The six syscall argument registers, in ABI order.
    pub fn syscall_args(&self) -> [u64; 6] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }
}

/// Switch kernel contexts: push callee-saved registers, store the stack
/// pointer through `old_rsp`, load `new_rsp`, pop, return on the new
/// task's stack.
///
/// # Safety
///
/// `old_rsp` must point at the outgoing task's save slot and `new_rsp`
/// must be a stack previously produced by this function or forged by
/// [`forge_initial_stack`]. Interrupts must be disabled across the call.
#[cfg(target_os = "none")]
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(old_rsp: *mut u64, new_rsp: u64) {
    core::arch::naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

#[cfg(not(target_os = "none"))]
/// Host build stub so the scheduler unit-tests link.
///
/// # Safety
///
/// Never actually switches; callable only from tests that do not schedule.
pub unsafe extern "C" fn switch_context(_old_rsp: *mut u64, _new_rsp: u64) {
    unreachable!("context switches do not run on the host");
}

/// Prepare a fresh kernel stack so the first [`switch_context`] into it
/// "returns" to `entry`. Returns the forged stack pointer value.
///
/// Layout from the top down: entry address, then six zeroed callee-saved
/// slots that the switch epilogue pops.
///
/// # Safety
///
/// `stack_top` must be the 16-byte-aligned top of a live, writable kernel
/// stack.
pub unsafe fn forge_initial_stack(stack_top: u64, entry: u64) -> u64 {
    let mut sp = stack_top;
    // SAFETY: the caller vouches for the stack; all stores stay within it.
    unsafe {
        sp -= 8;
        core::ptr::write(sp as *mut u64, entry);
        for _ in 0..6 {
            sp -= 8;
            core::ptr::write(sp as *mut u64, 0);
        }
    }
    sp
}

/// Enter ring 3 with the register file in `frame`, which must sit on the
/// current kernel stack. Does not return.
///
/// # Safety
///
/// `frame` must hold user-mode CS/SS selectors and an RIP/RSP mapped in
/// the active address space; KERNEL_GS_BASE must hold the per-CPU block
/// (the swapgs here moves it out of GS_BASE).
#[cfg(target_os = "none")]
#[unsafe(naked)]
pub unsafe extern "C" fn enter_user(frame: *const TrapFrame) -> ! {
    core::arch::naked_asm!(
        "mov rsp, rdi",
        "swapgs",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "iretq",
    );
}

#[cfg(not(target_os = "none"))]
/// Host build stub.
///
/// # Safety
///
/// Never enters user mode; callable only from tests that do not schedule.
pub unsafe extern "C" fn enter_user(_frame: *const TrapFrame) -> ! {
    unreachable!("user mode does not exist on the host");
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn trap_frame_layout_matches_push_order() {
        // The entry trampolines rely on this exact layout.
        assert_eq!(core::mem::size_of::<TrapFrame>(), 20 * 8);
        assert_eq!(core::mem::offset_of!(TrapFrame, r15), 0);
        assert_eq!(core::mem::offset_of!(TrapFrame, rax), 14 * 8);
        assert_eq!(core::mem::offset_of!(TrapFrame, rip), 15 * 8);
        assert_eq!(core::mem::offset_of!(TrapFrame, ss), 19 * 8);
    }

    #[test]
    fn syscall_args_follow_the_abi() {
        let frame = TrapFrame {
            rdi: 1,
            rsi: 2,
            rdx: 3,
            r10: 4,
            r8: 5,
            r9: 6,
            ..Default::default()
        };
        assert_eq!(frame.syscall_args(), [1, 2, 3, 4, 5, 6]);
    }
}
