//! Fast syscall entry
//!
//! Programs the SYSCALL/SYSRET MSRs and provides the entry trampoline.
//! The trampoline swaps to the per-task kernel stack through the per-CPU
//! scratch slot, materializes a full [`TrapFrame`], and hands it to the
//! dispatcher; the return path restores the frame and SYSRETs.
//!
//! FMASK clears IF on entry: the kernel side of a syscall runs with
//! interrupts disabled (in-kernel execution is cooperative; blocking is an
//! explicit task switch). The IF bit saved in R11 is restored by SYSRET.

#[cfg(target_os = "none")]
use super::gdt;

/// Program EFER.SCE, STAR, LSTAR, and FMASK on the executing CPU.
pub fn init() {
    #[cfg(target_os = "none")]
    {
        use x86_64::{
            registers::{
                model_specific::{Efer, EferFlags, LStar, SFMask, Star},
                rflags::RFlags,
            },
            VirtAddr,
        };

        let selectors = gdt::selectors();
        // SAFETY: selectors come from the loaded GDT in the order
        // SYSCALL/SYSRET require; the entry symbol is the trampoline
        // below, which upholds the hand-written ABI.
        unsafe {
            Efer::update(|flags| flags.insert(EferFlags::SYSTEM_CALL_EXTENSIONS));
            use x86_64::{registers::segmentation::SegmentSelector, PrivilegeLevel};
            Star::write(
                SegmentSelector::new(selectors.user_code.index(), PrivilegeLevel::Ring3),
                SegmentSelector::new(selectors.user_data.index(), PrivilegeLevel::Ring3),
                selectors.kernel_code,
                selectors.kernel_data,
            )
            .expect("GDT selector layout must satisfy the STAR contract");
            LStar::write(VirtAddr::new(syscall_entry as usize as u64));
            SFMask::write(RFlags::INTERRUPT_FLAG | RFlags::DIRECTION_FLAG);
        }
    }
}

/// SYSCALL instruction entry point.
///
/// On entry: RCX = user RIP, R11 = user RFLAGS, RSP still the user stack.
/// The trampoline parks the user RSP in the per-CPU scratch slot, loads
/// the task kernel stack, and pushes a [`TrapFrame`] in field order. CS
/// and SS slots are filled with the ring-3 selector constants (0x23 /
/// 0x1b per the GDT layout) so the same frame feeds signal delivery and
/// the iretq path.
///
/// # Safety
///
/// Reached only via the SYSCALL instruction with the MSR setup above.
#[cfg(target_os = "none")]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "swapgs",
        "mov gs:[0x10], rsp",   // park user RSP
        "mov rsp, gs:[0x8]",    // per-task kernel stack top
        // iretq-shaped tail of the TrapFrame
        "push 0x1b",            // ss: user data, RPL 3
        "push qword ptr gs:[0x10]", // user rsp
        "push r11",             // user rflags
        "push 0x23",            // cs: user code, RPL 3
        "push rcx",             // user rip
        // general registers, TrapFrame order
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",         // &mut TrapFrame
        "call {dispatch}",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "add rsp, 8",           // r11 reloaded from rflags below
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "add rsp, 8",           // rcx reloaded from rip below
        "pop rbx",
        "pop rax",
        "pop rcx",              // user rip (SYSRET source)
        "add rsp, 8",           // cs
        "pop r11",              // user rflags (SYSRET source)
        "pop rsp",              // user rsp; ss is discarded with the stack
        "swapgs",
        "sysretq",
        dispatch = sym crate::syscall::dispatch_from_entry,
    );
}
