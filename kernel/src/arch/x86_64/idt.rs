//! Interrupt descriptor table
//!
//! Fault vectors, the timer IRQ, and the INT 0x80 slow syscall gate.
//! Kernel-mode faults are fatal and panic; user-mode page faults route
//! into the demand-paging policy, and unresolvable ones terminate the
//! faulting task with a fatal signal.

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use super::{gdt, percpu};

/// Vector the PIC delivers IRQ 0 (the PIT) on after remapping.
pub const TIMER_VECTOR: u8 = 32;

/// Slow syscall gate.
pub const SYSCALL_VECTOR: u8 = 0x80;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        // SAFETY: the IST index refers to the stack installed in the TSS
        // by gdt::init before the IDT is loaded.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt[TIMER_VECTOR].set_handler_fn(timer_handler);
        // Driver IRQ lines: wake the registered waiter, ack at the PIC.
        // The device-side ack is the driver's job.
        idt[TIMER_VECTOR + 1].set_handler_fn(irq_handler_33);
        idt[TIMER_VECTOR + 2].set_handler_fn(irq_handler_34);
        idt[TIMER_VECTOR + 3].set_handler_fn(irq_handler_35);
        idt[TIMER_VECTOR + 4].set_handler_fn(irq_handler_36);
        idt[TIMER_VECTOR + 5].set_handler_fn(irq_handler_37);
        idt[TIMER_VECTOR + 6].set_handler_fn(irq_handler_38);
        idt[TIMER_VECTOR + 7].set_handler_fn(irq_handler_39);
        idt[TIMER_VECTOR + 8].set_handler_fn(irq_handler_40);
        idt[TIMER_VECTOR + 9].set_handler_fn(irq_handler_41);
        idt[TIMER_VECTOR + 10].set_handler_fn(irq_handler_42);
        idt[TIMER_VECTOR + 11].set_handler_fn(irq_handler_43);
        idt[TIMER_VECTOR + 12].set_handler_fn(irq_handler_44);
        idt[TIMER_VECTOR + 13].set_handler_fn(irq_handler_45);
        idt[TIMER_VECTOR + 14].set_handler_fn(irq_handler_46);
        idt[TIMER_VECTOR + 15].set_handler_fn(irq_handler_47);
        // SAFETY: int80_entry is a hand-written trampoline that builds a
        // complete TrapFrame and iretqs.
        unsafe {
            idt[SYSCALL_VECTOR]
                .set_handler_addr(x86_64::VirtAddr::new(int80_entry as usize as u64))
                .set_privilege_level(x86_64::PrivilegeLevel::Ring3);
        }
        idt
    };
}

pub fn init() {
    IDT.load();
}

fn from_user(frame: &InterruptStackFrame) -> bool {
    frame.code_segment.rpl() == x86_64::PrivilegeLevel::Ring3
}

extern "x86-interrupt" fn breakpoint_handler(frame: InterruptStackFrame) {
    log::warn!("breakpoint at {:#x}", frame.instruction_pointer.as_u64());
}

extern "x86-interrupt" fn invalid_opcode_handler(frame: InterruptStackFrame) {
    if from_user(&frame) {
        percpu::enter_kernel_gs_from_user();
        log::warn!(
            "invalid opcode in task {} at {:#x}",
            crate::sched::current_tid(),
            frame.instruction_pointer.as_u64()
        );
        // Does not return: the task dies with SIGILL's fatal status.
        crate::process::exit::fatal_signal_current(crate::process::signal::SIGILL);
    }
    panic!("invalid opcode in kernel at {:#x}", frame.instruction_pointer.as_u64());
}

extern "x86-interrupt" fn general_protection_handler(frame: InterruptStackFrame, code: u64) {
    if from_user(&frame) {
        percpu::enter_kernel_gs_from_user();
        log::warn!(
            "general protection fault in task {} at {:#x} (code {:#x})",
            crate::sched::current_tid(),
            frame.instruction_pointer.as_u64(),
            code
        );
        crate::process::exit::fatal_signal_current(crate::process::signal::SIGSEGV);
    }
    panic!(
        "general protection fault in kernel at {:#x} (code {:#x})",
        frame.instruction_pointer.as_u64(),
        code
    );
}

extern "x86-interrupt" fn double_fault_handler(frame: InterruptStackFrame, _code: u64) -> ! {
    panic!("double fault at {:#x}", frame.instruction_pointer.as_u64());
}

extern "x86-interrupt" fn page_fault_handler(frame: InterruptStackFrame, code: PageFaultErrorCode) {
    let addr = x86_64::registers::control::Cr2::read_raw();
    let user = code.contains(PageFaultErrorCode::USER_MODE);
    let write = code.contains(PageFaultErrorCode::CAUSED_BY_WRITE);

    if !user {
        // A kernel-mode fault is an invariant violation, not a condition
        // to resolve.
        panic!(
            "kernel page fault at {:#x} (rip {:#x}, {:?})",
            addr,
            frame.instruction_pointer.as_u64(),
            code
        );
    }

    percpu::enter_kernel_gs_from_user();

    let resolved = crate::process::with_current_space(|space| {
        crate::mm::page_fault::resolve(space, addr, write)
    });

    match resolved {
        Some(Ok(())) => percpu::exit_kernel_gs_to_user(),
        Some(Err(fault)) => {
            log::warn!(
                "task {}: unresolvable fault {:?} at {:#x} (rip {:#x})",
                crate::sched::current_tid(),
                fault,
                addr,
                frame.instruction_pointer.as_u64()
            );
            crate::process::exit::fatal_signal_current(crate::process::signal::SIGSEGV);
        }
        None => {
            // Fault from ring 3 with no user address space: the task
            // table is corrupt.
            panic!("user page fault with no current address space");
        }
    }
}

extern "x86-interrupt" fn timer_handler(frame: InterruptStackFrame) {
    let user = from_user(&frame);
    if user {
        percpu::enter_kernel_gs_from_user();
    }

    crate::time::on_tick();
    let expired = crate::sched::on_tick();

    super::timer::end_of_interrupt(TIMER_VECTOR);

    // Preempt only when the tick interrupted ring 3; in-kernel execution
    // is cooperative.
    if user && expired {
        crate::sched::preempt();
    }

    if user {
        percpu::exit_kernel_gs_to_user();
    }
}

macro_rules! driver_irq_handler {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(frame: InterruptStackFrame) {
            let user = from_user(&frame);
            if user {
                percpu::enter_kernel_gs_from_user();
            }
            crate::kctx::irq_waiters().notify($vector);
            super::timer::end_of_interrupt($vector);
            if user {
                percpu::exit_kernel_gs_to_user();
            }
        }
    };
}

driver_irq_handler!(irq_handler_33, 33);
driver_irq_handler!(irq_handler_34, 34);
driver_irq_handler!(irq_handler_35, 35);
driver_irq_handler!(irq_handler_36, 36);
driver_irq_handler!(irq_handler_37, 37);
driver_irq_handler!(irq_handler_38, 38);
driver_irq_handler!(irq_handler_39, 39);
driver_irq_handler!(irq_handler_40, 40);
driver_irq_handler!(irq_handler_41, 41);
driver_irq_handler!(irq_handler_42, 42);
driver_irq_handler!(irq_handler_43, 43);
driver_irq_handler!(irq_handler_44, 44);
driver_irq_handler!(irq_handler_45, 45);
driver_irq_handler!(irq_handler_46, 46);
driver_irq_handler!(irq_handler_47, 47);

/// INT 0x80 slow-path syscall trampoline.
///
/// The CPU has already pushed the iretq tail (SS, RSP, RFLAGS, CS, RIP)
/// onto the task kernel stack via RSP0. Pushing the fifteen general
/// registers completes a [`crate::arch::context::TrapFrame`], which goes
/// to the same dispatcher as the fast path.
///
/// # Safety
///
/// Installed behind a ring-3 gate; never called from kernel mode, so the
/// unconditional swapgs pair keeps the GS invariant.
#[cfg(target_os = "none")]
#[unsafe(naked)]
pub unsafe extern "C" fn int80_entry() {
    core::arch::naked_asm!(
        "swapgs",
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
        "mov rdi, rsp",
        "call {dispatch}",
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
        "swapgs",
        "iretq",
        dispatch = sym crate::syscall::dispatch_from_entry,
    );
}

#[cfg(not(target_os = "none"))]
/// Host build stub.
///
/// # Safety
///
/// Never installed on the host.
pub unsafe extern "C" fn int80_entry() {}
