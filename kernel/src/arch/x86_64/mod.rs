//! x86-64 support: segmentation, interrupts, the syscall trampoline,
//! per-CPU state, context switching, and the PIT timer.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod percpu;
pub mod syscall;
pub mod timer;

/// Bring up the boot CPU: segments, interrupt vectors, per-CPU block,
/// fast-syscall MSRs. The timer is started separately, once the scheduler
/// can take ticks.
pub fn init() {
    gdt::init();
    idt::init();
    percpu::init(0);
    syscall::init();
}

/// Halt forever with interrupts off.
pub fn halt() -> ! {
    loop {
        #[cfg(target_os = "none")]
        {
            x86_64::instructions::interrupts::disable();
            x86_64::instructions::hlt();
        }
        #[cfg(not(target_os = "none"))]
        core::hint::spin_loop();
    }
}

/// Enable interrupts and halt until the next one (idle loop body).
pub fn wait_for_interrupt() {
    #[cfg(target_os = "none")]
    {
        x86_64::instructions::interrupts::enable_and_hlt();
        x86_64::instructions::interrupts::disable();
    }
    #[cfg(not(target_os = "none"))]
    core::hint::spin_loop();
}
