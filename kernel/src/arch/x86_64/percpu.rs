//! Per-CPU state
//!
//! One block per CPU, reachable two ways: from Rust by index, and from the
//! syscall trampoline through GS-relative addressing (GS_BASE holds the
//! block while in kernel mode, KERNEL_GS_BASE holds it while in user
//! mode; swapgs flips the two at every crossing).
//!
//! Field offsets are part of the trampoline's contract; see the asserts in
//! the tests below.

use core::ptr::addr_of_mut;

use crate::config::MAX_CPUS;

/// Per-CPU block. `#[repr(C)]`: the syscall trampoline addresses fields
/// by byte offset.
#[repr(C)]
pub struct PerCpu {
    /// 0x00: self pointer, lets `gs:[0]` recover a Rust reference.
    pub self_ptr: u64,
    /// 0x08: kernel stack top of the running task; the syscall trampoline
    /// loads RSP from here.
    pub kernel_rsp: u64,
    /// 0x10: scratch slot holding the user RSP across the trampoline.
    pub user_rsp_scratch: u64,
    /// 0x18: CPU index.
    pub cpu_id: u64,
    /// 0x20: task id currently running here.
    pub current_tid: u64,
}

const EMPTY: PerCpu = PerCpu {
    self_ptr: 0,
    kernel_rsp: 0,
    user_rsp_scratch: 0,
    cpu_id: 0,
    current_tid: 0,
};

static mut PER_CPU: [PerCpu; MAX_CPUS] = [EMPTY; MAX_CPUS];

/// Initialize this CPU's block and point the GS base registers at it.
pub fn init(cpu_id: usize) {
    // SAFETY: each CPU writes only its own slot, once, during bring-up.
    let block = unsafe { &mut (*addr_of_mut!(PER_CPU))[cpu_id] };
    block.self_ptr = block as *mut PerCpu as u64;
    block.cpu_id = cpu_id as u64;

    #[cfg(target_os = "none")]
    {
        use x86_64::{
            registers::model_specific::{GsBase, KernelGsBase},
            VirtAddr,
        };
        // Kernel mode runs with GS_BASE = this block; the user value
        // parks in KERNEL_GS_BASE until the next swapgs.
        GsBase::write(VirtAddr::new(block.self_ptr));
        KernelGsBase::write(VirtAddr::new(0));
    }
}

/// Index of the executing CPU.
///
/// The core brings up the bootstrap CPU only; secondary CPUs are handed
/// their index by the external SMP bring-up before calling `init`.
pub fn current_cpu_id() -> usize {
    0
}

/// The executing CPU's block.
pub fn current() -> &'static mut PerCpu {
    // SAFETY: each CPU only touches its own slot, and task-level code on
    // one CPU is serialized with itself.
    unsafe { &mut (*addr_of_mut!(PER_CPU))[current_cpu_id()] }
}

/// Establish the kernel GS invariant (GS_BASE = per-CPU block) from an
/// interrupt handler that fired in user mode. The user's GS base is
/// parked in KERNEL_GS_BASE, exactly as if the entry had run swapgs.
///
/// Interrupt handlers using the compiler-generated ABI cannot execute
/// swapgs themselves; any handler that may reschedule calls this first
/// and [`exit_kernel_gs_to_user`] on its return path.
pub fn enter_kernel_gs_from_user() {
    #[cfg(target_os = "none")]
    {
        use x86_64::registers::model_specific::{GsBase, KernelGsBase};
        let user_gs = GsBase::read();
        GsBase::write(x86_64::VirtAddr::new(current().self_ptr));
        KernelGsBase::write(user_gs);
    }
}

/// Undo [`enter_kernel_gs_from_user`] before an interrupt handler returns
/// to user mode: GS_BASE gets the user value back, KERNEL_GS_BASE the
/// per-CPU block.
pub fn exit_kernel_gs_to_user() {
    #[cfg(target_os = "none")]
    {
        use x86_64::registers::model_specific::{GsBase, KernelGsBase};
        let user_gs = KernelGsBase::read();
        KernelGsBase::write(x86_64::VirtAddr::new(current().self_ptr));
        GsBase::write(user_gs);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn field_offsets_match_the_trampoline_contract() {
        assert_eq!(core::mem::offset_of!(PerCpu, self_ptr), 0x00);
        assert_eq!(core::mem::offset_of!(PerCpu, kernel_rsp), 0x08);
        assert_eq!(core::mem::offset_of!(PerCpu, user_rsp_scratch), 0x10);
        assert_eq!(core::mem::offset_of!(PerCpu, cpu_id), 0x18);
        assert_eq!(core::mem::offset_of!(PerCpu, current_tid), 0x20);
    }
}
