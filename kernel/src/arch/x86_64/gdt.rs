//! GDT, TSS, and segment selectors
//!
//! Selector layout is fixed by the SYSCALL/SYSRET MSR contract: SYSRET
//! loads CS from STAR+16 and SS from STAR+8, so user data must sit
//! directly below user code. Kernel code/data likewise sit in the order
//! SYSCALL expects.
//!
//! | 0x08 | kernel code |
//! | 0x10 | kernel data |
//! | 0x18 | user data   |
//! | 0x20 | user code   |
//! | 0x28 | TSS         |

use core::ptr::addr_of;

use lazy_static::lazy_static;
use x86_64::{
    instructions::{
        segmentation::{Segment, CS, DS, ES, SS},
        tables::load_tss,
    },
    registers::segmentation::SegmentSelector,
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable},
        tss::TaskStateSegment,
    },
    PrivilegeLevel, VirtAddr,
};

/// IST slot used by the double-fault handler.
pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

const IST_STACK_SIZE: usize = 4096 * 5;

/// Dedicated stack for double faults; a corrupt kernel stack must not take
/// the fault handler down with it.
static mut DOUBLE_FAULT_STACK: [u8; IST_STACK_SIZE] = [0; IST_STACK_SIZE];

static mut TSS: TaskStateSegment = TaskStateSegment::new();

pub struct Selectors {
    pub kernel_code: SegmentSelector,
    pub kernel_data: SegmentSelector,
    pub user_data: SegmentSelector,
    pub user_code: SegmentSelector,
    pub tss: SegmentSelector,
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        // SAFETY: TSS is only mutated through `set_kernel_stack` below,
        // which rewrites a single u64 slot; the descriptor reference
        // stays valid for the static's lifetime.
        let tss_ref: &'static TaskStateSegment = unsafe { &*addr_of!(TSS) };

        let mut gdt = GlobalDescriptorTable::new();
        let kernel_code = gdt.append(Descriptor::kernel_code_segment());
        let kernel_data = gdt.append(Descriptor::kernel_data_segment());
        let user_data = gdt.append(Descriptor::user_data_segment());
        let user_code = gdt.append(Descriptor::user_code_segment());
        let tss = gdt.append(Descriptor::tss_segment(tss_ref));
        (
            gdt,
            Selectors {
                kernel_code,
                kernel_data,
                user_data,
                user_code,
                tss,
            },
        )
    };
}

pub fn selectors() -> &'static Selectors {
    &GDT.1
}

/// User-mode CS selector value (RPL 3), as pushed into interrupt frames.
pub fn user_code_selector() -> u16 {
    SegmentSelector::new(GDT.1.user_code.index(), PrivilegeLevel::Ring3).0
}

/// User-mode SS selector value (RPL 3).
pub fn user_data_selector() -> u16 {
    SegmentSelector::new(GDT.1.user_data.index(), PrivilegeLevel::Ring3).0
}

pub fn init() {
    {
        // SAFETY: single-threaded bootstrap; nothing reads the TSS before
        // `load_tss` below.
        unsafe {
            let stack_top = VirtAddr::from_ptr(addr_of!(DOUBLE_FAULT_STACK)) + IST_STACK_SIZE as u64;
            let tss = &mut *core::ptr::addr_of_mut!(TSS);
            tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = stack_top;
        }
    }

    GDT.0.load();
    // SAFETY: the selectors index descriptors appended to the GDT loaded
    // on the previous line.
    unsafe {
        CS::set_reg(GDT.1.kernel_code);
        SS::set_reg(GDT.1.kernel_data);
        DS::set_reg(SegmentSelector(0));
        ES::set_reg(SegmentSelector(0));
        load_tss(GDT.1.tss);
    }
}

/// Point RSP0 at the stack the CPU switches to on a ring-3 → ring-0
/// transition. Called on every context switch with the incoming task's
/// kernel stack top.
pub fn set_kernel_stack(top: u64) {
    // SAFETY: a single u64 store; the CPU reads RSP0 only at privilege
    // transitions, which cannot race this store on the same CPU.
    unsafe {
        let tss = &mut *core::ptr::addr_of_mut!(TSS);
        tss.privilege_stack_table[0] = VirtAddr::new(top);
    }
}
