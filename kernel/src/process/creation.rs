//! Task creation
//!
//! Kernel threads get a stack and an entry function. User processes
//! additionally get an address space with the program image loaded, a
//! stack VMA, and the System V AMD64 process-entry stack: argc, argv,
//! envp, and an auxiliary vector, with the string data above them.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::{
    arch::context::{self, TrapFrame},
    cap::CapSets,
    config,
    error::{KernelError, KernelResult},
    fs::fd::{FdEntry, FdObject, FdTable, O_RDONLY, O_WRONLY},
    mm::{
        page_fault,
        vas::{AddressSpace, VmaFlags},
        VirtualAddress, PAGE_SIZE,
    },
    process::signal::SignalState,
    sched::{self, KernelStack, Task, TaskId, TaskKind, TaskState},
};

/// Auxiliary vector tags placed on the entry stack.
const AT_NULL: u64 = 0;
const AT_PAGESZ: u64 = 6;
const AT_ENTRY: u64 = 9;

/// Build a task skeleton around `kind` and insert it into the table.
/// The task starts in Unused; callers finish setup and mark it Ready.
pub fn new_task(
    name: String,
    kind: TaskKind,
    parent: TaskId,
    caps: CapSets,
    fds: FdTable,
    signals: SignalState,
) -> KernelResult<TaskId> {
    let kstack = KernelStack::allocate();
    let stack_top = kstack.top();
    // SAFETY: the stack was just allocated and is exclusively ours.
    let initial_rsp = unsafe {
        context::forge_initial_stack(
            stack_top,
            sched::scheduler::task_entry_trampoline as usize as u64,
        )
    };

    let id = crate::kctx::tasks().insert_with(|id| {
        Task::new(id, name, kind, parent, kstack, initial_rsp, caps, fds, signals)
    })?;
    Ok(id)
}

/// Spawn a kernel thread, immediately Ready.
pub fn create_kernel_task(name: &str, entry: fn()) -> KernelResult<TaskId> {
    let id = new_task(
        String::from(name),
        TaskKind::Kernel(entry),
        sched::current_tid(),
        CapSets::kernel(),
        FdTable::new(),
        SignalState::new(),
    )?;
    let task = crate::kctx::tasks().get(id).expect("task just inserted");
    task.set_state(TaskState::Ready);
    crate::kctx::scheduler().enqueue(id, crate::arch::percpu::current_cpu_id());
    log::debug!("created kernel task {} ({})", id, task.name);
    Ok(id)
}

/// Build a user process from an executable image and enqueue it Ready.
///
/// Used by bootstrap for init; everything later comes from fork/exec.
pub fn create_user(
    name: &str,
    image: &[u8],
    parent: TaskId,
    argv: &[&str],
    envp: &[&str],
) -> KernelResult<TaskId> {
    let mut space = AddressSpace::new_user().map_err(KernelError::Map)?;
    let loaded = super::exec::load_image(&mut space, image)?;

    // Stack VMA under the canonical top.
    let stack_base = config::USER_STACK_TOP - config::USER_STACK_SIZE as u64;
    space
        .map_anonymous(
            stack_base,
            config::USER_STACK_SIZE as u64,
            VmaFlags::READ | VmaFlags::WRITE,
        )
        .map_err(KernelError::Map)?;

    let sp = build_entry_stack(&mut space, argv, envp, loaded.entry)?;
    space.brk_start = loaded.brk;
    space.brk_end = loaded.brk;

    let mut fds = FdTable::new();
    let console = crate::fs::console::Console::new();
    fds.alloc(FdEntry::new(FdObject::Device(console.clone()), O_RDONLY))
        .map_err(KernelError::Fs)?;
    fds.alloc(FdEntry::new(FdObject::Device(console.clone()), O_WRONLY))
        .map_err(KernelError::Fs)?;
    fds.alloc(FdEntry::new(FdObject::Device(console), O_WRONLY))
        .map_err(KernelError::Fs)?;

    let id = new_task(
        String::from(name),
        TaskKind::User,
        parent,
        CapSets::kernel(),
        fds,
        SignalState::new(),
    )?;
    let task = crate::kctx::tasks().get(id).expect("task just inserted");
    *task.frame.lock() = TrapFrame::new_user(loaded.entry, sp);
    *task.space.lock() = Some(Arc::new(spin::Mutex::new(space)));
    task.set_state(TaskState::Ready);
    crate::kctx::scheduler().enqueue(id, crate::arch::percpu::current_cpu_id());

    log::info!("created user task {} ({}), entry {:#x}", id, name, loaded.entry);
    Ok(id)
}

/// Write `data` at `va` in a (possibly inactive) address space, faulting
/// destination pages in through the demand-paging path and copying via
/// the physical window.
pub fn write_to_space(space: &mut AddressSpace, va: u64, data: &[u8]) -> KernelResult<()> {
    let mut written = 0;
    while written < data.len() {
        let addr = va + written as u64;
        let page = VirtualAddress::new(addr).align_down();
        page_fault::resolve(space, addr, true).map_err(|_| KernelError::BadAddress { addr })?;
        let (frame, _) = space
            .translate(page)
            .ok_or(KernelError::BadAddress { addr })?;
        let page_off = (addr - page.as_u64()) as usize;
        let chunk = (PAGE_SIZE - page_off).min(data.len() - written);
        // SAFETY: the frame backs a page just faulted in for this space;
        // the HHDM window covers it, and `chunk` stays inside the page.
        unsafe {
            let dst = crate::mm::phys_to_virt(frame.as_addr()).add(page_off);
            core::ptr::copy_nonoverlapping(data.as_ptr().add(written), dst, chunk);
        }
        written += chunk;
    }
    Ok(())
}

/// Lay out the System V AMD64 entry stack and return the initial RSP.
///
/// Top-down: string data, padding to 16 bytes, auxv (AT_ENTRY, AT_PAGESZ,
/// AT_NULL), envp pointers + NULL, argv pointers + NULL, argc. RSP points
/// at argc and is 16-byte aligned.
pub fn build_entry_stack(
    space: &mut AddressSpace,
    argv: &[&str],
    envp: &[&str],
    entry: u64,
) -> KernelResult<u64> {
    let mut sp = config::USER_STACK_TOP;

    let push_str = |space: &mut AddressSpace, sp: &mut u64, s: &str| -> KernelResult<u64> {
        *sp -= s.len() as u64 + 1;
        write_to_space(space, *sp, s.as_bytes())?;
        write_to_space(space, *sp + s.len() as u64, &[0])?;
        Ok(*sp)
    };

    let mut argv_ptrs = Vec::with_capacity(argv.len());
    for arg in argv {
        argv_ptrs.push(push_str(space, &mut sp, arg)?);
    }
    let mut envp_ptrs = Vec::with_capacity(envp.len());
    for env in envp {
        envp_ptrs.push(push_str(space, &mut sp, env)?);
    }

    // Vector area: argc + argv+NULL + envp+NULL + 3 auxv pairs.
    let words = 1 + argv_ptrs.len() + 1 + envp_ptrs.len() + 1 + 3 * 2;
    sp &= !0xF;
    if words % 2 == 1 {
        sp -= 8;
    }
    sp -= (words * 8) as u64;

    let mut vector = Vec::with_capacity(words);
    vector.push(argv_ptrs.len() as u64);
    vector.extend_from_slice(&argv_ptrs);
    vector.push(0);
    vector.extend_from_slice(&envp_ptrs);
    vector.push(0);
    vector.extend_from_slice(&[AT_PAGESZ, PAGE_SIZE as u64, AT_ENTRY, entry, AT_NULL, 0]);

    let mut bytes = Vec::with_capacity(words * 8);
    for word in &vector {
        bytes.extend_from_slice(&word.to_ne_bytes());
    }
    write_to_space(space, sp, &bytes)?;

    debug_assert_eq!(sp % 16, 0);
    Ok(sp)
}
