//! fork
//!
//! Clones the caller: address space copy-on-write (every present user
//! page downgraded to read-only and its frame shared), shallow fd-table
//! copy with refcounts bumped, inherited dispositions and capability
//! subset, duplicated register frame with the child's return value forced
//! to 0. The parent's return value is the child id.

use alloc::sync::Arc;

use crate::{
    arch::context::TrapFrame,
    error::{KernelError, KernelResult},
    sched::{self, TaskKind, TaskState},
};

pub fn fork(parent_frame: &TrapFrame) -> KernelResult<sched::TaskId> {
    let parent = sched::current_task();

    let parent_space = parent
        .space
        .lock()
        .clone()
        .ok_or(KernelError::InvalidArgument)?;
    let child_space = parent_space.lock().clone_cow().map_err(KernelError::Map)?;

    let child_fds = parent.fds.lock().clone_for_fork();
    let child_signals = parent.signals.lock().inherited();
    let child_caps = parent.caps.lock().inherited();

    let id = super::creation::new_task(
        parent.name.clone(),
        TaskKind::User,
        parent.id,
        child_caps,
        child_fds,
        child_signals,
    )?;

    let child = crate::kctx::tasks().get(id).expect("task just inserted");

    let mut frame = *parent_frame;
    frame.rax = 0;
    *child.frame.lock() = frame;
    child.fs_base.store(
        parent.fs_base.load(core::sync::atomic::Ordering::Relaxed),
        core::sync::atomic::Ordering::Relaxed,
    );
    child.gs_base.store(
        parent.gs_base.load(core::sync::atomic::Ordering::Relaxed),
        core::sync::atomic::Ordering::Relaxed,
    );

    // The clone carried every shared-region mapping into the child;
    // record the child in the region table so the refcount keeps
    // matching the mapped set.
    crate::kctx::shmem().inherit_mappings(&child_space, id);

    *child.space.lock() = Some(Arc::new(spin::Mutex::new(child_space)));

    child.set_state(TaskState::Ready);
    crate::kctx::scheduler().enqueue(id, crate::arch::percpu::current_cpu_id());

    log::debug!("task {} forked child {}", parent.id, id);
    Ok(id)
}
