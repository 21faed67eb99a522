//! Process lifecycle: creation, fork, exec, exit/wait, signals.

pub mod creation;
pub mod exec;
pub mod exit;
pub mod fork;
pub mod signal;
pub mod signal_delivery;

use crate::{mm::vas::AddressSpace, sched};

/// Task id of init; orphans are re-parented here.
pub const INIT_TID: sched::TaskId = 1;

/// Run `f` against the current task's address space, if it has one
/// (kernel tasks do not).
pub fn with_current_space<R>(f: impl FnOnce(&mut AddressSpace) -> R) -> Option<R> {
    let task = sched::current_task();
    let space_ref = task.space.lock().clone()?;
    let mut space = space_ref.lock();
    Some(f(&mut space))
}

/// First ring-3 entry for a fresh user task (fork child or exec'd init):
/// copies the saved register frame onto this kernel stack and drops to
/// user mode. The scheduler already activated the task's address space.
pub fn enter_user_current() -> ! {
    let task = sched::current_task();
    let frame = *task.frame.lock();
    // SAFETY: the frame was built by creation/fork/exec with ring-3
    // selectors and an rip/rsp inside the task's own address space, which
    // is active.
    unsafe { crate::arch::context::enter_user(&frame) }
}
