//! Termination and reaping
//!
//! `exit` marks the task Terminated and leaves the corpse for the parent:
//! `wait`/`waitpid` release the slot, destroy the address space, and free
//! the kernel stack. Orphans are re-parented to init. The wait status
//! word carries the exit code or, for signal deaths, the signal number.

use crate::{
    error::{KernelResult, SchedError},
    sched::{self, BlockOutcome, TaskId, TaskState},
};

use super::{signal, INIT_TID};

/// Shared teardown for any path that ends the current task. Never
/// returns: the final schedule() switches away from a Terminated task.
pub fn exit_current(code: u32) -> ! {
    finish_current(signal::exit_status_word(code));
}

/// Current task dies from a fatal signal (unresolvable fault, default
/// disposition of a termination signal).
pub fn fatal_signal_current(sig: u32) -> ! {
    finish_current(signal::signal_status_word(sig));
}

fn finish_current(status: u32) -> ! {
    let task = sched::current_task();
    log::debug!("task {} exiting, status {:#x}", task.id, status);

    // Close descriptors now: pipe peers must observe EOF/BrokenPipe even
    // before the parent gets around to reaping.
    task.fds.lock().close_all();

    release_waits(task.id);
    reparent_children(task.id);

    task.exit_status
        .store(status, core::sync::atomic::Ordering::Release);
    task.set_state(TaskState::Terminated);

    notify_parent(task.parent_id());

    sched::schedule();
    unreachable!("a terminated task was scheduled again");
}

/// Terminate another task (kill with a fatal disposition). The victim's
/// heavier teardown happens at reap time; only what its peers can
/// observe (descriptors, wait queues) is released here.
pub fn terminate_with_signal(tid: TaskId, sig: u32) {
    let Some(task) = crate::kctx::tasks().get(tid) else {
        return;
    };
    if task.state() == TaskState::Terminated {
        return;
    }
    log::debug!("task {} killed by signal {}", tid, sig);

    task.fds.lock().close_all();
    release_waits(tid);
    reparent_children(tid);

    task.exit_status.store(
        signal::signal_status_word(sig),
        core::sync::atomic::Ordering::Release,
    );
    task.set_state(TaskState::Terminated);

    notify_parent(task.parent_id());
}

/// Drop the task from every structure that might still name it as a
/// waiter.
fn release_waits(tid: TaskId) {
    crate::kctx::futexes().remove_task(tid);
    crate::kctx::ports().forget_waiter(tid);
    crate::time::unregister_sleeper(tid);
}

fn reparent_children(parent: TaskId) {
    let tasks = crate::kctx::tasks();
    tasks.for_each(|t| {
        if t.parent_id() == parent && t.id != parent {
            t.set_parent(INIT_TID);
        }
    });
    // Init may have inherited zombies to reap.
    sched::unblock(INIT_TID);
}

fn notify_parent(parent: TaskId) {
    if let Some(p) = crate::kctx::tasks().get(parent) {
        // SIGCHLD is default-ignored; the pending bit is informational.
        let _ = p.signals.lock().set_pending(signal::SIGCHLD);
    }
    sched::unblock(parent);
}

/// Reap one terminated child. `filter` of `None` means any child
/// (wait); `Some(id)` waits for that specific child (waitpid).
///
/// Returns `(child_id, status_word)`. Blocks until a matching child
/// terminates; fails with NoChildren when no matching child exists at
/// all, WouldBlock for `nohang` with only live children, and Interrupted
/// when a signal arrives first.
pub fn wait_for_child(filter: Option<TaskId>, nohang: bool) -> KernelResult<(TaskId, u32)> {
    let me = sched::current_tid();
    let tasks = crate::kctx::tasks();

    loop {
        let mut found_any = false;
        let mut reapable: Option<TaskId> = None;

        tasks.for_each(|t| {
            if t.parent_id() != me || t.id == me {
                return;
            }
            if let Some(want) = filter {
                if t.id != want {
                    return;
                }
            }
            found_any = true;
            if t.state() == TaskState::Terminated && reapable.is_none() {
                reapable = Some(t.id);
            }
        });

        if let Some(child_id) = reapable {
            let status = reap(child_id);
            return Ok((child_id, status));
        }
        if !found_any {
            return Err(SchedError::NoChildren.into());
        }
        if nohang {
            return Err(SchedError::WouldBlock.into());
        }

        match sched::block_current() {
            BlockOutcome::Interrupted => {
                return Err(crate::error::KernelError::Interrupted);
            }
            _ => continue,
        }
    }
}

/// Release a terminated child's slot and its remaining resources.
fn reap(child_id: TaskId) -> u32 {
    let tasks = crate::kctx::tasks();
    let Some(child) = tasks.remove(child_id) else {
        return 0;
    };
    let status = child
        .exit_status
        .load(core::sync::atomic::Ordering::Acquire);

    // Address space teardown: frames released per VMA, user-half tables
    // freed, kernel half untouched. Shared-memory mappings drop their
    // region refcounts first so region destruction can observe zero.
    crate::kctx::shmem().detach_task(child_id);
    if let Some(space_ref) = child.space.lock().take() {
        if let Ok(mutex) = alloc::sync::Arc::try_unwrap(space_ref) {
            mutex.into_inner().destroy();
        }
    }
    crate::kctx::ports().release_owned_by(child_id);

    // The kernel stack frees with the task box.
    drop(child);
    log::debug!("reaped task {}, status {:#x}", child_id, status);
    status
}
