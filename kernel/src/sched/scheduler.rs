//! Round-robin scheduler
//!
//! Priority-less round robin per CPU: one ready FIFO per CPU plus the
//! current-task slot. All state transitions happen under the scheduler
//! lock with interrupts disabled, which is what makes the block/unblock
//! ordering guarantee hold: a wake that races the block decision either
//! sees the task not yet Blocked (and leaves a wake-pending mark the
//! blocker consumes) or sees it Blocked and enqueues it.
//!
//! In-kernel execution is cooperative; the timer preempts ring 3 only.

use alloc::collections::VecDeque;
use core::sync::atomic::Ordering;

use spin::Mutex;

use super::task::{Task, TaskId, TaskKind, TaskState};
use crate::{
    arch::{context, gdt, percpu},
    config::MAX_CPUS,
    sync::with_irqs_disabled,
};

/// Outcome of a blocking transition, reported to the primitive that slept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Woken by `unblock`.
    Normal,
    /// The armed deadline elapsed first.
    TimedOut,
    /// A deliverable signal is pending; the syscall should fail with
    /// Interrupted.
    Interrupted,
}

struct SchedState {
    ready: [VecDeque<TaskId>; MAX_CPUS],
    current: [TaskId; MAX_CPUS],
    idle: [TaskId; MAX_CPUS],
}

pub struct Scheduler {
    state: Mutex<SchedState>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedState {
                ready: [const { VecDeque::new() }; MAX_CPUS],
                current: [0; MAX_CPUS],
                idle: [0; MAX_CPUS],
            }),
        }
    }

    /// Record this CPU's idle task (the boot context) and make it current.
    pub fn adopt_idle(&self, cpu: usize, idle: TaskId) {
        let mut state = self.state.lock();
        state.idle[cpu] = idle;
        state.current[cpu] = idle;
        percpu::current().current_tid = idle;
    }

    fn enqueue_locked(state: &mut SchedState, cpu: usize, tid: TaskId) {
        if !state.ready[cpu].contains(&tid) {
            state.ready[cpu].push_back(tid);
        }
    }

    /// Make a task runnable on a CPU's queue.
    pub fn enqueue(&self, tid: TaskId, cpu: usize) {
        with_irqs_disabled(|| {
            let mut state = self.state.lock();
            Self::enqueue_locked(&mut state, cpu, tid);
        });
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn sched() -> &'static Scheduler {
    crate::kctx::scheduler()
}

fn task(tid: TaskId) -> Option<&'static Task> {
    crate::kctx::tasks().get(tid)
}

/// Id of the task running on this CPU.
pub fn current_tid() -> TaskId {
    percpu::current().current_tid
}

/// The task running on this CPU.
pub fn current_task() -> &'static Task {
    task(current_tid()).expect("current task id always names a live task")
}

/// Pick the next runnable task and switch to it. The caller has already
/// put the outgoing task in its target state (Ready + enqueued, Blocked,
/// Sleeping, or Terminated). No-op when the outgoing task is the pick.
pub fn schedule() {
    with_irqs_disabled(|| {
        let cpu = percpu::current_cpu_id();
        let (prev_tid, next_tid) = {
            let mut state = sched().state.lock();
            let prev = state.current[cpu];
            // Skip stale entries: a task terminated while queued stays in
            // the FIFO until it surfaces here.
            let next = loop {
                match state.ready[cpu].pop_front() {
                    Some(tid) => match task(tid) {
                        Some(t) if t.state() == TaskState::Ready => break tid,
                        _ => continue,
                    },
                    None => break state.idle[cpu],
                }
            };
            if next == prev {
                // Either prev re-enqueued itself and won again, or the
                // queue is empty and prev is the idle task.
                if let Some(t) = task(prev) {
                    if t.state() == TaskState::Ready {
                        t.set_state(TaskState::Running);
                    }
                }
                return;
            }
            // The idle task is never queued; leaving it Running would
            // put two Running tasks on this CPU.
            if prev == state.idle[cpu] {
                if let Some(t) = task(prev) {
                    t.set_state(TaskState::Ready);
                }
            }
            state.current[cpu] = next;
            (prev, next)
        };

        let next = task(next_tid).expect("ready queue only holds live tasks");
        next.set_state(TaskState::Running);
        next.reset_time_slice();

        let prev = task(prev_tid).expect("outgoing task still occupies its slot");
        switch_to(prev, next);
        // Execution resumes here when `prev` is next scheduled.
    });
}

/// Arch glue for one switch: kernel stack bookkeeping, address space,
/// user segment bases, then the register switch.
fn switch_to(prev: &Task, next: &Task) {
    let top = next.kstack.top();
    if top != 0 {
        gdt::set_kernel_stack(top);
        percpu::current().kernel_rsp = top;
    }
    percpu::current().current_tid = next.id;

    if let Some(space) = next.space.lock().as_ref() {
        space.lock().switch_to();
    }

    #[cfg(target_os = "none")]
    {
        use x86_64::{
            registers::model_specific::{FsBase, KernelGsBase},
            VirtAddr,
        };
        FsBase::write(VirtAddr::new(next.fs_base.load(Ordering::Relaxed)));
        // The user's GS base parks in KERNEL_GS_BASE while in kernel.
        KernelGsBase::write(VirtAddr::new(next.gs_base.load(Ordering::Relaxed)));
    }

    // SAFETY: both slots belong to live tasks; interrupts are disabled;
    // `next.context_rsp` was produced by a previous switch or forged at
    // creation.
    unsafe {
        context::switch_context(prev.context_rsp.as_ptr(), next.context_rsp.get());
    }
}

/// Voluntarily rotate to the back of the ready queue.
pub fn yield_current() {
    with_irqs_disabled(|| {
        let cpu = percpu::current_cpu_id();
        let tid = current_tid();
        {
            let mut state = sched().state.lock();
            if tid != state.idle[cpu] {
                if let Some(t) = task(tid) {
                    t.set_state(TaskState::Ready);
                }
                Scheduler::enqueue_locked(&mut state, cpu, tid);
            }
        }
        schedule();
    });
}

/// Timer preemption: same rotation as yield, entered from the tick
/// handler when the interrupted context was ring 3.
pub fn preempt() {
    yield_current();
}

/// Transition the current task to Blocked and switch away. Returns when
/// somebody calls [`unblock`] (or a deliverable signal arrives first).
pub fn block_current() -> BlockOutcome {
    block_with_state(TaskState::Blocked, 0)
}

/// Blocked with a deadline: the tick handler wakes the task when the
/// deadline passes.
pub fn block_current_timeout(timeout_ms: u64) -> BlockOutcome {
    let deadline = crate::time::ticks_after_ms(timeout_ms);
    block_with_state(TaskState::Sleeping, deadline)
}

/// Sleep until an absolute tick (nanosleep).
pub fn sleep_until(deadline: u64) -> BlockOutcome {
    block_with_state(TaskState::Sleeping, deadline)
}

fn block_with_state(state: TaskState, deadline: u64) -> BlockOutcome {
    let t = current_task();

    let committed = with_irqs_disabled(|| {
        let _guard = sched().state.lock();
        // Wake raced ahead of the block decision: consume it and do not
        // block at all.
        if t.wake_pending.swap(false, Ordering::AcqRel) {
            return false;
        }
        if t.signals.lock().has_deliverable() {
            return false;
        }
        t.sleep_deadline.store(deadline, Ordering::Release);
        t.set_state(state);
        true
    });

    if !committed {
        return if t.signals.lock().has_deliverable() {
            BlockOutcome::Interrupted
        } else {
            BlockOutcome::Normal
        };
    }

    if deadline != 0 {
        crate::time::register_sleeper(t.id, deadline);
    }
    schedule();

    // Woken: classify why.
    t.sleep_deadline.store(0, Ordering::Release);
    if deadline != 0 {
        crate::time::unregister_sleeper(t.id);
    }
    if t.signals.lock().has_deliverable() {
        BlockOutcome::Interrupted
    } else if deadline != 0 && crate::time::ticks() >= deadline {
        BlockOutcome::TimedOut
    } else {
        BlockOutcome::Normal
    }
}

/// Wake a task. Safe against the lost-wakeup race: called under the
/// scheduler lock, it either observes the task already Blocked/Sleeping
/// (and enqueues it) or marks wake-pending for a block still in flight.
///
/// Returns false when `tid` no longer names a live task, so wait queues
/// can retry with their next waiter instead of losing the wakeup.
pub fn unblock(tid: TaskId) -> bool {
    with_irqs_disabled(|| {
        let mut state = sched().state.lock();
        let Some(t) = task(tid) else {
            return false;
        };
        match t.state() {
            TaskState::Blocked | TaskState::Sleeping => {
                t.set_state(TaskState::Ready);
                Scheduler::enqueue_locked(&mut state, percpu::current_cpu_id(), tid);
                true
            }
            TaskState::Ready | TaskState::Running => {
                t.wake_pending.store(true, Ordering::Release);
                true
            }
            TaskState::Terminated | TaskState::Unused => false,
        }
    })
}

/// Tick bookkeeping: burn one slice tick of the current task. Returns
/// true when the slice expired (caller decides whether to preempt).
pub fn on_tick() -> bool {
    let t = current_task();
    let left = t.time_slice.load(Ordering::Relaxed);
    if left <= 1 {
        t.reset_time_slice();
        true
    } else {
        t.time_slice.store(left - 1, Ordering::Relaxed);
        false
    }
}

/// Entry point of every fresh task after its first context switch.
pub extern "C" fn task_entry_trampoline() {
    let t = current_task();
    match t.kind {
        TaskKind::Kernel(entry) => {
            entry();
            crate::process::exit::exit_current(0);
        }
        TaskKind::User => {
            crate::process::enter_user_current();
        }
    }
}

/// The boot context's tail: become the idle loop. Interrupts are enabled
/// only inside the halt, so tick-driven wakeups still run.
pub fn idle_loop() -> ! {
    loop {
        let runnable = with_irqs_disabled(|| {
            let cpu = percpu::current_cpu_id();
            !sched().state.lock().ready[cpu].is_empty()
        });
        if runnable {
            schedule();
        } else {
            crate::arch::wait_for_interrupt();
        }
    }
}
