//! Task management and scheduling

pub mod scheduler;
pub mod table;
pub mod task;

pub use scheduler::{
    block_current, block_current_timeout, current_task, current_tid, idle_loop, on_tick, preempt,
    schedule, sleep_until, unblock, yield_current, BlockOutcome, Scheduler,
};
pub use table::TaskTable;
pub use task::{KernelStack, Task, TaskId, TaskKind, TaskState};

use crate::arch::percpu;

fn idle_body() {
    // The idle task never actually runs this; the boot context adopts the
    // idle slot with its live stack. Present so the slot has a valid kind.
    idle_loop();
}

/// Claim the idle slot for this CPU and adopt the boot context as the
/// idle task. Task id 0 is the bootstrap CPU's idle task, so the first
/// real task (init) gets id 1.
pub fn init_cpu(cpu: usize) {
    let tasks = crate::kctx::tasks();
    let idle = tasks
        .insert_with(|id| {
            Task::new(
                id,
                alloc::format!("idle{}", cpu),
                TaskKind::Kernel(idle_body),
                0,
                KernelStack::Boot,
                0,
                crate::cap::CapSets::kernel(),
                crate::fs::fd::FdTable::new(),
                crate::process::signal::SignalState::new(),
            )
        })
        .expect("task table cannot be full during bring-up");

    let t = tasks.get(idle).expect("idle task just inserted");
    t.set_state(TaskState::Running);
    crate::kctx::scheduler().adopt_idle(cpu, idle);
    percpu::current().current_tid = idle;

    log::info!("sched: cpu {} online, idle task {}", cpu, idle);
}
