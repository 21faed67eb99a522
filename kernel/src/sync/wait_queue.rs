//! Wait queues
//!
//! A wait queue is a FIFO of blocked task ids. Sleeping is a two-step
//! protocol: the caller registers itself, re-checks its condition, and
//! only then blocks; wakers that race the registration are caught by the
//! scheduler's wake-pending flag, so no wakeup is ever lost.

use alloc::collections::VecDeque;

use spin::Mutex;

use crate::sched::{self, BlockOutcome, TaskId};

pub struct WaitQueue {
    waiters: Mutex<VecDeque<TaskId>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueue the current task as a waiter. Must be followed by a
    /// [`sched::block_current`] (or a timeout variant) after the caller
    /// re-checks its wakeup condition.
    pub fn register_current(&self) {
        let tid = sched::current_tid();
        let mut waiters = self.waiters.lock();
        if !waiters.contains(&tid) {
            waiters.push_back(tid);
        }
    }

    /// Drop the current task from the queue (timeout or signal abort).
    pub fn unregister_current(&self) {
        let tid = sched::current_tid();
        self.waiters.lock().retain(|&t| t != tid);
    }

    /// Wake the longest-waiting live task. Waiters that died while queued
    /// are skipped so their wakeup is not lost.
    pub fn wake_one(&self) -> bool {
        loop {
            let tid = self.waiters.lock().pop_front();
            match tid {
                Some(tid) => {
                    if sched::unblock(tid) {
                        return true;
                    }
                }
                None => return false,
            }
        }
    }

    /// Wake every waiter.
    pub fn wake_all(&self) {
        let drained: VecDeque<TaskId> = core::mem::take(&mut *self.waiters.lock());
        for tid in drained {
            sched::unblock(tid);
        }
    }

    /// Remove a specific task (used by the reaper when a waiter dies).
    pub fn remove(&self, tid: TaskId) {
        self.waiters.lock().retain(|&t| t != tid);
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    /// Register, block, and clean up. The caller must have re-checked its
    /// condition between its own lock release and this call.
    pub fn sleep(&self) -> BlockOutcome {
        self.sleep_timeout(None)
    }

    /// Like [`sleep`](Self::sleep) with an optional relative timeout in
    /// milliseconds.
    pub fn sleep_timeout(&self, timeout_ms: Option<u64>) -> BlockOutcome {
        self.register_current();
        let outcome = match timeout_ms {
            None => sched::block_current(),
            Some(ms) => sched::block_current_timeout(ms),
        };
        if outcome != BlockOutcome::Normal {
            // Timed out or interrupted: nobody popped us.
            self.unregister_current();
        }
        outcome
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
