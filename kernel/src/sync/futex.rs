//! Futexes
//!
//! Wait/wake on a 32-bit user word, keyed by (address-space id, user VA)
//! so identical addresses in different processes never collide. The wait
//! path re-reads the word under the table lock, which closes the race
//! against a wake between the user-space check and the kernel block.

use alloc::collections::{BTreeMap, VecDeque};

use spin::Mutex;

use crate::{
    error::{IpcError, KernelError},
    sched::{self, BlockOutcome, TaskId},
};

/// Futex operation codes (syscall `op` argument).
pub const FUTEX_WAIT: u64 = 0;
pub const FUTEX_WAKE: u64 = 1;

type FutexKey = (u64, u64);

pub struct FutexTable {
    buckets: Mutex<BTreeMap<FutexKey, VecDeque<TaskId>>>,
}

impl FutexTable {
    pub const fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Block the caller while `*uaddr == expected`.
    ///
    /// `read_word` re-reads the user word; it runs under the table lock so
    /// a waker cannot slip between the check and the registration.
    pub fn wait(
        &self,
        space_id: u64,
        uaddr: u64,
        expected: u32,
        current_value: u32,
        timeout_ms: Option<u64>,
    ) -> Result<(), KernelError> {
        let key = (space_id, uaddr);
        let tid = sched::current_tid();
        {
            let mut buckets = self.buckets.lock();
            if current_value != expected {
                // Linux EAGAIN semantics: the word already changed.
                return Err(KernelError::Sched(crate::error::SchedError::WouldBlock));
            }
            buckets.entry(key).or_default().push_back(tid);
        }

        let outcome = match timeout_ms {
            None => sched::block_current(),
            Some(ms) => sched::block_current_timeout(ms),
        };

        match outcome {
            BlockOutcome::Normal => Ok(()),
            BlockOutcome::TimedOut => {
                self.remove_waiter(key, tid);
                Err(IpcError::Timeout.into())
            }
            BlockOutcome::Interrupted => {
                self.remove_waiter(key, tid);
                Err(IpcError::Interrupted.into())
            }
        }
    }

    /// Wake up to `max` waiters on the word. Returns how many woke.
    pub fn wake(&self, space_id: u64, uaddr: u64, max: usize) -> usize {
        let key = (space_id, uaddr);
        let mut woken = alloc::vec::Vec::new();
        {
            let mut buckets = self.buckets.lock();
            if let Some(queue) = buckets.get_mut(&key) {
                for _ in 0..max {
                    match queue.pop_front() {
                        Some(tid) => woken.push(tid),
                        None => break,
                    }
                }
                if queue.is_empty() {
                    buckets.remove(&key);
                }
            }
        }
        for tid in &woken {
            sched::unblock(*tid);
        }
        woken.len()
    }

    /// Drop a task from every bucket (task teardown).
    pub fn remove_task(&self, tid: TaskId) {
        let mut buckets = self.buckets.lock();
        buckets.retain(|_, queue| {
            queue.retain(|&t| t != tid);
            !queue.is_empty()
        });
    }

    fn remove_waiter(&self, key: FutexKey, tid: TaskId) {
        let mut buckets = self.buckets.lock();
        if let Some(queue) = buckets.get_mut(&key) {
            queue.retain(|&t| t != tid);
            if queue.is_empty() {
                buckets.remove(&key);
            }
        }
    }

    /// Waiters currently parked on the word.
    pub fn waiter_count(&self, space_id: u64, uaddr: u64) -> usize {
        self.buckets
            .lock()
            .get(&(space_id, uaddr))
            .map_or(0, |q| q.len())
    }
}

impl Default for FutexTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn value_mismatch_refuses_to_wait() {
        let table = FutexTable::new();
        let err = table
            .wait(1, 0x1000, 7, 8, None)
            .expect_err("changed word must not block");
        assert!(matches!(
            err,
            KernelError::Sched(crate::error::SchedError::WouldBlock)
        ));
        assert_eq!(table.waiter_count(1, 0x1000), 0);
    }

    #[test]
    fn wake_on_empty_word_wakes_nobody() {
        let table = FutexTable::new();
        assert_eq!(table.wake(1, 0x1000, 16), 0);
    }

    #[test]
    fn keys_are_scoped_by_address_space() {
        let table = FutexTable::new();
        // Same virtual address, different spaces: independent buckets.
        assert_eq!(table.waiter_count(1, 0x2000), 0);
        assert_eq!(table.waiter_count(2, 0x2000), 0);
        table.remove_task(99); // no-op on an empty table
    }
}
