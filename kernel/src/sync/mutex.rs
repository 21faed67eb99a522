//! Sleeping mutex
//!
//! Spin-then-sleep: a short spin covers the common uncontended handoff,
//! after which the acquirer parks on the wait queue. Unlike `spin::Mutex`
//! this is only usable from task context.

use core::sync::atomic::{AtomicU64, Ordering};

use super::WaitQueue;
use crate::{
    error::{IpcError, KernelError},
    sched::{self, BlockOutcome},
};

/// Spins before parking.
const SPIN_LIMIT: u32 = 64;

const UNOWNED: u64 = u64::MAX;

pub struct SleepMutex {
    /// Owning task id, or `UNOWNED`.
    owner: AtomicU64,
    waiters: WaitQueue,
}

impl SleepMutex {
    pub const fn new() -> Self {
        Self {
            owner: AtomicU64::new(UNOWNED),
            waiters: WaitQueue::new(),
        }
    }

    fn try_acquire(&self, tid: u64) -> bool {
        self.owner
            .compare_exchange(UNOWNED, tid, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquire, blocking while held by another task.
    pub fn lock(&self) -> Result<(), KernelError> {
        let tid = sched::current_tid();
        loop {
            for _ in 0..SPIN_LIMIT {
                if self.try_acquire(tid) {
                    return Ok(());
                }
                core::hint::spin_loop();
            }
            self.waiters.register_current();
            // Re-check after registering so a release that raced the
            // registration is not lost.
            if self.try_acquire(tid) {
                self.waiters.unregister_current();
                return Ok(());
            }
            match sched::block_current() {
                BlockOutcome::Normal => continue,
                BlockOutcome::Interrupted => {
                    self.waiters.unregister_current();
                    return Err(IpcError::Interrupted.into());
                }
                BlockOutcome::TimedOut => unreachable!("no timeout was armed"),
            }
        }
    }

    pub fn try_lock(&self) -> bool {
        self.try_acquire(sched::current_tid())
    }

    /// Release and wake one waiter. Only the owner may call this.
    pub fn unlock(&self) {
        self.owner.store(UNOWNED, Ordering::Release);
        self.waiters.wake_one();
    }

    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != UNOWNED
    }
}

impl Default for SleepMutex {
    fn default() -> Self {
        Self::new()
    }
}
