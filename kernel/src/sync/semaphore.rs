//! Counting semaphore
//!
//! Blocking acquire built on the wait queue; release wakes one waiter.

use spin::Mutex;

use super::WaitQueue;
use crate::{
    error::{IpcError, KernelError},
    sched::BlockOutcome,
};

pub struct Semaphore {
    count: Mutex<u64>,
    waiters: WaitQueue,
}

impl Semaphore {
    pub const fn new(initial: u64) -> Self {
        Self {
            count: Mutex::new(initial),
            waiters: WaitQueue::new(),
        }
    }

    /// Decrement the count, blocking while it is zero.
    pub fn wait(&self) -> Result<(), KernelError> {
        loop {
            {
                let mut count = self.count.lock();
                if *count > 0 {
                    *count -= 1;
                    return Ok(());
                }
                self.waiters.register_current();
            }
            match crate::sched::block_current() {
                BlockOutcome::Normal => continue,
                BlockOutcome::Interrupted => {
                    self.waiters.unregister_current();
                    return Err(IpcError::Interrupted.into());
                }
                BlockOutcome::TimedOut => unreachable!("no timeout was armed"),
            }
        }
    }

    /// Try to decrement without blocking.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Increment the count and wake one waiter.
    pub fn post(&self) {
        *self.count.lock() += 1;
        self.waiters.wake_one();
    }

    pub fn count(&self) -> u64 {
        *self.count.lock()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn try_wait_counts_down_and_post_restores() {
        let sem = Semaphore::new(2);
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        sem.post();
        assert!(sem.try_wait());
    }
}
