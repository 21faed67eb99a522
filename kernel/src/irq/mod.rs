//! IRQ waiter registry
//!
//! The contract the core exposes to external drivers: a driver registers
//! a task against an IRQ vector; when the vector fires, the task is
//! unblocked. Acknowledging the device is the driver's responsibility
//! (the PIC EOI is the core's).

use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::sched::{self, TaskId};

pub struct IrqWaiters {
    waiters: Mutex<BTreeMap<u8, TaskId>>,
}

impl IrqWaiters {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register `tid` to be woken when `vector` fires, replacing any
    /// previous waiter. Also unmasks the PIC line for remapped IRQ
    /// vectors.
    pub fn register(&self, vector: u8, tid: TaskId) {
        self.waiters.lock().insert(vector, tid);
        let base = crate::arch::timer::PIC_1_OFFSET;
        if (base..base + 16).contains(&vector) {
            crate::arch::timer::unmask_irq(vector - base);
        }
    }

    pub fn unregister(&self, vector: u8) {
        self.waiters.lock().remove(&vector);
    }

    /// IRQ-handler hook: wake the registered waiter, if any.
    pub fn notify(&self, vector: u8) {
        let tid = self.waiters.lock().get(&vector).copied();
        if let Some(tid) = tid {
            sched::unblock(tid);
        }
    }
}

impl Default for IrqWaiters {
    fn default() -> Self {
        Self::new()
    }
}
