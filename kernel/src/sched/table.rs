//! Global task table
//!
//! A bounded arena of task slots; the slot index is the task id. Ids are
//! stable for the life of the task and recycled only after the parent
//! reaps the slot, so every cross-reference in the kernel (ports, wait
//! queues, parent links) is a plain integer that can be invalidated by
//! lookup failure.

use alloc::boxed::Box;
use alloc::vec::Vec;

use spin::Mutex;

use super::task::{Task, TaskId};
use crate::{config::MAX_TASKS, error::SchedError};

pub struct TaskTable {
    slots: Mutex<Vec<Option<Box<Task>>>>,
}

impl TaskTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_TASKS);
        slots.resize_with(MAX_TASKS, || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Claim the lowest free slot and build the task with its id.
    pub fn insert_with<F>(&self, build: F) -> Result<TaskId, SchedError>
    where
        F: FnOnce(TaskId) -> Task,
    {
        let mut slots = self.slots.lock();
        let index = slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(SchedError::TableFull)?;
        let id = index as TaskId;
        slots[index] = Some(Box::new(build(id)));
        Ok(id)
    }

    /// Borrow a task by id.
    pub fn get(&self, id: TaskId) -> Option<&'static Task> {
        let slots = self.slots.lock();
        slots.get(id as usize).and_then(|slot| {
            slot.as_ref().map(|task| {
                // SAFETY: the Task is boxed, so its address is stable, and
                // slots are only vacated by `remove` after the task is
                // Terminated and unreferenced by the scheduler. Extending
                // the borrow past the lock follows the kernel's id-based
                // ownership model: stale ids fail this lookup instead of
                // dangling.
                unsafe { &*(task.as_ref() as *const Task) }
            })
        })
    }

    /// Vacate a slot, returning the task for teardown.
    pub fn remove(&self, id: TaskId) -> Option<Box<Task>> {
        self.slots.lock().get_mut(id as usize)?.take()
    }

    pub fn exists(&self, id: TaskId) -> bool {
        self.slots
            .lock()
            .get(id as usize)
            .is_some_and(|s| s.is_some())
    }

    /// Visit every live task.
    pub fn for_each<F: FnMut(&Task)>(&self, mut f: F) {
        let slots = self.slots.lock();
        for slot in slots.iter().flatten() {
            f(slot);
        }
    }

    pub fn count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::string::String;

    use super::*;
    use crate::{
        cap::CapSets,
        fs::fd::FdTable,
        process::signal::SignalState,
        sched::{KernelStack, Task, TaskKind},
    };

    fn dummy_body() {}

    fn make(table: &TaskTable, name: &str) -> TaskId {
        table
            .insert_with(|id| {
                Task::new(
                    id,
                    String::from(name),
                    TaskKind::Kernel(dummy_body),
                    0,
                    KernelStack::allocate(),
                    0,
                    CapSets::kernel(),
                    FdTable::new(),
                    SignalState::new(),
                )
            })
            .expect("table has free slots")
    }

    #[test]
    fn ids_are_lowest_free_slots() {
        let table = TaskTable::new();
        assert_eq!(make(&table, "a"), 0);
        assert_eq!(make(&table, "b"), 1);
        assert_eq!(make(&table, "c"), 2);

        table.remove(1).expect("slot 1 occupied");
        assert_eq!(make(&table, "d"), 1);
        assert_eq!(table.count(), 3);
    }

    #[test]
    fn lookup_fails_after_removal() {
        let table = TaskTable::new();
        let id = make(&table, "gone");
        assert!(table.exists(id));
        table.remove(id).expect("slot occupied");
        assert!(!table.exists(id));
        assert!(table.get(id).is_none());
    }

    #[test]
    fn for_each_visits_only_live_tasks() {
        let table = TaskTable::new();
        make(&table, "x");
        let dead = make(&table, "y");
        make(&table, "z");
        table.remove(dead).expect("slot occupied");

        let mut seen = 0;
        table.for_each(|_| seen += 1);
        assert_eq!(seen, 2);
    }
}
