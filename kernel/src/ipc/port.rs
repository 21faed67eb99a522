//! IPC ports
//!
//! A port is a kernel-owned endpoint with a bounded ring of messages.
//! Sends enqueue a copy and wake the waiting receiver; receives dequeue
//! FIFO, blocking (with optional timeout) when the ring is empty. Only
//! the owner may receive. A full ring fails sends with QueueFull unless
//! the caller asked to block.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::Message;
use crate::{
    config::{IPC_MAX_PORTS, IPC_PORT_QUEUE_SIZE},
    error::IpcError,
    sched::{self, BlockOutcome, TaskId},
    sync::WaitQueue,
};

/// Send/recv behavior flags (syscall `flags` argument).
pub const IPC_NONBLOCK: u64 = 0;
pub const IPC_BLOCK: u64 = 1;

/// Bounded message ring. Count always equals tail minus head modulo
/// capacity; both only move forward.
pub struct MsgRing {
    slots: [Message; IPC_PORT_QUEUE_SIZE],
    head: usize,
    tail: usize,
    count: usize,
}

impl MsgRing {
    pub const fn new() -> Self {
        Self {
            slots: [Message::empty_const(); IPC_PORT_QUEUE_SIZE],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, msg: Message) -> Result<(), IpcError> {
        if self.count == IPC_PORT_QUEUE_SIZE {
            return Err(IpcError::QueueFull);
        }
        self.slots[self.tail] = msg;
        self.tail = (self.tail + 1) % IPC_PORT_QUEUE_SIZE;
        self.count += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Message> {
        if self.count == 0 {
            return None;
        }
        let msg = self.slots[self.head];
        self.head = (self.head + 1) % IPC_PORT_QUEUE_SIZE;
        self.count -= 1;
        Some(msg)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == IPC_PORT_QUEUE_SIZE
    }
}

impl Default for MsgRing {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Port {
    pub id: u64,
    pub owner: TaskId,
    pub flags: u64,
    queue: Mutex<MsgRing>,
    /// Task currently blocked in recv (0 = none). Informational beside
    /// the wait queue; `port_stat` exposes it.
    waiting_receiver: AtomicU64,
    recv_wait: WaitQueue,
    send_wait: WaitQueue,
}

impl Port {
    fn new(id: u64, owner: TaskId, flags: u64) -> Self {
        Self {
            id,
            owner,
            flags,
            queue: Mutex::new(MsgRing::new()),
            waiting_receiver: AtomicU64::new(0),
            recv_wait: WaitQueue::new(),
            send_wait: WaitQueue::new(),
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn waiting_receiver(&self) -> TaskId {
        self.waiting_receiver.load(Ordering::Acquire)
    }
}

static MSG_IDS: AtomicU64 = AtomicU64::new(1);

/// The port table: bounded slots, ids are slot indices, slot 0 reserved
/// so 0 can mean "no port" in message fields.
pub struct PortTable {
    slots: Mutex<Vec<Option<Arc<Port>>>>,
}

impl PortTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(IPC_MAX_PORTS);
        slots.resize_with(IPC_MAX_PORTS, || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Allocate the lowest free slot >= 1.
    pub fn create(&self, owner: TaskId, flags: u64) -> Result<u64, IpcError> {
        let mut slots = self.slots.lock();
        let index = slots
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, s)| s.is_none())
            .map(|(i, _)| i)
            .ok_or(IpcError::TableFull)?;
        let id = index as u64;
        slots[index] = Some(Arc::new(Port::new(id, owner, flags)));
        log::debug!("port {} created by task {}", id, owner);
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Result<Arc<Port>, IpcError> {
        self.slots
            .lock()
            .get(id as usize)
            .and_then(|s| s.clone())
            .ok_or(IpcError::NoSuchPort { id })
    }

    /// Destroy a port. Only the owner (or the kernel, owner 0 calls)
    /// succeeds. Blocked peers wake and observe NoSuchPort.
    pub fn destroy(&self, id: u64, caller: TaskId) -> Result<(), IpcError> {
        let port = {
            let mut slots = self.slots.lock();
            let slot = slots
                .get_mut(id as usize)
                .ok_or(IpcError::NoSuchPort { id })?;
            let port = slot.clone().ok_or(IpcError::NoSuchPort { id })?;
            if caller != 0 && port.owner != caller {
                return Err(IpcError::NotOwner);
            }
            *slot = None;
            port
        };
        crate::kctx::port_names().unregister_port(id);
        port.recv_wait.wake_all();
        port.send_wait.wake_all();
        log::debug!("port {} destroyed", id);
        Ok(())
    }

    /// Destroy every port a dead task owned.
    pub fn release_owned_by(&self, owner: TaskId) {
        let owned: Vec<u64> = {
            let slots = self.slots.lock();
            slots
                .iter()
                .flatten()
                .filter(|p| p.owner == owner)
                .map(|p| p.id)
                .collect()
        };
        for id in owned {
            let _ = self.destroy(id, 0);
        }
    }

    /// Clear a dead task out of every port's waiter bookkeeping.
    pub fn forget_waiter(&self, tid: TaskId) {
        let slots = self.slots.lock();
        for port in slots.iter().flatten() {
            let _ = port.waiting_receiver.compare_exchange(
                tid,
                0,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
            port.recv_wait.remove(tid);
            port.send_wait.remove(tid);
        }
    }

    /// Enqueue a copy of `msg` on port `dest`.
    ///
    /// The kernel stamps `msg_id`, `sender`, and `timestamp`; the payload
    /// is already a bit-identical copy of what the sender supplied. With
    /// `IPC_BLOCK`, a full ring suspends the caller (bounded by
    /// `timeout_ms` when nonzero) instead of failing.
    pub fn send(
        &self,
        dest: u64,
        mut msg: Message,
        sender: TaskId,
        flags: u64,
        timeout_ms: u64,
    ) -> Result<u64, IpcError> {
        msg.msg_id = MSG_IDS.fetch_add(1, Ordering::Relaxed);
        msg.sender = sender;
        msg.timestamp = crate::time::ticks();

        loop {
            let port = self.get(dest)?;
            {
                let mut queue = port.queue.lock();
                if !queue.is_full() {
                    queue
                        .push(msg)
                        .expect("ring cannot be full after the check");
                    drop(queue);
                    port.recv_wait.wake_one();
                    return Ok(msg.msg_id);
                }
                if flags & IPC_BLOCK == 0 {
                    return Err(IpcError::QueueFull);
                }
                port.send_wait.register_current();
            }
            let outcome = if timeout_ms > 0 {
                sched::block_current_timeout(timeout_ms)
            } else {
                sched::block_current()
            };
            match outcome {
                BlockOutcome::Normal => continue,
                BlockOutcome::TimedOut => {
                    port.send_wait.unregister_current();
                    return Err(IpcError::Timeout);
                }
                BlockOutcome::Interrupted => {
                    port.send_wait.unregister_current();
                    return Err(IpcError::Interrupted);
                }
            }
        }
    }

    /// Dequeue one message from port `id`. Only the owner may receive.
    /// An empty ring fails with NoMessage unless `IPC_BLOCK`, in which
    /// case the receiver parks until a send (or timeout/signal).
    pub fn recv(
        &self,
        id: u64,
        receiver: TaskId,
        flags: u64,
        timeout_ms: u64,
    ) -> Result<Message, IpcError> {
        loop {
            let port = self.get(id)?;
            if port.owner != receiver {
                return Err(IpcError::NotOwner);
            }
            {
                let mut queue = port.queue.lock();
                if let Some(msg) = queue.pop() {
                    drop(queue);
                    port.waiting_receiver.store(0, Ordering::Release);
                    port.send_wait.wake_one();
                    return Ok(msg);
                }
                if flags & IPC_BLOCK == 0 {
                    return Err(IpcError::NoMessage);
                }
                port.waiting_receiver.store(receiver, Ordering::Release);
                port.recv_wait.register_current();
            }
            let outcome = if timeout_ms > 0 {
                sched::block_current_timeout(timeout_ms)
            } else {
                sched::block_current()
            };
            port.waiting_receiver.store(0, Ordering::Release);
            match outcome {
                BlockOutcome::Normal => continue,
                BlockOutcome::TimedOut => {
                    port.recv_wait.unregister_current();
                    return Err(IpcError::Timeout);
                }
                BlockOutcome::Interrupted => {
                    port.recv_wait.unregister_current();
                    return Err(IpcError::Interrupted);
                }
            }
        }
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn ring_preserves_fifo_order() {
        let mut ring = MsgRing::new();
        for i in 0..5u8 {
            let mut m = Message::new(&[i], 0).expect("fits");
            m.msg_id = i as u64;
            ring.push(m).expect("ring has space");
        }
        for i in 0..5u8 {
            let m = ring.pop().expect("message queued");
            assert_eq!(m.payload(), &[i]);
        }
        assert!(ring.pop().is_none());
    }

    #[test]
    fn ring_rejects_push_when_full() {
        let mut ring = MsgRing::new();
        for _ in 0..IPC_PORT_QUEUE_SIZE {
            ring.push(Message::default()).expect("space available");
        }
        assert!(ring.is_full());
        assert_eq!(ring.push(Message::default()), Err(IpcError::QueueFull));

        // One pop re-admits exactly one push.
        ring.pop().expect("full ring pops");
        ring.push(Message::default()).expect("space after pop");
        assert_eq!(ring.push(Message::default()), Err(IpcError::QueueFull));
    }

    #[test]
    fn ring_count_tracks_wraparound() {
        let mut ring = MsgRing::new();
        for round in 0..3 {
            for _ in 0..IPC_PORT_QUEUE_SIZE {
                ring.push(Message::default()).expect("space");
            }
            assert_eq!(ring.len(), IPC_PORT_QUEUE_SIZE, "round {}", round);
            for _ in 0..IPC_PORT_QUEUE_SIZE {
                ring.pop().expect("queued");
            }
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn table_allocates_lowest_slot_from_one() {
        let table = PortTable::new();
        assert_eq!(table.create(1, 0).expect("slot free"), 1);
        assert_eq!(table.create(1, 0).expect("slot free"), 2);
        // Freeing the lower slot makes it the next allocation again.
        table.destroy(1, 1).expect("owner may destroy");
        assert_eq!(table.create(2, 0).expect("slot recycled"), 1);
    }

    #[test]
    fn destroy_requires_ownership() {
        let table = PortTable::new();
        let id = table.create(5, 0).expect("created");
        assert_eq!(table.destroy(id, 6), Err(IpcError::NotOwner));
        // Kernel caller (0) bypasses the ownership check.
        table.destroy(id, 0).expect("kernel may destroy");
        assert!(matches!(table.get(id), Err(IpcError::NoSuchPort { .. })));
    }

    #[test]
    fn release_owned_by_sweeps_all_ports() {
        let table = PortTable::new();
        table.create(7, 0).expect("created");
        table.create(8, 0).expect("created");
        table.create(7, 0).expect("created");
        table.release_owned_by(7);
        assert!(table.get(1).is_err());
        assert!(table.get(2).is_ok());
        assert!(table.get(3).is_err());
    }
}
