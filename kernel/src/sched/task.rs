//! Task control block
//!
//! A task is one scheduling unit: kernel thread or user process thread.
//! Fields mutated from the task itself (fd table, signal state) sit behind
//! their own locks; scheduling state is atomic and transitions only under
//! the scheduler lock.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use alloc::boxed::Box;
use alloc::string::String;

use spin::Mutex;

use crate::{
    arch::context::TrapFrame,
    cap::CapSets,
    config::KERNEL_STACK_SIZE,
    fs::fd::FdTable,
    mm::vas::AddressSpaceRef,
    process::signal::SignalState,
};

pub type TaskId = u64;

/// Task lifecycle states.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot reserved, task not yet runnable.
    Unused = 0,
    Ready = 1,
    Running = 2,
    Blocked = 3,
    Sleeping = 4,
    /// Exited, waiting for the parent to reap.
    Terminated = 5,
}

impl TaskState {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::Blocked,
            4 => Self::Sleeping,
            5 => Self::Terminated,
            _ => Self::Unused,
        }
    }
}

/// What runs inside the task.
#[derive(Clone, Copy)]
pub enum TaskKind {
    /// Kernel thread; the function runs on the kernel stack and the task
    /// exits when it returns.
    Kernel(fn()),
    /// User process thread; first dispatch enters ring 3 through the
    /// saved register frame.
    User,
}

/// Kernel stack backing a task.
pub enum KernelStack {
    /// Heap-allocated, owned by the task.
    Owned(Box<[u8; KERNEL_STACK_SIZE]>),
    /// The bootstrap stack (the boot context becomes the idle task).
    Boot,
}

impl KernelStack {
    pub fn allocate() -> Self {
        Self::Owned(Box::new([0; KERNEL_STACK_SIZE]))
    }

    /// Highest usable address, 16-byte aligned. Zero for the boot stack,
    /// which never services ring-3 entries.
    pub fn top(&self) -> u64 {
        match self {
            Self::Owned(stack) => {
                let base = stack.as_ptr() as u64;
                (base + KERNEL_STACK_SIZE as u64) & !0xF
            }
            Self::Boot => 0,
        }
    }
}

/// Save slot for the kernel stack pointer across context switches. The
/// switch primitive writes it through a raw pointer.
pub struct RspSlot(UnsafeCell<u64>);

impl RspSlot {
    pub const fn new(value: u64) -> Self {
        Self(UnsafeCell::new(value))
    }

    pub fn as_ptr(&self) -> *mut u64 {
        self.0.get()
    }

    /// Read the saved value.
    ///
    /// # Safety
    ///
    /// Only valid while the task is not mid-switch on another CPU; the
    /// scheduler lock provides that.
    pub unsafe fn get(&self) -> u64 {
        // SAFETY: per the function contract.
        unsafe { *self.0.get() }
    }

    /// Overwrite the saved value (task creation).
    ///
    /// # Safety
    ///
    /// The task must not be runnable yet.
    pub unsafe fn set(&self, value: u64) {
        // SAFETY: per the function contract.
        unsafe { *self.0.get() = value };
    }
}

// SAFETY: access is serialized by the scheduler; only one CPU ever
// switches a given task.
unsafe impl Sync for RspSlot {}

pub struct Task {
    pub id: TaskId,
    /// Thread-group id; equals `id` for the first thread of a process.
    pub tgid: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub parent: AtomicU64,
    state: AtomicU32,
    /// Saved user register frame used to (re)enter ring 3 for tasks that
    /// have not run yet (fork children, fresh exec images).
    pub frame: Mutex<TrapFrame>,
    pub kstack: KernelStack,
    /// Kernel stack pointer save slot for `switch_context`.
    pub context_rsp: RspSlot,
    pub space: Mutex<Option<AddressSpaceRef>>,
    pub fds: Mutex<FdTable>,
    pub signals: Mutex<SignalState>,
    pub caps: Mutex<CapSets>,
    /// Wait-status word, valid once Terminated.
    pub exit_status: AtomicU32,
    pub time_slice: AtomicU32,
    /// Set by a wake that raced the block decision; consumed by
    /// `block_current` before it commits to Blocked.
    pub wake_pending: AtomicBool,
    /// Tick deadline for Sleeping / timed blocks (0 = none).
    pub sleep_deadline: AtomicU64,
    /// User-mode FS/GS bases (arch_prctl), restored on switch.
    pub fs_base: AtomicU64,
    pub gs_base: AtomicU64,
}

impl Task {
    /// Build a task in the Unused state; the creator finishes setup and
    /// marks it Ready.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TaskId,
        name: String,
        kind: TaskKind,
        parent: TaskId,
        kstack: KernelStack,
        initial_rsp: u64,
        caps: CapSets,
        fds: FdTable,
        signals: SignalState,
    ) -> Self {
        Self {
            id,
            tgid: id,
            name,
            kind,
            parent: AtomicU64::new(parent),
            state: AtomicU32::new(TaskState::Unused as u32),
            frame: Mutex::new(TrapFrame::default()),
            kstack,
            context_rsp: RspSlot::new(initial_rsp),
            space: Mutex::new(None),
            fds: Mutex::new(fds),
            signals: Mutex::new(signals),
            caps: Mutex::new(caps),
            exit_status: AtomicU32::new(0),
            time_slice: AtomicU32::new(crate::config::TIME_SLICE_TICKS),
            wake_pending: AtomicBool::new(false),
            sleep_deadline: AtomicU64::new(0),
            fs_base: AtomicU64::new(0),
            gs_base: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TaskState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn parent_id(&self) -> TaskId {
        self.parent.load(Ordering::Acquire)
    }

    pub fn set_parent(&self, parent: TaskId) {
        self.parent.store(parent, Ordering::Release);
    }

    pub fn reset_time_slice(&self) {
        self.time_slice
            .store(crate::config::TIME_SLICE_TICKS, Ordering::Relaxed);
    }
}
