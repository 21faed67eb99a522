//! Kernel context
//!
//! All mutable kernel state roots here: the frame allocator and COW
//! refcounts (const statics, live before the heap), and the [`Kernel`]
//! struct of bounded tables built once during bootstrap behind a
//! [`OnceLock`]. Subsystems reach their state through the accessors
//! below, which localizes initialization order instead of scattering it
//! across file-scope globals.
//!
//! Lock levels, low to high: frame allocator < page tables (per-space
//! mutex) < scheduler < fd tables (per-task) < port/shmem tables. A lock
//! may be taken while holding any higher-level one, never the reverse.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::{
    config::BootConfig,
    fs::{block::BlockDevices, Vfs},
    ipc::{NameRegistry, PortTable, ShmemTable},
    irq::IrqWaiters,
    mm::{frame_allocator::FrameAllocator, frame_refcount::FrameRefcounts, PhysicalAddress},
    sched::{Scheduler, TaskTable},
    sync::{futex::FutexTable, OnceLock},
    time::SleepQueue,
};

/// The bounded-table half of kernel state; heap-backed, so built after
/// the frame allocator and heap are live.
pub struct Kernel {
    pub boot_config: BootConfig,
    pub tasks: TaskTable,
    pub scheduler: Scheduler,
    pub ports: PortTable,
    pub port_names: NameRegistry,
    pub shmem: ShmemTable,
    pub futexes: FutexTable,
    pub vfs: Vfs,
    pub block_devices: BlockDevices,
    pub irq_waiters: IrqWaiters,
    pub sleepers: SleepQueue,
}

impl Kernel {
    pub fn new(boot_config: BootConfig) -> Self {
        Self {
            boot_config,
            tasks: TaskTable::new(),
            scheduler: Scheduler::new(),
            ports: PortTable::new(),
            port_names: NameRegistry::new(),
            shmem: ShmemTable::new(),
            futexes: FutexTable::new(),
            vfs: Vfs::new(),
            block_devices: BlockDevices::new(),
            irq_waiters: IrqWaiters::new(),
            sleepers: SleepQueue::new(),
        }
    }
}

static KERNEL: OnceLock<Kernel> = OnceLock::new();

/// Frame allocator: const-initialized so it is usable before the heap
/// (heap init allocates its backing frames here).
static FRAMES: FrameAllocator = FrameAllocator::new();

/// COW frame refcounts.
static FRAME_REFCOUNTS: FrameRefcounts = FrameRefcounts::new();

/// Physical address of the boot L4 table; every user space copies its
/// kernel half from here.
static KERNEL_ROOT: AtomicU64 = AtomicU64::new(0);

/// Install the kernel context. Called exactly once by bootstrap.
pub fn init(kernel: Kernel) {
    if KERNEL.set(kernel).is_err() {
        panic!("kernel context initialized twice");
    }
}

pub fn kernel() -> &'static Kernel {
    #[cfg(target_os = "none")]
    {
        KERNEL.get().expect("kernel context used before bootstrap")
    }
    #[cfg(not(target_os = "none"))]
    {
        // Host tests exercise subsystems without a bootstrap pass; give
        // them an empty context on first touch.
        match KERNEL.get() {
            Some(k) => k,
            None => {
                let _ = KERNEL.set(Kernel::new(BootConfig::default()));
                KERNEL.get().expect("set on the line above")
            }
        }
    }
}

pub fn frames() -> &'static FrameAllocator {
    &FRAMES
}

pub fn frame_refcounts() -> &'static FrameRefcounts {
    &FRAME_REFCOUNTS
}

pub fn set_kernel_root(root: PhysicalAddress) {
    KERNEL_ROOT.store(root.as_u64(), Ordering::Release);
}

pub fn kernel_root() -> PhysicalAddress {
    PhysicalAddress::new(KERNEL_ROOT.load(Ordering::Acquire))
}

pub fn tasks() -> &'static TaskTable {
    &kernel().tasks
}

pub fn scheduler() -> &'static Scheduler {
    &kernel().scheduler
}

pub fn ports() -> &'static PortTable {
    &kernel().ports
}

pub fn port_names() -> &'static NameRegistry {
    &kernel().port_names
}

pub fn shmem() -> &'static ShmemTable {
    &kernel().shmem
}

pub fn futexes() -> &'static FutexTable {
    &kernel().futexes
}

pub fn vfs() -> &'static Vfs {
    &kernel().vfs
}

pub fn block_devices() -> &'static BlockDevices {
    &kernel().block_devices
}

pub fn irq_waiters() -> &'static IrqWaiters {
    &kernel().irq_waiters
}

pub fn sleepers() -> &'static SleepQueue {
    &kernel().sleepers
}
