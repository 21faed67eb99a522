//! Synchronization primitives
//!
//! Spin-locks come from the `spin` crate; this module adds the kernel's
//! scoped primitives: IRQ-safe spinning, a wait queue built on the
//! scheduler's block/unblock, counting semaphores, a sleeping mutex, and
//! futexes.

pub mod futex;
pub mod mutex;
pub mod once_lock;
pub mod semaphore;
pub mod wait_queue;

pub use mutex::SleepMutex;
pub use once_lock::OnceLock;
pub use semaphore::Semaphore;
pub use wait_queue::WaitQueue;

/// Run `f` with interrupts disabled on this CPU. Short critical sections
/// in tick/IRQ-shared state use this instead of a lock.
pub fn with_irqs_disabled<T>(f: impl FnOnce() -> T) -> T {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    {
        x86_64::instructions::interrupts::without_interrupts(f)
    }
    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    {
        f()
    }
}
