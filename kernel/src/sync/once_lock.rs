//! Write-once global cell
//!
//! A no_std `OnceLock` used for state initialized exactly once during
//! bootstrap (the kernel context). Later reads are lock-free.

use core::sync::atomic::{AtomicPtr, Ordering};

use alloc::boxed::Box;

pub struct OnceLock<T> {
    inner: AtomicPtr<T>,
}

impl<T> OnceLock<T> {
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Get the value if initialized.
    pub fn get(&self) -> Option<&'static T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: a non-null pointer was stored by `set` from
            // `Box::into_raw`, so it points at a live, leaked T. Acquire
            // pairs with the Release in `set`, making the pointee's
            // initialization visible.
            Some(unsafe { &*ptr })
        }
    }

    /// Initialize the cell. Returns `Err(value)` if already initialized.
    pub fn set(&self, value: T) -> Result<&'static T, T> {
        let ptr = Box::into_raw(Box::new(value));
        match self.inner.compare_exchange(
            core::ptr::null_mut(),
            ptr,
            Ordering::Release,
            Ordering::Acquire,
        ) {
            // SAFETY: we just leaked the box; the pointer is valid forever.
            Ok(_) => Ok(unsafe { &*ptr }),
            Err(_) => {
                // SAFETY: reclaim the freshly leaked allocation we lost
                // the race with.
                let value = *unsafe { Box::from_raw(ptr) };
                Err(value)
            }
        }
    }
}

impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: access to the inner T is read-only after the single Release
// store; T must still be shareable across threads.
unsafe impl<T: Send + Sync> Sync for OnceLock<T> {}
unsafe impl<T: Send> Send for OnceLock<T> {}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn set_then_get() {
        let cell: OnceLock<u32> = OnceLock::new();
        assert!(cell.get().is_none());
        cell.set(42).expect("first set succeeds");
        assert_eq!(cell.get().copied(), Some(42));
    }

    #[test]
    fn second_set_returns_value() {
        let cell: OnceLock<u32> = OnceLock::new();
        cell.set(1).expect("first set succeeds");
        assert_eq!(cell.set(2), Err(2));
        assert_eq!(cell.get().copied(), Some(1));
    }
}
