//! Shared-frame reference counts
//!
//! Copy-on-write shares one physical frame between address spaces. This
//! table tracks how many present PTEs refer to each shared frame so the
//! last unmapper can return it to the allocator.
//!
//! Frames absent from the table have an implicit count of one (sole
//! owner). `share` moves a frame to an explicit count, `release` drops it
//! and reports whether the caller held the last reference.

use alloc::collections::BTreeMap;

use spin::Mutex;

use super::FrameNumber;

pub struct FrameRefcounts {
    counts: Mutex<BTreeMap<u64, u32>>,
}

impl FrameRefcounts {
    pub const fn new() -> Self {
        Self {
            counts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Add one reference to `frame`. A frame not yet in the table starts
    /// from its implicit count of one.
    pub fn share(&self, frame: FrameNumber) {
        let mut counts = self.counts.lock();
        *counts.entry(frame.as_u64()).or_insert(1) += 1;
    }

    /// Drop one reference. Returns true when the caller held the last
    /// reference and must free the frame.
    pub fn release(&self, frame: FrameNumber) -> bool {
        let mut counts = self.counts.lock();
        match counts.get_mut(&frame.as_u64()) {
            Some(count) if *count > 1 => {
                *count -= 1;
                if *count == 1 {
                    // Back to sole ownership; the implicit count suffices.
                    counts.remove(&frame.as_u64());
                }
                false
            }
            Some(_) => {
                counts.remove(&frame.as_u64());
                true
            }
            None => true,
        }
    }

    /// Current reference count (implicit one for untracked frames).
    pub fn count(&self, frame: FrameNumber) -> u32 {
        *self.counts.lock().get(&frame.as_u64()).unwrap_or(&1)
    }

    /// True when more than one PTE refers to `frame`.
    pub fn is_shared(&self, frame: FrameNumber) -> bool {
        self.count(frame) > 1
    }
}

impl Default for FrameRefcounts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn untracked_frame_has_implicit_count_one() {
        let rc = FrameRefcounts::new();
        let f = FrameNumber::new(7);
        assert_eq!(rc.count(f), 1);
        assert!(!rc.is_shared(f));
        // Releasing the sole reference frees the frame.
        assert!(rc.release(f));
    }

    #[test]
    fn share_then_release_tracks_ownership() {
        let rc = FrameRefcounts::new();
        let f = FrameNumber::new(42);

        rc.share(f); // 2 references
        assert!(rc.is_shared(f));

        assert!(!rc.release(f)); // 1 reference remains
        assert!(!rc.is_shared(f));
        assert!(rc.release(f)); // last reference
    }

    #[test]
    fn fork_like_double_share() {
        let rc = FrameRefcounts::new();
        let f = FrameNumber::new(3);
        rc.share(f);
        rc.share(f);
        assert_eq!(rc.count(f), 3);
        assert!(!rc.release(f));
        assert!(!rc.release(f));
        assert!(rc.release(f));
    }
}
