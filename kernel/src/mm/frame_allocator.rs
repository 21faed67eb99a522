//! Physical frame allocator
//!
//! A bitmap allocator: one bit per 4 KiB frame, a free-frame count, and a
//! cursor remembering the last allocation so consecutive single-frame
//! requests do not rescan the low bitmap words every time. The bitmap is a
//! fixed array so the allocator is const-constructible and live before the
//! kernel heap exists (heap init allocates its backing frames here).
//!
//! All entry points take the allocator's own lock internally and never
//! block; callers at any IRQ depth may allocate. Frames are handed out
//! un-zeroed.

use spin::Mutex;

use super::{PhysicalAddress, PAGE_SIZE};
use crate::error::FrameAllocError;

/// Highest physical frame the bitmap can describe (4 GiB of RAM). Boot
/// regions above this are ignored.
pub const MAX_PHYS_FRAMES: usize = 1 << 20;

const BITMAP_WORDS: usize = MAX_PHYS_FRAMES / 64;

/// Physical frame number (address / 4096).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(num: u64) -> Self {
        Self(num)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_addr(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE as u64)
    }
}

pub type Result<T> = core::result::Result<T, FrameAllocError>;

/// Bitmap state. 1 = free, 0 = allocated or outside any usable region.
struct Bitmap {
    words: [u64; BITMAP_WORDS],
    /// Total frames marked usable at init.
    total: u64,
    /// Frames currently free.
    free: u64,
    /// Word index where the last allocation succeeded.
    cursor: usize,
}

impl Bitmap {
    fn mark_free(&mut self, frame: u64) {
        let (w, b) = (frame as usize / 64, frame as usize % 64);
        if w < BITMAP_WORDS && self.words[w] & (1 << b) == 0 {
            self.words[w] |= 1 << b;
            self.free += 1;
        }
    }

    fn mark_used(&mut self, frame: u64) {
        let (w, b) = (frame as usize / 64, frame as usize % 64);
        if w < BITMAP_WORDS && self.words[w] & (1 << b) != 0 {
            self.words[w] &= !(1 << b);
            self.free -= 1;
        }
    }

    fn is_free(&self, frame: u64) -> bool {
        let (w, b) = (frame as usize / 64, frame as usize % 64);
        w < BITMAP_WORDS && self.words[w] & (1 << b) != 0
    }

    /// Find `count` consecutive free frames, scanning from `self.cursor`
    /// and wrapping once. A run never spans the wrap seam.
    fn find_run(&self, count: usize) -> Option<u64> {
        let mut consecutive = 0usize;
        let mut start = 0u64;

        for pass in 0..2 {
            let (from, to) = if pass == 0 {
                (self.cursor, BITMAP_WORDS)
            } else {
                consecutive = 0;
                (0, self.cursor)
            };
            for w in from..to {
                let word = self.words[w];
                if word == 0 {
                    consecutive = 0;
                    continue;
                }
                for b in 0..64 {
                    if word & (1 << b) != 0 {
                        if consecutive == 0 {
                            start = (w * 64 + b) as u64;
                        }
                        consecutive += 1;
                        if consecutive == count {
                            return Some(start);
                        }
                    } else {
                        consecutive = 0;
                    }
                }
            }
        }
        None
    }
}

/// The physical frame allocator.
pub struct FrameAllocator {
    inner: Mutex<Bitmap>,
}

impl FrameAllocator {
    /// All frames start unusable; boot-protocol regions are added with
    /// [`add_region`](Self::add_region).
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Bitmap {
                words: [0; BITMAP_WORDS],
                total: 0,
                free: 0,
                cursor: 0,
            }),
        }
    }

    /// Mark a physical region usable. Called once per boot memory-map
    /// entry during bootstrap.
    pub fn add_region(&self, start: PhysicalAddress, end: PhysicalAddress) {
        let first = start.as_u64().div_ceil(PAGE_SIZE as u64);
        let last = (end.as_u64() / PAGE_SIZE as u64).min(MAX_PHYS_FRAMES as u64);
        let mut bm = self.inner.lock();
        for frame in first..last {
            if !bm.is_free(frame) {
                bm.mark_free(frame);
                bm.total += 1;
            }
        }
    }

    /// Reserve a specific frame so it is never handed out (boot page
    /// tables, kernel image).
    pub fn mark_frame_used(&self, frame: FrameNumber) {
        self.inner.lock().mark_used(frame.as_u64());
    }

    /// Allocate one frame.
    pub fn alloc_frame(&self) -> Result<FrameNumber> {
        self.alloc_frames(1)
    }

    /// Allocate `count` physically contiguous frames.
    pub fn alloc_frames(&self, count: usize) -> Result<FrameNumber> {
        if count == 0 {
            return Err(FrameAllocError::InvalidSize);
        }
        let mut bm = self.inner.lock();
        let start = bm.find_run(count).ok_or(FrameAllocError::OutOfMemory)?;
        for f in start..start + count as u64 {
            bm.mark_used(f);
        }
        bm.cursor = (start as usize + count) / 64 % BITMAP_WORDS;
        Ok(FrameNumber::new(start))
    }

    /// Free one frame.
    pub fn free_frame(&self, frame: FrameNumber) -> Result<()> {
        self.free_frames(frame, 1)
    }

    /// Free `count` contiguous frames starting at `frame`.
    pub fn free_frames(&self, frame: FrameNumber, count: usize) -> Result<()> {
        if count == 0 {
            return Err(FrameAllocError::InvalidSize);
        }
        let mut bm = self.inner.lock();
        // Double-free detection before mutating anything.
        for f in frame.as_u64()..frame.as_u64() + count as u64 {
            if bm.is_free(f) {
                return Err(FrameAllocError::InvalidFrame);
            }
        }
        for f in frame.as_u64()..frame.as_u64() + count as u64 {
            bm.mark_free(f);
        }
        Ok(())
    }

    /// Frames managed in total.
    pub fn total_frames(&self) -> u64 {
        self.inner.lock().total
    }

    /// Frames currently free.
    pub fn free_count(&self) -> u64 {
        self.inner.lock().free
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    fn allocator_with(frames: u64) -> Box<FrameAllocator> {
        // Boxed: the bitmap is large for a test thread's stack.
        let fa = Box::new(FrameAllocator::new());
        fa.add_region(PhysicalAddress::new(0), PhysicalAddress::new(frames * 4096));
        fa
    }

    #[test]
    fn single_frame_roundtrip() {
        let fa = allocator_with(128);
        assert_eq!(fa.free_count(), 128);
        assert_eq!(fa.total_frames(), 128);

        let f = fa.alloc_frame().expect("fresh allocator must have a frame");
        assert_eq!(fa.free_count(), 127);

        fa.free_frame(f).expect("freeing an allocated frame succeeds");
        assert_eq!(fa.free_count(), 128);
    }

    #[test]
    fn contiguous_run_allocation() {
        let fa = allocator_with(256);
        let run = fa
            .alloc_frames(10)
            .expect("10-frame run fits in a fresh 256-frame allocator");
        for i in 0..10 {
            assert!(!fa.inner.lock().is_free(run.as_u64() + i));
        }
        assert_eq!(fa.free_count(), 246);
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let fa = allocator_with(4);
        for _ in 0..4 {
            fa.alloc_frame().expect("4 frames available");
        }
        assert_eq!(fa.alloc_frame(), Err(FrameAllocError::OutOfMemory));
    }

    #[test]
    fn double_free_is_rejected() {
        let fa = allocator_with(8);
        let f = fa.alloc_frame().expect("frame available");
        fa.free_frame(f).expect("first free succeeds");
        assert_eq!(fa.free_frame(f), Err(FrameAllocError::InvalidFrame));
    }

    #[test]
    fn cursor_wraps_to_reuse_freed_low_frames() {
        let fa = allocator_with(8);
        let mut frames = alloc::vec::Vec::new();
        for _ in 0..8 {
            frames.push(fa.alloc_frame().expect("8 frames available"));
        }
        fa.free_frame(frames[0]).expect("free succeeds");
        // Allocation scans from the cursor, wraps, and finds frame 0 again.
        let again = fa.alloc_frame().expect("freed frame is reusable");
        assert_eq!(again, frames[0]);
    }

    #[test]
    fn reserved_frames_are_never_handed_out() {
        let fa = allocator_with(4);
        fa.mark_frame_used(FrameNumber::new(0));
        fa.mark_frame_used(FrameNumber::new(1));
        let a = fa.alloc_frame().expect("two frames remain");
        let b = fa.alloc_frame().expect("one frame remains");
        assert!(a.as_u64() >= 2 && b.as_u64() >= 2);
        assert_eq!(fa.alloc_frame(), Err(FrameAllocError::OutOfMemory));
    }
}
