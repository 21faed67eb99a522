//! Pipes
//!
//! A bounded byte ring with reader/writer endpoint counts. Reads block on
//! empty while writers exist and return 0 (EOF) once the last writer
//! closes; writes block on full while readers exist and fail with
//! BrokenPipe (the caller raises SIGPIPE) once the last reader closes.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::{error::FsError, sched::BlockOutcome, sync::WaitQueue};

/// Ring capacity in bytes.
pub const PIPE_CAPACITY: usize = 4096;

pub struct Pipe {
    buf: Mutex<VecDeque<u8>>,
    readers: AtomicUsize,
    writers: AtomicUsize,
    read_wait: WaitQueue,
    write_wait: WaitQueue,
}

impl Pipe {
    /// A pipe with one reader and one writer endpoint, as `pipe2` hands
    /// out.
    pub fn new() -> Arc<Pipe> {
        Arc::new(Pipe {
            buf: Mutex::new(VecDeque::with_capacity(PIPE_CAPACITY)),
            readers: AtomicUsize::new(1),
            writers: AtomicUsize::new(1),
            read_wait: WaitQueue::new(),
            write_wait: WaitQueue::new(),
        })
    }

    pub fn add_reader(&self) {
        self.readers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn add_writer(&self) {
        self.writers.fetch_add(1, Ordering::AcqRel);
    }

    /// Close one reader endpoint. The last close fails pending writers.
    pub fn close_reader(&self) {
        if self.readers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.write_wait.wake_all();
        }
    }

    /// Close one writer endpoint. The last close turns blocked reads into
    /// EOF.
    pub fn close_writer(&self) {
        if self.writers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.read_wait.wake_all();
        }
    }

    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    pub fn writer_count(&self) -> usize {
        self.writers.load(Ordering::Acquire)
    }

    /// Read up to `buf.len()` bytes. Blocks on empty while writers exist
    /// unless `nonblock`.
    pub fn read(&self, buf: &mut [u8], nonblock: bool) -> Result<usize, FsError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let mut ring = self.buf.lock();
                if !ring.is_empty() {
                    let n = buf.len().min(ring.len());
                    for slot in buf[..n].iter_mut() {
                        *slot = ring.pop_front().expect("ring length was checked");
                    }
                    drop(ring);
                    self.write_wait.wake_one();
                    return Ok(n);
                }
                if self.writer_count() == 0 {
                    return Ok(0); // EOF
                }
                if nonblock {
                    return Err(FsError::WouldBlock);
                }
                self.read_wait.register_current();
            }
            match crate::sched::block_current() {
                BlockOutcome::Interrupted => {
                    self.read_wait.unregister_current();
                    return Err(FsError::Interrupted);
                }
                _ => continue,
            }
        }
    }

    /// Write all of `buf`, blocking for space as needed. Returns the byte
    /// count, or BrokenPipe if the read side is gone (before or while
    /// blocked).
    pub fn write(&self, buf: &[u8], nonblock: bool) -> Result<usize, FsError> {
        let mut written = 0;
        loop {
            {
                if self.reader_count() == 0 {
                    return Err(FsError::BrokenPipe);
                }
                let mut ring = self.buf.lock();
                while written < buf.len() && ring.len() < PIPE_CAPACITY {
                    ring.push_back(buf[written]);
                    written += 1;
                }
                if written > 0 {
                    drop(ring);
                    self.read_wait.wake_one();
                } else {
                    drop(ring);
                }
                if written == buf.len() {
                    return Ok(written);
                }
                if nonblock {
                    return if written > 0 {
                        Ok(written)
                    } else {
                        Err(FsError::WouldBlock)
                    };
                }
                self.write_wait.register_current();
            }
            match crate::sched::block_current() {
                BlockOutcome::Interrupted => {
                    self.write_wait.unregister_current();
                    return if written > 0 {
                        Ok(written)
                    } else {
                        Err(FsError::Interrupted)
                    };
                }
                _ => continue,
            }
        }
    }

    /// Bytes currently queued.
    pub fn available(&self) -> usize {
        self.buf.lock().len()
    }
}
