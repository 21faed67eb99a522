//! File descriptor tables
//!
//! A per-task fixed-size table indexed by small integers. Each slot
//! carries a type tag, open flags, a byte offset for seekable objects,
//! and a refcounted handle to the underlying object. Fork copies entries
//! shallowly and bumps the underlying refcounts (pipe endpoint counts
//! matter for EOF and BrokenPipe semantics).

use alloc::sync::Arc;

use super::{pipe::Pipe, VfsNodeRef};
use crate::{config::FD_TABLE_SIZE, error::FsError};

// Open flags, Linux-valued so standard user stubs work. The low two bits
// are the access mode, not independent flags.
pub const O_RDONLY: u32 = 0o0;
pub const O_WRONLY: u32 = 0o1;
pub const O_RDWR: u32 = 0o2;
pub const O_ACCMODE: u32 = 0o3;
pub const O_CREAT: u32 = 0o100;
pub const O_TRUNC: u32 = 0o1000;
pub const O_APPEND: u32 = 0o2000;
pub const O_NONBLOCK: u32 = 0o4000;
pub const O_DIRECTORY: u32 = 0o200000;
pub const O_CLOEXEC: u32 = 0o2000000;

/// The typed handle a descriptor points at. The tag drives read/write
/// dispatch; socket and pty endpoints are implemented by external
/// drivers through the same node interface.
#[derive(Clone, Debug)]
pub enum FdObject {
    File(VfsNodeRef),
    PipeReader(Arc<Pipe>),
    PipeWriter(Arc<Pipe>),
    Device(VfsNodeRef),
    Socket(VfsNodeRef),
    PtyMaster(VfsNodeRef),
    PtySlave(VfsNodeRef),
}

/// One descriptor slot.
#[derive(Clone, Debug)]
pub struct FdEntry {
    pub object: FdObject,
    pub flags: u32,
    pub offset: u64,
}

impl FdEntry {
    pub fn new(object: FdObject, flags: u32) -> Self {
        Self {
            object,
            flags,
            offset: 0,
        }
    }

    pub fn readable(&self) -> bool {
        self.flags & O_ACCMODE != O_WRONLY
    }

    pub fn writable(&self) -> bool {
        self.flags & O_ACCMODE != O_RDONLY
    }

    /// Duplicate the slot, bumping endpoint counts where the object
    /// tracks them.
    pub fn clone_ref(&self) -> Self {
        match &self.object {
            FdObject::PipeReader(p) => p.add_reader(),
            FdObject::PipeWriter(p) => p.add_writer(),
            _ => {}
        }
        self.clone()
    }

    /// Release the slot's hold on the underlying object.
    pub fn close(self) {
        match self.object {
            FdObject::PipeReader(p) => p.close_reader(),
            FdObject::PipeWriter(p) => p.close_writer(),
            _ => {}
        }
    }
}

/// Per-task descriptor table.
pub struct FdTable {
    entries: [Option<FdEntry>; FD_TABLE_SIZE],
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            entries: [const { None }; FD_TABLE_SIZE],
        }
    }

    /// Place `entry` in the lowest free slot.
    pub fn alloc(&mut self, entry: FdEntry) -> Result<usize, FsError> {
        self.alloc_from(entry, 0)
    }

    /// Lowest free slot at or above `min` (dup's `fcntl` form and the
    /// stdio setup use this).
    pub fn alloc_from(&mut self, entry: FdEntry, min: usize) -> Result<usize, FsError> {
        for fd in min..FD_TABLE_SIZE {
            if self.entries[fd].is_none() {
                self.entries[fd] = Some(entry);
                return Ok(fd);
            }
        }
        Err(FsError::TooManyOpenFiles)
    }

    pub fn get(&self, fd: usize) -> Result<&FdEntry, FsError> {
        self.entries
            .get(fd)
            .and_then(|e| e.as_ref())
            .ok_or(FsError::BadDescriptor)
    }

    pub fn get_mut(&mut self, fd: usize) -> Result<&mut FdEntry, FsError> {
        self.entries
            .get_mut(fd)
            .and_then(|e| e.as_mut())
            .ok_or(FsError::BadDescriptor)
    }

    /// Vacate a slot, returning the entry for the caller to close.
    pub fn take(&mut self, fd: usize) -> Result<FdEntry, FsError> {
        self.entries
            .get_mut(fd)
            .and_then(|e| e.take())
            .ok_or(FsError::BadDescriptor)
    }

    /// dup: copy `old` into the lowest free slot.
    pub fn dup(&mut self, old: usize) -> Result<usize, FsError> {
        self.get(old)?;
        // Find the slot before bumping refcounts so a full table leaks
        // nothing.
        let free = self
            .entries
            .iter()
            .position(|e| e.is_none())
            .ok_or(FsError::TooManyOpenFiles)?;
        let entry = self.get(old)?.clone_ref();
        self.entries[free] = Some(entry);
        Ok(free)
    }

    /// dup2: copy `old` over `new`, closing whatever `new` held.
    pub fn dup2(&mut self, old: usize, new: usize) -> Result<usize, FsError> {
        if new >= FD_TABLE_SIZE {
            return Err(FsError::BadDescriptor);
        }
        if old == new {
            self.get(old)?;
            return Ok(new);
        }
        let entry = self.get(old)?.clone_ref();
        if let Some(previous) = self.entries[new].take() {
            previous.close();
        }
        self.entries[new] = Some(entry);
        Ok(new)
    }

    /// Fork: shallow-copy every slot with refcounts bumped.
    pub fn clone_for_fork(&self) -> Self {
        let mut table = Self::new();
        for (fd, slot) in self.entries.iter().enumerate() {
            if let Some(entry) = slot {
                table.entries[fd] = Some(entry.clone_ref());
            }
        }
        table
    }

    /// Close every descriptor (task teardown and exec's CLOEXEC pass run
    /// through here).
    pub fn close_all(&mut self) {
        for slot in self.entries.iter_mut() {
            if let Some(entry) = slot.take() {
                entry.close();
            }
        }
    }

    /// Close descriptors marked close-on-exec.
    pub fn close_cloexec(&mut self) {
        for slot in self.entries.iter_mut() {
            if slot.as_ref().is_some_and(|e| e.flags & O_CLOEXEC != 0) {
                if let Some(entry) = slot.take() {
                    entry.close();
                }
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamFs;

    fn file_entry() -> FdEntry {
        let root = RamFs::new_root();
        let f = root.create("f").expect("create");
        FdEntry::new(FdObject::File(f), O_RDWR)
    }

    #[test]
    fn alloc_returns_lowest_free_index() {
        let mut t = FdTable::new();
        assert_eq!(t.alloc(file_entry()).expect("alloc"), 0);
        assert_eq!(t.alloc(file_entry()).expect("alloc"), 1);
        t.take(0).expect("take fd 0").close();
        assert_eq!(t.alloc(file_entry()).expect("alloc reuses 0"), 0);
    }

    #[test]
    fn get_on_free_slot_is_bad_descriptor() {
        let t = FdTable::new();
        assert_eq!(t.get(0).unwrap_err(), FsError::BadDescriptor);
        assert_eq!(t.get(FD_TABLE_SIZE + 1).unwrap_err(), FsError::BadDescriptor);
    }

    #[test]
    fn dup2_closes_the_target_slot() {
        let mut t = FdTable::new();
        let pipe = Pipe::new();
        t.alloc(FdEntry::new(FdObject::PipeReader(pipe.clone()), O_RDONLY))
            .expect("alloc reader");
        t.alloc(file_entry()).expect("alloc file");

        // Duplicate the file over the pipe reader: the reader endpoint
        // must be released.
        t.dup2(1, 0).expect("dup2");
        assert_eq!(pipe.reader_count(), 0);
        assert!(t.get(0).expect("fd 0 live").writable());
    }

    #[test]
    fn dup2_same_fd_is_a_checked_noop() {
        let mut t = FdTable::new();
        t.alloc(file_entry()).expect("alloc");
        assert_eq!(t.dup2(0, 0).expect("dup2 same"), 0);
        assert_eq!(t.dup2(3, 3).unwrap_err(), FsError::BadDescriptor);
    }

    #[test]
    fn fork_clone_bumps_pipe_endpoint_counts() {
        let mut t = FdTable::new();
        let pipe = Pipe::new();
        t.alloc(FdEntry::new(FdObject::PipeReader(pipe.clone()), O_RDONLY))
            .expect("alloc reader");
        t.alloc(FdEntry::new(FdObject::PipeWriter(pipe.clone()), O_WRONLY))
            .expect("alloc writer");

        let mut child = t.clone_for_fork();
        assert_eq!(pipe.reader_count(), 2);
        assert_eq!(pipe.writer_count(), 2);

        child.close_all();
        t.close_all();
        assert_eq!(pipe.reader_count(), 0);
        assert_eq!(pipe.writer_count(), 0);
    }

    #[test]
    fn cloexec_pass_closes_only_marked_entries() {
        let mut t = FdTable::new();
        t.alloc(file_entry()).expect("alloc");
        let mut marked = file_entry();
        marked.flags |= O_CLOEXEC;
        t.alloc(marked).expect("alloc marked");

        t.close_cloexec();
        assert!(t.get(0).is_ok());
        assert_eq!(t.get(1).unwrap_err(), FsError::BadDescriptor);
    }

    #[test]
    fn access_mode_predicates() {
        let mut e = file_entry();
        e.flags = O_RDONLY;
        assert!(e.readable() && !e.writable());
        e.flags = O_WRONLY;
        assert!(!e.readable() && e.writable());
        e.flags = O_RDWR;
        assert!(e.readable() && e.writable());
    }
}
