//! Kernel error types
//!
//! Each subsystem has its own small error enum; [`KernelError`] is the
//! kernel-wide sum used where errors cross subsystem boundaries. At the
//! syscall boundary everything collapses into an [`Errno`], returned to
//! user space as a negated small integer.

use core::fmt;

/// Frame allocator errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocError {
    /// No free frame exists.
    OutOfMemory,
    /// Frame number outside the managed range, or double free.
    InvalidFrame,
    /// Zero-length or otherwise malformed request.
    InvalidSize,
}

/// Virtual-memory mapping errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Backing frame allocation failed.
    OutOfMemory,
    /// The virtual page is already mapped.
    AlreadyMapped,
    /// The virtual page is not mapped.
    NotMapped,
    /// Address not page aligned or outside the expected half.
    InvalidAddress { addr: u64 },
    /// No VMA covers the address, or the requested region overlaps one.
    NoRegion,
    /// Access violates the covering VMA's permissions.
    AccessDenied,
}

/// Scheduler and task-lifecycle errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Task id does not name a live task.
    NoSuchTask { id: u64 },
    /// The global task table is full.
    TableFull,
    /// The caller has no children to wait for.
    NoChildren,
    /// Waited-for child exists but has not terminated (non-blocking wait).
    WouldBlock,
}

/// IPC errors (ports and shared memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    /// Port id does not name a live port.
    NoSuchPort { id: u64 },
    /// The port table is full.
    TableFull,
    /// The message ring is full.
    QueueFull,
    /// Non-blocking receive found an empty ring.
    NoMessage,
    /// Payload larger than `IPC_MAX_MSG_SIZE`, or bad name length.
    InvalidArgument,
    /// Name already bound to a different port, or not found on lookup.
    NameUnavailable,
    /// Caller is not the owner of the port or region.
    NotOwner,
    /// Shared memory region id does not name a live region.
    NoSuchRegion { id: u64 },
    /// Region table full or frame allocation failed.
    OutOfMemory,
    /// A blocking call was interrupted by a signal.
    Interrupted,
    /// A timed wait elapsed.
    Timeout,
}

/// Filesystem and descriptor errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// File or directory not found.
    NotFound,
    /// Path already exists.
    AlreadyExists,
    /// Descriptor not open, or open with an incompatible type.
    BadDescriptor,
    /// Target is not a directory.
    NotADirectory,
    /// Target is a directory where a file was expected.
    IsADirectory,
    /// Directory still has entries.
    NotEmpty,
    /// Descriptor table is full.
    TooManyOpenFiles,
    /// Operation not supported by this node type.
    NotSupported,
    /// Write to a pipe with no readers.
    BrokenPipe,
    /// Non-blocking I/O found nothing to do.
    WouldBlock,
    /// Invalid path, offset, or flag combination.
    InvalidArgument,
    /// No room left in the backing store.
    NoSpace,
    /// A blocking call was interrupted by a signal.
    Interrupted,
}

/// Signal-subsystem errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    /// Signal number outside 1..=63.
    InvalidSignal,
    /// SIGKILL/SIGSTOP disposition changes are rejected.
    Uncatchable,
    /// Delivery target does not exist.
    NoSuchTask,
}

/// Kernel-wide error sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    Frame(FrameAllocError),
    Map(MapError),
    Sched(SchedError),
    Ipc(IpcError),
    Fs(FsError),
    Signal(SignalError),
    /// User pointer failed validation.
    BadAddress { addr: u64 },
    /// Capability or ownership check failed.
    PermissionDenied,
    /// Out-of-range enum, bad alignment, zero size.
    InvalidArgument,
    /// A bounded kernel table is exhausted.
    ResourceExhausted { resource: &'static str },
    /// Reserved or unknown syscall number.
    NotImplemented,
    /// A blocking call was aborted by a signal.
    Interrupted,
    /// A timed wait elapsed.
    Timeout,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "frame allocator: {:?}", e),
            Self::Map(e) => write!(f, "mapping: {:?}", e),
            Self::Sched(e) => write!(f, "scheduler: {:?}", e),
            Self::Ipc(e) => write!(f, "ipc: {:?}", e),
            Self::Fs(e) => write!(f, "fs: {:?}", e),
            Self::Signal(e) => write!(f, "signal: {:?}", e),
            Self::BadAddress { addr } => write!(f, "bad user address {:#x}", addr),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::ResourceExhausted { resource } => write!(f, "{} exhausted", resource),
            Self::NotImplemented => write!(f, "not implemented"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

impl From<FrameAllocError> for KernelError {
    fn from(e: FrameAllocError) -> Self {
        Self::Frame(e)
    }
}

impl From<MapError> for KernelError {
    fn from(e: MapError) -> Self {
        Self::Map(e)
    }
}

impl From<SchedError> for KernelError {
    fn from(e: SchedError) -> Self {
        Self::Sched(e)
    }
}

impl From<IpcError> for KernelError {
    fn from(e: IpcError) -> Self {
        Self::Ipc(e)
    }
}

impl From<FsError> for KernelError {
    fn from(e: FsError) -> Self {
        Self::Fs(e)
    }
}

impl From<SignalError> for KernelError {
    fn from(e: SignalError) -> Self {
        Self::Signal(e)
    }
}

/// User-visible error codes.
///
/// Every syscall returns success (>= 0) or the negation of one of these.
/// The numbering is stable; user binaries link against it.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// fd not open or wrong type
    BadDescriptor = 1,
    /// user pointer fails validation
    BadAddress = 2,
    NoSuchFile = 3,
    NoSuchProcess = 4,
    NoSuchPort = 5,
    /// capability or ownership check failed
    PermissionDenied = 6,
    /// frame allocator or bounded table exhausted
    OutOfMemory = 7,
    QueueFull = 8,
    NoMessage = 9,
    /// out-of-range enum, bad alignment, zero size
    InvalidArgument = 10,
    /// blocking call aborted by a signal
    Interrupted = 11,
    /// timed wait elapsed
    Timeout = 12,
    /// reserved syscall number
    NotImplemented = 13,
    AlreadyExists = 14,
    NotADirectory = 15,
    IsADirectory = 16,
    DirectoryNotEmpty = 17,
    BrokenPipe = 18,
    NotSupported = 19,
    NoSpace = 20,
    WouldBlock = 21,
    NoChildren = 22,
}

impl Errno {
    /// The value placed in %rax on syscall return.
    pub const fn to_isize(self) -> isize {
        -(self as i32 as isize)
    }
}

impl From<KernelError> for Errno {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::Frame(FrameAllocError::OutOfMemory) => Errno::OutOfMemory,
            KernelError::Frame(_) => Errno::InvalidArgument,
            KernelError::Map(MapError::OutOfMemory) => Errno::OutOfMemory,
            KernelError::Map(MapError::AccessDenied) => Errno::PermissionDenied,
            KernelError::Map(MapError::NoRegion) => Errno::BadAddress,
            KernelError::Map(_) => Errno::InvalidArgument,
            KernelError::Sched(SchedError::NoSuchTask { .. }) => Errno::NoSuchProcess,
            KernelError::Sched(SchedError::TableFull) => Errno::OutOfMemory,
            KernelError::Sched(SchedError::NoChildren) => Errno::NoChildren,
            KernelError::Sched(SchedError::WouldBlock) => Errno::WouldBlock,
            KernelError::Ipc(IpcError::NoSuchPort { .. }) => Errno::NoSuchPort,
            KernelError::Ipc(IpcError::NoSuchRegion { .. }) => Errno::NoSuchPort,
            KernelError::Ipc(IpcError::QueueFull) => Errno::QueueFull,
            KernelError::Ipc(IpcError::NoMessage) => Errno::NoMessage,
            KernelError::Ipc(IpcError::TableFull | IpcError::OutOfMemory) => Errno::OutOfMemory,
            KernelError::Ipc(IpcError::NameUnavailable) => Errno::AlreadyExists,
            KernelError::Ipc(IpcError::NotOwner) => Errno::PermissionDenied,
            KernelError::Ipc(IpcError::Interrupted) => Errno::Interrupted,
            KernelError::Ipc(IpcError::Timeout) => Errno::Timeout,
            KernelError::Ipc(IpcError::InvalidArgument) => Errno::InvalidArgument,
            KernelError::Fs(FsError::NotFound) => Errno::NoSuchFile,
            KernelError::Fs(FsError::AlreadyExists) => Errno::AlreadyExists,
            KernelError::Fs(FsError::BadDescriptor) => Errno::BadDescriptor,
            KernelError::Fs(FsError::NotADirectory) => Errno::NotADirectory,
            KernelError::Fs(FsError::IsADirectory) => Errno::IsADirectory,
            KernelError::Fs(FsError::NotEmpty) => Errno::DirectoryNotEmpty,
            KernelError::Fs(FsError::TooManyOpenFiles) => Errno::OutOfMemory,
            KernelError::Fs(FsError::NotSupported) => Errno::NotSupported,
            KernelError::Fs(FsError::BrokenPipe) => Errno::BrokenPipe,
            KernelError::Fs(FsError::WouldBlock) => Errno::WouldBlock,
            KernelError::Fs(FsError::NoSpace) => Errno::NoSpace,
            KernelError::Fs(FsError::Interrupted) => Errno::Interrupted,
            KernelError::Fs(FsError::InvalidArgument) => Errno::InvalidArgument,
            KernelError::Signal(SignalError::NoSuchTask) => Errno::NoSuchProcess,
            KernelError::Signal(_) => Errno::InvalidArgument,
            KernelError::BadAddress { .. } => Errno::BadAddress,
            KernelError::PermissionDenied => Errno::PermissionDenied,
            KernelError::InvalidArgument => Errno::InvalidArgument,
            KernelError::ResourceExhausted { .. } => Errno::OutOfMemory,
            KernelError::NotImplemented => Errno::NotImplemented,
            KernelError::Interrupted => Errno::Interrupted,
            KernelError::Timeout => Errno::Timeout,
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn errno_values_are_negated() {
        assert_eq!(Errno::BadDescriptor.to_isize(), -1);
        assert_eq!(Errno::Timeout.to_isize(), -12);
    }

    #[test]
    fn kernel_error_maps_to_expected_errno() {
        let e: KernelError = IpcError::QueueFull.into();
        assert_eq!(Errno::from(e), Errno::QueueFull);

        let e: KernelError = FsError::NotFound.into();
        assert_eq!(Errno::from(e), Errno::NoSuchFile);

        let e: KernelError = FrameAllocError::OutOfMemory.into();
        assert_eq!(Errno::from(e), Errno::OutOfMemory);
    }
}
