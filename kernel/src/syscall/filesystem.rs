//! File and descriptor syscalls

use alloc::vec;

use super::SyscallResult;
use crate::{
    cap::{self, Capability},
    error::{FsError, KernelError},
    fs::{
        fd::{FdEntry, FdObject, O_ACCMODE, O_APPEND, O_CREAT, O_DIRECTORY, O_NONBLOCK, O_RDONLY, O_TRUNC, O_WRONLY},
        pipe::Pipe,
        NodeType,
    },
    mm::user,
    process::{signal, with_current_space},
    sched,
};

/// Largest single kernel bounce buffer; bigger transfers loop.
const IO_CHUNK: usize = 64 * 1024;

fn current_fd_entry(fd: u64) -> Result<FdEntry, FsError> {
    let task = sched::current_task();
    let fds = task.fds.lock();
    Ok(fds.get(fd as usize)?.clone())
}

fn advance_offset(fd: u64, to: u64) {
    let task = sched::current_task();
    let mut fds = task.fds.lock();
    if let Ok(entry) = fds.get_mut(fd as usize) {
        entry.offset = to;
    }
}

pub fn sys_read(fd: u64, buf: u64, len: u64) -> SyscallResult {
    let entry = current_fd_entry(fd).map_err(KernelError::Fs)?;
    if !entry.readable() {
        return Err(FsError::BadDescriptor.into());
    }
    let len = len as usize;
    let nonblock = entry.flags & O_NONBLOCK != 0;

    // Validate the whole destination up front, then move data through a
    // bounded bounce buffer. A short read returns what arrived.
    with_current_space(|space| user::ensure_user_range(space, buf, len, true))
        .ok_or(KernelError::InvalidArgument)??;

    let mut kbuf = vec![0u8; len.min(IO_CHUNK)];
    let n = match &entry.object {
        FdObject::File(node) => {
            let n = node
                .read(entry.offset, &mut kbuf)
                .map_err(KernelError::Fs)?;
            advance_offset(fd, entry.offset + n as u64);
            n
        }
        FdObject::Device(node)
        | FdObject::Socket(node)
        | FdObject::PtyMaster(node)
        | FdObject::PtySlave(node) => node.read(0, &mut kbuf).map_err(KernelError::Fs)?,
        FdObject::PipeReader(pipe) => pipe.read(&mut kbuf, nonblock).map_err(KernelError::Fs)?,
        FdObject::PipeWriter(_) => return Err(FsError::BadDescriptor.into()),
    };

    with_current_space(|space| user::copy_to_user(space, buf, &kbuf[..n]))
        .ok_or(KernelError::InvalidArgument)??;
    Ok(n as isize)
}

pub fn sys_write(fd: u64, buf: u64, len: u64) -> SyscallResult {
    let entry = current_fd_entry(fd).map_err(KernelError::Fs)?;
    if !entry.writable() {
        return Err(FsError::BadDescriptor.into());
    }
    let len = len as usize;
    let nonblock = entry.flags & O_NONBLOCK != 0;

    let mut written = 0usize;
    // O_APPEND: every write lands at the current end.
    let mut offset = match (&entry.object, entry.flags & O_APPEND != 0) {
        (FdObject::File(node), true) => node.len(),
        _ => entry.offset,
    };

    while written < len {
        let chunk = (len - written).min(IO_CHUNK);
        let kbuf =
            with_current_space(|space| user::copy_from_user(space, buf + written as u64, chunk))
                .ok_or(KernelError::InvalidArgument)??;

        let n = match &entry.object {
            FdObject::File(node) => {
                let n = node.write(offset, &kbuf).map_err(KernelError::Fs)?;
                offset += n as u64;
                n
            }
            FdObject::Device(node)
            | FdObject::Socket(node)
            | FdObject::PtyMaster(node)
            | FdObject::PtySlave(node) => node.write(0, &kbuf).map_err(KernelError::Fs)?,
            FdObject::PipeWriter(pipe) => match pipe.write(&kbuf, nonblock) {
                Ok(n) => n,
                Err(FsError::BrokenPipe) => {
                    // A write with no readers raises SIGPIPE at the
                    // writer in addition to the error return.
                    let _ = signal::send_signal(sched::current_tid(), signal::SIGPIPE);
                    return Err(FsError::BrokenPipe.into());
                }
                Err(e) => return Err(e.into()),
            },
            FdObject::PipeReader(_) => return Err(FsError::BadDescriptor.into()),
        };

        written += n;
        if n < kbuf.len() {
            break;
        }
    }

    if matches!(entry.object, FdObject::File(_)) {
        advance_offset(fd, offset);
    }
    Ok(written as isize)
}

pub fn sys_open(path_ptr: u64, flags: u64, _mode: u64) -> SyscallResult {
    let flags = flags as u32;
    let accmode = flags & O_ACCMODE;
    if accmode != O_WRONLY {
        cap::check_current(Capability::FILE_READ)?;
    }
    if accmode != O_RDONLY {
        cap::check_current(Capability::FILE_WRITE)?;
    }

    let path = with_current_space(|space| user::copy_string_from_user(space, path_ptr))
        .ok_or(KernelError::InvalidArgument)??;

    let vfs = crate::kctx::vfs();
    let node = match vfs.resolve(&path) {
        Ok(node) => node,
        Err(FsError::NotFound) if flags & O_CREAT != 0 => {
            let (parent, name) = vfs.resolve_parent(&path).map_err(KernelError::Fs)?;
            parent.create(&name).map_err(KernelError::Fs)?
        }
        Err(e) => return Err(e.into()),
    };

    match node.node_type() {
        NodeType::Directory => {
            if accmode != O_RDONLY {
                return Err(FsError::IsADirectory.into());
            }
        }
        NodeType::File => {
            if flags & O_DIRECTORY != 0 {
                return Err(FsError::NotADirectory.into());
            }
            if flags & O_TRUNC != 0 && accmode != O_RDONLY {
                node.truncate(0).map_err(KernelError::Fs)?;
            }
        }
        NodeType::CharDevice => {}
    }

    let object = match node.node_type() {
        NodeType::CharDevice => FdObject::Device(node),
        _ => FdObject::File(node),
    };
    let task = sched::current_task();
    let fd = task
        .fds
        .lock()
        .alloc(FdEntry::new(object, flags))
        .map_err(KernelError::Fs)?;
    Ok(fd as isize)
}

pub fn sys_close(fd: u64) -> SyscallResult {
    let task = sched::current_task();
    let entry = task
        .fds
        .lock()
        .take(fd as usize)
        .map_err(KernelError::Fs)?;
    entry.close();
    Ok(0)
}

const SEEK_SET: u64 = 0;
const SEEK_CUR: u64 = 1;
const SEEK_END: u64 = 2;

pub fn sys_lseek(fd: u64, offset: i64, whence: u64) -> SyscallResult {
    let task = sched::current_task();
    let mut fds = task.fds.lock();
    let entry = fds.get_mut(fd as usize).map_err(KernelError::Fs)?;

    let node = match &entry.object {
        FdObject::File(node) => node.clone(),
        _ => return Err(FsError::BadDescriptor.into()),
    };

    let base = match whence {
        SEEK_SET => 0,
        SEEK_CUR => entry.offset as i64,
        SEEK_END => node.len() as i64,
        _ => return Err(KernelError::InvalidArgument),
    };
    let target = base.checked_add(offset).ok_or(KernelError::InvalidArgument)?;
    if target < 0 {
        return Err(KernelError::InvalidArgument);
    }
    entry.offset = target as u64;
    Ok(target as isize)
}

pub fn sys_pipe2(fds_ptr: u64, flags: u64) -> SyscallResult {
    let flags = flags as u32;
    let pipe = Pipe::new();

    let task = sched::current_task();
    let (read_fd, write_fd) = {
        let mut fds = task.fds.lock();
        let read_fd = fds
            .alloc(FdEntry::new(FdObject::PipeReader(pipe.clone()), O_RDONLY | flags))
            .map_err(KernelError::Fs)?;
        let write_fd = match fds.alloc(FdEntry::new(
            FdObject::PipeWriter(pipe.clone()),
            O_WRONLY | flags,
        )) {
            Ok(fd) => fd,
            Err(e) => {
                if let Ok(entry) = fds.take(read_fd) {
                    entry.close();
                }
                return Err(e.into());
            }
        };
        (read_fd, write_fd)
    };

    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&(read_fd as i32).to_ne_bytes());
    out[4..].copy_from_slice(&(write_fd as i32).to_ne_bytes());
    with_current_space(|space| user::copy_to_user(space, fds_ptr, &out))
        .ok_or(KernelError::InvalidArgument)??;
    Ok(0)
}

pub fn sys_dup(old: u64) -> SyscallResult {
    let task = sched::current_task();
    let fd = task
        .fds
        .lock()
        .dup(old as usize)
        .map_err(KernelError::Fs)?;
    Ok(fd as isize)
}

pub fn sys_dup2(old: u64, new: u64) -> SyscallResult {
    let task = sched::current_task();
    let fd = task
        .fds
        .lock()
        .dup2(old as usize, new as usize)
        .map_err(KernelError::Fs)?;
    Ok(fd as isize)
}
