//! IPC syscalls: ports and shared memory

use super::SyscallResult;
use crate::{
    cap::{self, Capability},
    config::IPC_MAX_MSG_SIZE,
    error::{IpcError, KernelError},
    ipc::Message,
    mm::user,
    process::with_current_space,
    sched,
};

pub fn sys_port_create(flags: u64) -> SyscallResult {
    cap::check_current(Capability::IPC_CREATE)?;
    let id = crate::kctx::ports().create(sched::current_tid(), flags)?;
    Ok(id as isize)
}

pub fn sys_port_destroy(id: u64) -> SyscallResult {
    crate::kctx::ports().destroy(id, sched::current_tid())?;
    Ok(0)
}

pub fn sys_port_register(id: u64, name_ptr: u64) -> SyscallResult {
    let name = with_current_space(|space| user::copy_string_from_user(space, name_ptr))
        .ok_or(KernelError::InvalidArgument)??;
    let port = crate::kctx::ports().get(id)?;
    if port.owner != sched::current_tid() {
        return Err(IpcError::NotOwner.into());
    }
    crate::kctx::port_names().register(id, &name)?;
    Ok(0)
}

pub fn sys_port_lookup(name_ptr: u64) -> SyscallResult {
    let name = with_current_space(|space| user::copy_string_from_user(space, name_ptr))
        .ok_or(KernelError::InvalidArgument)??;
    let id = crate::kctx::port_names().lookup(&name)?;
    Ok(id as isize)
}

pub fn sys_port_send(
    dest: u64,
    buf: u64,
    len: u64,
    flags: u64,
    timeout_ms: u64,
    reply_port: u64,
) -> SyscallResult {
    cap::check_current(Capability::IPC_SEND)?;
    if len as usize > IPC_MAX_MSG_SIZE {
        return Err(IpcError::InvalidArgument.into());
    }
    let payload = with_current_space(|space| user::copy_from_user(space, buf, len as usize))
        .ok_or(KernelError::InvalidArgument)??;
    let msg = Message::new(&payload, reply_port).map_err(KernelError::Ipc)?;
    crate::kctx::ports()
        .send(dest, msg, sched::current_tid(), flags, timeout_ms)?;
    Ok(0)
}

/// Receive header written next to the payload when `info_ptr` is
/// nonzero: msg_id, sender, reply_port, payload_len, timestamp.
const RECV_INFO_SIZE: usize = 40;

pub fn sys_port_recv(
    id: u64,
    buf: u64,
    buf_len: u64,
    flags: u64,
    timeout_ms: u64,
    info_ptr: u64,
) -> SyscallResult {
    cap::check_current(Capability::IPC_RECV)?;
    let msg = crate::kctx::ports()
        .recv(id, sched::current_tid(), flags, timeout_ms)?;

    let n = msg.payload().len().min(buf_len as usize);
    with_current_space(|space| user::copy_to_user(space, buf, &msg.payload()[..n]))
        .ok_or(KernelError::InvalidArgument)??;

    if info_ptr != 0 {
        let mut info = [0u8; RECV_INFO_SIZE];
        info[0..8].copy_from_slice(&msg.msg_id.to_ne_bytes());
        info[8..16].copy_from_slice(&msg.sender.to_ne_bytes());
        info[16..24].copy_from_slice(&msg.reply_port.to_ne_bytes());
        info[24..32].copy_from_slice(&(msg.payload_len as u64).to_ne_bytes());
        info[32..40].copy_from_slice(&msg.timestamp.to_ne_bytes());
        with_current_space(|space| user::copy_to_user(space, info_ptr, &info))
            .ok_or(KernelError::InvalidArgument)??;
    }
    Ok(n as isize)
}

pub fn sys_shmem_create(size: u64, flags: u64) -> SyscallResult {
    cap::check_current(Capability::IPC_SHMEM)?;
    let flags = crate::ipc::ShmemFlags::from_bits_truncate(flags as u32);
    let id = crate::kctx::shmem()
        .create(size as usize, sched::current_tid(), flags)?;
    Ok(id as isize)
}

fn current_space_ref() -> Result<crate::mm::vas::AddressSpaceRef, KernelError> {
    sched::current_task()
        .space
        .lock()
        .clone()
        .ok_or(KernelError::InvalidArgument)
}

pub fn sys_shmem_map(id: u64) -> SyscallResult {
    cap::check_current(Capability::IPC_SHMEM)?;
    let space = current_space_ref()?;
    let base = crate::kctx::shmem().map(id, sched::current_tid(), &space)?;
    Ok(base as isize)
}

pub fn sys_shmem_unmap(id: u64) -> SyscallResult {
    let space = current_space_ref()?;
    crate::kctx::shmem().unmap(id, sched::current_tid(), &space)?;
    Ok(0)
}

pub fn sys_shmem_destroy(id: u64) -> SyscallResult {
    crate::kctx::shmem().destroy(id, sched::current_tid())?;
    Ok(0)
}
