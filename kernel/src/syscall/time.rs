//! Clock and sleep syscalls

use super::SyscallResult;
use crate::{
    error::KernelError,
    mm::user,
    process::with_current_space,
    time::{self, CLOCK_MONOTONIC, CLOCK_REALTIME},
};

fn write_timespec(ptr: u64, ns: u64) -> Result<(), KernelError> {
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&((ns / 1_000_000_000) as i64).to_ne_bytes());
    bytes[8..16].copy_from_slice(&((ns % 1_000_000_000) as i64).to_ne_bytes());
    with_current_space(|space| user::copy_to_user(space, ptr, &bytes))
        .ok_or(KernelError::InvalidArgument)?
}

fn read_timespec(ptr: u64) -> Result<u64, KernelError> {
    let bytes = with_current_space(|space| user::copy_from_user(space, ptr, 16))
        .ok_or(KernelError::InvalidArgument)??;
    let word = |at: usize| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[at..at + 8]);
        i64::from_ne_bytes(raw)
    };
    let (sec, nsec) = (word(0), word(8));
    if sec < 0 || !(0..1_000_000_000).contains(&nsec) {
        return Err(KernelError::InvalidArgument);
    }
    Ok(sec as u64 * 1_000_000_000 + nsec as u64)
}

pub fn sys_clock_gettime(clock: u64, ts_ptr: u64) -> SyscallResult {
    let ns = match clock {
        // Wall-clock epoch seeding comes from an external RTC driver;
        // until one runs, realtime equals monotonic.
        CLOCK_REALTIME | CLOCK_MONOTONIC => time::monotonic_ns(),
        _ => return Err(KernelError::InvalidArgument),
    };
    write_timespec(ts_ptr, ns)?;
    Ok(0)
}

pub fn sys_nanosleep(req_ptr: u64, rem_ptr: u64) -> SyscallResult {
    let ns = read_timespec(req_ptr)?;
    let deadline_ns = time::monotonic_ns() + ns;

    match time::nanosleep(ns) {
        Ok(()) => {
            if rem_ptr != 0 {
                write_timespec(rem_ptr, 0)?;
            }
            Ok(0)
        }
        Err(e) => {
            // Interrupted: report how much sleep was left.
            if rem_ptr != 0 {
                let now = time::monotonic_ns();
                write_timespec(rem_ptr, deadline_ns.saturating_sub(now))?;
            }
            Err(e)
        }
    }
}
