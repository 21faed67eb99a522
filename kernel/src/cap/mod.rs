//! Task capabilities
//!
//! A flat bitset of rights checked in the syscall dispatcher. Every task
//! carries a permitted set (what it may do) and an inheritable set (what
//! its children receive at fork). The init task starts with everything;
//! granting across tasks requires `SEC_CAP_GRANT`.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capability: u32 {
        const FILE_READ     = 1 << 0;
        const FILE_WRITE    = 1 << 1;
        const HW_VIDEO      = 1 << 2;
        const HW_INPUT      = 1 << 3;
        const HW_DISK       = 1 << 4;
        const HW_SERIAL     = 1 << 5;
        const IPC_CREATE    = 1 << 6;
        const IPC_SEND      = 1 << 7;
        const IPC_RECV      = 1 << 8;
        const IPC_SHMEM     = 1 << 9;
        const PROC_FORK     = 1 << 10;
        const PROC_EXEC     = 1 << 11;
        const PROC_KILL     = 1 << 12;
        const SYS_ADMIN     = 1 << 13;
        const SYS_REBOOT    = 1 << 14;
        const SEC_CAP_GRANT = 1 << 15;
    }
}

/// Per-task capability state.
#[derive(Debug, Clone, Copy)]
pub struct CapSets {
    pub permitted: Capability,
    pub inheritable: Capability,
}

impl CapSets {
    /// Full rights: the init task and kernel threads.
    pub fn kernel() -> Self {
        Self {
            permitted: Capability::all(),
            inheritable: Capability::all(),
        }
    }

    /// What a child receives at fork: the parent's inheritable subset.
    pub fn inherited(&self) -> Self {
        Self {
            permitted: self.inheritable,
            inheritable: self.inheritable,
        }
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.permitted.contains(cap)
    }

    /// Drop rights from both sets (cannot re-grow without a grant).
    pub fn drop_caps(&mut self, caps: Capability) {
        self.permitted &= !caps;
        self.inheritable &= !caps;
    }

    /// Grant rights; the granter's authority is checked by the caller.
    pub fn grant(&mut self, caps: Capability, inheritable: bool) {
        self.permitted |= caps;
        if inheritable {
            self.inheritable |= caps;
        }
    }
}

/// Check a capability on a live task.
pub fn has_capability(task: &crate::sched::Task, cap: Capability) -> bool {
    task.caps.lock().has(cap)
}

/// Dispatcher-side check for the current task.
pub fn check_current(cap: Capability) -> Result<(), crate::error::KernelError> {
    if has_capability(crate::sched::current_task(), cap) {
        Ok(())
    } else {
        Err(crate::error::KernelError::PermissionDenied)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn inheritance_narrows_to_the_inheritable_subset() {
        let mut parent = CapSets::kernel();
        parent.drop_caps(Capability::SYS_REBOOT | Capability::SEC_CAP_GRANT);
        let child = parent.inherited();
        assert!(!child.has(Capability::SYS_REBOOT));
        assert!(child.has(Capability::PROC_FORK));
        assert_eq!(child.permitted, child.inheritable);
    }

    #[test]
    fn drop_is_sticky_across_inheritance() {
        let mut caps = CapSets::kernel();
        caps.drop_caps(Capability::PROC_KILL);
        assert!(!caps.inherited().has(Capability::PROC_KILL));
    }

    #[test]
    fn grant_with_and_without_inheritance() {
        let mut caps = CapSets {
            permitted: Capability::empty(),
            inheritable: Capability::empty(),
        };
        caps.grant(Capability::FILE_READ, false);
        assert!(caps.has(Capability::FILE_READ));
        assert!(!caps.inherited().has(Capability::FILE_READ));

        caps.grant(Capability::IPC_SEND, true);
        assert!(caps.inherited().has(Capability::IPC_SEND));
    }
}
