//! Signal state and generation
//!
//! Per task: a pending bitmask, a blocked bitmask, and a disposition per
//! signal (default, ignore, or a registered user handler with its flags
//! and optional restorer). Delivery, which builds the user-stack resume
//! frame, lives in [`super::signal_delivery`]; this module owns the
//! bookkeeping and the `kill` path.
//!
//! SIGKILL and SIGSTOP can never be caught, blocked, or ignored.

use bitflags::bitflags;

use crate::{
    error::{KernelResult, SignalError},
    sched::{self, TaskId, TaskState},
};

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGABRT: u32 = 6;
pub const SIGKILL: u32 = 9;
pub const SIGSEGV: u32 = 11;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGSTOP: u32 = 19;

/// Highest signal number (inclusive).
pub const NSIG: u32 = 63;

bitflags! {
    /// rt_sigaction flags honored by this kernel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SigActionFlags: u64 {
        /// Do not add the delivered signal to the blocked mask while the
        /// handler runs.
        const NODEFER = 0x4000_0000;
        /// Reset the disposition to default after one delivery.
        const RESETHAND = 0x8000_0000;
        /// Caller supplied a restorer trampoline.
        const RESTORER = 0x0400_0000;
    }
}

/// What happens when a signal is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    Handler {
        handler: u64,
        restorer: u64,
        flags: SigActionFlags,
    },
}

/// Signals whose default action is to ignore.
fn default_ignores(sig: u32) -> bool {
    sig == SIGCHLD
}

const fn bit(sig: u32) -> u64 {
    1u64 << (sig - 1)
}

/// Per-task signal state.
pub struct SignalState {
    pending: u64,
    blocked: u64,
    dispositions: [Disposition; NSIG as usize],
}

impl SignalState {
    pub fn new() -> Self {
        Self {
            pending: 0,
            blocked: 0,
            dispositions: [Disposition::Default; NSIG as usize],
        }
    }

    /// Fork: dispositions and blocked mask are inherited, pending is not.
    pub fn inherited(&self) -> Self {
        Self {
            pending: 0,
            blocked: self.blocked,
            dispositions: self.dispositions,
        }
    }

    /// Exec: handlers reset to default, ignore/blocked survive.
    pub fn reset_for_exec(&mut self) {
        for d in self.dispositions.iter_mut() {
            if matches!(d, Disposition::Handler { .. }) {
                *d = Disposition::Default;
            }
        }
        self.pending = 0;
    }

    pub fn set_pending(&mut self, sig: u32) -> KernelResult<()> {
        if sig == 0 || sig > NSIG {
            return Err(SignalError::InvalidSignal.into());
        }
        self.pending |= bit(sig);
        Ok(())
    }

    pub fn clear_pending(&mut self, sig: u32) {
        self.pending &= !bit(sig);
    }

    pub fn is_pending(&self, sig: u32) -> bool {
        self.pending & bit(sig) != 0
    }

    pub fn disposition(&self, sig: u32) -> Disposition {
        self.dispositions[(sig - 1) as usize]
    }

    /// Record a disposition. SIGKILL/SIGSTOP are immutable.
    pub fn set_disposition(&mut self, sig: u32, d: Disposition) -> KernelResult<()> {
        if sig == 0 || sig > NSIG {
            return Err(SignalError::InvalidSignal.into());
        }
        if sig == SIGKILL || sig == SIGSTOP {
            return Err(SignalError::Uncatchable.into());
        }
        self.dispositions[(sig - 1) as usize] = d;
        Ok(())
    }

    pub fn blocked_mask(&self) -> u64 {
        self.blocked
    }

    /// Replace the blocked mask; SIGKILL/SIGSTOP bits are stripped.
    pub fn set_blocked_mask(&mut self, mask: u64) {
        self.blocked = mask & !(bit(SIGKILL) | bit(SIGSTOP));
    }

    pub fn block_signal(&mut self, sig: u32) {
        if sig != SIGKILL && sig != SIGSTOP {
            self.blocked |= bit(sig);
        }
    }

    /// Lowest-numbered signal that is pending and not blocked.
    pub fn next_deliverable(&self) -> Option<u32> {
        let ready = self.pending & !self.blocked;
        if ready == 0 {
            None
        } else {
            Some(ready.trailing_zeros() + 1)
        }
    }

    /// True when a pending, unblocked signal would interrupt a blocking
    /// call (anything except an ignored one).
    pub fn has_deliverable(&self) -> bool {
        let mut ready = self.pending & !self.blocked;
        while ready != 0 {
            let sig = ready.trailing_zeros() + 1;
            let ignored = match self.disposition(sig) {
                Disposition::Ignore => true,
                Disposition::Default => default_ignores(sig),
                Disposition::Handler { .. } => false,
            };
            if !ignored {
                return true;
            }
            ready &= !bit(sig);
        }
        false
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait-status word layout: exit code in bits 8..16, termination signal
/// in bits 0..7 (zero when the task exited normally).
pub fn exit_status_word(code: u32) -> u32 {
    (code & 0xFF) << 8
}

pub fn signal_status_word(sig: u32) -> u32 {
    sig & 0x7F
}

/// Send `sig` to task `target`.
///
/// The pending bit is always set. If the effective action is termination
/// (default disposition of a fatal signal, or SIGKILL) and the target is
/// not the caller, the target is terminated here instead of waiting for
/// it to enter the kernel, since a looping or blocked task must still die.
/// Otherwise a blocked target is woken so its interrupted call can return
/// and deliver.
pub fn send_signal(target: TaskId, sig: u32) -> KernelResult<()> {
    if sig == 0 || sig > NSIG {
        return Err(SignalError::InvalidSignal.into());
    }
    let task = crate::kctx::tasks()
        .get(target)
        .ok_or(SignalError::NoSuchTask)?;
    if task.state() == TaskState::Terminated {
        return Err(SignalError::NoSuchTask.into());
    }

    let action = {
        let mut signals = task.signals.lock();
        signals.set_pending(sig)?;
        match signals.disposition(sig) {
            _ if sig == SIGKILL => SignalAction::Terminate,
            Disposition::Default if default_ignores(sig) => SignalAction::Drop,
            Disposition::Default => SignalAction::Terminate,
            Disposition::Ignore => SignalAction::Drop,
            Disposition::Handler { .. } => SignalAction::Wake,
        }
        // Lock released before any scheduler call below.
    };

    match action {
        SignalAction::Drop => {
            task.signals.lock().clear_pending(sig);
        }
        SignalAction::Wake => {
            sched::unblock(target);
        }
        SignalAction::Terminate => {
            if target == sched::current_tid() {
                // Self-delivery: the syscall return path terminates us.
            } else {
                super::exit::terminate_with_signal(target, sig);
            }
        }
    }
    Ok(())
}

enum SignalAction {
    Drop,
    Wake,
    Terminate,
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn lowest_pending_unblocked_is_selected() {
        let mut s = SignalState::new();
        s.set_pending(SIGTERM).expect("valid signal");
        s.set_pending(SIGINT).expect("valid signal");
        assert_eq!(s.next_deliverable(), Some(SIGINT));

        s.block_signal(SIGINT);
        assert_eq!(s.next_deliverable(), Some(SIGTERM));
    }

    #[test]
    fn kill_and_stop_cannot_be_caught_or_blocked() {
        let mut s = SignalState::new();
        assert!(s
            .set_disposition(SIGKILL, Disposition::Ignore)
            .is_err());
        assert!(s
            .set_disposition(SIGSTOP, Disposition::Ignore)
            .is_err());

        s.set_blocked_mask(u64::MAX);
        s.set_pending(SIGKILL).expect("valid signal");
        assert_eq!(s.next_deliverable(), Some(SIGKILL));
    }

    #[test]
    fn inherited_state_drops_pending_keeps_handlers() {
        let mut s = SignalState::new();
        s.set_disposition(
            SIGTERM,
            Disposition::Handler {
                handler: 0x1000,
                restorer: 0,
                flags: SigActionFlags::empty(),
            },
        )
        .expect("valid disposition");
        s.set_pending(SIGTERM).expect("valid signal");

        let child = s.inherited();
        assert!(!child.is_pending(SIGTERM));
        assert!(matches!(
            child.disposition(SIGTERM),
            Disposition::Handler { handler: 0x1000, .. }
        ));
    }

    #[test]
    fn exec_resets_handlers_but_not_ignores() {
        let mut s = SignalState::new();
        s.set_disposition(SIGINT, Disposition::Ignore).expect("ok");
        s.set_disposition(
            SIGTERM,
            Disposition::Handler {
                handler: 0x1000,
                restorer: 0,
                flags: SigActionFlags::empty(),
            },
        )
        .expect("ok");

        s.reset_for_exec();
        assert_eq!(s.disposition(SIGINT), Disposition::Ignore);
        assert_eq!(s.disposition(SIGTERM), Disposition::Default);
    }

    #[test]
    fn ignored_signals_do_not_interrupt_blocking_calls() {
        let mut s = SignalState::new();
        s.set_pending(SIGCHLD).expect("valid signal");
        assert!(!s.has_deliverable());

        s.set_pending(SIGTERM).expect("valid signal");
        assert!(s.has_deliverable());
    }

    #[test]
    fn status_words_encode_exit_and_signal() {
        assert_eq!(exit_status_word(0), 0);
        assert_eq!(exit_status_word(3), 0x300);
        assert_eq!(signal_status_word(SIGTERM), 15);
    }
}
