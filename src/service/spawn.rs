//! # Fork and exec plumbing.
//!
//! [`Spawner`] is the seam between the state machine and the OS: the
//! supervisor resolves everything fallible (argv, descriptor numbers,
//! control sockets) before calling [`Spawner::spawn`], so the child between
//! `fork` and `execvp` touches only async-signal-safe ground.
//!
//! Descriptor plumbing in the child follows the two-pass scheme: first any
//! source descriptor that sits below its eventual slot range is `dup`'d
//! upward out of the way, then each is `dup2`'d into the slot equal to its
//! list position, `-1` entries close their slot, and everything above the
//! list up to `FD_SETSIZE` is closed.

use std::ffi::CString;
use std::os::fd::RawFd;

use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow};
use nix::unistd::{close, dup, dup2, execvp, fork, ForkResult};

use crate::error::ControlError;

/// Exit status a child uses when its environment cannot be assembled,
/// `execvp` included.
pub const EXIT_INVALID_ENVIRONMENT: i32 = 3;

/// Everything the child needs, resolved ahead of the fork.
#[derive(Debug)]
pub struct SpawnPlan {
    /// Program and arguments. Never empty.
    pub argv: Vec<CString>,
    /// Descriptor for each slot, by position. `-1` means the slot is closed.
    pub fds: Vec<RawFd>,
}

/// The process-creation seam. The real implementation forks; tests script
/// outcomes without ever creating a process.
pub trait Spawner {
    fn spawn(&mut self, plan: &SpawnPlan) -> Result<i32, ControlError>;
}

pub struct NixSpawner;

impl Spawner for NixSpawner {
    fn spawn(&mut self, plan: &SpawnPlan) -> Result<i32, ControlError> {
        if plan.argv.is_empty() {
            return Err(ControlError::invalid("service has no argv"));
        }
        // Safety: the child calls only async-signal-safe functions before
        // exec; the plan was fully built beforehand.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => Ok(child.as_raw()),
            ForkResult::Child => exec_child(plan),
        }
    }
}

fn exec_child(plan: &SpawnPlan) -> ! {
    let all = SigSet::all();
    let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&all), None);

    let mut fds = plan.fds.clone();

    // Move sources out of the target slot range.
    for i in 0..fds.len() {
        while fds[i] >= 0 && (fds[i] as usize) < fds.len() {
            match dup(fds[i]) {
                Ok(moved) => fds[i] = moved,
                Err(_) => unsafe { libc::_exit(EXIT_INVALID_ENVIRONMENT) },
            }
        }
    }
    // Land each in its slot; close unused slots and everything above.
    for (slot, fd) in fds.iter().enumerate() {
        if *fd >= 0 {
            if dup2(*fd, slot as RawFd).is_err() {
                unsafe { libc::_exit(EXIT_INVALID_ENVIRONMENT) }
            }
        } else {
            let _ = close(slot as RawFd);
        }
    }
    for fd in (fds.len() as RawFd)..(libc::FD_SETSIZE as RawFd) {
        let _ = close(fd);
    }

    let _ = execvp(&plan.argv[0], &plan.argv);
    unsafe { libc::_exit(EXIT_INVALID_ENVIRONMENT) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_argv_is_rejected_before_forking() {
        let plan = SpawnPlan {
            argv: Vec::new(),
            fds: vec![0, 1, 2],
        };
        let err = NixSpawner.spawn(&plan).unwrap_err();
        assert_eq!(err.category(), "invalid");
    }
}
