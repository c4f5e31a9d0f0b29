//! # Guarded termination and the staged shutdown sequence.
//!
//! [`Failsafe`] is the guard that keeps a PID-1 supervisor from being torn
//! down casually: while armed, `terminate` and `shutdown` are refused
//! unless the caller proves knowledge of the code given at arm time, or an
//! exec-on-exit replacement is armed (in which case exiting cannot orphan
//! the system).
//!
//! [`ShutdownSeq`] walks the orderly teardown: SIGTERM everything, wait t1,
//! SIGKILL survivors, wait t2, then drain controller output for up to t3.
//! The exit code records the outcome: 0 clean, 10 needed SIGKILL, 11 a
//! service refused to die.

use std::ffi::CString;

use crate::clock::Ts;
use crate::error::ControlError;

pub struct Failsafe {
    armed: bool,
    code: Option<String>,
}

impl Failsafe {
    pub fn new(armed: bool, code: Option<String>) -> Failsafe {
        Failsafe { armed, code }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Arm (or re-arm) with a new code.
    pub fn arm(&mut self, code: &str) {
        self.armed = true;
        self.code = Some(code.to_string());
    }

    /// Disarm, which requires the exact code. An armed guard without a code
    /// (PID-1 default) cannot be disarmed at all.
    pub fn disarm(&mut self, code: &str) -> Result<(), ControlError> {
        if !self.armed {
            return Err(ControlError::state("failsafe is not armed"));
        }
        if self.code.as_deref() != Some(code) {
            return Err(ControlError::invalid("failsafe code mismatch"));
        }
        self.armed = false;
        self.code = None;
        Ok(())
    }

    /// Whether a termination request may proceed. `supplied` is an inline
    /// code offered with the request.
    pub fn permit(
        &self,
        supplied: Option<&str>,
        exec_on_exit_armed: bool,
    ) -> Result<(), ControlError> {
        if !self.armed || exec_on_exit_armed {
            return Ok(());
        }
        match (&self.code, supplied) {
            (Some(code), Some(given)) if code == given => Ok(()),
            _ => Err(ControlError::state("failsafe")),
        }
    }
}

/// What the supervisor should do next for an in-progress shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownStep {
    /// Nothing to do until this deadline (or a reap arrives sooner).
    Wait(Ts),
    /// The TERM grace expired with survivors: send SIGKILL now.
    SendKill,
    /// The sequence is over; exit with [`ShutdownSeq::exit_code`].
    Finished,
}

#[derive(Clone, Copy, Debug)]
enum Phase {
    Term { until: Ts },
    Kill { until: Ts },
    Drain { until: Ts },
}

pub struct ShutdownSeq {
    phase: Phase,
    t2: Ts,
    t3: Ts,
    needed_kill: bool,
    refused: bool,
}

impl ShutdownSeq {
    /// Begin the sequence. The caller sends the initial SIGTERM round.
    pub fn new(now: Ts, t1: Ts, t2: Ts, t3: Ts) -> ShutdownSeq {
        ShutdownSeq {
            phase: Phase::Term {
                until: now.saturating_add(t1),
            },
            t2,
            t3,
            needed_kill: false,
            refused: false,
        }
    }

    /// In the final output-drain window, where an empty queue may finish
    /// early.
    pub fn draining(&self) -> bool {
        matches!(self.phase, Phase::Drain { .. })
    }

    pub fn exit_code(&self) -> i32 {
        if self.refused {
            11
        } else if self.needed_kill {
            10
        } else {
            0
        }
    }

    /// Advance the phase machine against the current set of survivors.
    pub fn advance(&mut self, now: Ts, any_running: bool) -> ShutdownStep {
        loop {
            match self.phase {
                Phase::Term { until } => {
                    if !any_running {
                        self.enter_drain(now);
                        continue;
                    }
                    if now >= until {
                        self.needed_kill = true;
                        self.phase = Phase::Kill {
                            until: now.saturating_add(self.t2),
                        };
                        return ShutdownStep::SendKill;
                    }
                    return ShutdownStep::Wait(until);
                }
                Phase::Kill { until } => {
                    if !any_running {
                        self.enter_drain(now);
                        continue;
                    }
                    if now >= until {
                        self.refused = true;
                        self.enter_drain(now);
                        continue;
                    }
                    return ShutdownStep::Wait(until);
                }
                Phase::Drain { until } => {
                    if now >= until {
                        return ShutdownStep::Finished;
                    }
                    return ShutdownStep::Wait(until);
                }
            }
        }
    }

    fn enter_drain(&mut self, now: Ts) {
        self.phase = Phase::Drain {
            until: now.saturating_add(self.t3),
        };
    }
}

/// Replace this process with the armed argv. Only returns on failure.
pub fn exec_replacement(argv: &[String]) -> ControlError {
    let cstrings: Result<Vec<CString>, _> = argv.iter().map(|a| CString::new(a.as_str())).collect();
    match cstrings {
        Ok(cstrings) if !cstrings.is_empty() => match nix::unistd::execvp(&cstrings[0], &cstrings) {
            Ok(infallible) => match infallible {},
            Err(e) => ControlError::Io(e.to_string()),
        },
        _ => ControlError::invalid("exec-on-exit argv is unusable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failsafe_requires_matching_code() {
        let mut fs = Failsafe::new(false, None);
        assert!(fs.permit(None, false).is_ok());

        fs.arm("topsecret");
        assert_eq!(fs.permit(None, false).unwrap_err().category(), "state");
        assert!(fs.permit(Some("wrong"), false).is_err());
        assert!(fs.permit(Some("topsecret"), false).is_ok());
        // An armed exec replacement waives the guard.
        assert!(fs.permit(None, true).is_ok());

        assert_eq!(fs.disarm("wrong").unwrap_err().category(), "invalid");
        fs.disarm("topsecret").unwrap();
        assert!(fs.permit(None, false).is_ok());
    }

    #[test]
    fn pid1_default_guard_has_no_code() {
        let fs = Failsafe::new(true, None);
        assert_eq!(fs.permit(Some("anything"), false).unwrap_err().category(), "state");
    }

    #[test]
    fn clean_shutdown_skips_kill() {
        let t = Ts::from_secs;
        let mut seq = ShutdownSeq::new(t(0), t(5), t(5), t(2));
        assert_eq!(seq.advance(t(1), true), ShutdownStep::Wait(t(5)));
        // Everyone reaped inside the TERM window.
        assert_eq!(seq.advance(t(2), false), ShutdownStep::Wait(t(4)));
        assert!(seq.draining());
        assert_eq!(seq.advance(t(4), false), ShutdownStep::Finished);
        assert_eq!(seq.exit_code(), 0);
    }

    #[test]
    fn stubborn_services_escalate_to_kill() {
        let t = Ts::from_secs;
        let mut seq = ShutdownSeq::new(t(0), t(2), t(3), t(1));
        assert_eq!(seq.advance(t(2), true), ShutdownStep::SendKill);
        // Kill worked.
        assert_eq!(seq.advance(t(3), false), ShutdownStep::Wait(t(4)));
        assert_eq!(seq.advance(t(4), false), ShutdownStep::Finished);
        assert_eq!(seq.exit_code(), 10);
    }

    #[test]
    fn unkillable_service_reports_eleven() {
        let t = Ts::from_secs;
        let mut seq = ShutdownSeq::new(t(0), t(1), t(1), t(1));
        assert_eq!(seq.advance(t(1), true), ShutdownStep::SendKill);
        assert_eq!(seq.advance(t(2), true), ShutdownStep::Wait(t(3)));
        assert_eq!(seq.advance(t(3), true), ShutdownStep::Finished);
        assert_eq!(seq.exit_code(), 11);
    }
}
