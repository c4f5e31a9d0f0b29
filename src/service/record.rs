//! # The per-service record.
//!
//! Policy and state for one managed child. The supervisor's tick owns the
//! transitions; this type owns the fields and keeps them coherent:
//! timestamps never store the reserved 0, the restart interval never drops
//! below one second, and the `fds` spec keeps the derived control-handle
//! flags in sync.

use crate::clock::Ts;
use crate::error::ControlError;
use crate::events::{Event, ServicePhase, WaitRepr};
use crate::scan;
use crate::signals::{Sig, SigMask};

use super::vars::VarBuf;

/// The fd spec services get when they never set one.
pub const DEFAULT_FDS: &str = "null\tnull\tnull";

const VAR_ARGS: &str = "args";
const VAR_FDS: &str = "fds";
const VAR_TAGS: &str = "tags";
const VAR_TRIGGERS: &str = "triggers";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SvcState {
    Down,
    Start,
    Up,
    Reaped,
}

/// Parsed `triggers` list: `always` plus zero or more trapped signals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerSpec {
    pub always: bool,
    pub mask: SigMask,
}

impl TriggerSpec {
    /// Parse a tab-joined trigger list. Unknown words are invalid.
    pub fn parse(list: &str) -> Result<TriggerSpec, ControlError> {
        let mut spec = TriggerSpec::default();
        for word in scan::fields(list).filter(|w| !w.is_empty()) {
            if word == "always" {
                spec.always = true;
            } else if let Some(sig) = Sig::from_name(word) {
                spec.mask.add(sig);
            } else {
                return Err(ControlError::invalid(format!("unknown trigger {word:?}")));
            }
        }
        Ok(spec)
    }
}

#[derive(Debug)]
pub struct Service {
    name: String,
    vars: VarBuf,
    state: SvcState,
    pid: Option<i32>,
    wait_status: Option<WaitRepr>,
    start_time: Ts,
    reap_time: Ts,
    restart_interval: Ts,
    auto_restart: bool,
    triggers: SigMask,
    uses_control_socket: bool,
    uses_control_cmd: bool,
    uses_control_event: bool,
}

impl Service {
    /// `var_cap` is the pool-mode byte budget for this service's variables.
    pub fn new(name: impl Into<String>, var_cap: Option<usize>, restart_interval: Ts) -> Service {
        Service {
            name: name.into(),
            vars: VarBuf::new(var_cap),
            state: SvcState::Down,
            pid: None,
            wait_status: None,
            start_time: Ts::UNSET,
            reap_time: Ts::UNSET,
            restart_interval,
            auto_restart: false,
            triggers: SigMask::EMPTY,
            uses_control_socket: false,
            uses_control_cmd: false,
            uses_control_event: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SvcState {
        self.state
    }

    pub fn pid(&self) -> Option<i32> {
        self.pid
    }

    pub fn start_time(&self) -> Ts {
        self.start_time
    }

    pub fn reap_time(&self) -> Ts {
        self.reap_time
    }

    pub fn restart_interval(&self) -> Ts {
        self.restart_interval
    }

    pub fn auto_restart(&self) -> bool {
        self.auto_restart
    }

    pub fn triggers(&self) -> SigMask {
        self.triggers
    }

    pub fn uses_control_socket(&self) -> bool {
        self.uses_control_socket
    }

    pub fn uses_control_cmd(&self) -> bool {
        self.uses_control_cmd
    }

    pub fn uses_control_event(&self) -> bool {
        self.uses_control_event
    }

    pub fn wants_control(&self) -> bool {
        self.uses_control_socket || self.uses_control_cmd || self.uses_control_event
    }

    // --- variables ---

    pub fn args(&self) -> &str {
        self.vars.get(VAR_ARGS).unwrap_or("")
    }

    pub fn set_args(&mut self, args: &str) -> Result<(), ControlError> {
        let value = if args.is_empty() { None } else { Some(args) };
        self.vars.set(VAR_ARGS, value)
    }

    pub fn tags(&self) -> &str {
        self.vars.get(VAR_TAGS).unwrap_or("")
    }

    pub fn set_tags(&mut self, tags: &str) -> Result<(), ControlError> {
        let value = if tags.is_empty() { None } else { Some(tags) };
        self.vars.set(VAR_TAGS, value)
    }

    pub fn fds(&self) -> &str {
        self.vars.get(VAR_FDS).unwrap_or(DEFAULT_FDS)
    }

    /// Set the fd spec. The default spec is represented by absence so it
    /// costs no pool bytes. Re-derives the control-handle flags.
    pub fn set_fds(&mut self, spec: &str) -> Result<(), ControlError> {
        if spec.is_empty() || spec == DEFAULT_FDS {
            self.vars.set(VAR_FDS, None)?;
        } else {
            self.vars.set(VAR_FDS, Some(spec))?;
        }
        self.uses_control_socket = false;
        self.uses_control_cmd = false;
        self.uses_control_event = false;
        let fds = self.fds().to_string();
        for name in scan::fields(&fds) {
            match name {
                "control.socket" => self.uses_control_socket = true,
                "control.cmd" => self.uses_control_cmd = true,
                "control.event" => self.uses_control_event = true,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn triggers_str(&self) -> &str {
        self.vars.get(VAR_TRIGGERS).unwrap_or("")
    }

    /// Store a tab-joined trigger list and apply its parse. Returns whether
    /// the service now wants sigwake membership.
    pub fn set_triggers(&mut self, list: &str) -> Result<bool, ControlError> {
        let spec = TriggerSpec::parse(list)?;
        let value = if list.is_empty() { None } else { Some(list) };
        self.vars.set(VAR_TRIGGERS, value)?;
        self.auto_restart = spec.always;
        self.triggers = spec.mask;
        Ok(!spec.mask.is_empty())
    }

    pub fn set_auto_restart(&mut self, on: bool) {
        self.auto_restart = on;
    }

    /// Restart intervals shorter than one second are invalid.
    pub fn set_restart_interval(&mut self, interval: Ts) -> Result<(), ControlError> {
        if interval.whole() < 1 {
            return Err(ControlError::invalid(
                "respawn-delay must be at least 1 second",
            ));
        }
        self.restart_interval = interval;
        Ok(())
    }

    // --- state transitions (driven by the supervisor tick) ---

    /// Enter `Start`, scheduled for `when`. Legal from `Down` and `Start`.
    pub(crate) fn begin_start(&mut self, when: Ts) -> Result<(), ControlError> {
        match self.state {
            SvcState::Down | SvcState::Start => {
                debug_assert!(self.pid.is_none());
                self.state = SvcState::Start;
                self.start_time = when.or_tick();
                self.reap_time = Ts::UNSET;
                self.wait_status = None;
                Ok(())
            }
            _ => Err(ControlError::state(format!(
                "service {:?} is running",
                self.name
            ))),
        }
    }

    /// Abandon a pending start. Legal only from `Start`.
    pub(crate) fn cancel_start(&mut self) -> Result<(), ControlError> {
        if self.state != SvcState::Start {
            return Err(ControlError::state(format!(
                "service {:?} has no pending start",
                self.name
            )));
        }
        self.state = SvcState::Down;
        self.start_time = Ts::UNSET;
        Ok(())
    }

    pub(crate) fn mark_up(&mut self, pid: i32, now: Ts) {
        debug_assert_eq!(self.state, SvcState::Start);
        self.pid = Some(pid);
        self.state = SvcState::Up;
        self.start_time = now.or_tick();
    }

    pub(crate) fn mark_reaped(&mut self, status: WaitRepr, now: Ts) {
        debug_assert_eq!(self.state, SvcState::Up);
        self.wait_status = Some(status);
        self.reap_time = now.or_tick();
        self.state = SvcState::Reaped;
    }

    /// Leave `Reaped` for `Down`, releasing the pid. The caller drops the
    /// pid-index entry.
    pub(crate) fn settle_down(&mut self) -> Option<i32> {
        debug_assert_eq!(self.state, SvcState::Reaped);
        self.state = SvcState::Down;
        self.pid.take()
    }

    /// The `service.state` event for the current record, derived the same
    /// way regardless of which transition produced it.
    pub fn state_event(&self) -> Event {
        let (ts, phase) = if self.reap_time.is_set() {
            (
                self.reap_time,
                ServicePhase::Exited {
                    status: self
                        .wait_status
                        .clone()
                        .unwrap_or(WaitRepr::Exit(-1)),
                },
            )
        } else if let Some(pid) = self.pid {
            (self.start_time, ServicePhase::Up { pid })
        } else if self.state == SvcState::Start {
            (self.start_time, ServicePhase::Start)
        } else {
            (Ts::UNSET, ServicePhase::Down)
        };
        Event::ServiceState {
            name: self.name.clone(),
            ts,
            phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc() -> Service {
        Service::new("web", None, Ts::from_secs(1))
    }

    #[test]
    fn fds_default_and_control_flags() {
        let mut s = svc();
        assert_eq!(s.fds(), DEFAULT_FDS);
        s.set_fds("null\tlog.w\tcontrol.event").unwrap();
        assert!(s.uses_control_event());
        assert!(!s.uses_control_cmd());
        assert!(s.wants_control());
        // Setting the default spec releases the stored var and the flags.
        s.set_fds(DEFAULT_FDS).unwrap();
        assert_eq!(s.fds(), DEFAULT_FDS);
        assert!(!s.wants_control());
    }

    #[test]
    fn triggers_parse_and_apply() {
        let mut s = svc();
        let sigwake = s.set_triggers("always\tSIGUSR1").unwrap();
        assert!(sigwake);
        assert!(s.auto_restart());
        assert!(s.triggers().contains(Sig::Usr1));

        // A list without `always` clears auto restart.
        let sigwake = s.set_triggers("SIGHUP").unwrap();
        assert!(sigwake);
        assert!(!s.auto_restart());
        assert!(s.triggers().contains(Sig::Hup));

        assert_eq!(
            TriggerSpec::parse("sometimes").unwrap_err().category(),
            "invalid"
        );
    }

    #[test]
    fn restart_interval_clamp() {
        let mut s = svc();
        assert!(s.set_restart_interval(Ts::parse_secs("0.5").unwrap()).is_err());
        s.set_restart_interval(Ts::from_secs(2)).unwrap();
        assert_eq!(s.restart_interval(), Ts::from_secs(2));
    }

    #[test]
    fn lifecycle_transitions() {
        let mut s = svc();
        s.begin_start(Ts::from_secs(5)).unwrap();
        assert_eq!(s.state(), SvcState::Start);
        assert_eq!(s.state_event().to_line(), "service.state\tweb\tstart\t5");

        s.mark_up(42, Ts::from_secs(6));
        assert_eq!(s.state(), SvcState::Up);
        assert_eq!(s.pid(), Some(42));
        assert_eq!(s.state_event().to_line(), "service.state\tweb\tup\t6\tpid=42");

        s.mark_reaped(WaitRepr::Exit(0), Ts::from_secs(9));
        assert_eq!(s.state(), SvcState::Reaped);
        assert_eq!(
            s.state_event().to_line(),
            "service.state\tweb\tdown\t9\tstatus=exit:0"
        );

        assert_eq!(s.settle_down(), Some(42));
        assert_eq!(s.state(), SvcState::Down);
        // The last status stays visible until the next start.
        assert_eq!(
            s.state_event().to_line(),
            "service.state\tweb\tdown\t9\tstatus=exit:0"
        );

        s.begin_start(Ts::UNSET).unwrap();
        assert_eq!(s.start_time().raw(), 1);
        assert_eq!(s.state_event().to_line(), "service.state\tweb\tstart\t0");
    }

    #[test]
    fn start_refused_while_up() {
        let mut s = svc();
        s.begin_start(Ts::from_secs(1)).unwrap();
        s.mark_up(7, Ts::from_secs(1));
        assert_eq!(s.begin_start(Ts::from_secs(2)).unwrap_err().category(), "state");
    }

    #[test]
    fn cancel_only_from_start() {
        let mut s = svc();
        assert_eq!(s.cancel_start().unwrap_err().category(), "state");
        s.begin_start(Ts::from_secs(1)).unwrap();
        s.cancel_start().unwrap();
        assert_eq!(s.state(), SvcState::Down);
        assert_eq!(s.state_event().to_line(), "service.state\tweb\tdown\t0");
    }

    #[test]
    fn args_round_trip_preserves_bytes() {
        let mut s = svc();
        s.set_args("/bin/sh\t-c\techo one two").unwrap();
        assert_eq!(s.args(), "/bin/sh\t-c\techo one two");
        s.set_args("").unwrap();
        assert_eq!(s.args(), "");
    }
}
