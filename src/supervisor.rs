//! # Supervisor: the single owner of every table, and the main loop.
//!
//! The supervisor runs on one thread and owns the service table, the
//! named-fd table, the controller endpoints, the logger, and the failsafe.
//! Nothing else mutates them. The only shared state in the process is the
//! signal ledger's atomics; the endpoint pumps are plain byte movers on the
//! other side of bounded channels.
//!
//! ## One loop iteration
//! ```text
//! now = clock.now()
//!   ├─► reap children        waitpid(WNOHANG) loop → pid index → Reaped
//!   ├─► drain signals        ledger snapshot → signal events → sigwake walk
//!   ├─► tick active services state machine per service (spawn, settle, retry)
//!   ├─► pump statedumps      one entry per controller with a live cursor
//!   ├─► advance shutdown     TERM → t1 → KILL → t2 → drain t3
//!   ├─► sweep endpoints      closed streams, watchdog-expired controllers
//!   ├─► exit?                pending exit code (or exec-on-exit replacement)
//!   └─► select!              command lines / signal notify / nearest timer
//! ```
//!
//! ## Rules
//! - The `select!` at the bottom is the only suspension point.
//! - Commands from one controller apply strictly in arrival order; events
//!   for a command reach every endpoint's queue before the next command.
//! - Delivery is lossy per endpoint (bounded queue + overflow resync), but
//!   state transitions themselves are never skipped.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use futures::future::OptionFuture;
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::socket::{self, socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::sync::mpsc;

use crate::clock::{Clock, Ts};
use crate::config::Config;
use crate::controller::{dispatch, CtlId, CtlMsg, DumpCursor, Endpoint};
use crate::error::{ControlError, SupervisorError};
use crate::events::{Event, WaitRepr};
use crate::fds::FdTable;
use crate::log::Logger;
use crate::options;
use crate::scan;
use crate::service::{NixSpawner, ServiceTable, SpawnPlan, Spawner, SvcState};
use crate::shutdown::{exec_replacement, Failsafe, ShutdownSeq, ShutdownStep};
use crate::signals::{install, Sig, SignalLedger};

pub struct Supervisor<S: Spawner = NixSpawner> {
    pub(crate) cfg: Config,
    pub(crate) clock: Clock,
    pub(crate) ledger: Arc<SignalLedger>,
    pub(crate) services: ServiceTable,
    pub(crate) fds: FdTable,
    pub(crate) logger: Logger,
    pub(crate) failsafe: Failsafe,
    pub(crate) exec_on_exit: Vec<String>,
    pub(crate) endpoints: BTreeMap<CtlId, Endpoint>,
    pub(crate) shutting_down: bool,
    pub(crate) pending_exit: Option<i32>,
    shutdown_seq: Option<ShutdownSeq>,
    next_ctl: CtlId,
    cmd_tx: mpsc::Sender<CtlMsg>,
    cmd_rx: mpsc::Receiver<CtlMsg>,
    sig_reported: [u32; Sig::ALL.len()],
    wake_next: Option<Ts>,
    spawner: S,
}

impl Supervisor<NixSpawner> {
    pub fn new(cfg: Config) -> Supervisor<NixSpawner> {
        Supervisor::with_spawner(cfg, NixSpawner)
    }
}

impl<S: Spawner> Supervisor<S> {
    pub fn with_spawner(cfg: Config, spawner: S) -> Supervisor<S> {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        Supervisor {
            clock: Clock::new(),
            ledger: SignalLedger::new(),
            services: ServiceTable::new(cfg.service_pool, cfg.restart_interval),
            fds: FdTable::new(cfg.fd_pool),
            logger: Logger::new(cfg.log_adjust),
            failsafe: Failsafe::new(
                cfg.failsafe_armed || cfg.failsafe_code.is_some(),
                cfg.failsafe_code.clone(),
            ),
            exec_on_exit: cfg.exec_on_exit.clone(),
            endpoints: BTreeMap::new(),
            shutting_down: false,
            pending_exit: None,
            shutdown_seq: None,
            next_ctl: 1,
            cmd_tx,
            cmd_rx,
            sig_reported: [0; Sig::ALL.len()],
            wake_next: None,
            cfg,
            spawner,
        }
    }

    /// Run until a termination command or a completed shutdown sequence
    /// produces an exit code.
    pub async fn run(&mut self) -> Result<i32, SupervisorError> {
        install(&self.ledger, self.clock).map_err(SupervisorError::Signals)?;
        self.setup_stdin()?;
        self.feed_config()?;
        self.setup_socket()?;

        loop {
            let now = self.clock.now();
            self.wake_next = None;
            self.reap_children(now);
            self.drain_signals(now);
            self.tick_services(now);
            self.pump_dumps(now);
            self.advance_shutdown(now);
            self.sweep_endpoints(now);

            if let Some(code) = self.pending_exit {
                if !self.exec_on_exit.is_empty() {
                    let err = exec_replacement(&self.exec_on_exit);
                    self.logger.error(format!("exec-on-exit failed: {err}"));
                }
                return Ok(code);
            }

            self.wait_for_wake().await;
        }
    }

    // --- startup plumbing ---

    fn setup_stdin(&mut self) -> Result<(), SupervisorError> {
        if !self.cfg.use_stdin {
            return Ok(());
        }
        let input = dup_owned(0).map_err(SupervisorError::Stream)?;
        let output = dup_owned(1).map_err(SupervisorError::Stream)?;
        let id = self.alloc_ctl_id();
        let ep = Endpoint::spawn(
            id,
            Some(input),
            Some(output),
            self.cmd_tx.clone(),
            self.cfg.line_limit,
            self.cfg.event_queue,
            None,
        )
        .map_err(SupervisorError::Stream)?;
        self.endpoints.insert(id, ep);
        Ok(())
    }

    fn feed_config(&mut self) -> Result<(), SupervisorError> {
        let Some(path) = self.cfg.config_path.clone() else {
            return Ok(());
        };
        let text = std::fs::read_to_string(&path).map_err(|source| SupervisorError::Config {
            path: path.display().to_string(),
            source,
        })?;
        for line in text.lines() {
            dispatch(self, None, line);
        }
        Ok(())
    }

    fn setup_socket(&mut self) -> Result<(), SupervisorError> {
        let Some(path) = self.cfg.socket_path.clone() else {
            return Ok(());
        };
        let _ = std::fs::remove_file(&path);
        let listener =
            tokio::net::UnixListener::bind(&path).map_err(|source| SupervisorError::Listen {
                path: path.display().to_string(),
                source,
            })?;
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let Ok(std_stream) = stream.into_std() else {
                            continue;
                        };
                        let fd = OwnedFd::from(std_stream);
                        if tx.send(CtlMsg::Conn { fd }).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => tokio::time::sleep(std::time::Duration::from_millis(100)).await,
                }
            }
        });
        Ok(())
    }

    // --- loop steps ---

    fn reap_children(&mut self, now: Ts) {
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(WaitStatus::Exited(pid, code)) => {
                    self.route_reap(pid.as_raw(), WaitRepr::Exit(code), now);
                }
                Ok(WaitStatus::Signaled(pid, sig, core)) => {
                    self.route_reap(
                        pid.as_raw(),
                        WaitRepr::Signal {
                            name: sig.as_str().to_string(),
                            core,
                        },
                        now,
                    );
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }

    fn route_reap(&mut self, pid: i32, status: WaitRepr, now: Ts) {
        match self.services.mark_reaped(pid, status, now) {
            Some(name) => {
                self.logger.debug(format!("service {name:?} pid {pid} reaped"));
                self.arm_wake(now);
            }
            // As PID 1 we also collect orphans nobody asked about.
            None => self.logger.debug(format!("reaped unowned pid {pid}")),
        }
    }

    fn drain_signals(&mut self, now: Ts) {
        let snapshot = self.ledger.snapshot();
        let mut current = [0u32; Sig::ALL.len()];
        for (sig, count, ts) in &snapshot {
            current[sig.index()] = *count;
            if *count > self.sig_reported[sig.index()] {
                self.broadcast(&Event::Signal {
                    name: sig.name(),
                    count: *count,
                    ts: *ts,
                });
            }
        }
        self.sig_reported = current;

        if self.services.has_sigwake() && !self.shutting_down {
            let since = self.services.last_signal_ts;
            for (sig, _count, ts) in self.ledger.events_since(since) {
                for name in self.services.sigwake_snapshot() {
                    let wants = self
                        .services
                        .get(&name)
                        .is_some_and(|svc| svc.triggers().contains(sig));
                    if wants {
                        let _ = self.start_service(&name, now);
                    }
                }
                if ts > self.services.last_signal_ts {
                    self.services.last_signal_ts = ts;
                }
            }
        }
    }

    fn tick_services(&mut self, now: Ts) {
        for name in self.services.active_snapshot() {
            self.tick_service(&name, now);
        }
    }

    /// Advance one service's state machine until it parks. The loop is the
    /// re-entry point after each transition.
    fn tick_service(&mut self, name: &str, now: Ts) {
        loop {
            let Some(svc) = self.services.get(name) else {
                return;
            };
            match svc.state() {
                SvcState::Start => {
                    if self.shutting_down {
                        if let Some(svc) = self.services.get_mut(name) {
                            let _ = svc.cancel_start();
                        }
                        self.announce_state(name);
                        continue;
                    }
                    let when = svc.start_time();
                    if when > now {
                        self.arm_wake(when);
                        self.services.set_active(name, true);
                        return;
                    }
                    match self.try_spawn(name, now) {
                        Ok(pid) => {
                            self.services.mark_up(name, pid, now);
                            self.announce_state(name);
                            continue;
                        }
                        Err(err) => {
                            let retry = now.saturating_add(self.cfg.fork_retry);
                            self.logger.info(format!(
                                "spawn of {name:?} failed ({err}); retrying in {}s",
                                self.cfg.fork_retry.whole()
                            ));
                            if let Some(svc) = self.services.get_mut(name) {
                                let _ = svc.begin_start(retry);
                            }
                            self.announce_state(name);
                            self.services.set_active(name, true);
                            self.arm_wake(retry);
                            return;
                        }
                    }
                }
                SvcState::Up => {
                    self.services.set_active(name, false);
                    return;
                }
                SvcState::Reaped => {
                    let auto = svc.auto_restart();
                    let triggers = svc.triggers();
                    let reap = svc.reap_time();
                    let start = svc.start_time();
                    let interval = svc.restart_interval();
                    self.announce_state(name);
                    self.services.settle_down(name);

                    let sig_pending = !triggers.is_empty()
                        && self
                            .ledger
                            .events_since(Ts::UNSET)
                            .iter()
                            .any(|(sig, _, _)| triggers.contains(*sig));
                    if (auto || sig_pending) && !self.shutting_down {
                        // Restarting faster than the interval defers the
                        // next attempt into the future.
                        let when = if reap.saturating_sub(start) < interval {
                            now.saturating_add(interval)
                        } else {
                            now
                        };
                        if let Some(svc) = self.services.get_mut(name) {
                            let _ = svc.begin_start(when);
                        }
                        self.announce_state(name);
                        self.services.set_active(name, true);
                        self.arm_wake(when);
                    }
                    continue;
                }
                SvcState::Down => {
                    self.services.set_active(name, false);
                    return;
                }
            }
        }
    }

    /// Resolve everything fallible, then fork. Failures here take the
    /// retry-delay path in the tick.
    fn try_spawn(&mut self, name: &str, _now: Ts) -> Result<i32, ControlError> {
        self.fds.ensure_specials();
        let (fd_spec, args, wants_socket, wants_cmd, wants_event) = {
            let svc = self
                .services
                .get(name)
                .ok_or_else(|| ControlError::not_found(format!("no service {name:?}")))?;
            (
                svc.fds().to_string(),
                svc.args().to_string(),
                svc.uses_control_socket(),
                svc.uses_control_cmd(),
                svc.uses_control_event(),
            )
        };
        if args.is_empty() {
            return Err(ControlError::invalid(format!(
                "service {name:?} has no argv"
            )));
        }

        // A service that names control.* handles gets a socketpair and a
        // controller endpoint on the parent end.
        let child_reads_events = wants_socket || wants_event;
        let child_writes_cmds = wants_socket || wants_cmd;
        let mut control: Option<(OwnedFd, OwnedFd)> = None;
        if wants_socket || wants_cmd || wants_event {
            if !self.controller_slot_free() {
                return Err(ControlError::limit("controller pool exhausted"));
            }
            let (parent, child) = socketpair(
                AddressFamily::Unix,
                SockType::Stream,
                None,
                SockFlag::empty(),
            )?;
            // One-way children get the unused direction shut down so a
            // silent peer cannot fill a buffer nobody reads.
            if !wants_socket {
                if !child_reads_events {
                    let _ = socket::shutdown(child.as_raw_fd(), socket::Shutdown::Read);
                    let _ = socket::shutdown(parent.as_raw_fd(), socket::Shutdown::Write);
                }
                if !child_writes_cmds {
                    let _ = socket::shutdown(child.as_raw_fd(), socket::Shutdown::Write);
                    let _ = socket::shutdown(parent.as_raw_fd(), socket::Shutdown::Read);
                }
            }
            control = Some((parent, child));
        }

        let mut plan_fds: Vec<RawFd> = Vec::new();
        for tok in scan::fields(&fd_spec) {
            if tok.is_empty() {
                self.logger.warn("ignoring empty fd name in spec");
                continue;
            }
            if tok == "-" {
                plan_fds.push(-1);
                continue;
            }
            if matches!(tok, "control.socket" | "control.cmd" | "control.event") {
                let (_, child) = control
                    .as_ref()
                    .ok_or_else(|| ControlError::Internal("control handle without socket".into()))?;
                plan_fds.push(child.as_raw_fd());
                continue;
            }
            match self.fds.resolve(tok) {
                Some(fd) => plan_fds.push(fd),
                None => {
                    return Err(ControlError::not_found(format!("no named fd {tok:?}")));
                }
            }
        }

        let argv: Result<Vec<CString>, _> = scan::fields(&args).map(CString::new).collect();
        let argv = argv.map_err(|_| ControlError::invalid("argv contains NUL"))?;
        let plan = SpawnPlan {
            argv,
            fds: plan_fds,
        };
        let pid = self.spawner.spawn(&plan)?;

        if let Some((parent, child)) = control {
            drop(child);
            self.register_control_endpoint(parent, name, child_writes_cmds, child_reads_events);
        }
        Ok(pid)
    }

    fn register_control_endpoint(
        &mut self,
        parent: OwnedFd,
        owner: &str,
        has_input: bool,
        has_output: bool,
    ) {
        let id = self.alloc_ctl_id();
        let (input, output) = if has_input && has_output {
            match dup_owned(parent.as_raw_fd()) {
                Ok(dup) => (Some(parent), Some(dup)),
                Err(e) => {
                    self.logger.error(format!("control socket dup failed: {e}"));
                    (Some(parent), None)
                }
            }
        } else if has_input {
            (Some(parent), None)
        } else {
            (None, Some(parent))
        };
        match Endpoint::spawn(
            id,
            input,
            output,
            self.cmd_tx.clone(),
            self.cfg.line_limit,
            self.cfg.event_queue,
            Some(owner.to_string()),
        ) {
            Ok(ep) => {
                self.endpoints.insert(id, ep);
                self.logger.debug(format!(
                    "controller {id} attached to service {owner:?}"
                ));
            }
            Err(e) => self
                .logger
                .error(format!("control endpoint for {owner:?} failed: {e}")),
        }
    }

    fn pump_dumps(&mut self, now: Ts) {
        let ids: Vec<CtlId> = self
            .endpoints
            .iter()
            .filter(|(_, ep)| ep.dump.is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.pump_dump(id);
        }
        if self.endpoints.values().any(|ep| ep.dump.is_some()) {
            self.arm_wake(now);
        }
    }

    fn pump_dump(&mut self, id: CtlId) {
        let Some(cursor) = self.endpoints.get(&id).and_then(|ep| ep.dump.clone()) else {
            return;
        };
        let mut events: Vec<Event> = Vec::new();
        let next = match cursor {
            DumpCursor::Fds { after } => match self.fds.next_after(after.as_deref()) {
                Some(entry) => {
                    events.push(entry.state_event());
                    Some(DumpCursor::Fds {
                        after: Some(entry.name().to_string()),
                    })
                }
                None => Some(DumpCursor::Services { after: None }),
            },
            DumpCursor::Services { after } => match self.services.next_after(after.as_deref()) {
                Some(svc) => {
                    events.push(svc.state_event());
                    if !svc.args().is_empty() {
                        events.push(Event::ServiceArgs {
                            name: svc.name().to_string(),
                            args: svc.args().to_string(),
                        });
                    }
                    events.push(Event::ServiceFds {
                        name: svc.name().to_string(),
                        spec: svc.fds().to_string(),
                    });
                    let opts = options::render_opts(svc, self.cfg.restart_interval);
                    if !opts.is_empty() {
                        events.push(Event::ServiceOpts {
                            name: svc.name().to_string(),
                            opts,
                        });
                    }
                    Some(DumpCursor::Services {
                        after: Some(svc.name().to_string()),
                    })
                }
                None => Some(DumpCursor::Signals { after: Ts::UNSET }),
            },
            DumpCursor::Signals { after } => {
                match self.ledger.events_since(after).into_iter().next() {
                    Some((sig, count, ts)) => {
                        events.push(Event::Signal {
                            name: sig.name(),
                            count,
                            ts,
                        });
                        Some(DumpCursor::Signals { after: ts })
                    }
                    None => {
                        events.push(Event::StatedumpComplete);
                        None
                    }
                }
            }
        };
        for event in &events {
            self.send_to(Some(id), event);
        }
        if let Some(ep) = self.endpoints.get_mut(&id) {
            ep.dump = next;
        }
    }

    fn advance_shutdown(&mut self, now: Ts) {
        let Some(mut seq) = self.shutdown_seq.take() else {
            return;
        };
        let any_running = !self.services.running_pids().is_empty();
        match seq.advance(now, any_running) {
            ShutdownStep::Wait(deadline) => {
                if seq.draining() && self.all_drained() {
                    self.pending_exit = Some(seq.exit_code());
                } else {
                    self.arm_wake(deadline);
                }
            }
            ShutdownStep::SendKill => {
                self.logger.warn("shutdown grace expired; sending SIGKILL");
                self.kill_all(Signal::SIGKILL);
                self.arm_wake(now);
            }
            ShutdownStep::Finished => {
                self.pending_exit = Some(seq.exit_code());
            }
        }
        self.shutdown_seq = Some(seq);
    }

    fn sweep_endpoints(&mut self, now: Ts) {
        let mut doomed: Vec<CtlId> = Vec::new();
        for (id, ep) in &self.endpoints {
            if ep.is_closed() {
                doomed.push(*id);
                continue;
            }
            if ep.owner.is_some() {
                if let Some(since) = ep.overflow_since() {
                    if now.saturating_sub(since) >= self.cfg.ctl_watchdog {
                        doomed.push(*id);
                    }
                }
            }
        }
        for id in doomed {
            if let Some(ep) = self.endpoints.remove(&id) {
                ep.shutdown();
                match &ep.owner {
                    Some(owner) => self.logger.info(format!(
                        "detached unresponsive controller of service {owner:?}"
                    )),
                    None => self.logger.info(format!("controller {id} disconnected")),
                }
            }
        }
    }

    async fn wait_for_wake(&mut self) {
        let ledger = Arc::clone(&self.ledger);
        let sleep: OptionFuture<_> = self
            .wake_next
            .map(|ts| {
                let remaining = ts.saturating_sub(self.clock.now()).to_duration();
                tokio::time::sleep(remaining)
            })
            .into();
        tokio::pin!(sleep);

        let msg = tokio::select! {
            biased;
            msg = self.cmd_rx.recv() => msg,
            _ = ledger.wait() => None,
            Some(_) = &mut sleep => None,
        };
        if let Some(msg) = msg {
            self.handle_msg(msg);
            while let Ok(more) = self.cmd_rx.try_recv() {
                self.handle_msg(more);
            }
        }
    }

    fn handle_msg(&mut self, msg: CtlMsg) {
        match msg {
            CtlMsg::Line { ctl, line } => dispatch(self, Some(ctl), &line),
            CtlMsg::LineOverflow { ctl } => {
                self.logger.warn(format!("controller {ctl} sent an overlong line"));
                self.send_to(Some(ctl), &Event::Overflow);
            }
            CtlMsg::Closed { ctl } => {
                if let Some(ep) = self.endpoints.get_mut(&ctl) {
                    ep.mark_closed();
                }
            }
            CtlMsg::Conn { fd } => self.accept_controller(fd),
        }
    }

    fn accept_controller(&mut self, fd: OwnedFd) {
        if !self.controller_slot_free() {
            self.logger
                .warn("controller pool exhausted; dropping connection");
            return;
        }
        let id = self.alloc_ctl_id();
        let output = match dup_owned(fd.as_raw_fd()) {
            Ok(output) => output,
            Err(e) => {
                self.logger.error(format!("accepted socket dup failed: {e}"));
                return;
            }
        };
        match Endpoint::spawn(
            id,
            Some(fd),
            Some(output),
            self.cmd_tx.clone(),
            self.cfg.line_limit,
            self.cfg.event_queue,
            None,
        ) {
            Ok(ep) => {
                self.endpoints.insert(id, ep);
                self.logger.info(format!("controller {id} connected"));
            }
            Err(e) => self.logger.error(format!("controller setup failed: {e}")),
        }
    }

    // --- operations shared by command handlers and internal paths ---

    /// Queue an event on every endpoint.
    pub(crate) fn broadcast(&mut self, event: &Event) {
        let now = self.clock.now();
        let line = event.to_line();
        for ep in self.endpoints.values_mut() {
            ep.send_line(line.clone(), now);
        }
    }

    /// Queue an event on one endpoint, or log it for the config feeder.
    pub(crate) fn send_to(&mut self, ctl: Option<CtlId>, event: &Event) {
        match ctl {
            Some(id) => {
                let now = self.clock.now();
                if let Some(ep) = self.endpoints.get_mut(&id) {
                    ep.send_event(event, now);
                }
            }
            None => self.logger.info(event.to_line().replace('\t', " ")),
        }
    }

    pub(crate) fn send_error(&mut self, ctl: Option<CtlId>, err: &ControlError) {
        match ctl {
            Some(_) => self.send_to(ctl, &Event::error(err)),
            None => self
                .logger
                .warn(format!("config command failed ({}): {err}", err.category())),
        }
    }

    /// Fetch-or-create a service, announcing a brand new record.
    pub(crate) fn touch_service(&mut self, name: &str) -> Result<(), ControlError> {
        let (svc, created) = self.services.get_or_create(name)?;
        if created {
            let event = svc.state_event();
            self.broadcast(&event);
        }
        Ok(())
    }

    /// Broadcast the current `service.state` for `name`.
    pub(crate) fn announce_state(&mut self, name: &str) {
        if let Some(svc) = self.services.get(name) {
            let event = svc.state_event();
            self.broadcast(&event);
        }
    }

    /// Request a start. Creates the service on first reference.
    pub(crate) fn start_service(&mut self, name: &str, when: Ts) -> Result<(), ControlError> {
        self.touch_service(name)?;
        let svc = self.services.get_mut(name).expect("just touched");
        svc.begin_start(when)?;
        self.announce_state(name);
        self.services.set_active(name, true);
        self.arm_wake(when);
        Ok(())
    }

    /// Apply a canonical trigger list, maintaining sigwake membership and
    /// waking the service if a relevant signal is already pending.
    pub(crate) fn apply_triggers(
        &mut self,
        name: &str,
        list: Option<&str>,
    ) -> Result<(), ControlError> {
        let now = self.clock.now();
        let svc = self
            .services
            .get_mut(name)
            .ok_or_else(|| ControlError::not_found(format!("no service {name:?}")))?;
        let sigwake = svc.set_triggers(list.unwrap_or(""))?;
        self.services.set_sigwake(name, sigwake);

        let (auto, triggers) = {
            let svc = self.services.get(name).expect("still present");
            (svc.auto_restart(), svc.triggers())
        };
        let pending = !triggers.is_empty()
            && self
                .ledger
                .events_since(Ts::UNSET)
                .iter()
                .any(|(sig, _, _)| triggers.contains(*sig));
        if (auto || pending) && !self.shutting_down {
            let _ = self.start_service(name, now);
        }
        Ok(())
    }

    /// Begin a statedump for one controller.
    pub(crate) fn begin_statedump(&mut self, ctl: Option<CtlId>) -> Result<(), ControlError> {
        let id = ctl.ok_or_else(|| ControlError::state("statedump needs a controller"))?;
        let now = self.clock.now();
        if let Some(ep) = self.endpoints.get_mut(&id) {
            ep.dump = Some(DumpCursor::start());
        }
        self.arm_wake(now);
        Ok(())
    }

    /// Start the staged shutdown sequence.
    pub(crate) fn begin_shutdown(&mut self, t1: Ts, t2: Ts, t3: Ts) {
        if self.shutdown_seq.is_some() {
            return;
        }
        self.shutting_down = true;
        self.kill_all(Signal::SIGTERM);
        let now = self.clock.now();
        self.shutdown_seq = Some(ShutdownSeq::new(now, t1, t2, t3));
        self.arm_wake(now);
    }

    pub(crate) fn request_exit(&mut self, code: i32) {
        self.pending_exit = Some(code);
        let now = self.clock.now();
        self.arm_wake(now);
    }

    pub(crate) fn signal_service(
        &mut self,
        name: &str,
        signal: Signal,
        group: bool,
    ) -> Result<(), ControlError> {
        let pid = self
            .services
            .get(name)
            .ok_or_else(|| ControlError::not_found(format!("no service {name:?}")))?
            .pid()
            .ok_or_else(|| ControlError::state(format!("service {name:?} is not running")))?;
        self.logger.debug(format!(
            "sending {signal} to service {name:?} pid {pid}{}",
            if group { " (group)" } else { "" }
        ));
        if group {
            killpg(Pid::from_raw(pid), signal)?;
        } else {
            kill(Pid::from_raw(pid), signal)?;
        }
        Ok(())
    }

    /// Track a `signal.clear` so the reported count follows the bucket.
    pub(crate) fn note_cleared(&mut self, sig: Sig, remaining: u32) {
        self.sig_reported[sig.index()] = remaining;
    }

    fn kill_all(&mut self, signal: Signal) {
        for (name, pid) in self.services.running_pids() {
            self.logger
                .debug(format!("sending {signal} to service {name:?} pid {pid}"));
            let _ = kill(Pid::from_raw(pid), signal);
        }
    }

    fn all_drained(&self) -> bool {
        self.endpoints
            .values()
            .all(|ep| ep.is_closed() || ep.drained())
    }

    fn controller_slot_free(&self) -> bool {
        self.cfg
            .controller_pool
            .map_or(true, |cap| self.endpoints.len() < cap.count)
    }

    fn alloc_ctl_id(&mut self) -> CtlId {
        let id = self.next_ctl;
        self.next_ctl += 1;
        id
    }

    fn arm_wake(&mut self, when: Ts) {
        self.wake_next = Some(match self.wake_next {
            Some(current) if current <= when => current,
            _ => when,
        });
    }
}

fn dup_owned(fd: RawFd) -> std::io::Result<OwnedFd> {
    let duped = nix::unistd::dup(fd).map_err(std::io::Error::from)?;
    // Safety: dup just handed us sole ownership of this descriptor.
    Ok(unsafe { OwnedFd::from_raw_fd(duped) })
}
