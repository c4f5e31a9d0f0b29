//! # The command table.
//!
//! One handler per protocol command. Handlers parse their own argument
//! tail, return `Result<(), ControlError>`, and the dispatcher turns any
//! failure into a single `error` event on the issuing controller. Nothing a
//! controller sends can disconnect it or stop the supervisor; unknown
//! commands get `error\tunknown-command\tNAME`.
//!
//! Lines that are empty or start with whitespace or `#` are ignored, which
//! is what makes config files and protocol streams the same format.

use std::os::fd::{FromRawFd, OwnedFd};

use crate::clock::Ts;
use crate::error::ControlError;
use crate::events::Event;
use crate::fds::OpenFlags;
use crate::options::{self, OptAction};
use crate::scan::{fields, next_field};
use crate::service::Spawner;
use crate::signals::{lookup_signal, Sig};
use crate::supervisor::Supervisor;

use super::endpoint::CtlId;

/// Parse and run one protocol line. `ctl` is `None` for the config feeder.
pub(crate) fn dispatch<S: Spawner>(sup: &mut Supervisor<S>, ctl: Option<CtlId>, line: &str) {
    if line.is_empty() || line.starts_with([' ', '\t', '#']) {
        return;
    }
    let mut rest = line;
    let Some(command) = next_field(&mut rest, '\t') else {
        return;
    };
    let outcome = match command {
        "statedump" => sup.begin_statedump(ctl),
        "echo" => cmd_echo(sup, ctl, rest),
        "service.args" => cmd_service_args(sup, ctl, rest),
        "service.fds" => cmd_service_fds(sup, ctl, rest),
        "service.opts" => cmd_service_opts(sup, ctl, rest),
        "service.start" => cmd_service_start(sup, rest),
        "service.cancel" => cmd_service_cancel(sup, rest),
        "service.signal" => cmd_service_signal(sup, rest),
        "service.delete" => cmd_service_delete(sup, rest),
        "fd.pipe" => cmd_fd_pipe(sup, rest),
        "fd.open" => cmd_fd_open(sup, rest),
        "fd.dup" => cmd_fd_dup(sup, rest),
        "fd.delete" => cmd_fd_delete(sup, rest),
        "signal.clear" => cmd_signal_clear(sup, rest),
        "log.filter" => cmd_log_filter(sup, rest),
        "log.dest" => cmd_log_dest(sup, rest),
        "failsafe" => cmd_failsafe(sup, rest),
        "shutdown" => cmd_shutdown(sup, rest),
        "terminate" => cmd_terminate(sup, rest),
        "exec_on_exit" => cmd_exec_on_exit(sup, rest),
        unknown => {
            sup.send_to(
                ctl,
                &Event::UnknownCommand {
                    command: unknown.to_string(),
                },
            );
            return;
        }
    };
    if let Err(err) = outcome {
        sup.send_error(ctl, &err);
    }
}

fn take_name<'a>(rest: &mut &'a str) -> Result<&'a str, ControlError> {
    next_field(rest, '\t')
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ControlError::invalid("missing name argument"))
}

fn cmd_echo<S: Spawner>(
    sup: &mut Supervisor<S>,
    ctl: Option<CtlId>,
    rest: &str,
) -> Result<(), ControlError> {
    sup.send_to(
        ctl,
        &Event::Echo {
            args: rest.to_string(),
        },
    );
    Ok(())
}

fn cmd_service_args<S: Spawner>(
    sup: &mut Supervisor<S>,
    ctl: Option<CtlId>,
    mut rest: &str,
) -> Result<(), ControlError> {
    let name = take_name(&mut rest)?;
    sup.touch_service(name)?;
    if rest.is_empty() {
        // Query form: report the stored argv to the issuer.
        let args = sup.services.get(name).expect("touched").args().to_string();
        sup.send_to(
            ctl,
            &Event::ServiceArgs {
                name: name.to_string(),
                args,
            },
        );
        return Ok(());
    }
    sup.services
        .get_mut(name)
        .expect("touched")
        .set_args(rest)?;
    sup.broadcast(&Event::ServiceArgs {
        name: name.to_string(),
        args: rest.to_string(),
    });
    Ok(())
}

fn cmd_service_fds<S: Spawner>(
    sup: &mut Supervisor<S>,
    _ctl: Option<CtlId>,
    mut rest: &str,
) -> Result<(), ControlError> {
    let name = take_name(&mut rest)?;
    sup.touch_service(name)?;
    sup.services
        .get_mut(name)
        .expect("touched")
        .set_fds(rest)?;
    let spec = sup.services.get(name).expect("touched").fds().to_string();
    sup.broadcast(&Event::ServiceFds {
        name: name.to_string(),
        spec,
    });
    Ok(())
}

fn cmd_service_opts<S: Spawner>(
    sup: &mut Supervisor<S>,
    ctl: Option<CtlId>,
    mut rest: &str,
) -> Result<(), ControlError> {
    let name = take_name(&mut rest)?;
    sup.touch_service(name)?;
    if rest.is_empty() {
        let opts = {
            let svc = sup.services.get(name).expect("touched");
            options::render_opts(svc, sup.cfg.restart_interval)
        };
        sup.send_to(
            ctl,
            &Event::ServiceOpts {
                name: name.to_string(),
                opts,
            },
        );
        return Ok(());
    }
    // Each token stands alone: a bad one is reported and the rest still
    // apply.
    for token in fields(rest) {
        if let Err(err) = apply_opt(sup, name, token) {
            sup.send_error(ctl, &err);
        }
    }
    let opts = {
        let svc = sup.services.get(name).expect("touched");
        options::render_opts(svc, sup.cfg.restart_interval)
    };
    sup.broadcast(&Event::ServiceOpts {
        name: name.to_string(),
        opts,
    });
    Ok(())
}

fn apply_opt<S: Spawner>(
    sup: &mut Supervisor<S>,
    name: &str,
    token: &str,
) -> Result<(), ControlError> {
    match options::parse_opt(token)? {
        OptAction::Respawn(on) => {
            sup.services
                .get_mut(name)
                .expect("touched")
                .set_auto_restart(on);
            if on {
                let now = sup.clock.now();
                let _ = sup.start_service(name, now);
            }
            Ok(())
        }
        OptAction::RespawnDelay(value) => {
            let interval = value.unwrap_or(sup.cfg.restart_interval);
            sup.services
                .get_mut(name)
                .expect("touched")
                .set_restart_interval(interval)
        }
        OptAction::Triggers(list) => sup.apply_triggers(name, list.as_deref()),
        OptAction::Tags(value) => sup
            .services
            .get_mut(name)
            .expect("touched")
            .set_tags(value.as_deref().unwrap_or("")),
    }
}

fn cmd_service_start<S: Spawner>(
    sup: &mut Supervisor<S>,
    mut rest: &str,
) -> Result<(), ControlError> {
    let name = take_name(&mut rest)?;
    if !rest.is_empty() {
        return Err(ControlError::invalid("service.start takes only a name"));
    }
    let now = sup.clock.now();
    sup.start_service(name, now)
}

fn cmd_service_cancel<S: Spawner>(
    sup: &mut Supervisor<S>,
    mut rest: &str,
) -> Result<(), ControlError> {
    let name = take_name(&mut rest)?;
    sup.services
        .get_mut(name)
        .ok_or_else(|| ControlError::not_found(format!("no service {name:?}")))?
        .cancel_start()?;
    sup.services.set_active(name, false);
    sup.announce_state(name);
    Ok(())
}

fn cmd_service_signal<S: Spawner>(
    sup: &mut Supervisor<S>,
    mut rest: &str,
) -> Result<(), ControlError> {
    let name = take_name(&mut rest)?;
    let signame = next_field(&mut rest, '\t')
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ControlError::invalid("missing signal name"))?;
    let signal = lookup_signal(signame)
        .ok_or_else(|| ControlError::invalid(format!("unknown signal {signame:?}")))?;
    let group = match next_field(&mut rest, '\t') {
        None => false,
        Some("group") => true,
        Some(other) => {
            return Err(ControlError::invalid(format!(
                "unexpected argument {other:?}"
            )))
        }
    };
    sup.signal_service(name, signal, group)
}

fn cmd_service_delete<S: Spawner>(
    sup: &mut Supervisor<S>,
    mut rest: &str,
) -> Result<(), ControlError> {
    let name = take_name(&mut rest)?;
    sup.services.delete(name)
}

fn cmd_fd_pipe<S: Spawner>(sup: &mut Supervisor<S>, mut rest: &str) -> Result<(), ControlError> {
    let read_name = take_name(&mut rest)?;
    let write_name = take_name(&mut rest)?;
    if !rest.is_empty() {
        return Err(ControlError::invalid("fd.pipe takes two names"));
    }
    let events = sup.fds.make_pipe(read_name, write_name)?;
    for event in &events {
        sup.broadcast(event);
    }
    Ok(())
}

fn cmd_fd_open<S: Spawner>(sup: &mut Supervisor<S>, mut rest: &str) -> Result<(), ControlError> {
    let name = take_name(&mut rest)?;
    let flag_spec = next_field(&mut rest, '\t')
        .ok_or_else(|| ControlError::invalid("missing open flags"))?;
    let path = next_field(&mut rest, '\t')
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ControlError::invalid("missing path"))?;
    if !rest.is_empty() {
        return Err(ControlError::invalid("unexpected arguments after path"));
    }
    let flags = OpenFlags::parse(flag_spec)?;
    let event = sup.fds.open_file(name, flags, path)?;
    sup.broadcast(&event);
    Ok(())
}

fn cmd_fd_dup<S: Spawner>(sup: &mut Supervisor<S>, mut rest: &str) -> Result<(), ControlError> {
    let name = take_name(&mut rest)?;
    let existing = take_name(&mut rest)?;
    let event = sup.fds.dup(name, existing)?;
    sup.broadcast(&event);
    Ok(())
}

fn cmd_fd_delete<S: Spawner>(sup: &mut Supervisor<S>, mut rest: &str) -> Result<(), ControlError> {
    let name = take_name(&mut rest)?;
    let event = sup.fds.delete(name)?;
    sup.broadcast(&event);
    Ok(())
}

fn cmd_signal_clear<S: Spawner>(
    sup: &mut Supervisor<S>,
    mut rest: &str,
) -> Result<(), ControlError> {
    let signame = take_name(&mut rest)?;
    let sig = Sig::from_name(signame)
        .ok_or_else(|| ControlError::invalid(format!("unknown signal {signame:?}")))?;
    let count: u32 = next_field(&mut rest, '\t')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| ControlError::invalid("missing or bad clear count"))?;
    let remaining = sup.ledger.clear(sig, count);
    sup.note_cleared(sig, remaining);
    Ok(())
}

fn cmd_log_filter<S: Spawner>(sup: &mut Supervisor<S>, rest: &str) -> Result<(), ControlError> {
    match rest {
        "+" => sup.logger.shift(1),
        "-" => sup.logger.shift(-1),
        name => {
            let level = crate::log::Level::from_name(name)
                .ok_or_else(|| ControlError::invalid(format!("unknown log level {name:?}")))?;
            sup.logger.set_filter(level);
        }
    }
    Ok(())
}

fn cmd_log_dest<S: Spawner>(sup: &mut Supervisor<S>, mut rest: &str) -> Result<(), ControlError> {
    let name = take_name(&mut rest)?;
    let raw = sup
        .fds
        .resolve(name)
        .ok_or_else(|| ControlError::not_found(format!("no named fd {name:?}")))?;
    let duped = nix::unistd::dup(raw)?;
    // Safety: dup just handed us sole ownership of this descriptor.
    let owned = unsafe { OwnedFd::from_raw_fd(duped) };
    sup.logger.set_dest(owned);
    Ok(())
}

fn cmd_failsafe<S: Spawner>(sup: &mut Supervisor<S>, mut rest: &str) -> Result<(), ControlError> {
    let op = next_field(&mut rest, '\t')
        .filter(|op| !op.is_empty())
        .ok_or_else(|| ControlError::invalid("failsafe needs + or -"))?;
    let code = next_field(&mut rest, '\t')
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ControlError::invalid("failsafe needs a code"))?;
    match op {
        "+" => {
            sup.failsafe.arm(code);
            Ok(())
        }
        "-" => sup.failsafe.disarm(code),
        other => Err(ControlError::invalid(format!(
            "failsafe operator must be + or -, not {other:?}"
        ))),
    }
}

fn cmd_shutdown<S: Spawner>(sup: &mut Supervisor<S>, rest: &str) -> Result<(), ControlError> {
    sup.failsafe.permit(None, !sup.exec_on_exit.is_empty())?;
    let mut waits = [Ts::from_secs(10), Ts::from_secs(10), Ts::from_secs(5)];
    for (i, field) in fields(rest).enumerate() {
        if i >= waits.len() {
            return Err(ControlError::invalid("shutdown takes at most three waits"));
        }
        waits[i] = Ts::parse_secs(field)
            .filter(|ts| ts.raw() >= 0)
            .ok_or_else(|| ControlError::invalid(format!("bad wait {field:?}")))?;
    }
    sup.begin_shutdown(waits[0], waits[1], waits[2]);
    Ok(())
}

fn cmd_terminate<S: Spawner>(sup: &mut Supervisor<S>, mut rest: &str) -> Result<(), ControlError> {
    let value = match next_field(&mut rest, '\t') {
        None => 0,
        Some(v) => v
            .parse()
            .map_err(|_| ControlError::invalid(format!("bad exit value {v:?}")))?,
    };
    let code = next_field(&mut rest, '\t').filter(|c| !c.is_empty());
    sup.failsafe.permit(code, !sup.exec_on_exit.is_empty())?;
    sup.request_exit(value);
    Ok(())
}

fn cmd_exec_on_exit<S: Spawner>(sup: &mut Supervisor<S>, rest: &str) -> Result<(), ControlError> {
    sup.exec_on_exit = fields(rest)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    Ok(())
}
