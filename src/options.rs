//! # The typed service-option registry.
//!
//! `service.opts` tokens are parsed against a closed registry of typed
//! options. Three token forms exist:
//!
//! - `name` a bare flag (`respawn`)
//! - `name=value` a typed assignment (`respawn-delay=2.5`)
//! - `name@` an explicit reset to the documented default
//!
//! Exactly the registered options are resettable; that set is this module,
//! not an emergent property of the protocol. A parse failure on one token
//! is reported and does not abort the remaining tokens.
//!
//! `triggers` and `sig_wake` write the same underlying trigger list (the
//! stored variable keeps its tab-joined form; the option value is
//! comma-joined because values cannot contain the field separator).
//! `sig_wake` accepts signal names only; `triggers` also accepts `always`,
//! and a list without `always` clears auto-restart, so `respawn` and
//! `triggers` are two spellings of one flag.

use crate::clock::Ts;
use crate::error::ControlError;
use crate::service::{Service, TriggerSpec};

/// Value kinds an option slot can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptKind {
    Flag,
    Duration,
    SignalList,
    Text,
}

/// The registry: option name and its kind, in render order.
pub const REGISTRY: &[(&str, OptKind)] = &[
    ("respawn", OptKind::Flag),
    ("respawn-delay", OptKind::Duration),
    ("triggers", OptKind::SignalList),
    ("sig_wake", OptKind::SignalList),
    ("tags", OptKind::Text),
];

/// One parsed `service.opts` token, ready to apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptAction {
    Respawn(bool),
    /// `None` resets to the configured default.
    RespawnDelay(Option<Ts>),
    /// Canonical tab-joined trigger list; `None` clears it.
    Triggers(Option<String>),
    Tags(Option<String>),
}

/// Parse one token into an action.
pub fn parse_opt(token: &str) -> Result<OptAction, ControlError> {
    if token.is_empty() {
        return Err(ControlError::invalid("empty option token"));
    }
    if let Some(name) = token.strip_suffix('@') {
        return match name {
            "respawn" => Ok(OptAction::Respawn(false)),
            "respawn-delay" => Ok(OptAction::RespawnDelay(None)),
            "triggers" | "sig_wake" => Ok(OptAction::Triggers(None)),
            "tags" => Ok(OptAction::Tags(None)),
            other => Err(ControlError::invalid(format!(
                "unknown option {other:?}"
            ))),
        };
    }
    match token.split_once('=') {
        None => match token {
            "respawn" => Ok(OptAction::Respawn(true)),
            other if REGISTRY.iter().any(|(n, _)| *n == other) => Err(
                ControlError::invalid(format!("option {other:?} needs a value")),
            ),
            other => Err(ControlError::invalid(format!("unknown option {other:?}"))),
        },
        Some(("respawn-delay", value)) => {
            let ts = Ts::parse_secs(value)
                .ok_or_else(|| ControlError::invalid(format!("bad duration {value:?}")))?;
            Ok(OptAction::RespawnDelay(Some(ts)))
        }
        Some(("triggers", value)) => {
            let canonical = canonical_triggers(value, true)?;
            Ok(OptAction::Triggers(some_nonempty(canonical)))
        }
        Some(("sig_wake", value)) => {
            let canonical = canonical_triggers(value, false)?;
            Ok(OptAction::Triggers(some_nonempty(canonical)))
        }
        Some(("tags", value)) => Ok(OptAction::Tags(some_nonempty(value.to_string()))),
        Some((other, _)) => Err(ControlError::invalid(format!("unknown option {other:?}"))),
    }
}

/// Render a service's non-default options in registry order, tab-joined.
pub fn render_opts(svc: &Service, default_interval: Ts) -> String {
    let mut parts: Vec<String> = Vec::new();
    if svc.auto_restart() {
        parts.push("respawn".to_string());
    }
    if svc.restart_interval() != default_interval {
        parts.push(format!(
            "respawn-delay={}",
            svc.restart_interval().render_secs()
        ));
    }
    if !svc.triggers_str().is_empty() {
        parts.push(format!("triggers={}", svc.triggers_str().replace('\t', ",")));
    }
    if !svc.tags().is_empty() {
        parts.push(format!("tags={}", svc.tags()));
    }
    parts.join("\t")
}

/// Convert a comma-joined option value into the stored tab-joined list,
/// validating every word.
fn canonical_triggers(value: &str, allow_always: bool) -> Result<String, ControlError> {
    let words: Vec<&str> = value.split(',').filter(|w| !w.is_empty()).collect();
    let canonical = words.join("\t");
    let spec = TriggerSpec::parse(&canonical)?;
    if spec.always && !allow_always {
        return Err(ControlError::invalid("sig_wake takes signal names only"));
    }
    Ok(canonical)
}

fn some_nonempty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_assignment_and_reset_forms() {
        assert_eq!(parse_opt("respawn").unwrap(), OptAction::Respawn(true));
        assert_eq!(parse_opt("respawn@").unwrap(), OptAction::Respawn(false));
        assert_eq!(
            parse_opt("respawn-delay=2").unwrap(),
            OptAction::RespawnDelay(Some(Ts::from_secs(2)))
        );
        assert_eq!(
            parse_opt("respawn-delay@").unwrap(),
            OptAction::RespawnDelay(None)
        );
        assert_eq!(parse_opt("tags@").unwrap(), OptAction::Tags(None));
    }

    #[test]
    fn trigger_lists_canonicalize_to_tabs() {
        assert_eq!(
            parse_opt("triggers=always,SIGUSR1").unwrap(),
            OptAction::Triggers(Some("always\tSIGUSR1".into()))
        );
        assert_eq!(
            parse_opt("sig_wake=SIGHUP").unwrap(),
            OptAction::Triggers(Some("SIGHUP".into()))
        );
        assert_eq!(
            parse_opt("sig_wake=always").unwrap_err().category(),
            "invalid"
        );
        assert_eq!(
            parse_opt("triggers=NOPE").unwrap_err().category(),
            "invalid"
        );
        assert_eq!(parse_opt("triggers=").unwrap(), OptAction::Triggers(None));
    }

    #[test]
    fn unknown_and_malformed_tokens() {
        assert_eq!(parse_opt("color=red").unwrap_err().category(), "invalid");
        assert_eq!(parse_opt("respawn-delay").unwrap_err().category(), "invalid");
        assert_eq!(parse_opt("").unwrap_err().category(), "invalid");
        assert_eq!(
            parse_opt("respawn-delay=0.2").unwrap(),
            // Parses fine; the per-service clamp rejects it at apply time.
            OptAction::RespawnDelay(Some(Ts::parse_secs("0.2").unwrap()))
        );
    }

    #[test]
    fn render_lists_non_defaults_in_order() {
        let mut svc = Service::new("x", None, Ts::from_secs(1));
        assert_eq!(render_opts(&svc, Ts::from_secs(1)), "");
        svc.set_triggers("SIGUSR1\tSIGHUP").unwrap();
        svc.set_auto_restart(true);
        svc.set_restart_interval(Ts::from_secs(2)).unwrap();
        svc.set_tags("edge").unwrap();
        assert_eq!(
            render_opts(&svc, Ts::from_secs(1)),
            "respawn\trespawn-delay=2\ttriggers=SIGUSR1,SIGHUP\ttags=edge"
        );
    }
}
