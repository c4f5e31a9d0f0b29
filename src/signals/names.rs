//! The trapped signal set and name lookups.

use std::fmt;
use std::str::FromStr;

use nix::sys::signal::Signal;

/// A signal the supervisor traps and accumulates.
///
/// Deliberately a closed set: these are the signals that make sense to route
/// to services or to the supervisor's own lifecycle. Anything else is only
/// reachable through `service.signal`, which accepts the full OS table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Sig {
    Term,
    Int,
    Hup,
    Quit,
    Usr1,
    Usr2,
    Chld,
    Pipe,
    Alrm,
}

impl Sig {
    pub const ALL: [Sig; 9] = [
        Sig::Term,
        Sig::Int,
        Sig::Hup,
        Sig::Quit,
        Sig::Usr1,
        Sig::Usr2,
        Sig::Chld,
        Sig::Pipe,
        Sig::Alrm,
    ];

    /// Stable slot index into the ledger.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Sig::Term => "SIGTERM",
            Sig::Int => "SIGINT",
            Sig::Hup => "SIGHUP",
            Sig::Quit => "SIGQUIT",
            Sig::Usr1 => "SIGUSR1",
            Sig::Usr2 => "SIGUSR2",
            Sig::Chld => "SIGCHLD",
            Sig::Pipe => "SIGPIPE",
            Sig::Alrm => "SIGALRM",
        }
    }

    /// Parse a trapped-signal name, with or without the `SIG` prefix.
    pub fn from_name(name: &str) -> Option<Sig> {
        let bare = name.strip_prefix("SIG").unwrap_or(name);
        Sig::ALL
            .into_iter()
            .find(|s| s.name().strip_prefix("SIG") == Some(bare))
    }
}

impl fmt::Display for Sig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of trapped signals, one bit per [`Sig`] slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SigMask(u16);

impl SigMask {
    pub const EMPTY: SigMask = SigMask(0);

    pub fn add(&mut self, sig: Sig) {
        self.0 |= 1 << sig.index();
    }

    pub fn contains(self, sig: Sig) -> bool {
        self.0 & (1 << sig.index()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Resolve any OS signal name for `service.signal`, `SIG` prefix optional.
pub fn lookup_signal(name: &str) -> Option<Signal> {
    let normalized = if name.starts_with("SIG") {
        name.to_string()
    } else {
        format!("SIG{name}")
    };
    Signal::from_str(&normalized).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for sig in Sig::ALL {
            assert_eq!(Sig::from_name(sig.name()), Some(sig));
        }
        assert_eq!(Sig::from_name("USR1"), Some(Sig::Usr1));
        assert_eq!(Sig::from_name("SIGWINCH"), None);
    }

    #[test]
    fn mask_membership() {
        let mut mask = SigMask::EMPTY;
        assert!(mask.is_empty());
        mask.add(Sig::Usr1);
        mask.add(Sig::Hup);
        assert!(mask.contains(Sig::Usr1));
        assert!(mask.contains(Sig::Hup));
        assert!(!mask.contains(Sig::Term));
    }

    #[test]
    fn lookup_covers_untrapped_signals() {
        assert_eq!(lookup_signal("KILL"), Some(Signal::SIGKILL));
        assert_eq!(lookup_signal("SIGCONT"), Some(Signal::SIGCONT));
        assert_eq!(lookup_signal("NOPE"), None);
    }
}
