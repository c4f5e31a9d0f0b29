//! # The supervisor's own log stream.
//!
//! The core formats its log lines and hands them to one destination
//! descriptor, stderr by default. The sink is deliberately dumb: writes are
//! best effort and never block the loop, so a wedged log pipe costs log
//! lines, not liveness. `log.filter` moves the severity threshold and
//! `log.dest` re-points the destination at a named descriptor.

use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        }
    }

    pub fn from_name(name: &str) -> Option<Level> {
        match name {
            "error" => Some(Level::Error),
            "warn" => Some(Level::Warn),
            "info" => Some(Level::Info),
            "debug" => Some(Level::Debug),
            "trace" => Some(Level::Trace),
            _ => None,
        }
    }

    fn from_rank(rank: i32) -> Level {
        match rank.clamp(0, 4) {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

enum Dest {
    Stderr,
    Fd(OwnedFd),
}

pub struct Logger {
    filter: Level,
    dest: Dest,
}

impl Logger {
    /// `adjust` shifts the default `info` threshold: positive is chattier.
    pub fn new(adjust: i32) -> Logger {
        Logger {
            filter: Level::from_rank(2 + adjust),
            dest: Dest::Stderr,
        }
    }

    pub fn filter(&self) -> Level {
        self.filter
    }

    pub fn set_filter(&mut self, level: Level) {
        self.filter = level;
    }

    pub fn shift(&mut self, delta: i32) {
        self.filter = Level::from_rank(self.filter as i32 + delta);
    }

    /// Re-point the log at an owned descriptor, forced non-blocking so a
    /// full pipe drops lines instead of stalling the loop.
    pub fn set_dest(&mut self, fd: OwnedFd) {
        if let Ok(flags) = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL) {
            let flags = OFlag::from_bits_retain(flags) | OFlag::O_NONBLOCK;
            let _ = fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags));
        }
        self.dest = Dest::Fd(fd);
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.write(Level::Error, msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.write(Level::Warn, msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.write(Level::Info, msg.as_ref());
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.write(Level::Debug, msg.as_ref());
    }

    pub fn trace(&self, msg: impl AsRef<str>) {
        self.write(Level::Trace, msg.as_ref());
    }

    fn write(&self, level: Level, msg: &str) {
        if level > self.filter {
            return;
        }
        let line = format!("{}: {}\n", level.as_str(), msg);
        let _ = match &self.dest {
            Dest::Stderr => nix::unistd::write(std::io::stderr(), line.as_bytes()),
            Dest::Fd(fd) => nix::unistd::write(fd, line.as_bytes()),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_shifts_and_clamps() {
        let mut log = Logger::new(0);
        assert_eq!(log.filter(), Level::Info);
        log.shift(1);
        assert_eq!(log.filter(), Level::Debug);
        log.shift(10);
        assert_eq!(log.filter(), Level::Trace);
        log.shift(-10);
        assert_eq!(log.filter(), Level::Error);
        assert_eq!(Logger::new(-1).filter(), Level::Warn);
    }

    #[test]
    fn level_names_round_trip() {
        for level in [
            Level::Error,
            Level::Warn,
            Level::Info,
            Level::Debug,
            Level::Trace,
        ] {
            assert_eq!(Level::from_name(level.as_str()), Some(level));
        }
        assert_eq!(Level::from_name("loud"), None);
    }

    #[test]
    fn lines_reach_the_destination_fd() {
        let (rd, wr) = nix::unistd::pipe().unwrap();
        let mut log = Logger::new(0);
        log.set_dest(wr);
        log.info("service web state up");
        log.debug("suppressed at info");

        let mut buf = [0u8; 256];
        let n = nix::unistd::read(rd.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(
            std::str::from_utf8(&buf[..n]).unwrap(),
            "info: service web state up\n"
        );
    }
}
