//! A single named descriptor and the open-flag set.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::error::ControlError;
use crate::events::{Event, FdDetail};

/// What a named descriptor is, with per-kind metadata.
#[derive(Debug)]
pub enum FdKind {
    /// Read end of a pipe; `peer` names the write end.
    PipeRead { peer: String },
    /// Write end of a pipe; `peer` names the read end.
    PipeWrite { peer: String },
    /// An opened file.
    File { flags: OpenFlags, path: String },
    /// One of `null`, `stdin`, `stdout`, `stderr`. Never closed or deleted.
    Special,
    /// A descriptor of unknown provenance, e.g. a dup.
    Unknown,
}

/// Owned descriptors close on removal; borrowed ones (the stdio specials)
/// belong to the process and are left alone.
#[derive(Debug)]
pub enum FdHandle {
    Owned(OwnedFd),
    Borrowed(RawFd),
}

#[derive(Debug)]
pub struct NamedFd {
    name: String,
    kind: FdKind,
    handle: FdHandle,
}

impl NamedFd {
    pub fn new(name: impl Into<String>, kind: FdKind, handle: FdHandle) -> NamedFd {
        NamedFd {
            name: name.into(),
            kind,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FdKind {
        &self.kind
    }

    pub fn is_special(&self) -> bool {
        matches!(self.kind, FdKind::Special)
    }

    pub fn raw(&self) -> RawFd {
        match &self.handle {
            FdHandle::Owned(fd) => fd.as_raw_fd(),
            FdHandle::Borrowed(fd) => *fd,
        }
    }

    pub(crate) fn replace_handle(&mut self, handle: FdHandle) {
        self.handle = handle;
    }

    /// The `fd.state` event describing this entry.
    pub fn state_event(&self) -> Event {
        let detail = match &self.kind {
            FdKind::PipeRead { peer } => FdDetail::PipeRead { peer: peer.clone() },
            FdKind::PipeWrite { peer } => FdDetail::PipeWrite { peer: peer.clone() },
            FdKind::File { flags, path } => FdDetail::File {
                flags: flags.render(),
                path: path.clone(),
            },
            FdKind::Special => FdDetail::Special,
            FdKind::Unknown => FdDetail::Unknown,
        };
        Event::FdState {
            name: self.name.clone(),
            detail,
        }
    }
}

/// The comma-joined flag set accepted by `fd.open`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub mkdir: bool,
    pub nonblock: bool,
    pub sync: bool,
    pub trunc: bool,
}

impl OpenFlags {
    pub fn parse(spec: &str) -> Result<OpenFlags, ControlError> {
        let mut flags = OpenFlags::default();
        for word in spec.split(',').filter(|w| !w.is_empty()) {
            match word {
                "read" => flags.read = true,
                "write" => flags.write = true,
                "append" => flags.append = true,
                "create" => flags.create = true,
                "mkdir" => flags.mkdir = true,
                "nonblock" => flags.nonblock = true,
                "sync" => flags.sync = true,
                "trunc" => flags.trunc = true,
                other => {
                    return Err(ControlError::invalid(format!("unknown open flag {other:?}")))
                }
            }
        }
        Ok(flags)
    }

    pub fn render(&self) -> String {
        let mut out = Vec::new();
        for (on, word) in [
            (self.read, "read"),
            (self.write, "write"),
            (self.append, "append"),
            (self.create, "create"),
            (self.mkdir, "mkdir"),
            (self.nonblock, "nonblock"),
            (self.sync, "sync"),
            (self.trunc, "trunc"),
        ] {
            if on {
                out.push(word);
            }
        }
        out.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_and_render() {
        let flags = OpenFlags::parse("write,create,trunc").unwrap();
        assert!(flags.write && flags.create && flags.trunc);
        assert!(!flags.read && !flags.append);
        assert_eq!(flags.render(), "write,create,trunc");
    }

    #[test]
    fn unknown_flag_is_invalid() {
        let err = OpenFlags::parse("write,bogus").unwrap_err();
        assert_eq!(err.category(), "invalid");
    }
}
