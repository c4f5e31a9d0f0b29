//! # The named-fd table.
//!
//! A `BTreeMap` keyed by name, which gives both uniqueness and the ordered
//! "next entry after" iteration the statedump cursor resumes on. The four
//! specials are created up front and re-validated before every service
//! launch so plumbing them can never fail.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::ops::Bound;
use std::os::fd::{OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::{fcntl, FcntlArg};

use crate::config::PoolCap;
use crate::error::ControlError;
use crate::events::Event;
use crate::scan;

use super::entry::{FdHandle, FdKind, NamedFd, OpenFlags};

pub const SPECIALS: [&str; 4] = ["null", "stdin", "stdout", "stderr"];

pub struct FdTable {
    entries: BTreeMap<String, NamedFd>,
    cap: Option<PoolCap>,
}

impl FdTable {
    /// Build the table with the specials populated. `stdin`/`stdout`/
    /// `stderr` borrow descriptors 0..2; `null` owns `/dev/null`.
    pub fn new(cap: Option<PoolCap>) -> FdTable {
        let mut table = FdTable {
            entries: BTreeMap::new(),
            cap,
        };
        for (name, raw) in [("stdin", 0), ("stdout", 1), ("stderr", 2)] {
            table.entries.insert(
                name.to_string(),
                NamedFd::new(name, FdKind::Special, FdHandle::Borrowed(raw)),
            );
        }
        let null_handle = open_dev_null().map(FdHandle::Owned).unwrap_or(
            // Degraded until ensure_specials can reopen it.
            FdHandle::Borrowed(-1),
        );
        table
            .entries
            .insert("null".to_string(), NamedFd::new("null", FdKind::Special, null_handle));
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &str) -> Option<&NamedFd> {
        self.entries.get(name)
    }

    /// Descriptor number for a name, if present and usable.
    pub fn resolve(&self, name: &str) -> Option<RawFd> {
        self.entries.get(name).map(|e| e.raw()).filter(|fd| *fd >= 0)
    }

    /// First entry strictly after `after`, by name. `None` starts over.
    pub fn next_after(&self, after: Option<&str>) -> Option<&NamedFd> {
        let range = match after {
            Some(key) => self
                .entries
                .range::<str, _>((Bound::Excluded(key), Bound::Unbounded)),
            None => self.entries.range::<str, _>(..),
        };
        range.map(|(_, entry)| entry).next()
    }

    /// Create a pipe with its ends registered under `read_name` and
    /// `write_name`. Prior non-special entries under either name are
    /// replaced and their descriptors closed. Returns the two `fd.state`
    /// events, read end first; repeating the command reproduces them
    /// exactly.
    pub fn make_pipe(
        &mut self,
        read_name: &str,
        write_name: &str,
    ) -> Result<[Event; 2], ControlError> {
        self.check_assignable(read_name)?;
        self.check_assignable(write_name)?;
        if read_name == write_name {
            return Err(ControlError::invalid("pipe ends need distinct names"));
        }
        let adding = [read_name, write_name]
            .iter()
            .filter(|n| !self.entries.contains_key(**n))
            .count();
        self.check_capacity(adding)?;

        let (rd, wr) = nix::unistd::pipe()?;
        self.entries.insert(
            read_name.to_string(),
            NamedFd::new(
                read_name,
                FdKind::PipeRead {
                    peer: write_name.to_string(),
                },
                FdHandle::Owned(rd),
            ),
        );
        self.entries.insert(
            write_name.to_string(),
            NamedFd::new(
                write_name,
                FdKind::PipeWrite {
                    peer: read_name.to_string(),
                },
                FdHandle::Owned(wr),
            ),
        );
        Ok([
            self.entries[read_name].state_event(),
            self.entries[write_name].state_event(),
        ])
    }

    /// Open a file under `name`. On failure the name is not created.
    pub fn open_file(
        &mut self,
        name: &str,
        flags: OpenFlags,
        path: &str,
    ) -> Result<Event, ControlError> {
        self.check_assignable(name)?;
        if !self.entries.contains_key(name) {
            self.check_capacity(1)?;
        }
        if flags.mkdir {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut custom = 0;
        if flags.nonblock {
            custom |= libc::O_NONBLOCK;
        }
        if flags.sync {
            custom |= libc::O_SYNC;
        }
        let file = OpenOptions::new()
            .read(flags.read || !flags.write)
            .write(flags.write)
            .append(flags.append)
            .create(flags.create)
            .truncate(flags.trunc)
            .mode(0o666)
            .custom_flags(custom)
            .open(path)?;
        self.entries.insert(
            name.to_string(),
            NamedFd::new(
                name,
                FdKind::File {
                    flags,
                    path: path.to_string(),
                },
                FdHandle::Owned(OwnedFd::from(file)),
            ),
        );
        Ok(self.entries[name].state_event())
    }

    /// Register a duplicate of an existing entry's descriptor under a new
    /// name, with unknown provenance.
    pub fn dup(&mut self, name: &str, existing: &str) -> Result<Event, ControlError> {
        self.check_assignable(name)?;
        let src = self
            .resolve(existing)
            .ok_or_else(|| ControlError::not_found(format!("no named fd {existing:?}")))?;
        if !self.entries.contains_key(name) {
            self.check_capacity(1)?;
        }
        let dup = nix::unistd::dup(src)?;
        let handle = FdHandle::Owned(unsafe {
            use std::os::fd::FromRawFd;
            OwnedFd::from_raw_fd(dup)
        });
        self.entries
            .insert(name.to_string(), NamedFd::new(name, FdKind::Unknown, handle));
        Ok(self.entries[name].state_event())
    }

    /// Close and remove a non-special entry.
    pub fn delete(&mut self, name: &str) -> Result<Event, ControlError> {
        match self.entries.get(name) {
            None => Err(ControlError::not_found(format!("no named fd {name:?}"))),
            Some(entry) if entry.is_special() => {
                Err(ControlError::state(format!("{name:?} is special")))
            }
            Some(_) => {
                self.entries.remove(name);
                Ok(Event::FdState {
                    name: name.to_string(),
                    detail: crate::events::FdDetail::Deleted,
                })
            }
        }
    }

    /// Re-validate the specials so exec plumbing cannot fail on them. Any
    /// special whose descriptor has gone bad is re-pointed at `/dev/null`.
    pub fn ensure_specials(&mut self) {
        for name in SPECIALS {
            let entry = self.entries.get_mut(name).expect("specials always exist");
            let bad = entry.raw() < 0 || fcntl(entry.raw(), FcntlArg::F_GETFD).is_err();
            if bad {
                if let Ok(fd) = open_dev_null() {
                    entry.replace_handle(FdHandle::Owned(fd));
                }
            }
        }
    }

    fn check_assignable(&self, name: &str) -> Result<(), ControlError> {
        if !scan::check_name(name) {
            return Err(ControlError::invalid(format!("bad fd name {name:?}")));
        }
        if self.entries.get(name).is_some_and(NamedFd::is_special) {
            return Err(ControlError::state(format!("{name:?} is special")));
        }
        Ok(())
    }

    fn check_capacity(&self, adding: usize) -> Result<(), ControlError> {
        if let Some(cap) = self.cap {
            if self.entries.len() + adding > cap.count {
                return Err(ControlError::limit(format!(
                    "fd pool exhausted ({} entries)",
                    cap.count
                )));
            }
        }
        Ok(())
    }
}

fn open_dev_null() -> std::io::Result<OwnedFd> {
    let file = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    Ok(OwnedFd::from(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specials_exist_and_resist_deletion() {
        let mut table = FdTable::new(None);
        for name in SPECIALS {
            assert!(table.get(name).is_some(), "{name} missing");
        }
        let err = table.delete("stdout").unwrap_err();
        assert_eq!(err.category(), "state");
        assert_eq!(table.resolve("stderr"), Some(2));
    }

    #[test]
    fn pipe_creates_paired_entries() {
        let mut table = FdTable::new(None);
        let events = table.make_pipe("log.r", "log.w").unwrap();
        assert_eq!(events[0].to_line(), "fd.state\tlog.r\tpipe-read\tlog.w");
        assert_eq!(events[1].to_line(), "fd.state\tlog.w\tpipe-write\tlog.r");
        assert!(table.resolve("log.r").is_some());
        assert!(table.resolve("log.w").is_some());
    }

    #[test]
    fn pipe_replacement_is_idempotent_in_shape() {
        let mut table = FdTable::new(None);
        let first = table.make_pipe("a", "b").unwrap();
        let count = table.len();
        let second = table.make_pipe("a", "b").unwrap();
        assert_eq!(table.len(), count);
        assert_eq!(
            first.iter().map(Event::to_line).collect::<Vec<_>>(),
            second.iter().map(Event::to_line).collect::<Vec<_>>()
        );
    }

    #[test]
    fn pipe_refuses_special_and_identical_names() {
        let mut table = FdTable::new(None);
        assert_eq!(table.make_pipe("null", "w").unwrap_err().category(), "state");
        assert_eq!(table.make_pipe("x", "x").unwrap_err().category(), "invalid");
        assert_eq!(
            table.make_pipe("sp ace", "w").unwrap_err().category(),
            "invalid"
        );
    }

    #[test]
    fn pool_cap_limits_entries() {
        // Four specials plus one pipe fit in six; the next pipe does not.
        let mut table = FdTable::new(Some(PoolCap { count: 6, bytes: 0 }));
        table.make_pipe("p.r", "p.w").unwrap();
        let err = table.make_pipe("q.r", "q.w").unwrap_err();
        assert_eq!(err.category(), "limit");
        // Replacing existing names needs no new slots.
        table.make_pipe("p.r", "p.w").unwrap();
    }

    #[test]
    fn open_failure_creates_nothing() {
        let mut table = FdTable::new(None);
        let flags = OpenFlags::parse("read").unwrap();
        let err = table
            .open_file("cfg", flags, "/nonexistent/definitely/missing")
            .unwrap_err();
        assert_eq!(err.category(), "io");
        assert!(table.get("cfg").is_none());
    }

    #[test]
    fn open_write_create_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut table = FdTable::new(None);
        let flags = OpenFlags::parse("write,create").unwrap();
        let event = table
            .open_file("out", flags, path.to_str().unwrap())
            .unwrap();
        assert!(event.to_line().starts_with("fd.state\tout\tfile\twrite,create\t"));
        assert!(table.resolve("out").is_some());
    }

    #[test]
    fn mkdir_flag_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/out.log");
        let mut table = FdTable::new(None);
        let flags = OpenFlags::parse("write,create,mkdir").unwrap();
        table.open_file("out", flags, path.to_str().unwrap()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn dup_registers_unknown_kind() {
        let mut table = FdTable::new(None);
        table.make_pipe("p.r", "p.w").unwrap();
        let event = table.dup("copy", "p.w").unwrap();
        assert_eq!(event.to_line(), "fd.state\tcopy\tunknown");
        assert!(table.resolve("copy").is_some());
        assert_eq!(table.dup("z", "missing").unwrap_err().category(), "not-found");
    }

    #[test]
    fn iteration_resumes_after_name() {
        let mut table = FdTable::new(None);
        table.make_pipe("a.r", "a.w").unwrap();
        let first = table.next_after(None).unwrap().name().to_string();
        assert_eq!(first, "a.r");
        let second = table.next_after(Some("a.r")).unwrap().name().to_string();
        assert_eq!(second, "a.w");
        // Resumes correctly even if the resume key was deleted meanwhile.
        table.delete("a.w").unwrap();
        assert_eq!(table.next_after(Some("a.r")).unwrap().name(), "null");
    }
}
