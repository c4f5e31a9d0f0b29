//! # The service table and its indexes.
//!
//! One `BTreeMap` by name is the authoritative store; a second index maps a
//! running pid back to its service. Active and sigwake membership are sets
//! of names walked by the supervisor tick. Everything is owned by the main
//! loop; there is no interior mutability here.
//!
//! ## Rules
//! - A pid is in the pid index exactly while the record holds it
//!   (states `Up` and `Reaped`).
//! - Creation happens on first reference; deletion is explicit and refused
//!   while a process is attached.
//! - In pool mode the entry count and the per-service variable bytes are
//!   hard caps surfaced as `limit` errors.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::clock::Ts;
use crate::config::PoolCap;
use crate::error::ControlError;
use crate::events::WaitRepr;
use crate::scan;

use super::record::{Service, SvcState};

pub struct ServiceTable {
    by_name: BTreeMap<String, Service>,
    by_pid: BTreeMap<i32, String>,
    active: BTreeSet<String>,
    sigwake: BTreeSet<String>,
    /// Newest signal timestamp already routed to sigwake services.
    pub last_signal_ts: Ts,
    cap: Option<PoolCap>,
    default_restart: Ts,
}

impl ServiceTable {
    pub fn new(cap: Option<PoolCap>, default_restart: Ts) -> ServiceTable {
        ServiceTable {
            by_name: BTreeMap::new(),
            by_pid: BTreeMap::new(),
            active: BTreeSet::new(),
            sigwake: BTreeSet::new(),
            last_signal_ts: Ts::UNSET,
            cap,
            default_restart,
        }
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.by_name.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.by_name.get_mut(name)
    }

    /// Fetch a service, creating it on first reference. The `bool` reports
    /// creation so the caller can announce the new record.
    pub fn get_or_create(&mut self, name: &str) -> Result<(&mut Service, bool), ControlError> {
        if !scan::check_name(name) {
            return Err(ControlError::invalid(format!("bad service name {name:?}")));
        }
        if self.by_name.contains_key(name) {
            return Ok((self.by_name.get_mut(name).unwrap(), false));
        }
        if let Some(cap) = self.cap {
            if self.by_name.len() >= cap.count {
                return Err(ControlError::limit(format!(
                    "service pool exhausted ({} entries)",
                    cap.count
                )));
            }
        }
        let var_cap = self.cap.map(|c| c.bytes);
        let svc = Service::new(name, var_cap, self.default_restart);
        self.by_name.insert(name.to_string(), svc);
        Ok((self.by_name.get_mut(name).unwrap(), true))
    }

    /// Remove a service that has no process attached.
    pub fn delete(&mut self, name: &str) -> Result<(), ControlError> {
        let svc = self
            .by_name
            .get(name)
            .ok_or_else(|| ControlError::not_found(format!("no service {name:?}")))?;
        if svc.pid().is_some() {
            return Err(ControlError::state(format!(
                "service {name:?} is running"
            )));
        }
        self.by_name.remove(name);
        self.active.remove(name);
        self.sigwake.remove(name);
        Ok(())
    }

    pub fn lookup_pid(&self, pid: i32) -> Option<&str> {
        self.by_pid.get(&pid).map(String::as_str)
    }

    /// Record a successful spawn: the service becomes `Up` and pid-indexed.
    pub fn mark_up(&mut self, name: &str, pid: i32, now: Ts) {
        if let Some(svc) = self.by_name.get_mut(name) {
            svc.mark_up(pid, now);
            self.by_pid.insert(pid, name.to_string());
        }
        self.debug_check(name);
    }

    /// Route a reaped pid to its service. Returns the service name when one
    /// matched; the state event waits for the next tick of the active walk.
    pub fn mark_reaped(&mut self, pid: i32, status: WaitRepr, now: Ts) -> Option<String> {
        let name = self.by_pid.get(&pid)?.clone();
        let svc = self.by_name.get_mut(&name)?;
        if svc.state() != SvcState::Up {
            return None;
        }
        svc.mark_reaped(status, now);
        self.active.insert(name.clone());
        self.debug_check(&name);
        Some(name)
    }

    /// Finish the `Reaped` to `Down` transition, dropping pid membership.
    pub fn settle_down(&mut self, name: &str) {
        if let Some(svc) = self.by_name.get_mut(name) {
            if let Some(pid) = svc.settle_down() {
                self.by_pid.remove(&pid);
            }
        }
        self.debug_check(name);
    }

    pub fn set_active(&mut self, name: &str, active: bool) {
        if active {
            self.active.insert(name.to_string());
        } else {
            self.active.remove(name);
        }
    }

    /// Names to tick this turn. A snapshot, so services may re-mark
    /// themselves during the walk.
    pub fn active_snapshot(&self) -> Vec<String> {
        self.active.iter().cloned().collect()
    }

    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn set_sigwake(&mut self, name: &str, member: bool) {
        if member {
            self.sigwake.insert(name.to_string());
        } else {
            self.sigwake.remove(name);
        }
    }

    pub fn sigwake_snapshot(&self) -> Vec<String> {
        self.sigwake.iter().cloned().collect()
    }

    pub fn has_sigwake(&self) -> bool {
        !self.sigwake.is_empty()
    }

    /// First service strictly after `after`, by name. `None` starts over.
    pub fn next_after(&self, after: Option<&str>) -> Option<&Service> {
        let range = match after {
            Some(key) => self
                .by_name
                .range::<str, _>((Bound::Excluded(key), Bound::Unbounded)),
            None => self.by_name.range::<str, _>(..),
        };
        range.map(|(_, svc)| svc).next()
    }

    /// Names of all services whose pid index entry exists. Used by the
    /// shutdown sequence to find who still needs signalling.
    pub fn running_pids(&self) -> Vec<(String, i32)> {
        self.by_pid.iter().map(|(pid, name)| (name.clone(), *pid)).collect()
    }

    fn debug_check(&self, name: &str) {
        #[cfg(debug_assertions)]
        if let Some(svc) = self.by_name.get(name) {
            let indexed = svc
                .pid()
                .is_some_and(|pid| self.by_pid.get(&pid).map(String::as_str) == Some(name));
            debug_assert_eq!(svc.pid().is_some(), indexed);
            debug_assert_eq!(
                svc.pid().is_some(),
                matches!(svc.state(), SvcState::Up | SvcState::Reaped)
            );
        }
        #[cfg(not(debug_assertions))]
        let _ = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ServiceTable {
        ServiceTable::new(None, Ts::from_secs(1))
    }

    #[test]
    fn create_on_first_reference() {
        let mut t = table();
        let (_, created) = t.get_or_create("web").unwrap();
        assert!(created);
        let (_, created) = t.get_or_create("web").unwrap();
        assert!(!created);
        assert_eq!(t.len(), 1);
        assert_eq!(t.get_or_create("bad name").unwrap_err().category(), "invalid");
    }

    #[test]
    fn pid_index_tracks_lifecycle() {
        let mut t = table();
        t.get_or_create("web").unwrap();
        t.get_mut("web").unwrap().begin_start(Ts::from_secs(1)).unwrap();
        t.mark_up("web", 99, Ts::from_secs(1));
        assert_eq!(t.lookup_pid(99), Some("web"));

        let name = t.mark_reaped(99, WaitRepr::Exit(0), Ts::from_secs(2)).unwrap();
        assert_eq!(name, "web");
        // Still indexed while Reaped.
        assert_eq!(t.lookup_pid(99), Some("web"));

        t.settle_down("web");
        assert_eq!(t.lookup_pid(99), None);
        assert_eq!(t.get("web").unwrap().state(), SvcState::Down);
    }

    #[test]
    fn unknown_pid_reap_is_ignored() {
        let mut t = table();
        assert!(t.mark_reaped(12345, WaitRepr::Exit(1), Ts::from_secs(1)).is_none());
    }

    #[test]
    fn delete_refused_while_running() {
        let mut t = table();
        t.get_or_create("web").unwrap();
        t.get_mut("web").unwrap().begin_start(Ts::from_secs(1)).unwrap();
        t.mark_up("web", 7, Ts::from_secs(1));
        assert_eq!(t.delete("web").unwrap_err().category(), "state");
        t.mark_reaped(7, WaitRepr::Exit(0), Ts::from_secs(2));
        t.settle_down("web");
        t.delete("web").unwrap();
        assert_eq!(t.delete("web").unwrap_err().category(), "not-found");
    }

    #[test]
    fn pool_cap_limits_creation() {
        let mut t = ServiceTable::new(
            Some(PoolCap {
                count: 2,
                bytes: 128,
            }),
            Ts::from_secs(1),
        );
        t.get_or_create("a").unwrap();
        t.get_or_create("b").unwrap();
        let err = t.get_or_create("c").unwrap_err();
        assert_eq!(err.category(), "limit");
        // Existing names still resolve.
        assert!(t.get_or_create("a").is_ok());
    }

    #[test]
    fn active_walk_is_a_snapshot() {
        let mut t = table();
        t.get_or_create("a").unwrap();
        t.get_or_create("b").unwrap();
        t.set_active("a", true);
        t.set_active("b", true);
        let snap = t.active_snapshot();
        assert_eq!(snap, vec!["a".to_string(), "b".to_string()]);
        t.set_active("a", false);
        assert_eq!(t.active_snapshot(), vec!["b".to_string()]);
    }

    #[test]
    fn ordered_iteration_resumes() {
        let mut t = table();
        for name in ["alpha", "beta", "gamma"] {
            t.get_or_create(name).unwrap();
        }
        assert_eq!(t.next_after(None).unwrap().name(), "alpha");
        assert_eq!(t.next_after(Some("alpha")).unwrap().name(), "beta");
        assert_eq!(t.next_after(Some("beta")).unwrap().name(), "gamma");
        assert!(t.next_after(Some("gamma")).is_none());
        // A key that was never present still lands on the next name.
        assert_eq!(t.next_after(Some("b")).unwrap().name(), "beta");
    }
}
