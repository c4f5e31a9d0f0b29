//! # Signal accumulation ledger.
//!
//! One bucket per trapped signal: a pending count and the timestamp of the
//! first delivery since the bucket was last empty. Buckets are only ever
//! decremented by `signal.clear`, with a saturating read-modify-write, so a
//! delivery racing a clear is never lost.
//!
//! ## Rules
//! - `mark` and the listener tasks are the only writers outside the main
//!   loop; they touch nothing but these atomics and the notify.
//! - A bucket's timestamp clears when its count reaches zero and is stamped
//!   again on the next delivery.
//! - [`SignalLedger::events_since`] yields buckets strictly newer than the
//!   given timestamp, ascending, which is the only interface the service
//!   layer uses for sigwake checks.

use std::io;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;

use crate::clock::{Clock, Ts};

use super::names::Sig;

#[derive(Default)]
struct Bucket {
    count: AtomicU32,
    first_ts: AtomicI64,
}

/// Shared accumulation state for all trapped signals.
pub struct SignalLedger {
    buckets: [Bucket; Sig::ALL.len()],
    notify: Notify,
}

impl SignalLedger {
    pub fn new() -> Arc<SignalLedger> {
        Arc::new(SignalLedger {
            buckets: Default::default(),
            notify: Notify::new(),
        })
    }

    /// Record one delivery of `sig` and wake the main loop.
    pub fn mark(&self, sig: Sig, now: Ts) {
        let bucket = &self.buckets[sig.index()];
        bucket.count.fetch_add(1, Ordering::AcqRel);
        let _ = bucket.first_ts.compare_exchange(
            0,
            now.or_tick().raw(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.notify.notify_one();
    }

    /// Subtract `n` from the bucket, saturating at zero. Returns the count
    /// left behind. A concurrent delivery lands on top of the subtraction
    /// rather than being wiped.
    pub fn clear(&self, sig: Sig, n: u32) -> u32 {
        let bucket = &self.buckets[sig.index()];
        let mut remaining = 0;
        let _ = bucket.count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            remaining = cur.saturating_sub(n);
            Some(remaining)
        });
        if remaining == 0 {
            bucket.first_ts.store(0, Ordering::Release);
        }
        remaining
    }

    /// Current `(signal, count, first_seen)` for every nonempty bucket.
    pub fn snapshot(&self) -> Vec<(Sig, u32, Ts)> {
        Sig::ALL
            .into_iter()
            .filter_map(|sig| {
                let bucket = &self.buckets[sig.index()];
                let count = bucket.count.load(Ordering::Acquire);
                if count == 0 {
                    return None;
                }
                let ts = Ts::from_raw(bucket.first_ts.load(Ordering::Acquire));
                Some((sig, count, ts))
            })
            .collect()
    }

    /// Nonempty buckets first seen strictly after `since`, ascending by
    /// timestamp.
    pub fn events_since(&self, since: Ts) -> Vec<(Sig, u32, Ts)> {
        let mut out: Vec<(Sig, u32, Ts)> = self
            .snapshot()
            .into_iter()
            .filter(|(_, _, ts)| *ts > since)
            .collect();
        out.sort_by_key(|(_, _, ts)| *ts);
        out
    }

    /// Wait until some delivery has poked the ledger.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

fn kind_of(sig: Sig) -> SignalKind {
    match sig {
        Sig::Term => SignalKind::terminate(),
        Sig::Int => SignalKind::interrupt(),
        Sig::Hup => SignalKind::hangup(),
        Sig::Quit => SignalKind::quit(),
        Sig::Usr1 => SignalKind::user_defined1(),
        Sig::Usr2 => SignalKind::user_defined2(),
        Sig::Chld => SignalKind::child(),
        Sig::Pipe => SignalKind::pipe(),
        Sig::Alrm => SignalKind::alarm(),
    }
}

/// Install one listener task per trapped signal.
///
/// Registration happens before this returns; only the recv loops run in the
/// background. Each delivery does nothing beyond `mark`.
pub fn install(ledger: &Arc<SignalLedger>, clock: Clock) -> io::Result<()> {
    for sig in Sig::ALL {
        let mut stream = signal(kind_of(sig))?;
        let ledger = Arc::clone(ledger);
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                ledger.mark(sig, clock.now());
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_accumulates_and_keeps_first_ts() {
        let ledger = SignalLedger::new();
        ledger.mark(Sig::Hup, Ts::from_secs(3));
        ledger.mark(Sig::Hup, Ts::from_secs(8));
        let snap = ledger.snapshot();
        assert_eq!(snap, vec![(Sig::Hup, 2, Ts::from_secs(3))]);
    }

    #[test]
    fn clear_is_a_subtraction() {
        let ledger = SignalLedger::new();
        for _ in 0..5 {
            ledger.mark(Sig::Usr1, Ts::from_secs(1));
        }
        assert_eq!(ledger.clear(Sig::Usr1, 2), 3);
        assert_eq!(ledger.clear(Sig::Usr1, 100), 0);
        assert!(ledger.snapshot().is_empty());
    }

    #[test]
    fn timestamp_resets_once_empty() {
        let ledger = SignalLedger::new();
        ledger.mark(Sig::Int, Ts::from_secs(2));
        ledger.clear(Sig::Int, 1);
        ledger.mark(Sig::Int, Ts::from_secs(9));
        assert_eq!(ledger.snapshot(), vec![(Sig::Int, 1, Ts::from_secs(9))]);
    }

    #[test]
    fn events_since_orders_by_first_seen() {
        let ledger = SignalLedger::new();
        ledger.mark(Sig::Usr2, Ts::from_secs(7));
        ledger.mark(Sig::Hup, Ts::from_secs(3));
        ledger.mark(Sig::Term, Ts::from_secs(5));
        let events = ledger.events_since(Ts::from_secs(3));
        assert_eq!(
            events.iter().map(|(s, _, _)| *s).collect::<Vec<_>>(),
            vec![Sig::Term, Sig::Usr2]
        );
    }
}
