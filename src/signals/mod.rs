//! Signal capture: accumulate deliveries, wake the main loop, lose nothing.
//!
//! The trapped set is fixed ([`Sig::ALL`]). Each delivery bumps a per-signal
//! atomic bucket in the [`SignalLedger`] and pokes a [`tokio::sync::Notify`]
//! so the main loop's select wakes; the buckets survive until an explicit
//! `signal.clear`. This is the signalfd-flavored rendition of the self-pipe
//! trick: the contract is "wake the loop, lose no distinct signal", and the
//! atomics are the only state shared across contexts.

mod ledger;
mod names;

pub use ledger::{install, SignalLedger};
pub use names::{lookup_signal, Sig, SigMask};
