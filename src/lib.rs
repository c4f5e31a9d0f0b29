//! # procvisor
//!
//! **Procvisor** is a process supervisor built to sit at PID 1: it keeps
//! services alive according to per-service policies, hands them named file
//! descriptors at launch, and is driven entirely by a tab-separated line
//! protocol spoken over controller byte streams. The supervisor has no
//! opinions about policy; a controller process (or a config file of the
//! same line format) decides everything.
//!
//! | Area            | Description                                                    | Key types                          |
//! |-----------------|----------------------------------------------------------------|------------------------------------|
//! | **Services**    | State machine per child: spawn, watch, reap, restart, sigwake. | [`Service`], [`ServiceTable`]      |
//! | **Named fds**   | Registry of descriptors services inherit at exec.              | [`FdTable`], [`NamedFd`]           |
//! | **Controllers** | Line protocol endpoints with lossy, resyncing event streams.   | [`Endpoint`], [`Event`]            |
//! | **Signals**     | Accumulating buckets drained by the main loop.                 | [`SignalLedger`], [`Sig`]          |
//! | **Lifecycle**   | Failsafe guard, staged shutdown, exec-on-exit.                 | [`Failsafe`], [`ShutdownSeq`]      |
//! | **Errors**      | Typed protocol and runtime failures.                           | [`ControlError`], [`SupervisorError`] |
//!
//! The whole core runs on a single `current_thread` tokio runtime; the main
//! loop in [`Supervisor::run`] is the only place control ever waits. Memory
//! can be bounded with per-table pools, making resource exhaustion an
//! ordinary protocol error instead of an abort.
//!
//! ```no_run
//! use procvisor::{Config, Supervisor};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.use_stdin = true;
//!     let mut supervisor = Supervisor::new(cfg);
//!     let code = supervisor.run().await?;
//!     std::process::exit(code);
//! }
//! ```

pub mod cli;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod fds;
pub mod log;
pub mod options;
pub mod scan;
pub mod service;
pub mod shutdown;
pub mod signals;
pub mod supervisor;

pub use clock::{Clock, Ts};
pub use config::{Config, PoolCap};
pub use controller::{DumpCursor, Endpoint};
pub use error::{ControlError, SupervisorError};
pub use events::{Event, FdDetail, ServicePhase, WaitRepr};
pub use fds::{FdTable, NamedFd, OpenFlags};
pub use log::{Level, Logger};
pub use service::{Service, ServiceTable, SvcState, EXIT_INVALID_ENVIRONMENT};
pub use shutdown::{Failsafe, ShutdownSeq};
pub use signals::{Sig, SignalLedger};
pub use supervisor::Supervisor;
