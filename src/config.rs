//! # Global runtime configuration.
//!
//! [`Config`] centralizes the supervisor's knobs: buffer sizes, the fork
//! retry delay, the default restart interval, controller queue depth and
//! watchdog, optional pool caps, and the startup surface fed by the CLI
//! (`--stdin`, `--config`, `--socket`, `--exec-on-exit`, `--failsafe`).

use std::path::PathBuf;

use crate::clock::Ts;

/// A fixed preallocation cap for one table: at most `count` entries, each
/// with `bytes` of variable payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolCap {
    pub count: usize,
    pub bytes: usize,
}

/// Global configuration for the supervisor.
#[derive(Clone, Debug)]
pub struct Config {
    /// Longest accepted protocol line, newline excluded. Longer lines are
    /// dropped and the parser resyncs at the next newline.
    pub line_limit: usize,
    /// Per-controller outbound event queue depth. A full queue marks the
    /// controller unresponsive and drops events.
    pub event_queue: usize,
    /// Delay before retrying a failed service spawn.
    pub fork_retry: Ts,
    /// Default `restart_interval` for new services. At least one second.
    pub restart_interval: Ts,
    /// How long a service-owned controller may stay unresponsive before its
    /// endpoint is torn down.
    pub ctl_watchdog: Ts,
    /// Service table preallocation (`count` services, `bytes` of vars each).
    pub service_pool: Option<PoolCap>,
    /// Named-fd table preallocation.
    pub fd_pool: Option<PoolCap>,
    /// Controller endpoint preallocation.
    pub controller_pool: Option<PoolCap>,
    /// Whether the failsafe guard starts armed. Defaults to true when the
    /// supervisor runs as PID 1.
    pub failsafe_armed: bool,
    /// Code pre-armed via `--failsafe`.
    pub failsafe_code: Option<String>,
    /// Treat stdin/stdout as a controller endpoint.
    pub use_stdin: bool,
    /// Commands to feed through the dispatcher before the main loop.
    pub config_path: Option<PathBuf>,
    /// UNIX socket accepting additional controllers.
    pub socket_path: Option<PathBuf>,
    /// argv to exec instead of exiting, once armed.
    pub exec_on_exit: Vec<String>,
    /// Log filter adjustment from `-v`/`-q` (positive is chattier).
    pub log_adjust: i32,
}

impl Default for Config {
    /// Defaults:
    /// - `line_limit = 2048`
    /// - `event_queue = 64`
    /// - `fork_retry = 2s`
    /// - `restart_interval = 1s`
    /// - `ctl_watchdog = 10s`
    /// - no pools, no startup endpoints
    /// - failsafe armed iff running as PID 1
    fn default() -> Self {
        Self {
            line_limit: 2048,
            event_queue: 64,
            fork_retry: Ts::from_secs(2),
            restart_interval: Ts::from_secs(1),
            ctl_watchdog: Ts::from_secs(10),
            service_pool: None,
            fd_pool: None,
            controller_pool: None,
            failsafe_armed: std::process::id() == 1,
            failsafe_code: None,
            use_stdin: false,
            config_path: None,
            socket_path: None,
            exec_on_exit: Vec::new(),
            log_adjust: 0,
        }
    }
}
