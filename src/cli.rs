//! Command-line surface.
//!
//! Everything here folds into [`Config`]; the supervisor itself never looks
//! at argv. Pool specs take the form `N:BYTES`, e.g. `--service-pool 8:256`
//! preallocates eight service slots with 256 bytes of variables each.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Config, PoolCap};

#[derive(Parser, Debug)]
#[command(
    name = "procvisor",
    version,
    about = "Process supervisor for PID-1 duty",
    long_about = "Keeps services alive, hands them named file descriptors, and obeys a \
                  tab-separated line protocol on controller streams."
)]
pub struct Cli {
    /// Treat stdin/stdout as a controller endpoint.
    #[arg(long)]
    pub stdin: bool,

    /// Read commands from a file before entering the main loop.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Listen on a UNIX socket for additional controllers.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Preallocate the service table: N entries of BYTES variable space.
    #[arg(long, value_name = "N:BYTES", value_parser = parse_pool)]
    pub service_pool: Option<PoolCap>,

    /// Preallocate the named-fd table.
    #[arg(long, value_name = "N:BYTES", value_parser = parse_pool)]
    pub fd_pool: Option<PoolCap>,

    /// Preallocate the controller table.
    #[arg(long, value_name = "N:BYTES", value_parser = parse_pool)]
    pub controller_pool: Option<PoolCap>,

    /// Arm the failsafe guard with this code.
    #[arg(long, value_name = "CODE")]
    pub failsafe: Option<String>,

    /// Exec this argv instead of exiting.
    #[arg(long, value_name = "ARGV", num_args = 1.., allow_hyphen_values = true)]
    pub exec_on_exit: Vec<String>,

    /// Log more (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log less (repeatable).
    #[arg(short = 'q', long = "quiet", action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn into_config(self) -> Config {
        let defaults = Config::default();
        Config {
            use_stdin: self.stdin,
            config_path: self.config,
            socket_path: self.socket,
            service_pool: self.service_pool,
            fd_pool: self.fd_pool,
            controller_pool: self.controller_pool,
            failsafe_armed: defaults.failsafe_armed || self.failsafe.is_some(),
            failsafe_code: self.failsafe,
            exec_on_exit: self.exec_on_exit,
            log_adjust: i32::from(self.verbose) - i32::from(self.quiet),
            ..defaults
        }
    }
}

fn parse_pool(spec: &str) -> Result<PoolCap, String> {
    let (count, bytes) = spec
        .split_once(':')
        .ok_or_else(|| format!("expected N:BYTES, got {spec:?}"))?;
    let count: usize = count
        .parse()
        .map_err(|_| format!("bad entry count {count:?}"))?;
    let bytes: usize = bytes
        .parse()
        .map_err(|_| format!("bad byte size {bytes:?}"))?;
    if count == 0 {
        return Err("pool needs at least one entry".to_string());
    }
    Ok(PoolCap { count, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_spec_parses() {
        assert_eq!(
            parse_pool("8:256"),
            Ok(PoolCap {
                count: 8,
                bytes: 256
            })
        );
        assert!(parse_pool("8").is_err());
        assert!(parse_pool("0:256").is_err());
        assert!(parse_pool("x:y").is_err());
    }

    #[test]
    fn flags_fold_into_config() {
        let cli = Cli::parse_from([
            "procvisor",
            "--stdin",
            "--service-pool",
            "2:128",
            "--failsafe",
            "s3cret",
            "-v",
            "-v",
            "-q",
        ]);
        let cfg = cli.into_config();
        assert!(cfg.use_stdin);
        assert_eq!(
            cfg.service_pool,
            Some(PoolCap {
                count: 2,
                bytes: 128
            })
        );
        assert!(cfg.failsafe_armed);
        assert_eq!(cfg.failsafe_code.as_deref(), Some("s3cret"));
        assert_eq!(cfg.log_adjust, 1);
    }

    #[test]
    fn exec_on_exit_collects_argv() {
        let cli = Cli::parse_from(["procvisor", "--exec-on-exit", "/sbin/init", "-z"]);
        assert_eq!(cli.exec_on_exit, vec!["/sbin/init", "-z"]);
    }
}
