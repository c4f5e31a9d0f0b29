//! # Events emitted to controllers.
//!
//! One variant per wire shape. The rendering in [`Event::to_line`] is the
//! protocol contract: tab-separated fields, no escaping, no trailing
//! newline (the endpoint writer appends it).
//!
//! ```text
//! fd.state\tNAME\tpipe-read\tPEER
//! fd.state\tNAME\tfile\tFLAGS\tPATH
//! service.state\tNAME\tup\tTS\tpid=PID
//! service.state\tNAME\tdown\tTS\tstatus=exit:0
//! signal\tSIGHUP\t1\tTS
//! error\tCATEGORY\tDETAIL
//! statedump\tcomplete
//! ```

use crate::clock::Ts;
use crate::error::ControlError;

/// How a reaped child terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitRepr {
    Exit(i32),
    Signal { name: String, core: bool },
}

impl WaitRepr {
    fn render(&self) -> String {
        match self {
            WaitRepr::Exit(code) => format!("exit:{code}"),
            WaitRepr::Signal { name, core: false } => format!("signal:{name}"),
            WaitRepr::Signal { name, core: true } => format!("signal:{name}:core"),
        }
    }
}

/// The observable phase of a service, as derived from its record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServicePhase {
    /// Never run, or cancelled back to rest.
    Down,
    /// Start requested; the timestamp is the scheduled start time.
    Start,
    /// Running with the given pid.
    Up { pid: i32 },
    /// Reaped; the timestamp is the reap time.
    Exited { status: WaitRepr },
}

/// Per-kind detail of an `fd.state` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FdDetail {
    PipeRead { peer: String },
    PipeWrite { peer: String },
    File { flags: String, path: String },
    Special,
    Unknown,
    Deleted,
}

/// A single controller-visible event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    FdState {
        name: String,
        detail: FdDetail,
    },
    ServiceState {
        name: String,
        ts: Ts,
        phase: ServicePhase,
    },
    ServiceArgs {
        name: String,
        args: String,
    },
    ServiceFds {
        name: String,
        spec: String,
    },
    ServiceOpts {
        name: String,
        opts: String,
    },
    Signal {
        name: &'static str,
        count: u32,
        ts: Ts,
    },
    Error {
        category: &'static str,
        detail: String,
    },
    UnknownCommand {
        command: String,
    },
    /// Emitted once when an endpoint dropped data in either direction.
    Overflow,
    StatedumpComplete,
    Echo {
        args: String,
    },
}

impl Event {
    pub fn error(err: &ControlError) -> Event {
        Event::Error {
            category: err.category(),
            detail: err.to_string(),
        }
    }

    /// Render the stable wire line, without the trailing newline.
    pub fn to_line(&self) -> String {
        match self {
            Event::FdState { name, detail } => match detail {
                FdDetail::PipeRead { peer } => format!("fd.state\t{name}\tpipe-read\t{peer}"),
                FdDetail::PipeWrite { peer } => format!("fd.state\t{name}\tpipe-write\t{peer}"),
                FdDetail::File { flags, path } => format!("fd.state\t{name}\tfile\t{flags}\t{path}"),
                FdDetail::Special => format!("fd.state\t{name}\tspecial"),
                FdDetail::Unknown => format!("fd.state\t{name}\tunknown"),
                FdDetail::Deleted => format!("fd.state\t{name}\tdeleted"),
            },
            Event::ServiceState { name, ts, phase } => {
                let ts = ts.whole();
                match phase {
                    ServicePhase::Down => format!("service.state\t{name}\tdown\t{ts}"),
                    ServicePhase::Start => format!("service.state\t{name}\tstart\t{ts}"),
                    ServicePhase::Up { pid } => {
                        format!("service.state\t{name}\tup\t{ts}\tpid={pid}")
                    }
                    ServicePhase::Exited { status } => {
                        format!("service.state\t{name}\tdown\t{ts}\tstatus={}", status.render())
                    }
                }
            }
            Event::ServiceArgs { name, args } if args.is_empty() => {
                format!("service.args\t{name}")
            }
            Event::ServiceArgs { name, args } => format!("service.args\t{name}\t{args}"),
            Event::ServiceFds { name, spec } => format!("service.fds\t{name}\t{spec}"),
            Event::ServiceOpts { name, opts } if opts.is_empty() => {
                format!("service.opts\t{name}")
            }
            Event::ServiceOpts { name, opts } => format!("service.opts\t{name}\t{opts}"),
            Event::Signal { name, count, ts } => {
                format!("signal\t{name}\t{count}\t{}", ts.whole())
            }
            Event::Error { category, detail } => format!("error\t{category}\t{detail}"),
            Event::UnknownCommand { command } => format!("error\tunknown-command\t{command}"),
            Event::Overflow => "overflow".to_string(),
            Event::StatedumpComplete => "statedump\tcomplete".to_string(),
            Event::Echo { args } if args.is_empty() => "echo".to_string(),
            Event::Echo { args } => format!("echo\t{args}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_state_shapes() {
        let up = Event::ServiceState {
            name: "web".into(),
            ts: Ts::from_secs(5),
            phase: ServicePhase::Up { pid: 42 },
        };
        assert_eq!(up.to_line(), "service.state\tweb\tup\t5\tpid=42");

        let down = Event::ServiceState {
            name: "web".into(),
            ts: Ts::from_secs(9),
            phase: ServicePhase::Exited {
                status: WaitRepr::Exit(0),
            },
        };
        assert_eq!(down.to_line(), "service.state\tweb\tdown\t9\tstatus=exit:0");

        let never = Event::ServiceState {
            name: "web".into(),
            ts: Ts::UNSET,
            phase: ServicePhase::Down,
        };
        assert_eq!(never.to_line(), "service.state\tweb\tdown\t0");
    }

    #[test]
    fn fd_state_shapes() {
        let e = Event::FdState {
            name: "log.r".into(),
            detail: FdDetail::PipeRead {
                peer: "log.w".into(),
            },
        };
        assert_eq!(e.to_line(), "fd.state\tlog.r\tpipe-read\tlog.w");

        let f = Event::FdState {
            name: "out".into(),
            detail: FdDetail::File {
                flags: "write,create".into(),
                path: "/tmp/out".into(),
            },
        };
        assert_eq!(f.to_line(), "fd.state\tout\tfile\twrite,create\t/tmp/out");
    }

    #[test]
    fn signal_killed_status() {
        let s = WaitRepr::Signal {
            name: "SIGTERM".into(),
            core: false,
        };
        assert_eq!(s.render(), "signal:SIGTERM");
        let c = WaitRepr::Signal {
            name: "SIGSEGV".into(),
            core: true,
        };
        assert_eq!(c.render(), "signal:SIGSEGV:core");
    }

    #[test]
    fn error_carries_category() {
        let e = Event::error(&ControlError::limit("service pool exhausted"));
        assert_eq!(e.to_line(), "error\tlimit\tservice pool exhausted");
        let u = Event::UnknownCommand {
            command: "frob".into(),
        };
        assert_eq!(u.to_line(), "error\tunknown-command\tfrob");
    }
}
