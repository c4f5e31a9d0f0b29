//! # Error types used by the supervisor core and the control protocol.
//!
//! Two families:
//!
//! - [`ControlError`] failures of a single protocol command or table
//!   operation. These are routine: they become one `error` event on the
//!   issuing controller and never disconnect it or stop the supervisor.
//! - [`SupervisorError`] failures of the runtime itself (listener setup,
//!   signal registration). These abort startup.
//!
//! [`ControlError::category`] returns the stable wire label for the event's
//! second field.

use thiserror::Error;

/// A failed protocol command or table operation.
///
/// The variants are the six error categories of the control protocol; the
/// payload is the human-readable detail emitted as the event's third field.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ControlError {
    /// Bad syntax or a value out of range.
    #[error("{0}")]
    Invalid(String),
    /// A pool or buffer cap was reached. Routine under pool mode.
    #[error("{0}")]
    Limit(String),
    /// A name that is not in the relevant table.
    #[error("{0}")]
    NotFound(String),
    /// The operation is not legal in the current state.
    #[error("{0}")]
    State(String),
    /// A syscall failed.
    #[error("{0}")]
    Io(String),
    /// A bug. The only category that is allowed to be fatal.
    #[error("{0}")]
    Internal(String),
}

impl ControlError {
    pub fn invalid(detail: impl Into<String>) -> ControlError {
        ControlError::Invalid(detail.into())
    }

    pub fn limit(detail: impl Into<String>) -> ControlError {
        ControlError::Limit(detail.into())
    }

    pub fn not_found(detail: impl Into<String>) -> ControlError {
        ControlError::NotFound(detail.into())
    }

    pub fn state(detail: impl Into<String>) -> ControlError {
        ControlError::State(detail.into())
    }

    /// Stable wire label for the error event.
    pub fn category(&self) -> &'static str {
        match self {
            ControlError::Invalid(_) => "invalid",
            ControlError::Limit(_) => "limit",
            ControlError::NotFound(_) => "not-found",
            ControlError::State(_) => "state",
            ControlError::Io(_) => "io",
            ControlError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for ControlError {
    fn from(e: std::io::Error) -> Self {
        ControlError::Io(e.to_string())
    }
}

impl From<nix::Error> for ControlError {
    fn from(e: nix::Error) -> Self {
        ControlError::Io(e.to_string())
    }
}

/// Fatal conditions of the runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("signal registration failed: {0}")]
    Signals(std::io::Error),

    #[error("cannot listen on {path}: {source}")]
    Listen {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot read config {path}: {source}")]
    Config {
        path: String,
        source: std::io::Error,
    },

    #[error("controller stream setup failed: {0}")]
    Stream(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_stable() {
        assert_eq!(ControlError::invalid("x").category(), "invalid");
        assert_eq!(ControlError::limit("x").category(), "limit");
        assert_eq!(ControlError::not_found("x").category(), "not-found");
        assert_eq!(ControlError::state("x").category(), "state");
        let io: ControlError = std::io::Error::from(std::io::ErrorKind::Other).into();
        assert_eq!(io.category(), "io");
        assert_eq!(ControlError::Internal("x".into()).category(), "internal");
    }
}
