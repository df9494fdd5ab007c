//! ---
//! rao_section: "05-case-dispatch"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Optimisation engine dispatch and process adapter."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Failure reported by (or about) the optimisation engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineFault {
    #[error("engine rejected the case as invalid input: {0}")]
    InvalidInput(String),
    #[error("engine solver error: {0}")]
    Solver(String),
    #[error("engine crashed: {0}")]
    Crashed(String),
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("engine protocol violation: {0}")]
    Protocol(String),
    #[error("engine has no run {0}")]
    UnknownRun(String),
}

impl EngineFault {
    /// Metric/journal label.
    pub fn label(&self) -> &'static str {
        match self {
            EngineFault::InvalidInput(_) => "invalid_input",
            EngineFault::Solver(_) => "solver_error",
            EngineFault::Crashed(_) => "crashed",
            EngineFault::Unavailable(_) => "unavailable",
            EngineFault::Protocol(_) => "protocol",
            EngineFault::UnknownRun(_) => "unknown_run",
        }
    }

    /// A protocol violation or a lost run will not go away by running the
    /// optimisation again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EngineFault::Protocol(_) | EngineFault::UnknownRun(_))
    }
}

/// Outcome of one dispatch attempt other than a finished run.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Engine(#[from] EngineFault),
    #[error("engine did not respond within {0:?}")]
    TimedOut(Duration),
    #[error("dispatch cancelled")]
    Cancelled,
    #[error("failed to serialise engine input: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Engine faults and timeouts consume retry budget; cancellation never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Engine(fault) => fault.is_retryable(),
            DispatchError::TimedOut(_) => true,
            DispatchError::Cancelled | DispatchError::Serialization(_) => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DispatchError::Engine(fault) => fault.label(),
            DispatchError::TimedOut(_) => "timed_out",
            DispatchError::Cancelled => "cancelled",
            DispatchError::Serialization(_) => "serialization",
        }
    }
}
