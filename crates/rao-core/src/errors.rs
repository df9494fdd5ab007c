//! ---
//! rao_section: "06-pipeline-orchestration"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Coordinator, translator and case failure error types."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::fmt;

use rao_engine::{DispatchError, EngineFault};
use rao_model::{BuildError, ParameterError};
use rao_profiles::ProfileError;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::state::IllegalTransition;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors returned by coordinator operations. A case that fails inside the
/// pipeline is not an error here: it ends `FAILED` with a [`CaseFailure`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("case {0} already has a pipeline in flight")]
    CaseInFlight(String),
    #[error("case {0} already completed and cannot be resubmitted")]
    CaseAlreadyCompleted(String),
    #[error("case {0} is not known to the coordinator")]
    CaseNotFound(String),
    #[error("case {case} is not running (status {status})")]
    NotRunning { case: String, status: String },
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error("profile source {origin} failed for case {case}: {reason}")]
    Source {
        origin: String,
        case: String,
        reason: String,
    },
    #[error("publication of case {case} failed: {reason}")]
    Publish { case: String, reason: String },
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("untraceable result for case {case}: {kind} {internal_id} is not in the case reference index")]
    UntraceableResult {
        case: String,
        kind: String,
        internal_id: String,
    },
    #[error("result for case {found} cannot be translated against case {expected}")]
    CaseMismatch { expected: String, found: String },
    #[error("result for case {case} lists flow-cnec {internal_id} more than once")]
    DuplicateMargin { case: String, internal_id: String },
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Pipeline stage a case failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Fetch,
    Parse,
    Build,
    Dispatch,
    Translate,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Build => "build",
            Stage::Dispatch => "dispatch",
            Stage::Translate => "translate",
            Stage::Publish => "publish",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    MalformedProfile,
    StaleProfile,
    MissingProfile,
    UnresolvedReference,
    MissingConversionData,
    MissingLimit,
    InvalidRemedialAction,
    InvalidParameters,
    EngineFault,
    TimedOut,
    Cancelled,
    UntraceableResult,
    Source,
    Publish,
    Internal,
}

impl FailureKind {
    /// Failures that end the case without any further attempt of any kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::EngineFault | FailureKind::TimedOut)
    }
}

/// Retained cause of a `FAILED` case. `message` is the verbatim `Display`
/// of the originating error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

impl CaseFailure {
    pub fn new(stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled(stage: Stage) -> Self {
        Self::new(stage, FailureKind::Cancelled, "cancelled by operator")
    }
}

impl fmt::Display for CaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} during {}: {}", self.kind, self.stage, self.message)
    }
}

impl From<&ProfileError> for CaseFailure {
    fn from(err: &ProfileError) -> Self {
        let kind = match err {
            ProfileError::Stale { .. } => FailureKind::StaleProfile,
            ProfileError::Malformed { .. } | ProfileError::Write { .. } => {
                FailureKind::MalformedProfile
            }
        };
        CaseFailure::new(Stage::Parse, kind, err.to_string())
    }
}

impl From<&BuildError> for CaseFailure {
    fn from(err: &BuildError) -> Self {
        let kind = match err {
            BuildError::UnresolvedReference { .. } => FailureKind::UnresolvedReference,
            BuildError::MissingConversionData { .. } => FailureKind::MissingConversionData,
            BuildError::MissingLimit { .. } => FailureKind::MissingLimit,
            BuildError::InvalidRemedialAction { .. } => FailureKind::InvalidRemedialAction,
            BuildError::Serialization(_) => FailureKind::Internal,
        };
        CaseFailure::new(Stage::Build, kind, err.to_string())
    }
}

impl From<&ParameterError> for CaseFailure {
    fn from(err: &ParameterError) -> Self {
        CaseFailure::new(Stage::Build, FailureKind::InvalidParameters, err.to_string())
    }
}

impl From<&DispatchError> for CaseFailure {
    fn from(err: &DispatchError) -> Self {
        let kind = match err {
            DispatchError::Engine(_) => FailureKind::EngineFault,
            DispatchError::TimedOut(_) => FailureKind::TimedOut,
            DispatchError::Cancelled => FailureKind::Cancelled,
            DispatchError::Serialization(_) => FailureKind::Internal,
        };
        CaseFailure::new(Stage::Dispatch, kind, err.to_string())
    }
}

impl From<&EngineFault> for CaseFailure {
    fn from(err: &EngineFault) -> Self {
        CaseFailure::new(Stage::Dispatch, FailureKind::EngineFault, err.to_string())
    }
}

impl From<&TranslateError> for CaseFailure {
    fn from(err: &TranslateError) -> Self {
        let kind = match err {
            TranslateError::UntraceableResult { .. }
            | TranslateError::CaseMismatch { .. }
            | TranslateError::DuplicateMargin { .. } => FailureKind::UntraceableResult,
            TranslateError::Profile(_) => FailureKind::Internal,
        };
        CaseFailure::new(Stage::Translate, kind, err.to_string())
    }
}

impl From<&PipelineError> for CaseFailure {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::Source { .. } => {
                CaseFailure::new(Stage::Fetch, FailureKind::Source, err.to_string())
            }
            PipelineError::Publish { .. } => {
                CaseFailure::new(Stage::Publish, FailureKind::Publish, err.to_string())
            }
            other => CaseFailure::new(Stage::Dispatch, FailureKind::Internal, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_keeps_the_originating_message() {
        let err = BuildError::MissingConversionData {
            case: "20250602T1030Z_1D".into(),
            element: "line-1".into(),
        };
        let failure = CaseFailure::from(&err);
        assert_eq!(failure.kind, FailureKind::MissingConversionData);
        assert_eq!(failure.stage, Stage::Build);
        assert_eq!(failure.message, err.to_string());
    }

    #[test]
    fn kinds_render_in_screaming_case() {
        assert_eq!(FailureKind::Cancelled.to_string(), "CANCELLED");
        assert_eq!(FailureKind::UnresolvedReference.to_string(), "UNRESOLVED_REFERENCE");
        assert_eq!(
            serde_json::to_string(&FailureKind::TimedOut).unwrap(),
            "\"TIMED_OUT\""
        );
        assert!(FailureKind::TimedOut.is_retryable());
        assert!(!FailureKind::Cancelled.is_retryable());
    }

    #[test]
    fn dispatch_errors_map_to_kinds() {
        let timed_out = DispatchError::TimedOut(std::time::Duration::from_secs(3));
        assert_eq!(CaseFailure::from(&timed_out).kind, FailureKind::TimedOut);
        let cancelled = DispatchError::Cancelled;
        assert_eq!(CaseFailure::from(&cancelled).kind, FailureKind::Cancelled);
    }
}
