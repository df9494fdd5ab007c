//! ---
//! rao_section: "06-pipeline-orchestration"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Study case state machine."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Explicit case status plus a single transition function.
//!
//! ```text
//! Received --parsed--> Parsed --built--> Built --dispatched--> Dispatched(1)
//! Dispatched(n) --timed_out--> TimedOut --dispatched--> Dispatched(n+1)
//! Dispatched(n) --engine_fault--> Dispatched(n+1)
//! Dispatched --completed--> Completed
//! <non-terminal> --failed--> Failed --resubmitted--> Received
//! ```

use chrono::{DateTime, Utc};
use rao_common::CaseId;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::errors::CaseFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Received,
    Parsed,
    Built,
    Dispatched,
    TimedOut,
    Completed,
    Failed,
}

impl CaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseStatus::Completed | CaseStatus::Failed)
    }
}

/// Input to the transition function.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseEvent {
    Parsed,
    Built,
    /// Start (or restart after a timeout) an engine run.
    Dispatched,
    TimedOut { detail: String },
    /// Retry after an engine fault; the case stays dispatched.
    EngineFault { detail: String },
    Completed,
    Failed(CaseFailure),
    Resubmitted,
}

impl CaseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CaseEvent::Parsed => "parsed",
            CaseEvent::Built => "built",
            CaseEvent::Dispatched => "dispatched",
            CaseEvent::TimedOut { .. } => "timed_out",
            CaseEvent::EngineFault { .. } => "engine_fault",
            CaseEvent::Completed => "completed",
            CaseEvent::Failed(_) => "failed",
            CaseEvent::Resubmitted => "resubmitted",
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            CaseEvent::TimedOut { detail } | CaseEvent::EngineFault { detail } => {
                Some(detail.clone())
            }
            CaseEvent::Failed(failure) => Some(failure.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition for case {case}: {event} while {from}")]
pub struct IllegalTransition {
    pub case: String,
    pub from: CaseStatus,
    pub event: &'static str,
}

/// One applied transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<CaseStatus>,
    pub to: CaseStatus,
    pub at: DateTime<Utc>,
    /// Dispatch attempt current after the transition, 0 before the first dispatch.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Status after `event` in `status`, with whether the attempt counter advances.
/// `None` when the event is not allowed.
pub fn next_status(status: CaseStatus, event: &CaseEvent) -> Option<(CaseStatus, bool)> {
    use CaseStatus::*;
    let next = match (status, event) {
        (Received, CaseEvent::Parsed) => (Parsed, false),
        (Parsed, CaseEvent::Built) => (Built, false),
        (Built, CaseEvent::Dispatched) | (TimedOut, CaseEvent::Dispatched) => (Dispatched, true),
        (Dispatched, CaseEvent::TimedOut { .. }) => (TimedOut, false),
        (Dispatched, CaseEvent::EngineFault { .. }) => (Dispatched, true),
        (Dispatched, CaseEvent::Completed) => (Completed, false),
        (from, CaseEvent::Failed(_)) if !from.is_terminal() => (Failed, false),
        (Failed, CaseEvent::Resubmitted) => (Received, false),
        _ => return None,
    };
    Some(next)
}

/// A unit of work tracked from input arrival until publication or terminal failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyCase {
    pub id: CaseId,
    pub status: CaseStatus,
    pub attempt: u32,
    /// Identifiers of the profile documents consumed.
    pub sources: Vec<String>,
    /// Location of the published result document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Digest of the built internal case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<CaseFailure>,
    pub history: Vec<Transition>,
}

impl StudyCase {
    pub fn new(id: CaseId, at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: CaseStatus::Received,
            attempt: 0,
            sources: Vec::new(),
            output: None,
            digest: None,
            failure: None,
            history: vec![Transition {
                from: None,
                to: CaseStatus::Received,
                at,
                attempt: 0,
                detail: None,
            }],
        }
    }

    /// Apply `event` or reject it, leaving the case untouched on rejection.
    pub fn apply(&mut self, event: CaseEvent, at: DateTime<Utc>) -> Result<Transition, IllegalTransition> {
        let Some((to, advance)) = next_status(self.status, &event) else {
            return Err(IllegalTransition {
                case: self.id.key(),
                from: self.status,
                event: event.name(),
            });
        };
        let detail = event.detail();
        match event {
            CaseEvent::Failed(failure) => self.failure = Some(failure),
            CaseEvent::Resubmitted => {
                self.attempt = 0;
                self.failure = None;
                self.output = None;
                self.digest = None;
                self.sources.clear();
            }
            _ => {}
        }
        if advance {
            self.attempt += 1;
        }
        let transition = Transition {
            from: Some(self.status),
            to,
            at,
            attempt: self.attempt,
            detail,
        };
        self.status = to;
        self.history.push(transition.clone());
        Ok(transition)
    }

    pub fn key(&self) -> String {
        self.id.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{FailureKind, Stage};
    use chrono::TimeZone;

    fn case() -> StudyCase {
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 10, 30, 0).unwrap();
        StudyCase::new(CaseId::new(at, "1D").unwrap(), at)
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut case = case();
        for event in [
            CaseEvent::Parsed,
            CaseEvent::Built,
            CaseEvent::Dispatched,
            CaseEvent::Completed,
        ] {
            case.apply(event, now()).unwrap();
        }
        assert_eq!(case.status, CaseStatus::Completed);
        assert_eq!(case.attempt, 1);
        let path: Vec<CaseStatus> = case.history.iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                CaseStatus::Received,
                CaseStatus::Parsed,
                CaseStatus::Built,
                CaseStatus::Dispatched,
                CaseStatus::Completed
            ]
        );
    }

    #[test]
    fn timeout_and_fault_retries_advance_the_attempt() {
        let mut case = case();
        case.apply(CaseEvent::Parsed, now()).unwrap();
        case.apply(CaseEvent::Built, now()).unwrap();
        case.apply(CaseEvent::Dispatched, now()).unwrap();
        let timed_out = case
            .apply(CaseEvent::TimedOut { detail: "no answer".into() }, now())
            .unwrap();
        assert_eq!(timed_out.to, CaseStatus::TimedOut);
        assert_eq!(timed_out.detail.as_deref(), Some("no answer"));
        case.apply(CaseEvent::Dispatched, now()).unwrap();
        assert_eq!(case.attempt, 2);
        let retried = case
            .apply(CaseEvent::EngineFault { detail: "crashed".into() }, now())
            .unwrap();
        assert_eq!(retried.from, Some(CaseStatus::Dispatched));
        assert_eq!(retried.to, CaseStatus::Dispatched);
        assert_eq!(case.attempt, 3);
    }

    #[test]
    fn illegal_events_leave_the_case_untouched() {
        let mut case = case();
        let err = case.apply(CaseEvent::Completed, now()).unwrap_err();
        assert_eq!(err.from, CaseStatus::Received);
        assert_eq!(err.event, "completed");
        assert_eq!(case.status, CaseStatus::Received);
        assert_eq!(case.history.len(), 1);
        assert!(case.apply(CaseEvent::Dispatched, now()).is_err());
        assert!(case.apply(CaseEvent::Resubmitted, now()).is_err());
    }

    #[test]
    fn terminal_states_only_allow_resubmission_of_failures() {
        let mut case = case();
        let failure = CaseFailure::cancelled(Stage::Parse);
        case.apply(CaseEvent::Failed(failure.clone()), now()).unwrap();
        assert_eq!(case.failure.as_ref().map(|f| f.kind), Some(FailureKind::Cancelled));
        assert!(case.apply(CaseEvent::Failed(failure), now()).is_err());

        let back = case.apply(CaseEvent::Resubmitted, now()).unwrap();
        assert_eq!(back.to, CaseStatus::Received);
        assert!(case.failure.is_none());

        for event in [CaseEvent::Parsed, CaseEvent::Built, CaseEvent::Dispatched, CaseEvent::Completed] {
            case.apply(event, now()).unwrap();
        }
        assert!(case.apply(CaseEvent::Resubmitted, now()).is_err());
        assert!(case
            .apply(CaseEvent::Failed(CaseFailure::cancelled(Stage::Dispatch)), now())
            .is_err());
    }

    #[test]
    fn statuses_render_upper_case() {
        assert_eq!(CaseStatus::TimedOut.to_string(), "TIMED_OUT");
        assert_eq!(
            serde_json::to_string(&CaseStatus::Dispatched).unwrap(),
            "\"DISPATCHED\""
        );
    }
}
