//! ---
//! rao_section: "06-pipeline-orchestration"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Case-keyed registry enforcing one pipeline per case."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rao_common::CaseId;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::errors::{CaseFailure, FailureKind, PipelineError, Result, Stage};
use crate::state::{CaseEvent, CaseStatus, StudyCase, Transition};

#[derive(Debug)]
struct Entry {
    case: StudyCase,
    /// Cancellation flag of the running pipeline, if any.
    running: Option<watch::Sender<bool>>,
}

/// Every case the coordinator has seen, keyed by case id.
#[derive(Debug, Clone, Default)]
pub struct CaseRegistry {
    cases: Arc<Mutex<BTreeMap<CaseId, Entry>>>,
}

impl CaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the case for one pipeline run.
    ///
    /// New cases start `RECEIVED`, `FAILED` cases are resubmitted. Anything
    /// else is rejected without touching the case.
    pub fn admit(&self, id: &CaseId) -> Result<(CaseLease, Transition)> {
        let mut cases = self.cases.lock();
        let transition = match cases.get_mut(id) {
            Some(entry) if entry.running.is_some() => {
                return Err(PipelineError::CaseInFlight(id.key()))
            }
            Some(entry) => match entry.case.status {
                CaseStatus::Completed => return Err(PipelineError::CaseAlreadyCompleted(id.key())),
                CaseStatus::Failed => entry.case.apply(CaseEvent::Resubmitted, Utc::now())?,
                _ => return Err(PipelineError::CaseInFlight(id.key())),
            },
            None => {
                let case = StudyCase::new(id.clone(), Utc::now());
                let first = case.history[0].clone();
                cases.insert(
                    id.clone(),
                    Entry {
                        case,
                        running: None,
                    },
                );
                first
            }
        };
        let (tx, rx) = watch::channel(false);
        if let Some(entry) = cases.get_mut(id) {
            entry.running = Some(tx);
        }
        debug!(case = %id, "case admitted");
        Ok((
            CaseLease {
                registry: self.clone(),
                case: id.clone(),
                cancel: rx,
            },
            transition,
        ))
    }

    /// Raise the cancellation flag of a running case.
    pub fn cancel(&self, id: &CaseId) -> Result<()> {
        let cases = self.cases.lock();
        let entry = cases
            .get(id)
            .ok_or_else(|| PipelineError::CaseNotFound(id.key()))?;
        match &entry.running {
            Some(flag) => {
                flag.send_replace(true);
                Ok(())
            }
            None => Err(PipelineError::NotRunning {
                case: id.key(),
                status: entry.case.status.to_string(),
            }),
        }
    }

    pub fn get(&self, id: &CaseId) -> Option<StudyCase> {
        self.cases.lock().get(id).map(|entry| entry.case.clone())
    }

    pub fn cases(&self) -> Vec<StudyCase> {
        self.cases
            .lock()
            .values()
            .map(|entry| entry.case.clone())
            .collect()
    }

    pub fn is_running(&self, id: &CaseId) -> bool {
        self.cases
            .lock()
            .get(id)
            .is_some_and(|entry| entry.running.is_some())
    }

    fn apply(&self, id: &CaseId, event: CaseEvent) -> Result<Transition> {
        let mut cases = self.cases.lock();
        let entry = cases
            .get_mut(id)
            .ok_or_else(|| PipelineError::CaseNotFound(id.key()))?;
        Ok(entry.case.apply(event, Utc::now())?)
    }

    fn update(&self, id: &CaseId, change: impl FnOnce(&mut StudyCase)) {
        if let Some(entry) = self.cases.lock().get_mut(id) {
            change(&mut entry.case);
        }
    }

    /// Drop the claim. A case left short of a terminal status by a dropped
    /// pipeline is failed so it can be resubmitted.
    fn release(&self, id: &CaseId) {
        let mut cases = self.cases.lock();
        let Some(entry) = cases.get_mut(id) else {
            return;
        };
        entry.running = None;
        let status = entry.case.status;
        if status.is_terminal() {
            return;
        }
        if entry
            .case
            .apply(CaseEvent::Failed(abandoned(status)), Utc::now())
            .is_ok()
        {
            warn!(case = %id, status = %status, "pipeline dropped before finishing; case failed");
        }
    }
}

/// Failure recorded for a pipeline that stopped without reaching a terminal status.
pub(crate) fn abandoned(status: CaseStatus) -> CaseFailure {
    let stage = match status {
        CaseStatus::Received => Stage::Fetch,
        CaseStatus::Parsed => Stage::Build,
        _ => Stage::Dispatch,
    };
    CaseFailure::new(
        stage,
        FailureKind::Cancelled,
        format!("pipeline abandoned while {status}"),
    )
}

/// Exclusive claim on one case, released on drop.
#[derive(Debug)]
pub struct CaseLease {
    registry: CaseRegistry,
    case: CaseId,
    cancel: watch::Receiver<bool>,
}

impl CaseLease {
    pub fn case(&self) -> &CaseId {
        &self.case
    }

    pub fn transition(&self, event: CaseEvent) -> Result<Transition> {
        self.registry.apply(&self.case, event)
    }

    pub fn update(&self, change: impl FnOnce(&mut StudyCase)) {
        self.registry.update(&self.case, change);
    }

    pub fn snapshot(&self) -> Option<StudyCase> {
        self.registry.get(&self.case)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Receiver observing the cancellation flag.
    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }
}

impl Drop for CaseLease {
    fn drop(&mut self) {
        self.registry.release(&self.case);
    }
}
