//! ---
//! rao_section: "05-case-dispatch"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Optimisation engine dispatch and process adapter."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Narrow submit/poll/cancel contract with the optimisation engine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rao_common::CaseId;
use rao_model::{InternalCase, OptimizationResult, ParameterConfig};
use uuid::Uuid;

use crate::errors::EngineFault;

/// Everything the engine receives for one run.
#[derive(Debug, Clone)]
pub struct SubmittedCase {
    pub case_id: CaseId,
    /// 1-based dispatch attempt.
    pub attempt: u32,
    pub case: Arc<InternalCase>,
    pub parameters: ParameterConfig,
    pub timeout: Duration,
}

/// Token identifying one engine run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub case_id: CaseId,
    pub attempt: u32,
}

impl RunHandle {
    pub fn new(case_id: CaseId, attempt: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            case_id,
            attempt,
        }
    }
}

impl fmt::Display for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}:{}", self.case_id, self.attempt, self.run_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Running,
    Finished(OptimizationResult),
    Faulted(EngineFault),
}

#[async_trait]
pub trait OptimizationEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, case: &SubmittedCase) -> Result<RunHandle, EngineFault>;

    async fn poll(&self, handle: &RunHandle) -> Result<RunStatus, EngineFault>;

    /// Best effort. Unknown or already finished runs are not an error.
    async fn cancel(&self, handle: &RunHandle);
}
