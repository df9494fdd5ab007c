//! ---
//! rao_section: "08-test-harness"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Scripted optimisation engine for dispatch tests."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! In-process engine whose behaviour is scripted per submission.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rao_engine::{EngineFault, OptimizationEngine, RunHandle, RunStatus, SubmittedCase};
use rao_model::{ActivatedAction, CnecMargin, InternalCase, OptimizationResult, SolverStatus};
use uuid::Uuid;

/// Behaviour of one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Report `Running` for `polls` polls, then a result derived from the case.
    Complete { polls: u32, status: SolverStatus },
    /// Report `Running` for `polls` polls, then exactly this result.
    Result { polls: u32, result: OptimizationResult },
    /// Report `Running` for `polls` polls, then fault.
    Fault { polls: u32, fault: EngineFault },
    /// Refuse the submission.
    Reject(EngineFault),
    /// Never finish.
    Hang,
    /// Never even accept the submission.
    Unresponsive,
}

#[derive(Debug)]
struct Run {
    step: Step,
    polls: u32,
    case: Arc<InternalCase>,
}

/// Scripted [`OptimizationEngine`]. Submissions consume steps in order and
/// the last step repeats. An empty script completes securely on first poll.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Step>>,
    runs: Mutex<HashMap<Uuid, Run>>,
    ignore_cancel: bool,
    submissions: AtomicU32,
    cancellations: AtomicU32,
    peak_runs: AtomicU32,
}

impl ScriptedEngine {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Engine that completes every run with `status` on the first poll.
    pub fn completing(status: SolverStatus) -> Self {
        Self::new([Step::Complete { polls: 0, status }])
    }

    /// Keep runs alive after `cancel`, so timed-out runs can still deliver late.
    pub fn ignoring_cancel(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }

    pub fn push(&self, step: Step) {
        self.script.lock().push_back(step);
    }

    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> u32 {
        self.cancellations.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live runs observed.
    pub fn peak_runs(&self) -> u32 {
        self.peak_runs.load(Ordering::SeqCst)
    }

    pub fn live_runs(&self) -> usize {
        self.runs.lock().len()
    }

    /// Wait until at least `count` submissions were made, up to `limit`.
    pub async fn wait_for_submissions(&self, count: u32, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.submissions() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        true
    }

    fn next_step(&self) -> Step {
        let mut script = self.script.lock();
        match script.len() {
            0 => Step::Complete {
                polls: 0,
                status: SolverStatus::Secure,
            },
            1 => script.front().cloned().unwrap_or(Step::Hang),
            _ => script.pop_front().unwrap_or(Step::Hang),
        }
    }
}

/// Result covering every CNEC of `case`, activating each network action once.
pub fn synthetic_result(case: &InternalCase, status: SolverStatus) -> OptimizationResult {
    let cnec_margins = case
        .flow_cnecs
        .iter()
        .enumerate()
        .map(|(position, cnec)| CnecMargin {
            flow_cnec_id: cnec.id.clone(),
            pre_optimisation_margin_mw: -10.0 + position as f64,
            post_optimisation_margin_mw: match status {
                SolverStatus::Secure => 25.0 + position as f64,
                SolverStatus::Unsecure | SolverStatus::Infeasible => -5.0 + position as f64,
            },
        })
        .collect();
    let activated_actions = case
        .network_actions
        .iter()
        .filter_map(|action| {
            if let Some(rule) = action.on_contingency_state_usage_rules.first() {
                return Some(ActivatedAction {
                    network_action_id: action.id.clone(),
                    instant: rule.instant,
                    contingency_id: Some(rule.contingency_id.clone()),
                });
            }
            action.on_instant_usage_rules.first().map(|rule| ActivatedAction {
                network_action_id: action.id.clone(),
                instant: rule.instant,
                contingency_id: None,
            })
        })
        .collect();
    OptimizationResult {
        case_id: case.id.clone(),
        solver_status: status,
        functional_cost: Some(-25.0),
        cnec_margins,
        activated_actions,
    }
}

#[async_trait]
impl OptimizationEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, case: &SubmittedCase) -> Result<RunHandle, EngineFault> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let step = self.next_step();
        match step {
            Step::Reject(fault) => return Err(fault),
            Step::Unresponsive => return std::future::pending().await,
            _ => {}
        }
        let handle = RunHandle::new(case.case_id.clone(), case.attempt);
        let mut runs = self.runs.lock();
        runs.insert(
            handle.run_id,
            Run {
                step,
                polls: 0,
                case: Arc::clone(&case.case),
            },
        );
        self.peak_runs.fetch_max(runs.len() as u32, Ordering::SeqCst);
        Ok(handle)
    }

    async fn poll(&self, handle: &RunHandle) -> Result<RunStatus, EngineFault> {
        let key = handle.run_id;
        let mut runs = self.runs.lock();
        let run = runs
            .get_mut(&key)
            .ok_or_else(|| EngineFault::UnknownRun(handle.to_string()))?;
        run.polls += 1;
        let status = match &run.step {
            Step::Hang | Step::Reject(_) | Step::Unresponsive => return Ok(RunStatus::Running),
            Step::Complete { polls, .. } | Step::Result { polls, .. } | Step::Fault { polls, .. }
                if run.polls <= *polls =>
            {
                return Ok(RunStatus::Running)
            }
            Step::Complete { status, .. } => {
                RunStatus::Finished(synthetic_result(&run.case, *status))
            }
            Step::Result { result, .. } => RunStatus::Finished(result.clone()),
            Step::Fault { fault, .. } => RunStatus::Faulted(fault.clone()),
        };
        runs.remove(&key);
        Ok(status)
    }

    async fn cancel(&self, handle: &RunHandle) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_cancel {
            self.runs.lock().remove(&handle.run_id);
        }
    }
}
