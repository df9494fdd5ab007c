//! ---
//! rao_section: "05-case-dispatch"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Optimisation engine dispatch and process adapter."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Single-attempt dispatch of a case to the optimisation engine.
//!
//! The dispatcher never retries. A timed-out run is handed to a detached
//! watcher that keeps polling up to the configured horizon so a late result
//! can be logged and discarded instead of leaking into a later attempt.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rao_logging::{rao_debug, rao_info, rao_warn, LogContext};
use rao_metrics::PipelineMetrics;
use rao_model::OptimizationResult;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, timeout_at, MissedTickBehavior};

use crate::engine::{OptimizationEngine, RunHandle, RunStatus, SubmittedCase};
use crate::errors::{DispatchError, EngineFault, Result};
use crate::policy::DispatchPolicy;

/// What became of a run after its dispatch attempt had already timed out.
#[derive(Debug, Clone, PartialEq)]
pub enum LateOutcome {
    /// A result arrived and was dropped.
    Discarded(RunHandle),
    /// The run faulted or vanished after cancellation.
    Faulted(RunHandle, EngineFault),
    /// Nothing arrived within the horizon.
    Expired(RunHandle),
}

pub struct Dispatcher {
    engine: Arc<dyn OptimizationEngine>,
    policy: DispatchPolicy,
    metrics: Option<PipelineMetrics>,
    late_watchers: Mutex<Vec<JoinHandle<LateOutcome>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("engine", &self.engine.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn OptimizationEngine>,
        policy: DispatchPolicy,
        metrics: Option<PipelineMetrics>,
    ) -> Self {
        Self {
            engine,
            policy,
            metrics,
            late_watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Run one attempt to completion, timeout or cancellation.
    ///
    /// Engine-reported infeasibility comes back as `Ok`.
    pub async fn dispatch(
        &self,
        submitted: &SubmittedCase,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<OptimizationResult> {
        let key = submitted.case_id.key();
        let ctx = LogContext::for_case(&key)
            .with_stage("dispatch")
            .with_attempt(submitted.attempt);
        let started = Instant::now();

        if *cancel.borrow() {
            self.record("cancelled");
            return Err(DispatchError::Cancelled);
        }

        // One deadline covers both accepting the case and running it.
        let deadline = tokio::time::Instant::now() + submitted.timeout;
        let handle = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                self.record("cancelled");
                return Err(DispatchError::Cancelled);
            }
            accepted = timeout_at(deadline, self.engine.submit(submitted)) => match accepted {
                Ok(Ok(handle)) => handle,
                Ok(Err(fault)) => {
                    self.record(fault.label());
                    rao_warn!(context = ctx, "engine refused submission: {}", fault);
                    return Err(fault.into());
                }
                Err(_) => {
                    self.record("timed_out");
                    rao_warn!(
                        context = ctx,
                        "{} did not accept the case within {:?}",
                        self.engine.name(),
                        submitted.timeout
                    );
                    return Err(DispatchError::TimedOut(submitted.timeout));
                }
            },
        };
        rao_info!(
            context = ctx,
            "case submitted to {} as run {} (timeout {:?})",
            self.engine.name(),
            handle.run_id,
            submitted.timeout
        );

        let poll_interval = self.policy.poll_interval;
        let engine = self.engine.as_ref();
        let outcome = timeout_at(deadline, async {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => return Err(DispatchError::Cancelled),
                    _ = ticker.tick() => {}
                }
                match engine.poll(&handle).await? {
                    RunStatus::Running => continue,
                    RunStatus::Finished(result) => return Ok(result),
                    RunStatus::Faulted(fault) => return Err(DispatchError::Engine(fault)),
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(result)) => {
                if result.case_id != submitted.case.id {
                    let fault = EngineFault::Protocol(format!(
                        "result for case {} returned to run of case {}",
                        result.case_id, submitted.case.id
                    ));
                    self.record(fault.label());
                    return Err(fault.into());
                }
                self.record("completed");
                rao_info!(
                    context = ctx,
                    "engine finished with status {} after {} ms",
                    result.solver_status,
                    started.elapsed().as_millis()
                );
                Ok(result)
            }
            Ok(Err(DispatchError::Cancelled)) => {
                self.engine.cancel(&handle).await;
                self.record("cancelled");
                rao_info!(context = ctx, "dispatch cancelled, engine run {} abandoned", handle.run_id);
                Err(DispatchError::Cancelled)
            }
            Ok(Err(err)) => {
                self.record(err.label());
                rao_warn!(context = ctx, "engine run {} failed: {}", handle.run_id, err);
                Err(err)
            }
            Err(_) => {
                self.record("timed_out");
                rao_warn!(
                    context = ctx,
                    "engine run {} exceeded {:?}; watching for a late result",
                    handle.run_id,
                    submitted.timeout
                );
                self.spawn_late_watcher(handle.clone());
                self.engine.cancel(&handle).await;
                Err(DispatchError::TimedOut(submitted.timeout))
            }
        }
    }

    fn spawn_late_watcher(&self, handle: RunHandle) {
        let engine = Arc::clone(&self.engine);
        let metrics = self.metrics.clone();
        let horizon = self.policy.late_result_horizon;
        let poll_interval = self.policy.poll_interval;
        let task = tokio::spawn(async move {
            let key = handle.case_id.key();
            let ctx = LogContext::for_case(&key)
                .with_stage("late-result")
                .with_attempt(handle.attempt);
            let watched = timeout(horizon, async {
                let mut ticker = interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match engine.poll(&handle).await {
                        Ok(RunStatus::Running) => continue,
                        Ok(RunStatus::Finished(result)) => return Ok(result),
                        Ok(RunStatus::Faulted(fault)) | Err(fault) => return Err(fault),
                    }
                }
            })
            .await;
            let outcome = match watched {
                Ok(Ok(result)) => {
                    rao_warn!(
                        context = ctx,
                        "late result from run {} discarded (status {}, {} margins)",
                        handle.run_id,
                        result.solver_status,
                        result.cnec_margins.len()
                    );
                    LateOutcome::Discarded(handle)
                }
                Ok(Err(fault)) => {
                    rao_debug!(context = ctx, "timed-out run {} ended: {}", handle.run_id, fault);
                    LateOutcome::Faulted(handle, fault)
                }
                Err(_) => {
                    rao_debug!(context = ctx, "no late result from run {} within {:?}", handle.run_id, horizon);
                    LateOutcome::Expired(handle)
                }
            };
            if let Some(metrics) = metrics {
                metrics.record_late_result(match &outcome {
                    LateOutcome::Discarded(_) => "discarded",
                    LateOutcome::Faulted(..) => "faulted",
                    LateOutcome::Expired(_) => "expired",
                });
            }
            outcome
        });
        let mut watchers = self.late_watchers.lock();
        watchers.retain(|watcher| !watcher.is_finished());
        watchers.push(task);
    }

    /// Wait for every late-result watcher still running.
    pub async fn drain_late_watchers(&self) -> Vec<LateOutcome> {
        let watchers: Vec<_> = std::mem::take(&mut *self.late_watchers.lock());
        let mut outcomes = Vec::with_capacity(watchers.len());
        for watcher in watchers {
            if let Ok(outcome) = watcher.await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_dispatch(outcome);
        }
    }
}

/// Resolves once the flag is raised. A dropped sender never cancels.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
