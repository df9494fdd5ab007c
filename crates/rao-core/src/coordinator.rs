//! ---
//! rao_section: "06-pipeline-orchestration"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Pipeline coordinator driving study cases from fetch to publication."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Fetch, parse, build, dispatch, translate, publish.
//!
//! Parsing and building are never retried: once fetched, the inputs of a
//! case are fixed. Dispatch is retried within the configured budget, with
//! exponential backoff between attempts. Every other failure ends the case
//! `FAILED` with the originating error retained verbatim.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rao_common::{case_span, AppConfig, CaseId, ParametersConfig};
use rao_engine::{DispatchError, DispatchPolicy, Dispatcher, LateOutcome, OptimizationEngine, SubmittedCase};
use rao_logging::{log_system_event, rao_debug, rao_error, rao_info, rao_warn, LogContext, SystemEventOutcome};
use rao_metrics::PipelineMetrics;
use rao_model::{
    build_case, load_parameters, BuildOptions, BuiltCase, ConversionTable, OptimizationResult,
    ParameterConfig, ParameterError,
};
use rao_persistence::{StatusJournal, StatusRecord};
use rao_profiles::{parse_profile, ProfileDocument, ProfileType, RecordSet};
use tokio::sync::watch;
use tracing::Instrument;

use crate::errors::{CaseFailure, FailureKind, PipelineError, Result, Stage};
use crate::publisher::{DirectoryPublisher, Publication, ResultPublisher};
use crate::registry::{abandoned, CaseLease, CaseRegistry};
use crate::sources::{DirectorySource, ProfileSource};
use crate::state::{CaseEvent, CaseStatus, StudyCase, Transition};
use crate::translate::translate;

const DEFAULT_REQUIRED: [ProfileType; 4] = [
    ProfileType::Contingency,
    ProfileType::AssessedElement,
    ProfileType::RemedialAction,
    ProfileType::FlowLimit,
];
const DEFAULT_MAX_CONCURRENT: usize = 4;

type StageResult<T> = std::result::Result<T, CaseFailure>;

/// Where the optimisation parameters of a run come from.
#[derive(Debug, Clone)]
pub enum ParameterSource {
    /// Load per time horizon, applying override document and horizon overrides.
    Files(ParametersConfig),
    /// One frozen configuration for every case.
    Fixed(ParameterConfig),
}

pub struct Coordinator {
    source: Arc<dyn ProfileSource>,
    publisher: Arc<dyn ResultPublisher>,
    dispatcher: Arc<Dispatcher>,
    parameters: ParameterSource,
    /// Frozen configurations per time horizon.
    loaded: Mutex<BTreeMap<String, ParameterConfig>>,
    registry: CaseRegistry,
    journal: Option<Arc<StatusJournal>>,
    metrics: Option<PipelineMetrics>,
    required: Vec<ProfileType>,
    build_options: BuildOptions,
    max_concurrent: usize,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("source", &self.source.name())
            .field("publisher", &self.publisher.name())
            .field("dispatcher", &self.dispatcher)
            .field("required", &self.required)
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}

impl Coordinator {
    pub fn new(
        source: Arc<dyn ProfileSource>,
        publisher: Arc<dyn ResultPublisher>,
        dispatcher: Arc<Dispatcher>,
        parameters: ParameterSource,
    ) -> Self {
        Self {
            source,
            publisher,
            dispatcher,
            parameters,
            loaded: Mutex::new(BTreeMap::new()),
            registry: CaseRegistry::new(),
            journal: None,
            metrics: None,
            required: DEFAULT_REQUIRED.to_vec(),
            build_options: BuildOptions::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Directory source and publisher, process engine policy and status
    /// journal as configured.
    pub fn from_config(
        config: &AppConfig,
        engine: Arc<dyn OptimizationEngine>,
        metrics: Option<PipelineMetrics>,
    ) -> anyhow::Result<Self> {
        let required = config
            .pipeline
            .required_profiles
            .iter()
            .map(|keyword| {
                ProfileType::from_keyword(keyword)
                    .ok_or_else(|| anyhow!("unknown required profile keyword '{keyword}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let journal = StatusJournal::open(&config.storage.journal_path).with_context(|| {
            format!(
                "failed to open status journal {}",
                config.storage.journal_path.display()
            )
        })?;
        let dispatcher = Dispatcher::new(
            engine,
            DispatchPolicy::from_config(&config.dispatch),
            metrics.clone(),
        );
        let mut coordinator = Self::new(
            Arc::new(DirectorySource::new(&config.storage.input_root)),
            Arc::new(DirectoryPublisher::new(&config.storage.output_root)),
            Arc::new(dispatcher),
            ParameterSource::Files(config.parameters.clone()),
        )
        .with_journal(Arc::new(journal))
        .with_required_profiles(required)
        .with_max_concurrent(config.pipeline.max_concurrent_cases);
        if let Some(metrics) = metrics {
            coordinator = coordinator.with_metrics(metrics);
        }
        Ok(coordinator)
    }

    pub fn with_journal(mut self, journal: Arc<StatusJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_required_profiles(mut self, required: Vec<ProfileType>) -> Self {
        self.required = required;
        self
    }

    pub fn with_build_options(mut self, options: BuildOptions) -> Self {
        self.build_options = options;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Seed the backoff jitter for reproducible runs.
    pub fn with_rng_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn registry(&self) -> &CaseRegistry {
        &self.registry
    }

    pub fn status(&self, case: &CaseId) -> Option<StudyCase> {
        self.registry.get(case)
    }

    pub fn cases(&self) -> Vec<StudyCase> {
        self.registry.cases()
    }

    /// Ask a running case to stop. The case ends `FAILED` with kind
    /// `CANCELLED` at its next checkpoint; a dispatched run is cancelled
    /// on the engine.
    pub fn cancel(&self, case: &CaseId) -> Result<()> {
        self.registry.cancel(case)?;
        let key = case.key();
        rao_info!(context = LogContext::for_case(&key), "cancellation requested");
        Ok(())
    }

    /// Run one case through the whole pipeline.
    ///
    /// A case that fails inside the pipeline is returned as `Ok` in status
    /// `FAILED`; `Err` means the case was not admitted.
    pub async fn submit(&self, case: CaseId) -> Result<StudyCase> {
        let (lease, admitted) = self.registry.admit(&case)?;
        let key = case.key();
        let _abandon = AbandonGuard {
            coordinator: self,
            lease: &lease,
            key: &key,
        };
        self.journal(&key, &admitted);
        if let Some(metrics) = &self.metrics {
            metrics.case_started();
        }
        rao_info!(context = LogContext::for_case(&key), "case admitted");

        let outcome = self.run(&lease, &key).instrument(case_span(&case)).await;
        let label = match outcome {
            Ok(()) => {
                log_system_event(
                    Some(&LogContext::for_case(&key)),
                    "case.completed",
                    "result published",
                    SystemEventOutcome::Success,
                );
                "completed"
            }
            Err(failure) => {
                let label = if failure.kind == FailureKind::Cancelled {
                    "cancelled"
                } else {
                    "failed"
                };
                let message = failure.to_string();
                match lease.transition(CaseEvent::Failed(failure)) {
                    Ok(transition) => self.journal(&key, &transition),
                    Err(err) => rao_error!(
                        context = LogContext::for_case(&key),
                        "failure could not be recorded: {}",
                        err
                    ),
                }
                log_system_event(
                    Some(&LogContext::for_case(&key)),
                    "case.failed",
                    &message,
                    SystemEventOutcome::Fault,
                );
                label
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_case(label);
            metrics.case_finished();
        }
        lease
            .snapshot()
            .ok_or_else(|| PipelineError::CaseNotFound(key.clone()))
    }

    /// Run independent cases concurrently, bounded by the configured limit.
    pub async fn run_batch(&self, cases: Vec<CaseId>) -> Vec<(CaseId, Result<StudyCase>)> {
        stream::iter(cases)
            .map(|case| async move {
                let outcome = self.submit(case.clone()).await;
                (case, outcome)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await
    }

    /// Wait for every timed-out run still watched for a late result.
    pub async fn shutdown(&self) -> Vec<LateOutcome> {
        let outcomes = self.dispatcher.drain_late_watchers().await;
        for outcome in &outcomes {
            rao_debug!("late run settled: {:?}", outcome);
        }
        outcomes
    }

    async fn run(&self, lease: &CaseLease, key: &str) -> StageResult<()> {
        let case = lease.case().clone();

        let documents = self.fetch(lease, &case, key).await?;
        let records = self.parse(lease, &case, key, documents).await?;
        let (built, parameters) = self.build(lease, &case, key, records).await?;
        let result = self.dispatch(lease, &case, key, &built, parameters).await?;

        checkpoint(lease, Stage::Translate)?;
        let started = Instant::now();
        let translated = translate(&case, &built.case, &built.index, &result, Utc::now())
            .map_err(|err| CaseFailure::from(&err))?;
        rao_info!(
            context = LogContext::for_case(key).with_stage("translate"),
            "result translated ({} cnecs, {} schedules)",
            translated.cnecs.len(),
            translated.schedules.len()
        );
        self.stage_done(key, Stage::Translate, started);

        checkpoint(lease, Stage::Publish)?;
        let started = Instant::now();
        let publication = Publication {
            case: case.clone(),
            document: translated.document,
            records: translated.records,
        };
        let location = self
            .publisher
            .publish(&publication)
            .await
            .map_err(|err| CaseFailure::from(&err))?;
        lease.update(|study| study.output = Some(location));
        self.stage_done(key, Stage::Publish, started);

        self.advance(lease, key, CaseEvent::Completed)?;
        Ok(())
    }

    async fn fetch(
        &self,
        lease: &CaseLease,
        case: &CaseId,
        key: &str,
    ) -> StageResult<Vec<ProfileDocument>> {
        checkpoint(lease, Stage::Fetch)?;
        let started = Instant::now();
        let documents = self
            .source
            .fetch(case)
            .await
            .map_err(|err| CaseFailure::from(&err))?;
        let ids: Vec<String> = documents.iter().map(|doc| doc.id().to_owned()).collect();
        lease.update(|study| study.sources = ids);

        for required in &self.required {
            if !documents.iter().any(|doc| doc.profile_type() == *required) {
                return Err(CaseFailure::new(
                    Stage::Fetch,
                    FailureKind::MissingProfile,
                    format!(
                        "case {key}: no {} profile delivered by {}",
                        required.keyword(),
                        self.source.name()
                    ),
                ));
            }
        }
        rao_info!(
            context = LogContext::for_case(key).with_stage("fetch"),
            "{} profile documents fetched",
            documents.len()
        );
        self.stage_done(key, Stage::Fetch, started);
        Ok(documents)
    }

    async fn parse(
        &self,
        lease: &CaseLease,
        case: &CaseId,
        key: &str,
        documents: Vec<ProfileDocument>,
    ) -> StageResult<RecordSet> {
        checkpoint(lease, Stage::Parse)?;
        let started = Instant::now();
        let target = case.timestamp();
        let owned_key = key.to_owned();
        let records = tokio::task::spawn_blocking(move || {
            let mut records = RecordSet::default();
            for document in &documents {
                let parsed = parse_profile(document, target)?;
                if parsed.ignored > 0 {
                    rao_debug!(
                        context = LogContext::for_case(&owned_key)
                            .with_stage("parse")
                            .with_profile(document.id()),
                        "{} objects of unused classes ignored",
                        parsed.ignored
                    );
                }
                records.extend(parsed.records);
            }
            Ok::<_, rao_profiles::ProfileError>(records)
        })
        .await
        .map_err(|err| CaseFailure::new(Stage::Parse, FailureKind::Internal, err.to_string()))?
        .map_err(|err| CaseFailure::from(&err))?;
        self.advance(lease, key, CaseEvent::Parsed)?;
        self.stage_done(key, Stage::Parse, started);
        Ok(records)
    }

    async fn build(
        &self,
        lease: &CaseLease,
        case: &CaseId,
        key: &str,
        records: RecordSet,
    ) -> StageResult<(BuiltCase, ParameterConfig)> {
        checkpoint(lease, Stage::Build)?;
        let started = Instant::now();
        let parameters = self
            .parameters_for(case.scenario())
            .map_err(|err| CaseFailure::from(&err))?;
        let applied = parameters.applied();
        let options = self.build_options.clone();
        let task_case = case.clone();
        let built = tokio::task::spawn_blocking(move || {
            let table = ConversionTable::from_records(&records);
            build_case(&task_case, &records, &table, applied, &options)
        })
        .await
        .map_err(|err| CaseFailure::new(Stage::Build, FailureKind::Internal, err.to_string()))?
        .map_err(|err| CaseFailure::from(&err))?;

        let digest = built.digest.clone();
        lease.update(|study| study.digest = Some(digest));
        rao_info!(
            context = LogContext::for_case(key).with_stage("build"),
            "case built ({} contingencies, {} cnecs, {} network actions, digest {})",
            built.case.contingencies.len(),
            built.case.flow_cnecs.len(),
            built.case.network_actions.len(),
            built.digest
        );
        self.advance(lease, key, CaseEvent::Built)?;
        self.stage_done(key, Stage::Build, started);
        Ok((built, parameters))
    }

    async fn dispatch(
        &self,
        lease: &CaseLease,
        case: &CaseId,
        key: &str,
        built: &BuiltCase,
        parameters: ParameterConfig,
    ) -> StageResult<OptimizationResult> {
        checkpoint(lease, Stage::Dispatch)?;
        let started = Instant::now();
        let policy = *self.dispatcher.policy();
        let mut transition = self.advance(lease, key, CaseEvent::Dispatched)?;
        let result = loop {
            let attempt = transition.attempt;
            let submitted = SubmittedCase {
                case_id: case.clone(),
                attempt,
                case: built.case.clone(),
                parameters: parameters.clone(),
                timeout: policy.timeout,
            };
            let err = match self.dispatcher.dispatch(&submitted, lease.cancellation()).await {
                Ok(result) => break result,
                Err(err) => err,
            };
            let ctx = LogContext::for_case(key)
                .with_stage("dispatch")
                .with_attempt(attempt);
            if matches!(err, DispatchError::Cancelled) {
                return Err(CaseFailure::cancelled(Stage::Dispatch));
            }
            let timed_out = matches!(err, DispatchError::TimedOut(_));
            if timed_out {
                self.advance(
                    lease,
                    key,
                    CaseEvent::TimedOut {
                        detail: err.to_string(),
                    },
                )?;
            }
            if !err.is_retryable() || attempt >= policy.max_attempts() {
                rao_warn!(
                    context = ctx,
                    "giving up after attempt {} of {}: {}",
                    attempt,
                    policy.max_attempts(),
                    err
                );
                return Err(CaseFailure::from(&err));
            }

            let delay = policy.backoff_delay(attempt, &mut self.rng.lock());
            rao_warn!(
                context = ctx,
                "attempt failed ({}), retrying in {} ms",
                err,
                delay.as_millis()
            );
            let mut cancel = lease.cancellation();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled(&mut cancel) => return Err(CaseFailure::cancelled(Stage::Dispatch)),
            }
            transition = if timed_out {
                self.advance(lease, key, CaseEvent::Dispatched)?
            } else {
                self.advance(
                    lease,
                    key,
                    CaseEvent::EngineFault {
                        detail: err.to_string(),
                    },
                )?
            };
        };
        rao_info!(
            context = LogContext::for_case(key)
                .with_stage("dispatch")
                .with_attempt(transition.attempt),
            "engine finished with status {}",
            result.solver_status
        );
        self.stage_done(key, Stage::Dispatch, started);
        Ok(result)
    }

    fn parameters_for(&self, time_horizon: &str) -> std::result::Result<ParameterConfig, ParameterError> {
        match &self.parameters {
            ParameterSource::Fixed(config) => Ok(config.clone()),
            ParameterSource::Files(files) => {
                if let Some(config) = self.loaded.lock().get(time_horizon) {
                    return Ok(config.clone());
                }
                let config = load_parameters(files, time_horizon)?;
                self.loaded
                    .lock()
                    .insert(time_horizon.to_owned(), config.clone());
                Ok(config)
            }
        }
    }

    fn advance(&self, lease: &CaseLease, key: &str, event: CaseEvent) -> StageResult<Transition> {
        let transition = lease
            .transition(event)
            .map_err(|err| CaseFailure::from(&err))?;
        self.journal(key, &transition);
        Ok(transition)
    }

    fn journal(&self, key: &str, transition: &Transition) {
        let ctx = LogContext::for_case(key).with_attempt(transition.attempt);
        match transition.from {
            Some(from) => rao_info!(context = ctx, "status {} -> {}", from, transition.to),
            None => rao_info!(context = ctx, "status {}", transition.to),
        }
        let Some(journal) = &self.journal else {
            return;
        };
        let record = StatusRecord {
            case: key.to_owned(),
            from: transition.from.map(|status| status.to_string()),
            to: transition.to.to_string(),
            at: transition.at,
            attempt: (transition.attempt > 0).then_some(transition.attempt),
            detail: transition.detail.clone(),
        };
        if let Err(err) = journal.record(&record) {
            rao_warn!(context = ctx, "status journal write failed: {}", err);
        }
    }

    fn stage_done(&self, key: &str, stage: Stage, started: Instant) {
        let elapsed = started.elapsed();
        tracing::debug!(
            case = key,
            stage = stage.as_str(),
            duration_ms = elapsed.as_millis() as u64,
            "stage finished"
        );
        if let Some(metrics) = &self.metrics {
            metrics.observe_stage(stage.as_str(), elapsed);
        }
    }
}

/// Fails and journals a case whose `submit` future is dropped before the
/// case reaches a terminal status.
struct AbandonGuard<'a> {
    coordinator: &'a Coordinator,
    lease: &'a CaseLease,
    key: &'a str,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        let Some(case) = self.lease.snapshot() else {
            return;
        };
        if case.status.is_terminal() {
            return;
        }
        match self.lease.transition(CaseEvent::Failed(abandoned(case.status))) {
            Ok(transition) => {
                rao_warn!(
                    context = LogContext::for_case(self.key),
                    "submission dropped while {}; case failed",
                    case.status
                );
                self.coordinator.journal(self.key, &transition);
            }
            Err(err) => rao_error!(
                context = LogContext::for_case(self.key),
                "abandoned case could not be failed: {}",
                err
            ),
        }
        if let Some(metrics) = &self.coordinator.metrics {
            metrics.record_case("cancelled");
            metrics.case_finished();
        }
    }
}

fn checkpoint(lease: &CaseLease, stage: Stage) -> StageResult<()> {
    if lease.is_cancelled() {
        return Err(CaseFailure::cancelled(stage));
    }
    Ok(())
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

/// Terminal statuses reached by a batch, for operator summaries.
pub fn summarize(outcomes: &[(CaseId, Result<StudyCase>)]) -> BTreeMap<String, usize> {
    let mut summary = BTreeMap::new();
    for (_, outcome) in outcomes {
        let label = match outcome {
            Ok(study) if study.status == CaseStatus::Completed => "COMPLETED".to_owned(),
            Ok(study) => match &study.failure {
                Some(failure) => failure.kind.to_string(),
                None => study.status.to_string(),
            },
            Err(_) => "REJECTED".to_owned(),
        };
        *summary.entry(label).or_insert(0) += 1;
    }
    summary
}
