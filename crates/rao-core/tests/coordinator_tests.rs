//! ---
//! rao_section: "06-pipeline-orchestration"
//! rao_subsection: "tests"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Coordinator state machine and retry behaviour tests."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use rao_common::CaseId;
use rao_core::{
    summarize, CaseStatus, Coordinator, FailureKind, MemoryPublisher, MemorySource,
    ParameterSource, PipelineError, ResultRecord, Stage, StudyCase,
};
use rao_engine::{DispatchPolicy, Dispatcher, EngineFault};
use rao_metrics::{new_registry, PipelineMetrics};
use rao_model::SolverStatus;
use rao_persistence::StatusJournal;
use rao_profiles::ProfileType;
use rao_testharness::{
    case_id, dispatch_config, expired_window, parameter_config, target, CaseFixture,
    ScriptedEngine, Step,
};
use tempfile::tempdir;

struct Harness {
    coordinator: Arc<Coordinator>,
    engine: Arc<ScriptedEngine>,
    source: MemorySource,
    publisher: MemoryPublisher,
    metrics: PipelineMetrics,
}

fn harness(engine: ScriptedEngine, timeout: Duration, retry_budget: u32) -> Harness {
    harness_with(engine, timeout, retry_budget, |coordinator| coordinator)
}

fn harness_with(
    engine: ScriptedEngine,
    timeout: Duration,
    retry_budget: u32,
    configure: impl FnOnce(Coordinator) -> Coordinator,
) -> Harness {
    let engine = Arc::new(engine);
    let metrics = PipelineMetrics::new(new_registry()).unwrap();
    let policy = DispatchPolicy::from_config(&dispatch_config(timeout, retry_budget));
    let dispatcher = Dispatcher::new(engine.clone(), policy, Some(metrics.clone()));
    let source = MemorySource::new();
    let publisher = MemoryPublisher::new();
    let coordinator = Coordinator::new(
        Arc::new(source.clone()),
        Arc::new(publisher.clone()),
        Arc::new(dispatcher),
        ParameterSource::Fixed(parameter_config()),
    )
    .with_metrics(metrics.clone())
    .with_rng_seed(7);
    Harness {
        coordinator: Arc::new(configure(coordinator)),
        engine,
        source,
        publisher,
        metrics,
    }
}

fn path(case: &StudyCase) -> Vec<CaseStatus> {
    case.history.iter().map(|t| t.to).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn standard_case_is_published() {
    let h = harness(
        ScriptedEngine::completing(SolverStatus::Secure),
        Duration::from_secs(5),
        0,
    );
    h.source.deliver(&case_id(), CaseFixture::standard().documents());

    let case = h.coordinator.submit(case_id()).await.unwrap();
    assert_eq!(case.status, CaseStatus::Completed, "{:?}", case.failure);
    assert_eq!(case.attempt, 1);
    assert_eq!(case.sources.len(), 5);
    assert_eq!(
        case.output.as_deref(),
        Some("memory://20250602T1030Z_1D/security-assessment-result.xml")
    );
    assert!(case.digest.is_some());
    assert_eq!(
        path(&case),
        vec![
            CaseStatus::Received,
            CaseStatus::Parsed,
            CaseStatus::Built,
            CaseStatus::Dispatched,
            CaseStatus::Completed
        ]
    );

    let publication = h.publisher.find(&case_id()).unwrap();
    assert_eq!(
        publication.document.profile_type(),
        ProfileType::SecurityAssessmentResult
    );
    assert!(matches!(
        publication.records.last(),
        Some(ResultRecord::Summary { schedules: 2, .. })
    ));
    assert_eq!(h.engine.submissions(), 1);
    assert_eq!(h.metrics.cases_total("completed"), 1);
    assert_eq!(h.metrics.in_flight(), 0);
    assert_eq!(h.coordinator.status(&case_id()).unwrap(), case);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn undefined_remedial_action_fails_the_build() {
    let h = harness(
        ScriptedEngine::completing(SolverStatus::Secure),
        Duration::from_secs(5),
        2,
    );
    let fixture = CaseFixture::standard().with_undefined_remedial_action("RA_42");
    h.source.deliver(&case_id(), fixture.documents());

    let case = h.coordinator.submit(case_id()).await.unwrap();
    assert_eq!(case.status, CaseStatus::Failed);
    let failure = case.failure.unwrap();
    assert_eq!(failure.stage, Stage::Build);
    assert_eq!(failure.kind, FailureKind::UnresolvedReference);
    assert!(failure.message.contains("RA_42"), "{}", failure.message);
    assert_eq!(h.engine.submissions(), 0);
    assert!(h.publisher.publications().is_empty());
    assert_eq!(h.metrics.cases_total("failed"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_required_profile_fails_before_parsing() {
    let h = harness(
        ScriptedEngine::completing(SolverStatus::Secure),
        Duration::from_secs(5),
        0,
    );
    let documents = CaseFixture::standard()
        .documents()
        .into_iter()
        .filter(|doc| doc.profile_type() != ProfileType::RemedialAction)
        .collect();
    h.source.deliver(&case_id(), documents);

    let case = h.coordinator.submit(case_id()).await.unwrap();
    let failure = case.failure.clone().unwrap();
    assert_eq!(failure.stage, Stage::Fetch);
    assert_eq!(failure.kind, FailureKind::MissingProfile);
    assert!(failure.message.contains("RA"), "{}", failure.message);
    assert_eq!(path(&case), vec![CaseStatus::Received, CaseStatus::Failed]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_profile_fails_parsing() {
    let h = harness(
        ScriptedEngine::completing(SolverStatus::Secure),
        Duration::from_secs(5),
        0,
    );
    let mut fixture = CaseFixture::standard();
    fixture.contingencies = fixture.contingencies.window(expired_window());
    h.source.deliver(&case_id(), fixture.documents());

    let case = h.coordinator.submit(case_id()).await.unwrap();
    let failure = case.failure.unwrap();
    assert_eq!(failure.stage, Stage::Parse);
    assert_eq!(failure.kind, FailureKind::StaleProfile);
    assert_eq!(h.engine.submissions(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_fault_is_retried_within_budget() {
    let engine = ScriptedEngine::new([
        Step::Fault {
            polls: 0,
            fault: EngineFault::Crashed("signal 11".into()),
        },
        Step::Complete {
            polls: 0,
            status: SolverStatus::Secure,
        },
    ]);
    let h = harness(engine, Duration::from_secs(5), 1);
    h.source.deliver(&case_id(), CaseFixture::standard().documents());

    let case = h.coordinator.submit(case_id()).await.unwrap();
    assert_eq!(case.status, CaseStatus::Completed, "{:?}", case.failure);
    assert_eq!(case.attempt, 2);
    let retry = case
        .history
        .iter()
        .find(|t| t.from == Some(CaseStatus::Dispatched) && t.to == CaseStatus::Dispatched)
        .expect("engine fault retry transition");
    assert!(retry.detail.as_deref().unwrap_or_default().contains("signal 11"));
    assert_eq!(h.engine.submissions(), 2);
    assert_eq!(h.metrics.dispatch_total("crashed"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_engine_faults_fail_the_case() {
    let engine = ScriptedEngine::new([Step::Reject(EngineFault::Unavailable("down".into()))]);
    let h = harness(engine, Duration::from_secs(5), 2);
    h.source.deliver(&case_id(), CaseFixture::standard().documents());

    let case = h.coordinator.submit(case_id()).await.unwrap();
    assert_eq!(case.status, CaseStatus::Failed);
    assert_eq!(case.attempt, 3);
    let failure = case.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::EngineFault);
    assert_eq!(failure.message, "engine unavailable: down");
    assert_eq!(h.engine.submissions(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn protocol_fault_fails_without_a_second_run() {
    let engine = ScriptedEngine::new([
        Step::Fault {
            polls: 0,
            fault: EngineFault::Protocol("result for other case".into()),
        },
        Step::Complete {
            polls: 0,
            status: SolverStatus::Secure,
        },
    ]);
    let h = harness(engine, Duration::from_secs(5), 1);
    h.source.deliver(&case_id(), CaseFixture::standard().documents());

    let case = h.coordinator.submit(case_id()).await.unwrap();
    assert_eq!(case.status, CaseStatus::Failed);
    assert_eq!(case.attempt, 1);
    let failure = case.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::EngineFault);
    assert!(failure.message.contains("result for other case"), "{}", failure.message);
    assert_eq!(h.engine.submissions(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_that_never_accepts_the_case_times_out() {
    let h = harness(
        ScriptedEngine::new([Step::Unresponsive]),
        Duration::from_millis(50),
        0,
    );
    h.source.deliver(&case_id(), CaseFixture::standard().documents());

    let case = tokio::time::timeout(Duration::from_secs(3), h.coordinator.submit(case_id()))
        .await
        .expect("dispatch deadline bounds the submission")
        .unwrap();
    assert_eq!(case.status, CaseStatus::Failed);
    assert_eq!(case.failure.as_ref().map(|f| f.kind), Some(FailureKind::TimedOut));
    assert_eq!(
        path(&case),
        vec![
            CaseStatus::Received,
            CaseStatus::Parsed,
            CaseStatus::Built,
            CaseStatus::Dispatched,
            CaseStatus::TimedOut,
            CaseStatus::Failed
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborted_submission_fails_the_case_and_allows_resubmission() {
    let engine = ScriptedEngine::new([
        Step::Hang,
        Step::Complete {
            polls: 0,
            status: SolverStatus::Secure,
        },
    ]);
    let h = harness(engine, Duration::from_secs(10), 0);
    h.source.deliver(&case_id(), CaseFixture::standard().documents());

    let coordinator = h.coordinator.clone();
    let running = tokio::spawn(async move { coordinator.submit(case_id()).await });
    assert!(
        h.engine
            .wait_for_submissions(1, Duration::from_secs(5))
            .await
    );
    running.abort();
    assert!(running.await.unwrap_err().is_cancelled());

    let abandoned = h.coordinator.status(&case_id()).unwrap();
    assert_eq!(abandoned.status, CaseStatus::Failed);
    let failure = abandoned.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.stage, Stage::Dispatch);
    assert_eq!(h.metrics.cases_total("cancelled"), 1);
    assert_eq!(h.metrics.in_flight(), 0);

    let case = h.coordinator.submit(case_id()).await.unwrap();
    assert_eq!(case.status, CaseStatus::Completed, "{:?}", case.failure);
    assert_eq!(h.engine.submissions(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_then_success_completes_on_the_second_attempt() {
    let engine = ScriptedEngine::new([
        Step::Hang,
        Step::Complete {
            polls: 0,
            status: SolverStatus::Unsecure,
        },
    ]);
    let h = harness(engine, Duration::from_millis(60), 1);
    h.source.deliver(&case_id(), CaseFixture::standard().documents());

    let case = h.coordinator.submit(case_id()).await.unwrap();
    assert_eq!(case.status, CaseStatus::Completed, "{:?}", case.failure);
    assert_eq!(
        path(&case),
        vec![
            CaseStatus::Received,
            CaseStatus::Parsed,
            CaseStatus::Built,
            CaseStatus::Dispatched,
            CaseStatus::TimedOut,
            CaseStatus::Dispatched,
            CaseStatus::Completed
        ]
    );
    assert_eq!(case.attempt, 2);
    h.coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_timeout_exhausts_a_budget_of_one() {
    let h = harness(ScriptedEngine::new([Step::Hang]), Duration::from_millis(40), 1);
    h.source.deliver(&case_id(), CaseFixture::standard().documents());

    let case = h.coordinator.submit(case_id()).await.unwrap();
    assert_eq!(case.status, CaseStatus::Failed);
    assert_eq!(case.failure.as_ref().map(|f| f.kind), Some(FailureKind::TimedOut));
    let timeouts = case
        .history
        .iter()
        .filter(|t| t.to == CaseStatus::TimedOut)
        .count();
    assert_eq!(timeouts, 2);
    assert_eq!(h.engine.submissions(), 2);
    assert_eq!(h.engine.cancellations(), 2);
    assert_eq!(h.metrics.dispatch_total("timed_out"), 2);
    h.coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatched_case_rejects_resubmission_and_can_be_cancelled() {
    let h = harness(ScriptedEngine::new([Step::Hang]), Duration::from_secs(10), 0);
    h.source.deliver(&case_id(), CaseFixture::standard().documents());

    let coordinator = h.coordinator.clone();
    let running = tokio::spawn(async move { coordinator.submit(case_id()).await });
    assert!(
        h.engine
            .wait_for_submissions(1, Duration::from_secs(5))
            .await
    );
    assert_eq!(
        h.coordinator.status(&case_id()).map(|c| c.status),
        Some(CaseStatus::Dispatched)
    );

    let duplicate = h.coordinator.submit(case_id()).await;
    assert!(matches!(duplicate, Err(PipelineError::CaseInFlight(_))));
    assert_eq!(h.engine.submissions(), 1);

    h.coordinator.cancel(&case_id()).unwrap();
    let case = running.await.unwrap().unwrap();
    assert_eq!(case.status, CaseStatus::Failed);
    let failure = case.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.stage, Stage::Dispatch);
    assert_eq!(h.engine.cancellations(), 1);
    assert_eq!(h.metrics.cases_total("cancelled"), 1);
    assert!(matches!(
        h.coordinator.cancel(&case_id()),
        Err(PipelineError::NotRunning { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_failed_cases_are_resubmitted() {
    let h = harness(
        ScriptedEngine::completing(SolverStatus::Secure),
        Duration::from_secs(5),
        0,
    );
    h.source.deliver(&case_id(), Vec::new());
    let failed = h.coordinator.submit(case_id()).await.unwrap();
    assert_eq!(failed.status, CaseStatus::Failed);

    h.source.deliver(&case_id(), CaseFixture::standard().documents());
    let completed = h.coordinator.submit(case_id()).await.unwrap();
    assert_eq!(completed.status, CaseStatus::Completed);
    assert!(completed.failure.is_none());
    assert!(completed
        .history
        .iter()
        .any(|t| t.from == Some(CaseStatus::Failed) && t.to == CaseStatus::Received));

    let again = h.coordinator.submit(case_id()).await;
    assert!(matches!(again, Err(PipelineError::CaseAlreadyCompleted(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn infeasible_run_completes_without_schedules() {
    let h = harness(
        ScriptedEngine::completing(SolverStatus::Infeasible),
        Duration::from_secs(5),
        0,
    );
    h.source.deliver(&case_id(), CaseFixture::standard().documents());

    let case = h.coordinator.submit(case_id()).await.unwrap();
    assert_eq!(case.status, CaseStatus::Completed);
    let publication = h.publisher.find(&case_id()).unwrap();
    assert!(matches!(
        publication.records.last(),
        Some(ResultRecord::Summary {
            schedules: 0,
            solver_status: SolverStatus::Infeasible,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publication_failure_fails_the_case() {
    let h = harness(
        ScriptedEngine::completing(SolverStatus::Secure),
        Duration::from_secs(5),
        0,
    );
    h.publisher.fail_publications(true);
    h.source.deliver(&case_id(), CaseFixture::standard().documents());

    let case = h.coordinator.submit(case_id()).await.unwrap();
    let failure = case.failure.unwrap();
    assert_eq!(failure.stage, Stage::Publish);
    assert_eq!(failure.kind, FailureKind::Publish);
    assert!(case.output.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_runs_independent_cases() {
    let h = harness_with(
        ScriptedEngine::new([Step::Complete {
            polls: 3,
            status: SolverStatus::Secure,
        }]),
        Duration::from_secs(5),
        0,
        |coordinator| coordinator.with_max_concurrent(2),
    );
    let later = CaseId::new(target() + ChronoDuration::minutes(15), "1D").unwrap();
    let documents = CaseFixture::standard().documents();
    h.source.deliver(&case_id(), documents.clone());
    h.source.deliver(&later, documents);

    let outcomes = h.coordinator.run_batch(vec![case_id(), later.clone()]).await;
    assert_eq!(outcomes.len(), 2);
    for (case, outcome) in &outcomes {
        let study = outcome.as_ref().unwrap();
        assert_eq!(&study.id, case);
        assert_eq!(study.status, CaseStatus::Completed, "{:?}", study.failure);
    }
    assert_eq!(summarize(&outcomes).get("COMPLETED"), Some(&2));
    assert!(h.engine.peak_runs() <= 2);
    assert_eq!(h.coordinator.cases().len(), 2);
    assert!(h.publisher.find(&later).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transitions_are_journaled_in_order() {
    let dir = tempdir().unwrap();
    let journal = Arc::new(StatusJournal::open(&dir.path().join("status.jsonl")).unwrap());
    let h = harness_with(
        ScriptedEngine::completing(SolverStatus::Secure),
        Duration::from_secs(5),
        0,
        |coordinator| coordinator.with_journal(journal.clone()),
    );
    h.source.deliver(&case_id(), CaseFixture::standard().documents());
    h.coordinator.submit(case_id()).await.unwrap();

    let history = journal.history(&case_id().key()).unwrap();
    let states: Vec<&str> = history.iter().map(|r| r.to.as_str()).collect();
    assert_eq!(
        states,
        vec!["RECEIVED", "PARSED", "BUILT", "DISPATCHED", "COMPLETED"]
    );
    assert!(history[0].from.is_none());
    assert_eq!(history[3].attempt, Some(1));
}
