//! ---
//! rao_section: "06-pipeline-orchestration"
//! rao_subsection: "tests"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Result translation tests."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use rao_core::{derived_id, translate, ResultRecord, TranslateError};
use rao_model::{ActivatedAction, CnecMargin, SolverStatus};
use rao_profiles::{read_graph, Instant, ProfileType};
use rao_testharness::{case_id, synthetic_result, CaseFixture};

fn created() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 45, 0).unwrap()
}

#[test]
fn every_output_identifier_resolves_back_to_the_input_profiles() {
    let built = CaseFixture::standard().built();
    let result = synthetic_result(&built.case, SolverStatus::Unsecure);
    let translated = translate(&case_id(), &built.case, &built.index, &result, created()).unwrap();

    assert_eq!(translated.cnecs.len(), built.case.flow_cnecs.len());
    assert_eq!(translated.schedules.len(), built.case.network_actions.len());

    let xml = String::from_utf8(translated.document.payload.to_vec()).unwrap();
    let graph = read_graph(translated.document.id(), &xml).unwrap();

    let header = graph.header.expect("result header");
    assert_eq!(header.literal("keyword"), Some("SAR"));
    assert_eq!(header.literal("startDate"), Some("2025-06-02T10:00:00Z"));
    assert_eq!(header.literal("endDate"), Some("2025-06-02T11:00:00Z"));
    assert_eq!(header.literal("scenarioTime"), Some("2025-06-02T10:30:00Z"));
    assert_eq!(header.literal("solverStatus"), Some("unsecure"));

    for object in graph.objects.iter().filter(|o| o.class == "PowerFlowResult") {
        let assessed = object.resource("AssessedElement").unwrap();
        let entry = built
            .index
            .cnecs()
            .find(|trace| derived_id(&case_id().key(), &trace.internal_id) == object.about)
            .expect("power flow result traces to a cnec");
        assert_eq!(assessed, entry.assessed_element);
        assert_eq!(object.resource("Contingency"), entry.contingency.as_deref());
        assert_eq!(object.enumeration("instant"), Some(entry.instant.as_str()));
    }

    let scheduled: BTreeSet<&str> = graph
        .objects
        .iter()
        .filter(|o| o.class == "RemedialActionSchedule")
        .filter_map(|o| o.resource("RemedialAction"))
        .collect();
    assert_eq!(scheduled, BTreeSet::from(["ra-open-brk", "ra-shunt"]));
    let shunt = graph
        .objects
        .iter()
        .find(|o| o.resource("RemedialAction") == Some("ra-shunt"))
        .unwrap();
    assert_eq!(shunt.resource("Contingency"), Some("co-line-2"));
    assert_eq!(shunt.enumeration("instant"), Some("curative"));

    assert!(!xml.contains("cnec_0"), "internal ids leaked into the output");
    assert!(!xml.contains("ra_0"), "internal ids leaked into the output");
}

#[test]
fn document_metadata_names_the_case() {
    let built = CaseFixture::standard().built();
    let result = synthetic_result(&built.case, SolverStatus::Secure);
    let translated = translate(&case_id(), &built.case, &built.index, &result, created()).unwrap();
    let meta = &translated.document.meta;
    assert_eq!(meta.profile_type, ProfileType::SecurityAssessmentResult);
    assert_eq!(meta.id, "SAR_RAO_20250602T1030Z_1D.xml");
    assert_eq!(meta.source, "RAO");
    assert!(meta.validity.covers(case_id().timestamp()));
    assert!(translated.cnecs.iter().all(|cnec| !cnec.is_violation));
}

#[test]
fn infeasible_results_schedule_nothing() {
    let built = CaseFixture::standard().built();
    let result = synthetic_result(&built.case, SolverStatus::Infeasible);
    assert!(!result.activated_actions.is_empty());
    let translated = translate(&case_id(), &built.case, &built.index, &result, created()).unwrap();

    assert!(translated.schedules.is_empty());
    let xml = String::from_utf8(translated.document.payload.to_vec()).unwrap();
    let graph = read_graph(translated.document.id(), &xml).unwrap();
    assert!(graph.objects.iter().all(|o| o.class != "RemedialActionSchedule"));
    assert_eq!(
        graph.header.unwrap().literal("solverStatus"),
        Some("infeasible")
    );

    match translated.records.last() {
        Some(ResultRecord::Summary {
            schedules,
            solver_status,
            violations,
            ..
        }) => {
            assert_eq!(*schedules, 0);
            assert_eq!(*solver_status, SolverStatus::Infeasible);
            assert!(*violations > 0);
        }
        other => panic!("expected a summary record, got {other:?}"),
    }
}

#[test]
fn unknown_internal_ids_are_fatal() {
    let built = CaseFixture::standard().built();
    let mut result = synthetic_result(&built.case, SolverStatus::Secure);
    result.cnec_margins.push(CnecMargin {
        flow_cnec_id: "cnec_9999".into(),
        pre_optimisation_margin_mw: 1.0,
        post_optimisation_margin_mw: 2.0,
    });
    let err = translate(&case_id(), &built.case, &built.index, &result, created()).unwrap_err();
    match err {
        TranslateError::UntraceableResult {
            kind, internal_id, ..
        } => {
            assert_eq!(kind, "flow-cnec");
            assert_eq!(internal_id, "cnec_9999");
        }
        other => panic!("unexpected error {other}"),
    }

    let mut result = synthetic_result(&built.case, SolverStatus::Secure);
    result.activated_actions.push(ActivatedAction {
        network_action_id: "ra_0042".into(),
        instant: Instant::Preventive,
        contingency_id: None,
    });
    let err = translate(&case_id(), &built.case, &built.index, &result, created()).unwrap_err();
    assert!(
        matches!(&err, TranslateError::UntraceableResult { kind, internal_id, .. }
            if kind == "remedial-action" && internal_id == "ra_0042"),
        "{err}"
    );
}

#[test]
fn results_of_another_case_are_rejected() {
    let built = CaseFixture::standard().built();
    let mut result = synthetic_result(&built.case, SolverStatus::Secure);
    result.case_id = "20250602T1130Z_1D".into();
    let err = translate(&case_id(), &built.case, &built.index, &result, created()).unwrap_err();
    assert!(matches!(err, TranslateError::CaseMismatch { .. }));
}

#[test]
fn translation_is_deterministic() {
    let built = CaseFixture::standard().built();
    let result = synthetic_result(&built.case, SolverStatus::Unsecure);
    let first = translate(&case_id(), &built.case, &built.index, &result, created()).unwrap();

    let mut reordered = result.clone();
    reordered.cnec_margins.reverse();
    reordered.activated_actions.reverse();
    let second = translate(&case_id(), &built.case, &built.index, &reordered, created()).unwrap();
    assert_eq!(first.document.payload, second.document.payload);
    assert_eq!(first.records, second.records);
}

#[test]
fn infeasible_result_with_unknown_action_is_still_untraceable() {
    let built = CaseFixture::standard().built();
    let mut result = synthetic_result(&built.case, SolverStatus::Infeasible);
    result.activated_actions = vec![ActivatedAction {
        network_action_id: "ra_9999".into(),
        instant: Instant::Preventive,
        contingency_id: None,
    }];
    let err = translate(&case_id(), &built.case, &built.index, &result, created()).unwrap_err();
    assert!(
        matches!(&err, TranslateError::UntraceableResult { kind, internal_id, .. }
            if kind == "remedial-action" && internal_id == "ra_9999"),
        "{err}"
    );
}

#[test]
fn repeated_cnec_margin_is_rejected() {
    let built = CaseFixture::standard().built();
    let mut result = synthetic_result(&built.case, SolverStatus::Secure);
    let repeated = result.cnec_margins[0].clone();
    result.cnec_margins.push(repeated.clone());
    let err = translate(&case_id(), &built.case, &built.index, &result, created()).unwrap_err();
    match err {
        TranslateError::DuplicateMargin { internal_id, .. } => {
            assert_eq!(internal_id, repeated.flow_cnec_id);
        }
        other => panic!("unexpected error {other}"),
    }
}
