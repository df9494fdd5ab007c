//! ---
//! rao_section: "04-model-building"
//! rao_subsection: "tests"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Internal case building, reference index and parameter loading tests."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use rao_model::{
    build_case, BuildError, BuildOptions, BuiltCase, ConversionTable, ElementKind, SwitchAction,
    Unresolved,
};
use rao_profiles::{parse_profile, Instant, ProfileType, RecordSet};
use rao_testharness::{case_id, parameter_config, target, CaseFixture, FixtureDocument, FixtureObject};

fn build_from(records: &RecordSet, options: &BuildOptions) -> Result<BuiltCase, BuildError> {
    let table = ConversionTable::from_records(records);
    build_case(
        &case_id(),
        records,
        &table,
        parameter_config().applied(),
        options,
    )
}

fn build(fixture: &CaseFixture) -> Result<BuiltCase, BuildError> {
    build_from(&fixture.records(), &BuildOptions::default())
}

fn records_of(documents: &[FixtureDocument]) -> RecordSet {
    let mut records = RecordSet::default();
    for fixture in documents {
        records.extend(parse_profile(&fixture.document(), target()).unwrap().records);
    }
    records
}

#[test]
fn standard_case_has_expected_shape() {
    let built = build(&CaseFixture::standard()).unwrap();
    let case = &built.case;
    assert_eq!(case.id, "20250602T1030Z_1D");
    assert_eq!(case.kind, "CRAC");

    let contingencies: Vec<(&str, &str)> = case
        .contingencies
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect();
    assert_eq!(
        contingencies,
        vec![("co_0001", "N-1 Generator 1"), ("co_0002", "N-1 Line 2")]
    );
    assert_eq!(case.contingencies[1].network_elements_ids, vec!["_line-2".to_owned()]);

    let cnecs: Vec<(&str, Instant, Option<&str>)> = case
        .flow_cnecs
        .iter()
        .map(|c| (c.id.as_str(), c.instant, c.contingency_id.as_deref()))
        .collect();
    assert_eq!(
        cnecs,
        vec![
            ("cnec_0001", Instant::Preventive, None),
            ("cnec_0002", Instant::Curative, Some("co_0002")),
            ("cnec_0003", Instant::Curative, Some("co_0001")),
            ("cnec_0004", Instant::Curative, Some("co_0002")),
        ]
    );
    let line_curative = case.flow_cnec("cnec_0002").unwrap();
    assert_eq!(line_curative.name, "Line 1 - N-1 Line 2 - curative");
    assert_eq!(line_curative.network_element_id, "_line-1");
    assert_eq!(line_curative.operator.as_deref(), Some("tso-a"));
    assert!(line_curative.optimized);
    assert!(!line_curative.monitored);

    let transformer = case.flow_cnec("cnec_0003").unwrap();
    assert!(!transformer.optimized);
    assert!(transformer.monitored);

    assert_eq!(
        case.network_elements_name_per_id.get("_brk-1").map(String::as_str),
        Some("Breaker 1")
    );
    let area = case.glsk.get("10YAREA-A").unwrap();
    assert_eq!(area.len(), 2);
    assert_eq!(area[0].network_element_id, "_gen-1");
    assert_eq!(area[0].factor, 0.6);
    assert_eq!(case.parameters.digest, parameter_config().digest());
}

#[test]
fn thresholds_convert_amp_limits_with_element_voltage() {
    let built = build(&CaseFixture::standard()).unwrap();
    let case = &built.case;
    let max = |id: &str| case.flow_cnec(id).unwrap().thresholds[0].max;
    // 405 kV x 1000 A x sqrt(3) / 1000
    assert_eq!(max("cnec_0001"), 701.5);
    // curative prefers the 1200 A TATL
    assert_eq!(max("cnec_0002"), 841.8);
    // transformer only has a 500 MW PATL
    assert_eq!(max("cnec_0003"), 500.0);
    assert_eq!(case.flow_cnec("cnec_0001").unwrap().thresholds[0].min, -701.5);
    assert_eq!(case.flow_cnec("cnec_0001").unwrap().nominal_v, vec![405.0]);
    assert_eq!(case.flow_cnec("cnec_0003").unwrap().nominal_v, vec![400.0]);
}

#[test]
fn network_actions_carry_usage_rules() {
    let built = build(&CaseFixture::standard()).unwrap();
    let case = &built.case;
    assert_eq!(case.network_actions.len(), 2);

    let breaker = case.network_action("ra_0001").unwrap();
    assert_eq!(breaker.name, "Open breaker 1");
    assert_eq!(breaker.terminals_connection_actions.len(), 1);
    assert_eq!(breaker.terminals_connection_actions[0].network_element_id, "_brk-1");
    assert_eq!(breaker.terminals_connection_actions[0].action_type, SwitchAction::Open);
    assert_eq!(breaker.on_instant_usage_rules.len(), 1);
    assert_eq!(breaker.on_instant_usage_rules[0].instant, Instant::Preventive);
    let constrained: Vec<&str> = breaker
        .on_constraint_usage_rules
        .iter()
        .map(|rule| rule.flow_cnec_id.as_str())
        .collect();
    assert_eq!(constrained, vec!["cnec_0001"]);

    let shunt = case.network_action("ra_0002").unwrap();
    assert!(shunt.on_instant_usage_rules.is_empty());
    assert_eq!(shunt.on_contingency_state_usage_rules.len(), 1);
    assert_eq!(shunt.on_contingency_state_usage_rules[0].contingency_id, "co_0002");
    assert_eq!(shunt.shunt_compensator_position_actions[0].section_count, 2);
    assert_eq!(shunt.shunt_compensator_position_actions[0].network_element_id, "_shunt-1");
}

#[test]
fn zero_range_closes_the_switch() {
    let mut fixture = CaseFixture::standard();
    fixture.remedial_actions.remove("spr-brk-1");
    fixture.remedial_actions.push(
        FixtureObject::new("nc:StaticPropertyRange", "spr-brk-1")
            .reference("nc:RangeConstraint.GridStateAlteration", "ta-brk-1")
            .literal("nc:RangeConstraint.normalValue", "0"),
    );
    let built = build(&fixture).unwrap();
    let breaker = built.case.network_action("ra_0001").unwrap();
    assert_eq!(breaker.terminals_connection_actions[0].action_type, SwitchAction::Close);
}

#[test]
fn undefined_remedial_action_fails_the_build() {
    let fixture = CaseFixture::standard().with_undefined_remedial_action("RA_42");
    match build(&fixture).unwrap_err() {
        BuildError::UnresolvedReference {
            case,
            reference,
            kind,
            reason,
            referenced_by,
        } => {
            assert_eq!(case, "20250602T1030Z_1D");
            assert_eq!(reference, "RA_42");
            assert_eq!(kind, ElementKind::RemedialAction);
            assert_eq!(reason, Unresolved::Missing);
            assert_eq!(referenced_by, "aewra-undefined");
        }
        other => panic!("expected an unresolved reference, got {other:?}"),
    }
}

#[test]
fn undefined_contingency_equipment_fails_the_build() {
    let mut fixture = CaseFixture::standard();
    fixture.flow_limits.remove("gen-1");
    let err = build(&fixture).unwrap_err();
    assert_eq!(err.identifier(), Some("gen-1"));
    assert!(err.to_string().contains("network-element"), "{err}");
}

#[test]
fn duplicate_definitions_are_ambiguous() {
    let fixture = CaseFixture::standard();
    let second = FixtureDocument::new(ProfileType::RemedialAction)
        .publisher("TSOB")
        .with(
            FixtureObject::new("nc:GridStateAlterationRemedialAction", "ra-open-brk")
                .enumeration("nc:RemedialAction.kind", "RemedialActionKind.preventive"),
        );
    let mut documents: Vec<FixtureDocument> = fixture.fixtures().into_iter().cloned().collect();
    documents.push(second);
    let err = build_from(&records_of(&documents), &BuildOptions::default()).unwrap_err();
    match err {
        BuildError::UnresolvedReference {
            reference, reason, ..
        } => {
            assert_eq!(reference, "ra-open-brk");
            match reason {
                Unresolved::Ambiguous { profiles } => {
                    assert_eq!(profiles.len(), 2);
                    assert!(profiles[0].starts_with("RA_TSOA_"));
                    assert!(profiles[1].starts_with("RA_TSOB_"));
                }
                other => panic!("expected ambiguity, got {other:?}"),
            }
        }
        other => panic!("expected an unresolved reference, got {other:?}"),
    }
}

#[test]
fn build_is_independent_of_document_and_object_order() {
    let fixture = CaseFixture::standard();
    let forward: Vec<FixtureDocument> = fixture.fixtures().into_iter().cloned().collect();
    let mut backward: Vec<FixtureDocument> = forward
        .iter()
        .cloned()
        .map(|mut document| {
            document.objects.reverse();
            document
        })
        .collect();
    backward.reverse();

    let first = build_from(&records_of(&forward), &BuildOptions::default()).unwrap();
    let second = build_from(&records_of(&backward), &BuildOptions::default()).unwrap();
    assert_eq!(
        first.case.to_json_bytes().unwrap(),
        second.case.to_json_bytes().unwrap()
    );
    assert_eq!(first.digest, second.digest);
}

#[test]
fn missing_voltage_for_amp_limit_is_a_hard_failure() {
    let mut fixture = CaseFixture::standard();
    fixture.flow_limits.remove("sv-400");
    fixture.flow_limits.remove("sv-410");
    match build(&fixture).unwrap_err() {
        BuildError::MissingConversionData { element, .. } => assert_eq!(element, "line-1"),
        other => panic!("expected missing conversion data, got {other:?}"),
    }
}

#[test]
fn element_without_limit_fails() {
    let mut fixture = CaseFixture::standard();
    fixture.flow_limits.remove("apl-tr-1-patl");
    match build(&fixture).unwrap_err() {
        BuildError::MissingLimit {
            element,
            assessed_element,
            ..
        } => {
            assert_eq!(element, "tr-1");
            assert_eq!(assessed_element, "ae-tr-1");
        }
        other => panic!("expected missing limit, got {other:?}"),
    }
}

#[test]
fn contingency_filter_restricts_curative_cnecs() {
    let options = BuildOptions {
        contingency_filter: Some(BTreeSet::from(["co-line-2".to_owned()])),
    };
    let built = build_from(&CaseFixture::standard().records(), &options).unwrap();
    assert_eq!(built.case.contingencies.len(), 1);
    assert_eq!(built.case.contingencies[0].id, "co_0002");
    assert_eq!(built.case.flow_cnecs.len(), 3);
    assert!(built
        .case
        .flow_cnecs
        .iter()
        .all(|cnec| cnec.contingency_id.as_deref() != Some("co_0001")));
}

#[test]
fn contingency_filter_naming_an_unknown_id_fails() {
    let options = BuildOptions {
        contingency_filter: Some(BTreeSet::from(["co-missing".to_owned()])),
    };
    match build_from(&CaseFixture::standard().records(), &options).unwrap_err() {
        BuildError::UnresolvedReference {
            reference,
            kind,
            referenced_by,
            ..
        } => {
            assert_eq!(reference, "co-missing");
            assert_eq!(kind, ElementKind::Contingency);
            assert_eq!(referenced_by, "contingency filter");
        }
        other => panic!("expected an unresolved reference, got {other:?}"),
    }
}

#[test]
fn unstudied_contingency_and_empty_action_are_left_out() {
    let mut fixture = CaseFixture::standard();
    fixture.remedial_actions.push(
        FixtureObject::new("nc:GridStateAlterationRemedialAction", "ra-empty")
            .enumeration("nc:RemedialAction.kind", "RemedialActionKind.curative"),
    );
    let built = build(&fixture).unwrap();
    assert!(built
        .case
        .contingencies
        .iter()
        .all(|c| c.name != "Busbar fault"));
    assert_eq!(
        built
            .index
            .resolve_active(ElementKind::Contingency, "co-busbar", "test")
            .unwrap(),
        None
    );
    assert_eq!(
        built
            .index
            .resolve_active(ElementKind::RemedialAction, "ra-empty", "test")
            .unwrap(),
        None
    );
    assert_eq!(built.case.network_actions.len(), 2);
    assert_eq!(built.index.standardized("ra_0001").unwrap().standardized_id, "ra-open-brk");
}

#[test]
fn outage_remedial_action_is_rejected() {
    let mut fixture = CaseFixture::standard();
    fixture.remedial_actions.remove("ra-shunt");
    fixture.remedial_actions.push(
        FixtureObject::new("nc:GridStateAlterationRemedialAction", "ra-shunt")
            .enumeration("nc:RemedialAction.kind", "RemedialActionKind.outage"),
    );
    match build(&fixture).unwrap_err() {
        BuildError::InvalidRemedialAction {
            remedial_action, ..
        } => assert_eq!(remedial_action, "ra-shunt"),
        other => panic!("expected invalid remedial action, got {other:?}"),
    }
}

#[test]
fn shunt_modification_without_range_is_rejected() {
    let mut fixture = CaseFixture::standard();
    fixture.remedial_actions.remove("spr-shunt-1");
    let err = build(&fixture).unwrap_err();
    assert!(matches!(err, BuildError::InvalidRemedialAction { .. }), "{err}");
    assert_eq!(err.identifier(), Some("ra-shunt"));
}

#[test]
fn index_traces_cnecs_back_to_standardized_ids() {
    let built = build(&CaseFixture::standard()).unwrap();
    let trace = built.index.cnec("cnec_0002").unwrap();
    assert_eq!(trace.assessed_element, "ae-line-1");
    assert_eq!(trace.contingency.as_deref(), Some("co-line-2"));
    assert_eq!(trace.instant, Instant::Curative);
    assert_eq!(built.index.cnecs().count(), 4);
    assert_eq!(
        built.index.standardized("co_0001").unwrap().standardized_id,
        "co-gen-1"
    );
}

#[test]
fn serialised_case_uses_crac_field_names() {
    let built = build(&CaseFixture::standard()).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&built.case.to_json_bytes().unwrap()).unwrap();
    for key in [
        "type",
        "version",
        "instants",
        "ra-usage-limits-per-instant",
        "networkElementsNamePerId",
        "flowCnecs",
        "networkActions",
    ] {
        assert!(value.get(key).is_some(), "missing key {key}");
    }
    assert_eq!(value["flowCnecs"][0]["thresholds"][0]["unit"], "megawatt");
}
