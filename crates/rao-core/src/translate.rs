//! ---
//! rao_section: "06-pipeline-orchestration"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Engine result translation into the security-assessment-result profile."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Engine output back to standardized identifiers.
//!
//! Every internal id in the result is looked up in the case's reference
//! index. An id the index does not know is an internal inconsistency and
//! fails the translation; nothing is dropped.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};
use rao_common::CaseId;
use rao_model::{ElementKind, InternalCase, OptimizationResult, ReferenceIndex, SolverStatus};
use rao_profiles::rdf::NC_NS;
use rao_profiles::{
    Instant, ProfileDocument, ProfileMeta, ProfileType, RdfValue, RdfWriter, ValidityWindow,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::TranslateError;

pub const RESULT_DOCUMENT_VERSION: &str = "1";
pub const RESULT_SOURCE: &str = "RAO";

/// Margin of one CNEC, in standardized identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CnecOutcome {
    pub object_id: String,
    pub assessed_element: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contingency: Option<String>,
    pub instant: Instant,
    pub pre_optimisation_margin_mw: f64,
    pub post_optimisation_margin_mw: f64,
    pub is_violation: bool,
}

/// One selected remedial action, in standardized identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOutcome {
    pub object_id: String,
    pub remedial_action: String,
    pub instant: Instant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contingency: Option<String>,
}

/// Flattened result record for dashboard ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum ResultRecord {
    Cnec {
        case: String,
        #[serde(flatten)]
        outcome: CnecOutcome,
    },
    Summary {
        case: String,
        solver_status: SolverStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        functional_cost: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_margin_mw: Option<f64>,
        violations: usize,
        schedules: usize,
        parameters_digest: String,
    },
}

/// Output profile plus everything derived alongside it.
#[derive(Debug, Clone)]
pub struct TranslatedResult {
    pub document: ProfileDocument,
    pub cnecs: Vec<CnecOutcome>,
    pub schedules: Vec<ScheduleOutcome>,
    pub records: Vec<ResultRecord>,
}

/// Stable object id: SHA-256 over the case id and the internal id.
pub fn derived_id(case: &str, internal: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(case.as_bytes());
    hasher.update([0u8]);
    hasher.update(internal.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// The hour containing the case timestamp.
pub fn target_hour(case_id: &CaseId) -> Option<ValidityWindow> {
    let start = case_id
        .timestamp()
        .duration_trunc(Duration::hours(1))
        .ok()?;
    ValidityWindow::new(start, start + Duration::hours(1))
}

fn instant_member(instant: Instant) -> RdfValue {
    RdfValue::Resource(format!("{NC_NS}InstantKind.{}", instant.as_str()))
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn untraceable(case: &str, kind: &str, internal_id: &str) -> TranslateError {
    TranslateError::UntraceableResult {
        case: case.to_owned(),
        kind: kind.to_owned(),
        internal_id: internal_id.to_owned(),
    }
}

fn standardized<'i>(
    index: &'i ReferenceIndex,
    case: &str,
    kind: ElementKind,
    internal_id: &str,
) -> Result<&'i str, TranslateError> {
    match index.standardized(internal_id) {
        Some(entry) if entry.kind == kind => Ok(entry.standardized_id.as_str()),
        _ => Err(untraceable(case, &kind.to_string(), internal_id)),
    }
}

/// Translate `result` for the case it was computed from.
pub fn translate(
    case_id: &CaseId,
    case: &InternalCase,
    index: &ReferenceIndex,
    result: &OptimizationResult,
    created: DateTime<Utc>,
) -> Result<TranslatedResult, TranslateError> {
    let key = case_id.key();
    if result.case_id != case.id || case.id != key {
        return Err(TranslateError::CaseMismatch {
            expected: key,
            found: result.case_id.clone(),
        });
    }

    let mut cnecs = Vec::with_capacity(result.cnec_margins.len());
    let mut seen = BTreeSet::new();
    for margin in &result.cnec_margins {
        let trace = index
            .cnec(&margin.flow_cnec_id)
            .ok_or_else(|| untraceable(&key, "flow-cnec", &margin.flow_cnec_id))?;
        if !seen.insert(margin.flow_cnec_id.as_str()) {
            return Err(TranslateError::DuplicateMargin {
                case: key.clone(),
                internal_id: margin.flow_cnec_id.clone(),
            });
        }
        cnecs.push(CnecOutcome {
            object_id: derived_id(&key, &margin.flow_cnec_id),
            assessed_element: trace.assessed_element.clone(),
            contingency: trace.contingency.clone(),
            instant: trace.instant,
            pre_optimisation_margin_mw: margin.pre_optimisation_margin_mw,
            post_optimisation_margin_mw: margin.post_optimisation_margin_mw,
            is_violation: margin.post_optimisation_margin_mw < 0.0,
        });
    }
    cnecs.sort_by(|a, b| a.object_id.cmp(&b.object_id));

    // Resolved even when nothing gets scheduled: an unknown id is fatal either way.
    let mut schedules = Vec::with_capacity(result.activated_actions.len());
    for action in &result.activated_actions {
        let remedial_action = standardized(
            index,
            &key,
            ElementKind::RemedialAction,
            &action.network_action_id,
        )?;
        let contingency = match &action.contingency_id {
            Some(internal) => {
                Some(standardized(index, &key, ElementKind::Contingency, internal)?.to_owned())
            }
            None => None,
        };
        let scope = match &action.contingency_id {
            Some(internal) => format!("{}@{internal}", action.network_action_id),
            None => format!("{}@{}", action.network_action_id, action.instant.as_str()),
        };
        schedules.push(ScheduleOutcome {
            object_id: derived_id(&key, &scope),
            remedial_action: remedial_action.to_owned(),
            instant: action.instant,
            contingency,
        });
    }
    if result.is_infeasible() && !schedules.is_empty() {
        warn!(
            case = %key,
            actions = schedules.len(),
            "infeasible result lists activated actions; none are scheduled"
        );
        schedules.clear();
    }
    schedules.sort_by(|a, b| a.object_id.cmp(&b.object_id));
    schedules.dedup_by(|a, b| a.object_id == b.object_id);

    let window = target_hour(case_id).ok_or_else(|| TranslateError::CaseMismatch {
        expected: key.clone(),
        found: format!("case timestamp {} has no target hour", case_id.timestamp()),
    })?;
    let meta = ProfileMeta {
        id: format!("SAR_{RESULT_SOURCE}_{key}.xml"),
        source: RESULT_SOURCE.to_owned(),
        profile_type: ProfileType::SecurityAssessmentResult,
        validity: window,
        version: Some(RESULT_DOCUMENT_VERSION.to_owned()),
    };
    let payload = render(&meta, case_id, case, result, &cnecs, &schedules, created)?;

    let violations = cnecs.iter().filter(|c| c.is_violation).count();
    let mut records: Vec<ResultRecord> = cnecs
        .iter()
        .map(|outcome| ResultRecord::Cnec {
            case: key.clone(),
            outcome: outcome.clone(),
        })
        .collect();
    records.push(ResultRecord::Summary {
        case: key.clone(),
        solver_status: result.solver_status,
        functional_cost: result.functional_cost,
        min_margin_mw: result.min_margin_mw(),
        violations,
        schedules: schedules.len(),
        parameters_digest: case.parameters.digest.clone(),
    });

    debug!(
        case = %key,
        cnecs = cnecs.len(),
        schedules = schedules.len(),
        violations,
        "result translated"
    );
    Ok(TranslatedResult {
        document: ProfileDocument::new(meta, payload),
        cnecs,
        schedules,
        records,
    })
}

fn render(
    meta: &ProfileMeta,
    case_id: &CaseId,
    case: &InternalCase,
    result: &OptimizationResult,
    cnecs: &[CnecOutcome],
    schedules: &[ScheduleOutcome],
    created: DateTime<Utc>,
) -> Result<Vec<u8>, TranslateError> {
    let key = case_id.key();
    let mut writer = RdfWriter::new(meta.id.clone())?;
    let mut header = vec![
        ("md:Model.keyword", RdfValue::Literal(ProfileType::SecurityAssessmentResult.keyword().to_owned())),
        ("dcat:startDate", RdfValue::Literal(stamp(meta.validity.start))),
        ("dcat:endDate", RdfValue::Literal(stamp(meta.validity.end))),
        ("md:Model.scenarioTime", RdfValue::Literal(stamp(case_id.timestamp()))),
        ("dcterms:created", RdfValue::Literal(stamp(created))),
        ("md:Model.version", RdfValue::Literal(RESULT_DOCUMENT_VERSION.to_owned())),
        ("dcterms:publisher", RdfValue::Literal(RESULT_SOURCE.to_owned())),
        (
            "nc:SecurityAssessmentResult.solverStatus",
            RdfValue::Literal(result.solver_status.to_string()),
        ),
        (
            "nc:SecurityAssessmentResult.parametersDigest",
            RdfValue::Literal(case.parameters.digest.clone()),
        ),
    ];
    if let Some(cost) = result.functional_cost {
        header.push((
            "nc:SecurityAssessmentResult.functionalCost",
            RdfValue::Literal(cost.to_string()),
        ));
    }
    writer.header(&derived_id(&key, "header"), &header)?;

    for cnec in cnecs {
        let mut properties = vec![(
            "nc:PowerFlowResult.AssessedElement",
            RdfValue::Resource(cnec.assessed_element.clone()),
        )];
        if let Some(contingency) = &cnec.contingency {
            properties.push((
                "nc:PowerFlowResult.Contingency",
                RdfValue::Resource(contingency.clone()),
            ));
        }
        properties.extend([
            ("nc:PowerFlowResult.instant", instant_member(cnec.instant)),
            (
                "nc:PowerFlowResult.preOptimisationMargin",
                RdfValue::Literal(cnec.pre_optimisation_margin_mw.to_string()),
            ),
            (
                "nc:PowerFlowResult.postOptimisationMargin",
                RdfValue::Literal(cnec.post_optimisation_margin_mw.to_string()),
            ),
            (
                "nc:PowerFlowResult.isViolation",
                RdfValue::Literal(cnec.is_violation.to_string()),
            ),
        ]);
        writer.object("nc:PowerFlowResult", &cnec.object_id, &properties)?;
    }

    for schedule in schedules {
        let mut properties = vec![
            (
                "nc:RemedialActionSchedule.RemedialAction",
                RdfValue::Resource(schedule.remedial_action.clone()),
            ),
            ("nc:RemedialActionSchedule.instant", instant_member(schedule.instant)),
        ];
        if let Some(contingency) = &schedule.contingency {
            properties.push((
                "nc:RemedialActionSchedule.Contingency",
                RdfValue::Resource(contingency.clone()),
            ));
        }
        writer.object("nc:RemedialActionSchedule", &schedule.object_id, &properties)?;
    }
    Ok(writer.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn derived_ids_are_stable_and_case_scoped() {
        let first = derived_id("20250602T1030Z_1D", "cnec_0001");
        assert_eq!(first, derived_id("20250602T1030Z_1D", "cnec_0001"));
        assert_eq!(first.len(), 32);
        assert_ne!(first, derived_id("20250602T1130Z_1D", "cnec_0001"));
        assert_ne!(first, derived_id("20250602T1030Z_1D", "cnec_0002"));
    }

    #[test]
    fn target_hour_truncates_to_the_hour() {
        let id = CaseId::new(Utc.with_ymd_and_hms(2025, 6, 2, 10, 30, 0).unwrap(), "1D").unwrap();
        let window = target_hour(&id).unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2025, 6, 2, 11, 0, 0).unwrap());
    }
}
