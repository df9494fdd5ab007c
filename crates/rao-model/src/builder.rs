//! ---
//! rao_section: "04-model-building"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Internal case construction from parsed exchange profiles."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Merge of parsed profile records into one [`InternalCase`].
//!
//! Records are always visited in standardized-id order and every collection
//! in the output is ordered, so the same set of documents yields the same
//! bytes whatever order they arrived in.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rao_common::CaseId;
use rao_profiles::{AlterationKind, Instant, RecordSet, Sourced};
use tracing::{debug, info, warn};

use crate::case::{
    AppliedParameters, CaseContingency, FlowCnec, InstantDefinition, InternalCase, NetworkAction,
    OnConstraintRule, OnContingencyStateRule, OnInstantRule, ShiftKey, ShuntPositionAction,
    SwitchAction, TerminalsAction, Threshold, CRAC_TYPE, CRAC_VERSION, USAGE_AVAILABLE,
};
use crate::errors::{BuildError, Result};
use crate::index::{CnecTrace, ElementKind, IndexBuilder, ReferenceIndex};
use crate::limits::ConversionTable;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Restrict curative CNECs to these standardized contingency ids.
    pub contingency_filter: Option<BTreeSet<String>>,
}

/// Output of a successful build: the case, its index and the case digest.
#[derive(Debug, Clone)]
pub struct BuiltCase {
    pub case: Arc<InternalCase>,
    pub index: Arc<ReferenceIndex>,
    pub digest: String,
}

fn sorted_by_id<'r, T>(
    items: &'r [Sourced<T>],
    id: impl Fn(&T) -> &str,
) -> Vec<&'r Sourced<T>> {
    let mut sorted: Vec<&Sourced<T>> = items.iter().collect();
    sorted.sort_by(|a, b| {
        id(&a.record)
            .cmp(id(&b.record))
            .then_with(|| a.profile.cmp(&b.profile))
    });
    sorted
}

/// Element-name lookup that records every network element the case uses.
struct ElementNames<'r> {
    names: BTreeMap<&'r str, &'r str>,
    used: BTreeMap<String, String>,
}

impl<'r> ElementNames<'r> {
    fn new(records: &'r RecordSet) -> Self {
        Self {
            names: records
                .equipment
                .iter()
                .filter_map(|e| e.name.as_deref().map(|name| (e.id.as_str(), name)))
                .collect(),
            used: BTreeMap::new(),
        }
    }

    /// Resolve a network element and return its internal id.
    fn resolve(&mut self, index: &ReferenceIndex, id: &str, referenced_by: &str) -> Result<String> {
        let entry = index.resolve(ElementKind::NetworkElement, id, referenced_by)?;
        let internal = entry
            .internal_id
            .clone()
            .unwrap_or_else(|| format!("_{id}"));
        let name = self.names.get(id).copied().unwrap_or(id);
        self.used.insert(internal.clone(), name.to_owned());
        Ok(internal)
    }
}

struct CnecDraft<'r> {
    assessed_element: &'r str,
    name: String,
    operator: Option<String>,
    element: &'r str,
    element_internal: String,
    instant: Instant,
    contingency: Option<(String, String, String)>,
    optimized: bool,
    monitored: bool,
}

/// Build the internal case for `case_id` from the merged records of all its documents.
pub fn build_case(
    case_id: &CaseId,
    records: &RecordSet,
    table: &ConversionTable,
    parameters: AppliedParameters,
    options: &BuildOptions,
) -> Result<BuiltCase> {
    let case = case_id.key();
    let index = define_all(&case, records);
    let mut names = ElementNames::new(records);

    let contingencies = build_contingencies(&index, records, options, &mut names)?;
    let drafts = draft_cnecs(&index, records, options, &mut names)?;

    let mut traces = Vec::with_capacity(drafts.len());
    let mut flow_cnecs = Vec::with_capacity(drafts.len());
    for (position, draft) in drafts.into_iter().enumerate() {
        let id = format!("cnec_{:04}", position + 1);
        let limit = table.flow_limit(&case, draft.element, draft.assessed_element, draft.instant)?;
        traces.push(CnecTrace {
            internal_id: id.clone(),
            assessed_element: draft.assessed_element.to_owned(),
            contingency: draft.contingency.as_ref().map(|(std, _, _)| std.clone()),
            instant: draft.instant,
        });
        flow_cnecs.push(FlowCnec {
            id,
            name: draft.name,
            network_element_id: draft.element_internal,
            operator: draft.operator,
            instant: draft.instant,
            contingency_id: draft.contingency.map(|(_, internal, _)| internal),
            optimized: draft.optimized,
            monitored: draft.monitored,
            thresholds: vec![Threshold::symmetric_megawatt(limit.megawatt)],
            nominal_v: table.voltage_kv(draft.element).into_iter().collect(),
        });
    }

    let network_actions = build_network_actions(&case, &index, records, &traces, &mut names)?;
    let glsk = build_glsk(&index, records, &mut names)?;

    let internal = InternalCase {
        kind: CRAC_TYPE.to_owned(),
        version: CRAC_VERSION.to_owned(),
        id: case.clone(),
        name: case.clone(),
        instants: InstantDefinition::standard(),
        ra_usage_limits_per_instant: Vec::new(),
        network_elements_name_per_id: names.used,
        contingencies,
        flow_cnecs,
        network_actions,
        glsk,
        parameters,
    };
    let digest = internal.digest()?;

    let mut index = index;
    index.register_cnecs(traces);

    info!(
        case = %case,
        contingencies = internal.contingencies.len(),
        cnecs = internal.flow_cnecs.len(),
        network_actions = internal.network_actions.len(),
        digest = %digest,
        "internal case built"
    );

    Ok(BuiltCase {
        case: Arc::new(internal),
        index: Arc::new(index),
        digest,
    })
}

fn define_all(case: &str, records: &RecordSet) -> ReferenceIndex {
    let mut builder = IndexBuilder::new(case);
    for equipment in &records.equipment {
        builder.define(
            ElementKind::NetworkElement,
            equipment.id.as_str(),
            equipment.profile.as_str(),
            true,
        );
    }
    for contingency in &records.contingencies {
        if !contingency.must_study {
            debug!(contingency = %contingency.id, "contingency excluded: normalMustStudy is false");
        }
        builder.define(
            ElementKind::Contingency,
            contingency.id.as_str(),
            contingency.profile.as_str(),
            contingency.must_study,
        );
    }
    for element in &records.assessed_elements {
        builder.define(
            ElementKind::AssessedElement,
            element.id.as_str(),
            element.profile.as_str(),
            element.enabled,
        );
    }
    let altered: BTreeSet<&str> = records
        .alterations
        .iter()
        .map(|a| a.remedial_action.as_str())
        .collect();
    for action in &records.remedial_actions {
        let active = altered.contains(action.id.as_str());
        if !active {
            warn!(
                case,
                remedial_action = %action.id,
                profile = %action.profile,
                "remedial action has no grid state alterations; skipped"
            );
        }
        builder.define(
            ElementKind::RemedialAction,
            action.id.as_str(),
            action.profile.as_str(),
            active,
        );
    }
    for alteration in &records.alterations {
        builder.define(
            ElementKind::Alteration,
            alteration.id.as_str(),
            alteration.profile.as_str(),
            false,
        );
    }
    builder.finish()
}

fn contingency_selected(options: &BuildOptions, id: &str) -> bool {
    options
        .contingency_filter
        .as_ref()
        .map_or(true, |filter| filter.contains(id))
}

fn build_contingencies(
    index: &ReferenceIndex,
    records: &RecordSet,
    options: &BuildOptions,
    names: &mut ElementNames<'_>,
) -> Result<Vec<CaseContingency>> {
    if let Some(filter) = &options.contingency_filter {
        for id in filter {
            index.resolve(ElementKind::Contingency, id, "contingency filter")?;
        }
    }

    let mut elements: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for link in sorted_by_id(&records.contingency_equipment, |r| r.id.as_str()) {
        let contingency = index.resolve(ElementKind::Contingency, &link.contingency, &link.id)?;
        let element = names.resolve(index, &link.equipment, &link.id)?;
        if contingency.internal_id.is_some() {
            elements
                .entry(contingency.standardized_id.clone())
                .or_default()
                .insert(element);
        }
    }

    let labels: BTreeMap<&str, &str> = records
        .contingencies
        .iter()
        .filter_map(|c| c.name.as_deref().map(|name| (c.id.as_str(), name)))
        .collect();

    let mut contingencies = Vec::new();
    for entry in index.active(ElementKind::Contingency) {
        let id = entry.standardized_id.as_str();
        if !contingency_selected(options, id) {
            continue;
        }
        contingencies.push(CaseContingency {
            id: entry.internal_id.clone().unwrap_or_default(),
            name: labels.get(id).copied().unwrap_or(id).to_owned(),
            network_elements_ids: elements
                .remove(id)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default(),
        });
    }
    // Internal ids follow standardized order, which `active` already yields.
    Ok(contingencies)
}

fn draft_cnecs<'r>(
    index: &ReferenceIndex,
    records: &'r RecordSet,
    options: &BuildOptions,
    names: &mut ElementNames<'r>,
) -> Result<Vec<CnecDraft<'r>>> {
    let mut linked: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for link in sorted_by_id(&records.element_contingencies, |r| r.id.as_str()) {
        index.resolve(ElementKind::AssessedElement, &link.assessed_element, &link.id)?;
        let contingency = index.resolve(ElementKind::Contingency, &link.contingency, &link.id)?;
        if link.enabled {
            linked
                .entry(link.assessed_element.clone())
                .or_default()
                .insert(contingency.standardized_id.clone());
        }
    }

    let contingency_names: BTreeMap<&str, &str> = records
        .contingencies
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_deref().unwrap_or(c.id.as_str())))
        .collect();
    let studied: Vec<(String, String)> = index
        .active(ElementKind::Contingency)
        .filter(|entry| contingency_selected(options, &entry.standardized_id))
        .map(|entry| {
            (
                entry.standardized_id.clone(),
                entry.internal_id.clone().unwrap_or_default(),
            )
        })
        .collect();

    let mut drafts = Vec::new();
    for element in sorted_by_id(&records.assessed_elements, |r| r.id.as_str()) {
        let entry = index.resolve(ElementKind::AssessedElement, &element.id, &element.id)?;
        let element_internal = names.resolve(index, &element.equipment, &element.id)?;
        if entry.internal_id.is_none() {
            debug!(assessed_element = %element.id, "assessed element disabled; no CNEC created");
            continue;
        }
        let label = element.name.clone().unwrap_or_else(|| element.id.clone());
        let draft = |instant: Instant, contingency: Option<(String, String, String)>| {
            let name = match &contingency {
                Some((_, _, contingency_name)) => {
                    format!("{label} - {contingency_name} - {}", instant.as_str())
                }
                None => format!("{label} - {}", instant.as_str()),
            };
            CnecDraft {
                assessed_element: element.id.as_str(),
                name,
                operator: element.operator.clone(),
                element: element.equipment.as_str(),
                element_internal: element_internal.clone(),
                instant,
                contingency,
                optimized: element.optimized || !element.monitored,
                monitored: element.monitored,
            }
        };

        if element.in_base_case {
            drafts.push(draft(Instant::Preventive, None));
        }
        let curative: Vec<&(String, String)> = match linked.get(&element.id) {
            Some(links) => studied.iter().filter(|(id, _)| links.contains(id)).collect(),
            None => studied.iter().collect(),
        };
        for (id, internal) in curative {
            let name = contingency_names.get(id.as_str()).copied().unwrap_or(id.as_str());
            drafts.push(draft(
                Instant::Curative,
                Some((id.clone(), internal.clone(), name.to_owned())),
            ));
        }
    }
    Ok(drafts)
}

fn build_network_actions(
    case: &str,
    index: &ReferenceIndex,
    records: &RecordSet,
    cnecs: &[CnecTrace],
    names: &mut ElementNames<'_>,
) -> Result<Vec<NetworkAction>> {
    let mut ranges: BTreeMap<&str, f64> = BTreeMap::new();
    for range in sorted_by_id(&records.property_ranges, |r| r.id.as_str()) {
        index.resolve(ElementKind::Alteration, &range.alteration, &range.id)?;
        if ranges.contains_key(range.alteration.as_str()) {
            warn!(
                case,
                alteration = %range.alteration,
                range = %range.id,
                "alteration carries more than one property range; keeping the first"
            );
            continue;
        }
        ranges.insert(range.alteration.as_str(), range.normal_value);
    }

    let mut topology: BTreeMap<String, Vec<TerminalsAction>> = BTreeMap::new();
    let mut shunts: BTreeMap<String, Vec<ShuntPositionAction>> = BTreeMap::new();
    for alteration in sorted_by_id(&records.alterations, |r| r.id.as_str()) {
        let action = index.resolve(
            ElementKind::RemedialAction,
            &alteration.remedial_action,
            &alteration.id,
        )?;
        let owner = action.standardized_id.clone();
        match &alteration.kind {
            AlterationKind::Topology { equipment } => {
                let element = names.resolve(index, equipment, &alteration.id)?;
                let action_type = match ranges.get(alteration.id.as_str()) {
                    Some(value) if *value == 0.0 => SwitchAction::Close,
                    _ => SwitchAction::Open,
                };
                topology.entry(owner).or_default().push(TerminalsAction {
                    network_element_id: element,
                    action_type,
                });
            }
            AlterationKind::ShuntSections { shunt } => {
                let element = names.resolve(index, shunt, &alteration.id)?;
                let value = ranges.get(alteration.id.as_str()).ok_or_else(|| {
                    BuildError::InvalidRemedialAction {
                        case: case.to_owned(),
                        remedial_action: owner.clone(),
                        reason: format!(
                            "shunt compensator modification {} has no normalValue for its section count",
                            alteration.id
                        ),
                    }
                })?;
                shunts.entry(owner).or_default().push(ShuntPositionAction {
                    network_element_id: element,
                    section_count: value.round() as i64,
                });
            }
        }
    }

    let mut contingency_links: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for link in sorted_by_id(&records.contingency_remedial_actions, |r| r.id.as_str()) {
        let contingency = index.resolve(ElementKind::Contingency, &link.contingency, &link.id)?;
        let action = index.resolve(ElementKind::RemedialAction, &link.remedial_action, &link.id)?;
        if let Some(contingency) = &contingency.internal_id {
            contingency_links
                .entry(action.standardized_id.clone())
                .or_default()
                .insert(contingency.clone());
        }
    }

    let mut constraint_links: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for link in sorted_by_id(&records.element_remedial_actions, |r| r.id.as_str()) {
        index.resolve(ElementKind::AssessedElement, &link.assessed_element, &link.id)?;
        let action = index.resolve(ElementKind::RemedialAction, &link.remedial_action, &link.id)?;
        if link.enabled {
            constraint_links
                .entry(action.standardized_id.clone())
                .or_default()
                .insert(link.assessed_element.clone());
        }
    }

    let definitions: BTreeMap<&str, &Sourced<rao_profiles::RemedialActionRecord>> = records
        .remedial_actions
        .iter()
        .map(|r| (r.id.as_str(), r))
        .collect();

    let mut actions = Vec::new();
    for entry in index.active(ElementKind::RemedialAction) {
        let id = entry.standardized_id.as_str();
        let Some(record) = definitions.get(id) else {
            continue;
        };
        let instant = match record.instant {
            Instant::Preventive | Instant::Curative => record.instant,
            Instant::Outage => {
                return Err(BuildError::InvalidRemedialAction {
                    case: case.to_owned(),
                    remedial_action: id.to_owned(),
                    reason: "remedial actions cannot apply in the outage instant".to_owned(),
                })
            }
        };

        let mut on_instant = Vec::new();
        let mut on_state = Vec::new();
        match (instant, contingency_links.get(id)) {
            (Instant::Curative, Some(contingencies)) => {
                for contingency in contingencies {
                    on_state.push(OnContingencyStateRule {
                        instant,
                        contingency_id: contingency.clone(),
                        usage_method: USAGE_AVAILABLE.to_owned(),
                    });
                }
            }
            (_, links) => {
                if links.is_some() {
                    debug!(remedial_action = id, "contingency link ignored for preventive action");
                }
                on_instant.push(OnInstantRule {
                    instant,
                    usage_method: USAGE_AVAILABLE.to_owned(),
                });
            }
        }

        let mut on_constraint = Vec::new();
        if let Some(elements) = constraint_links.get(id) {
            for trace in cnecs {
                if trace.instant == instant && elements.contains(&trace.assessed_element) {
                    on_constraint.push(OnConstraintRule {
                        instant,
                        flow_cnec_id: trace.internal_id.clone(),
                        usage_method: USAGE_AVAILABLE.to_owned(),
                    });
                }
            }
        }

        let mut terminals = topology.remove(id).unwrap_or_default();
        terminals.sort_by(|a, b| a.network_element_id.cmp(&b.network_element_id));
        let mut sections = shunts.remove(id).unwrap_or_default();
        sections.sort_by(|a, b| a.network_element_id.cmp(&b.network_element_id));

        actions.push(NetworkAction {
            id: entry.internal_id.clone().unwrap_or_default(),
            name: record.name.clone().unwrap_or_else(|| id.to_owned()),
            operator: record.operator.clone(),
            on_instant_usage_rules: on_instant,
            on_contingency_state_usage_rules: on_state,
            on_constraint_usage_rules: on_constraint,
            terminals_connection_actions: terminals,
            shunt_compensator_position_actions: sections,
        });
    }
    Ok(actions)
}

fn build_glsk(
    index: &ReferenceIndex,
    records: &RecordSet,
    names: &mut ElementNames<'_>,
) -> Result<BTreeMap<String, Vec<ShiftKey>>> {
    let mut areas: BTreeMap<String, Vec<ShiftKey>> = BTreeMap::new();
    for key in sorted_by_id(&records.shift_keys, |r| r.id.as_str()) {
        let element = names.resolve(index, &key.equipment, &key.id)?;
        areas.entry(key.area.clone()).or_default().push(ShiftKey {
            network_element_id: element,
            factor: key.factor,
        });
    }
    for keys in areas.values_mut() {
        keys.sort_by(|a, b| {
            a.network_element_id
                .cmp(&b.network_element_id)
                .then_with(|| a.factor.total_cmp(&b.factor))
        });
    }
    Ok(areas)
}
