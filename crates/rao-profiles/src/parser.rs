//! ---
//! rao_section: "02-profile-conversion"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Exchange profile reading and validation."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::document::{ProfileDocument, ProfileHeader, ProfileMeta, ProfileType, ValidityWindow};
use crate::errors::{ProfileError, Result};
use crate::rdf::{read_graph, RdfObject};
use crate::records::*;

/// Flow-limit classes treated as network equipment.
pub const EQUIPMENT_CLASSES: &[&str] = &[
    "ACLineSegment",
    "PowerTransformer",
    "Breaker",
    "Switch",
    "Disconnector",
    "LinearShuntCompensator",
    "SynchronousMachine",
    "EnergyConsumer",
];

/// Outcome of parsing one document.
#[derive(Debug, Clone)]
pub struct ParsedProfile {
    pub meta: ProfileMeta,
    pub header: ProfileHeader,
    pub records: RecordSet,
    /// Objects of classes this profile type does not use.
    pub ignored: usize,
}

/// Validate and parse one document for a case targeting `target`.
///
/// Structural checks run first (syntax, root, header, identifiers, keyword),
/// then the declared and header validity windows, then typed record
/// extraction.
pub fn parse_profile(document: &ProfileDocument, target: DateTime<Utc>) -> Result<ParsedProfile> {
    let meta = &document.meta;
    let profile = meta.id.as_str();

    let xml = std::str::from_utf8(&document.payload)
        .map_err(|err| ProfileError::malformed(profile, "document", format!("not UTF-8: {err}")))?;
    let graph = read_graph(profile, xml)?;
    let header_object = graph
        .header
        .as_ref()
        .ok_or_else(|| ProfileError::malformed(profile, "FullModel", "missing FullModel header"))?;
    let header = parse_header(profile, header_object)?;

    match ProfileType::from_keyword(&header.keyword) {
        Some(found) if found == meta.profile_type => {}
        _ => {
            return Err(ProfileError::malformed(
                profile,
                header.model_id.clone(),
                format!(
                    "header keyword '{}' does not match declared type {}",
                    header.keyword, meta.profile_type
                ),
            ))
        }
    }

    for window in [meta.validity, header.validity] {
        if !window.covers(target) {
            return Err(ProfileError::Stale {
                profile: profile.to_owned(),
                window,
                target,
            });
        }
    }

    let mut records = RecordSet::default();
    let mut ignored = 0usize;
    for object in &graph.objects {
        let view = ObjectView { profile, object };
        if !view.extract(meta.profile_type, &mut records)? {
            ignored += 1;
        }
    }

    debug!(
        profile,
        profile_type = %meta.profile_type,
        records = records.len(),
        ignored,
        "profile parsed"
    );

    Ok(ParsedProfile {
        meta: meta.clone(),
        header,
        records,
        ignored,
    })
}

fn parse_header(profile: &str, header: &RdfObject) -> Result<ProfileHeader> {
    let view = ObjectView {
        profile,
        object: header,
    };
    let keyword = view.required_literal("keyword")?.to_owned();
    let start = view.required_timestamp("startDate")?;
    let end = view.required_timestamp("endDate")?;
    let validity = ValidityWindow::new(start, end).ok_or_else(|| {
        ProfileError::malformed(profile, header.about.clone(), "startDate is not before endDate")
    })?;
    let publisher = view
        .object
        .value("publisher")
        .or_else(|| view.object.value("modelingAuthoritySet"))
        .map(|value| match value {
            crate::rdf::RdfValue::Literal(text) | crate::rdf::RdfValue::Resource(text) => {
                text.clone()
            }
        });
    Ok(ProfileHeader {
        model_id: header.about.clone(),
        keyword,
        validity,
        scenario_time: view.optional_timestamp("scenarioTime")?,
        created: view.optional_timestamp("created")?,
        version: view.object.literal("version").map(str::to_owned),
        publisher,
    })
}

struct ObjectView<'a> {
    profile: &'a str,
    object: &'a RdfObject,
}

impl<'a> ObjectView<'a> {
    fn error(&self, reason: impl Into<String>) -> ProfileError {
        ProfileError::malformed(self.profile, self.object.about.clone(), reason)
    }

    /// Standardised identifier: `mRID` when present, otherwise the RDF id.
    fn id(&self) -> String {
        self.object
            .literal("mRID")
            .map(str::to_owned)
            .unwrap_or_else(|| self.object.about.clone())
    }

    fn name(&self) -> Option<String> {
        self.object.literal("name").map(str::to_owned)
    }

    fn required_literal(&self, property: &str) -> Result<&'a str> {
        self.object
            .literal(property)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| self.error(format!("missing property {property}")))
    }

    fn required_reference(&self, property: &str) -> Result<String> {
        self.object
            .resource(property)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| self.error(format!("missing reference {property}")))
    }

    fn optional_reference(&self, property: &str) -> Option<String> {
        self.object.resource(property).map(str::to_owned)
    }

    fn boolean(&self, property: &str, absent: bool) -> Result<bool> {
        match self.object.literal(property) {
            None => Ok(absent),
            Some(raw) if raw.eq_ignore_ascii_case("true") => Ok(true),
            Some(raw) if raw.eq_ignore_ascii_case("false") => Ok(false),
            Some(raw) => Err(self.error(format!("{property} is not a boolean: '{raw}'"))),
        }
    }

    fn number(&self, property: &str) -> Result<f64> {
        let raw = self.required_literal(property)?;
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| self.error(format!("{property} is not a number: '{raw}'")))
    }

    fn required_timestamp(&self, property: &str) -> Result<DateTime<Utc>> {
        let raw = self.required_literal(property)?;
        self.timestamp(property, raw)
    }

    fn optional_timestamp(&self, property: &str) -> Result<Option<DateTime<Utc>>> {
        self.object
            .literal(property)
            .map(|raw| self.timestamp(property, raw))
            .transpose()
    }

    fn timestamp(&self, property: &str, raw: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|err| self.error(format!("{property} is not RFC 3339: {err}")))
    }

    fn instant(&self, property: &str) -> Result<Instant> {
        let raw = self
            .object
            .enumeration(property)
            .ok_or_else(|| self.error(format!("missing property {property}")))?;
        Instant::parse(raw).ok_or_else(|| self.error(format!("{property} has unknown instant '{raw}'")))
    }

    fn sourced<T>(&self, record: T) -> Sourced<T> {
        Sourced::new(self.profile, record)
    }

    /// Push the record for this object; `false` when the class is not used by `profile_type`.
    fn extract(&self, profile_type: ProfileType, records: &mut RecordSet) -> Result<bool> {
        let class = self.object.class.as_str();
        match (profile_type, class) {
            (
                ProfileType::Contingency,
                "Contingency" | "OrdinaryContingency" | "ExceptionalContingency",
            ) => {
                let kind = match class {
                    "OrdinaryContingency" => ContingencyKind::Ordinary,
                    "ExceptionalContingency" => ContingencyKind::Exceptional,
                    _ => ContingencyKind::Unspecified,
                };
                records.contingencies.push(self.sourced(ContingencyRecord {
                    id: self.id(),
                    name: self.name(),
                    kind,
                    must_study: self.boolean("normalMustStudy", true)?,
                }));
            }
            (ProfileType::Contingency, "ContingencyEquipment") => {
                records
                    .contingency_equipment
                    .push(self.sourced(ContingencyEquipmentRecord {
                        id: self.id(),
                        contingency: self.required_reference("ContingencyElement.Contingency")?,
                        equipment: self.required_reference("ContingencyEquipment.Equipment")?,
                    }));
            }
            (ProfileType::AssessedElement, "AssessedElement") => {
                records.assessed_elements.push(self.sourced(AssessedElementRecord {
                    id: self.id(),
                    name: self.name(),
                    operator: self.optional_reference("AssessedSystemOperator"),
                    equipment: self.required_reference("AssessedElement.ConductingEquipment")?,
                    enabled: self.boolean("normalEnabled", true)?,
                    in_base_case: self.boolean("inBaseCase", false)?,
                    optimized: self.object.value("SecuredForRegion").is_some(),
                    monitored: self.object.value("ScannedForRegion").is_some(),
                }));
            }
            (ProfileType::AssessedElement, "AssessedElementWithContingency") => {
                records
                    .element_contingencies
                    .push(self.sourced(AssessedElementWithContingencyRecord {
                        id: self.id(),
                        assessed_element: self
                            .required_reference("AssessedElementWithContingency.AssessedElement")?,
                        contingency: self
                            .required_reference("AssessedElementWithContingency.Contingency")?,
                        enabled: self.boolean("normalEnabled", true)?,
                    }));
            }
            (ProfileType::AssessedElement, "AssessedElementWithRemedialAction") => {
                records
                    .element_remedial_actions
                    .push(self.sourced(AssessedElementWithRemedialActionRecord {
                        id: self.id(),
                        assessed_element: self.required_reference(
                            "AssessedElementWithRemedialAction.AssessedElement",
                        )?,
                        remedial_action: self.required_reference(
                            "AssessedElementWithRemedialAction.RemedialAction",
                        )?,
                        enabled: self.boolean("normalEnabled", true)?,
                    }));
            }
            (ProfileType::RemedialAction, "GridStateAlterationRemedialAction") => {
                records.remedial_actions.push(self.sourced(RemedialActionRecord {
                    id: self.id(),
                    name: self.name(),
                    operator: self.optional_reference("RemedialActionSystemOperator"),
                    instant: self.instant("RemedialAction.kind")?,
                }));
            }
            (ProfileType::RemedialAction, "TopologyAction") => {
                records.alterations.push(self.sourced(AlterationRecord {
                    id: self.id(),
                    remedial_action: self
                        .required_reference("GridStateAlteration.GridStateAlterationRemedialAction")?,
                    kind: AlterationKind::Topology {
                        equipment: self.required_reference("TopologyAction.Equipment")?,
                    },
                }));
            }
            (ProfileType::RemedialAction, "ShuntCompensatorModification") => {
                records.alterations.push(self.sourced(AlterationRecord {
                    id: self.id(),
                    remedial_action: self
                        .required_reference("GridStateAlteration.GridStateAlterationRemedialAction")?,
                    kind: AlterationKind::ShuntSections {
                        shunt: self
                            .required_reference("ShuntCompensatorModification.ShuntCompensator")?,
                    },
                }));
            }
            (ProfileType::RemedialAction, "StaticPropertyRange") => {
                records.property_ranges.push(self.sourced(PropertyRangeRecord {
                    id: self.id(),
                    alteration: self.required_reference("RangeConstraint.GridStateAlteration")?,
                    normal_value: self.number("RangeConstraint.normalValue")?,
                }));
            }
            (ProfileType::RemedialAction, "ContingencyWithRemedialAction") => {
                records
                    .contingency_remedial_actions
                    .push(self.sourced(ContingencyWithRemedialActionRecord {
                        id: self.id(),
                        contingency: self.required_reference("ContingencyWithRemedialAction.Contingency")?,
                        remedial_action: self
                            .required_reference("ContingencyWithRemedialAction.RemedialAction")?,
                    }));
            }
            (ProfileType::Glsk, "PowerShiftKey") => {
                records.shift_keys.push(self.sourced(ShiftKeyRecord {
                    id: self.id(),
                    area: self.required_literal("PowerShiftKey.area")?.to_owned(),
                    equipment: self.required_reference("PowerShiftKey.Equipment")?,
                    factor: self.number("PowerShiftKey.factor")?,
                }));
            }
            (ProfileType::FlowLimit, class) if EQUIPMENT_CLASSES.contains(&class) => {
                records.equipment.push(self.sourced(EquipmentRecord {
                    id: self.id(),
                    name: self.name(),
                    class: class.to_owned(),
                }));
            }
            (ProfileType::FlowLimit, "Terminal") => {
                records.terminals.push(self.sourced(TerminalRecord {
                    id: self.id(),
                    equipment: self.required_reference("Terminal.ConductingEquipment")?,
                    node: self.optional_reference("Terminal.TopologicalNode"),
                }));
            }
            (ProfileType::FlowLimit, "OperationalLimitSet") => {
                let terminal = self.optional_reference("OperationalLimitSet.Terminal");
                let equipment = self.optional_reference("OperationalLimitSet.Equipment");
                if terminal.is_none() && equipment.is_none() {
                    return Err(self.error("limit set references neither a terminal nor equipment"));
                }
                records.limit_sets.push(self.sourced(LimitSetRecord {
                    id: self.id(),
                    terminal,
                    equipment,
                }));
            }
            (ProfileType::FlowLimit, "CurrentLimit" | "ActivePowerLimit") => {
                let (unit, value) = if class == "CurrentLimit" {
                    (LimitUnit::Ampere, self.limit_value("CurrentLimit")?)
                } else {
                    (LimitUnit::Megawatt, self.limit_value("ActivePowerLimit")?)
                };
                records.limits.push(self.sourced(LimitRecord {
                    id: self.id(),
                    set: self.required_reference("OperationalLimit.OperationalLimitSet")?,
                    limit_type: self.required_reference("OperationalLimit.OperationalLimitType")?,
                    value,
                    unit,
                }));
            }
            (ProfileType::FlowLimit, "OperationalLimitType") => {
                let kind = self
                    .object
                    .enumeration("OperationalLimitType.limitType")
                    .ok_or_else(|| self.error("missing property OperationalLimitType.limitType"))?;
                let duration = match kind.to_ascii_lowercase().as_str() {
                    "patl" => LimitDuration::Patl,
                    "tatl" => LimitDuration::Tatl,
                    // Voltage and other limit kinds are outside flow monitoring.
                    _ => return Ok(false),
                };
                records.limit_types.push(self.sourced(LimitTypeRecord {
                    id: self.id(),
                    duration,
                }));
            }
            (ProfileType::FlowLimit, "SvVoltage") => {
                records.voltages.push(self.sourced(VoltageRecord {
                    id: self.id(),
                    node: self.required_reference("SvVoltage.TopologicalNode")?,
                    kv: self.number("SvVoltage.v")?,
                }));
            }
            (ProfileType::SecurityAssessmentResult, "PowerFlowResult") => {
                records.flow_results.push(self.sourced(PowerFlowResultRecord {
                    id: self.id(),
                    assessed_element: self.required_reference("PowerFlowResult.AssessedElement")?,
                    contingency: self.optional_reference("Contingency"),
                    instant: self.instant("PowerFlowResult.instant")?,
                    pre_margin_mw: self.number("preOptimisationMargin")?,
                    post_margin_mw: self.number("postOptimisationMargin")?,
                    violation: self.boolean("isViolation", false)?,
                }));
            }
            (ProfileType::SecurityAssessmentResult, "RemedialActionSchedule") => {
                records.schedules.push(self.sourced(ScheduleRecord {
                    id: self.id(),
                    remedial_action: self
                        .required_reference("RemedialActionSchedule.RemedialAction")?,
                    contingency: self.optional_reference("RemedialActionSchedule.Contingency"),
                    instant: self.instant("RemedialActionSchedule.instant")?,
                }));
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Limit magnitude from `<Class>.value`, falling back to `<Class>.normalValue`.
    fn limit_value(&self, class: &str) -> Result<f64> {
        let value = format!("{class}.value");
        if self.object.literal(&value).is_some() {
            self.number(&value)
        } else {
            self.number(&format!("{class}.normalValue"))
        }
    }
}
