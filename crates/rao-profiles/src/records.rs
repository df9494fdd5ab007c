//! ---
//! rao_section: "02-profile-conversion"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Exchange profile reading and validation."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// A record together with the document that defined it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub profile: String,
    pub record: T,
}

impl<T> Sourced<T> {
    pub fn new(profile: impl Into<String>, record: T) -> Self {
        Self {
            profile: profile.into(),
            record,
        }
    }
}

impl<T> Deref for Sourced<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContingencyKind {
    Ordinary,
    Exceptional,
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyRecord {
    pub id: String,
    pub name: Option<String>,
    pub kind: ContingencyKind,
    pub must_study: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyEquipmentRecord {
    pub id: String,
    pub contingency: String,
    pub equipment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessedElementRecord {
    pub id: String,
    pub name: Option<String>,
    pub operator: Option<String>,
    pub equipment: String,
    pub enabled: bool,
    pub in_base_case: bool,
    /// `SecuredForRegion` present: the element is optimised.
    pub optimized: bool,
    /// `ScannedForRegion` present: the element is only monitored.
    pub monitored: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessedElementWithContingencyRecord {
    pub id: String,
    pub assessed_element: String,
    pub contingency: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessedElementWithRemedialActionRecord {
    pub id: String,
    pub assessed_element: String,
    pub remedial_action: String,
    pub enabled: bool,
}

/// Instant in which a remedial action or a CNEC applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instant {
    Preventive,
    Outage,
    Curative,
}

impl Instant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Instant::Preventive => "preventive",
            Instant::Outage => "outage",
            Instant::Curative => "curative",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "preventive" => Some(Instant::Preventive),
            "outage" => Some(Instant::Outage),
            "curative" => Some(Instant::Curative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemedialActionRecord {
    pub id: String,
    pub name: Option<String>,
    pub operator: Option<String>,
    pub instant: Instant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AlterationKind {
    Topology { equipment: String },
    ShuntSections { shunt: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterationRecord {
    pub id: String,
    pub remedial_action: String,
    pub kind: AlterationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRangeRecord {
    pub id: String,
    pub alteration: String,
    pub normal_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyWithRemedialActionRecord {
    pub id: String,
    pub contingency: String,
    pub remedial_action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftKeyRecord {
    pub id: String,
    pub area: String,
    pub equipment: String,
    pub factor: f64,
}

/// Network equipment declared in a flow-limit (CGM) fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    pub id: String,
    pub name: Option<String>,
    pub class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalRecord {
    pub id: String,
    pub equipment: String,
    pub node: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitSetRecord {
    pub id: String,
    pub terminal: Option<String>,
    pub equipment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitUnit {
    Ampere,
    Megawatt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitRecord {
    pub id: String,
    pub set: String,
    pub limit_type: String,
    pub value: f64,
    pub unit: LimitUnit,
}

/// Permanent or temporary admissible transmission loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitDuration {
    Patl,
    Tatl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitTypeRecord {
    pub id: String,
    pub duration: LimitDuration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageRecord {
    pub id: String,
    pub node: String,
    pub kv: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerFlowResultRecord {
    pub id: String,
    pub assessed_element: String,
    pub contingency: Option<String>,
    pub instant: Instant,
    pub pre_margin_mw: f64,
    pub post_margin_mw: f64,
    pub violation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: String,
    pub remedial_action: String,
    pub contingency: Option<String>,
    pub instant: Instant,
}

/// All typed records produced from one or more documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    pub contingencies: Vec<Sourced<ContingencyRecord>>,
    pub contingency_equipment: Vec<Sourced<ContingencyEquipmentRecord>>,
    pub assessed_elements: Vec<Sourced<AssessedElementRecord>>,
    pub element_contingencies: Vec<Sourced<AssessedElementWithContingencyRecord>>,
    pub element_remedial_actions: Vec<Sourced<AssessedElementWithRemedialActionRecord>>,
    pub remedial_actions: Vec<Sourced<RemedialActionRecord>>,
    pub alterations: Vec<Sourced<AlterationRecord>>,
    pub property_ranges: Vec<Sourced<PropertyRangeRecord>>,
    pub contingency_remedial_actions: Vec<Sourced<ContingencyWithRemedialActionRecord>>,
    pub shift_keys: Vec<Sourced<ShiftKeyRecord>>,
    pub equipment: Vec<Sourced<EquipmentRecord>>,
    pub terminals: Vec<Sourced<TerminalRecord>>,
    pub limit_sets: Vec<Sourced<LimitSetRecord>>,
    pub limits: Vec<Sourced<LimitRecord>>,
    pub limit_types: Vec<Sourced<LimitTypeRecord>>,
    pub voltages: Vec<Sourced<VoltageRecord>>,
    pub flow_results: Vec<Sourced<PowerFlowResultRecord>>,
    pub schedules: Vec<Sourced<ScheduleRecord>>,
}

impl RecordSet {
    /// Append every record of `other`.
    pub fn extend(&mut self, other: RecordSet) {
        self.contingencies.extend(other.contingencies);
        self.contingency_equipment.extend(other.contingency_equipment);
        self.assessed_elements.extend(other.assessed_elements);
        self.element_contingencies.extend(other.element_contingencies);
        self.element_remedial_actions
            .extend(other.element_remedial_actions);
        self.remedial_actions.extend(other.remedial_actions);
        self.alterations.extend(other.alterations);
        self.property_ranges.extend(other.property_ranges);
        self.contingency_remedial_actions
            .extend(other.contingency_remedial_actions);
        self.shift_keys.extend(other.shift_keys);
        self.equipment.extend(other.equipment);
        self.terminals.extend(other.terminals);
        self.limit_sets.extend(other.limit_sets);
        self.limits.extend(other.limits);
        self.limit_types.extend(other.limit_types);
        self.voltages.extend(other.voltages);
        self.flow_results.extend(other.flow_results);
        self.schedules.extend(other.schedules);
    }

    pub fn len(&self) -> usize {
        self.contingencies.len()
            + self.contingency_equipment.len()
            + self.assessed_elements.len()
            + self.element_contingencies.len()
            + self.element_remedial_actions.len()
            + self.remedial_actions.len()
            + self.alterations.len()
            + self.property_ranges.len()
            + self.contingency_remedial_actions.len()
            + self.shift_keys.len()
            + self.equipment.len()
            + self.terminals.len()
            + self.limit_sets.len()
            + self.limits.len()
            + self.limit_types.len()
            + self.voltages.len()
            + self.flow_results.len()
            + self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
