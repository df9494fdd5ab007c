//! ---
//! rao_section: "04-model-building"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Internal case construction from parsed exchange profiles."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use rao_profiles::Instant;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CRAC_TYPE: &str = "CRAC";
pub const CRAC_VERSION: &str = "2.7";
pub const MEGAWATT: &str = "megawatt";
pub const USAGE_AVAILABLE: &str = "available";

/// CRAC-style case handed to the optimisation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalCase {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub id: String,
    pub name: String,
    pub instants: Vec<InstantDefinition>,
    #[serde(rename = "ra-usage-limits-per-instant", default)]
    pub ra_usage_limits_per_instant: Vec<serde_json::Value>,
    pub network_elements_name_per_id: BTreeMap<String, String>,
    pub contingencies: Vec<CaseContingency>,
    pub flow_cnecs: Vec<FlowCnec>,
    pub network_actions: Vec<NetworkAction>,
    /// Shift keys per bidding-zone area.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub glsk: BTreeMap<String, Vec<ShiftKey>>,
    pub parameters: AppliedParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantDefinition {
    pub id: String,
    pub kind: String,
}

impl InstantDefinition {
    pub fn standard() -> Vec<InstantDefinition> {
        [Instant::Preventive, Instant::Outage, Instant::Curative]
            .into_iter()
            .map(|instant| InstantDefinition {
                id: instant.as_str().to_owned(),
                kind: instant.as_str().to_ascii_uppercase(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseContingency {
    pub id: String,
    pub name: String,
    pub network_elements_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub side: u8,
}

impl Threshold {
    pub fn symmetric_megawatt(limit: f64) -> Self {
        Self {
            unit: MEGAWATT.to_owned(),
            min: -limit,
            max: limit,
            side: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowCnec {
    pub id: String,
    pub name: String,
    pub network_element_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    pub instant: Instant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contingency_id: Option<String>,
    pub optimized: bool,
    pub monitored: bool,
    pub thresholds: Vec<Threshold>,
    #[serde(rename = "nominalV", default, skip_serializing_if = "Vec::is_empty")]
    pub nominal_v: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchAction {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalsAction {
    pub network_element_id: String,
    pub action_type: SwitchAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuntPositionAction {
    pub network_element_id: String,
    pub section_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnInstantRule {
    pub instant: Instant,
    pub usage_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnContingencyStateRule {
    pub instant: Instant,
    pub contingency_id: String,
    pub usage_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnConstraintRule {
    pub instant: Instant,
    pub flow_cnec_id: String,
    pub usage_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAction {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_instant_usage_rules: Vec<OnInstantRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_contingency_state_usage_rules: Vec<OnContingencyStateRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_constraint_usage_rules: Vec<OnConstraintRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terminals_connection_actions: Vec<TerminalsAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shunt_compensator_position_actions: Vec<ShuntPositionAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftKey {
    pub network_element_id: String,
    pub factor: f64,
}

/// Parameter configuration the case was built against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedParameters {
    pub version: String,
    pub digest: String,
}

impl InternalCase {
    /// Serialized form handed to the engine; identical inputs give identical bytes.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Hex SHA-256 of [`InternalCase::to_json_bytes`].
    pub fn digest(&self) -> serde_json::Result<String> {
        Ok(hex::encode(Sha256::digest(self.to_json_bytes()?)))
    }

    pub fn flow_cnec(&self, id: &str) -> Option<&FlowCnec> {
        self.flow_cnecs.iter().find(|cnec| cnec.id == id)
    }

    pub fn network_action(&self, id: &str) -> Option<&NetworkAction> {
        self.network_actions.iter().find(|action| action.id == id)
    }

    pub fn contingency(&self, id: &str) -> Option<&CaseContingency> {
        self.contingencies.iter().find(|contingency| contingency.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_crac_field_names() {
        let case = InternalCase {
            kind: CRAC_TYPE.into(),
            version: CRAC_VERSION.into(),
            id: "20250602T1030Z_1D".into(),
            name: "20250602T1030Z_1D".into(),
            instants: InstantDefinition::standard(),
            ra_usage_limits_per_instant: Vec::new(),
            network_elements_name_per_id: BTreeMap::from([("_line-1".into(), "Line 1".into())]),
            contingencies: Vec::new(),
            flow_cnecs: vec![FlowCnec {
                id: "cnec_0001".into(),
                name: "Line 1 - preventive".into(),
                network_element_id: "_line-1".into(),
                operator: None,
                instant: Instant::Preventive,
                contingency_id: None,
                optimized: true,
                monitored: false,
                thresholds: vec![Threshold::symmetric_megawatt(500.0)],
                nominal_v: vec![400.0],
            }],
            network_actions: Vec::new(),
            glsk: BTreeMap::new(),
            parameters: AppliedParameters {
                version: "2.4".into(),
                digest: "abc".into(),
            },
        };
        let value = serde_json::to_value(&case).unwrap();
        assert_eq!(value["type"], "CRAC");
        assert!(value.get("ra-usage-limits-per-instant").is_some());
        assert_eq!(value["networkElementsNamePerId"]["_line-1"], "Line 1");
        assert_eq!(value["flowCnecs"][0]["networkElementId"], "_line-1");
        assert_eq!(value["flowCnecs"][0]["nominalV"][0], 400.0);
        assert_eq!(value["flowCnecs"][0]["thresholds"][0]["min"], -500.0);
        assert_eq!(value["instants"][2]["kind"], "CURATIVE");
        assert!(value.get("glsk").is_none());
        assert_eq!(case.digest().unwrap(), case.clone().digest().unwrap());
    }
}
